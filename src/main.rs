use dotenvy::dotenv;
use surplus_orders::{
    Result, Sweeper,
    config::{self, database},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Load the main application configuration
    let app_config = config::load_app_configuration()
        .inspect_err(|e| error!("Critical error loading application configuration: {}", e))?;
    info!(
        prefix = %app_config.reservations.order_code_prefix,
        "Successfully processed application configuration."
    );

    // 4. Connect and make sure the schema exists
    let db = database::create_connection(&app_config.database_url)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to initialize database: {}", e))?;

    // 5. Run the expiration sweeper until Ctrl-C
    let shutdown = CancellationToken::new();
    let sweeper = Sweeper::new(db, app_config.sweeper);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown.cancel();

    if let Err(e) = sweeper_handle.await {
        error!("Sweeper task ended abnormally: {}", e);
    }
    Ok(())
}
