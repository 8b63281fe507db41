//! Database configuration module.
//!
//! This module handles `SQLite` database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs without hand-written SQL.

use crate::entities::{Disposition, Order, Package, Review};
use crate::errors::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema};
use tracing::{debug, info};

/// Default database location when neither `config.toml` nor `DATABASE_URL` set one.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://surplus_orders.sqlite?mode=rwc";

/// Gets the database URL from the environment, falling back to `configured`.
#[must_use]
pub fn get_database_url(configured: Option<&str>) -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| {
        configured.map_or_else(|| DEFAULT_DATABASE_URL.to_string(), ToString::to_string)
    })
}

/// Establishes a connection to the database at `database_url`.
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    debug!("Connecting to database at {}", database_url);
    Database::connect(database_url).await.map_err(Into::into)
}

/// Creates all tables used by the reservation engine.
///
/// Lots are created before orders because orders reference them. Every table and
/// index statement is `IF NOT EXISTS`, so this is safe to run on every start.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let tables = [
        schema.create_table_from_entity(Package),
        schema.create_table_from_entity(Order),
        schema.create_table_from_entity(Disposition),
        schema.create_table_from_entity(Review),
    ];

    for mut table in tables {
        table.if_not_exists();
        db.execute(builder.build(&table)).await?;
    }

    let indexes = [
        schema.create_index_from_entity(Package),
        schema.create_index_from_entity(Order),
        schema.create_index_from_entity(Disposition),
        schema.create_index_from_entity(Review),
    ];

    for mut index in indexes.into_iter().flatten() {
        index.if_not_exists();
        db.execute(builder.build(&index)).await?;
    }

    info!("Database tables ensured (packages, orders, dispositions, reviews)");
    Ok(())
}
