//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod disposition;
pub mod order;
pub mod package;
pub mod review;

// Re-export specific types to avoid conflicts
pub use disposition::{
    Column as DispositionColumn, DispositionActor, Entity as Disposition,
    Model as DispositionModel,
};
pub use order::{
    Column as OrderColumn, Entity as Order, Model as OrderModel, OrderStatus, PackageSnapshot,
    PaymentStatus,
};
pub use package::{Column as PackageColumn, Entity as Package, Model as PackageModel};
pub use review::{Column as ReviewColumn, Entity as Review, Model as ReviewModel};
