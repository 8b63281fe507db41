/// Disposition archive writes and lookups
pub mod archive;
/// Order code and pickup PIN generation
pub mod codes;
/// Package lot stock operations
pub mod ledger;
/// Order record store with conditional transitions
pub mod orders;
/// Read-only order projections
pub mod queries;
/// Reservation lifecycle orchestration
pub mod reservation;
/// Review lookups
pub mod reviews;
/// Expiration sweeper for unpaid reservations
pub mod sweeper;
