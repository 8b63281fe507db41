//! Review lookups consumed from the review collaborator.
//!
//! Both lookups are read-only and only annotate responses; no order transition
//! depends on them.

use crate::{
    entities::{Review, review},
    errors::Result,
};
use async_trait::async_trait;
use sea_orm::{DatabaseConnection, QuerySelect, prelude::*};
use std::collections::HashSet;

/// Read access to buyer reviews.
#[async_trait]
pub trait ReviewLookup: Send + Sync {
    /// Whether `buyer_id` has reviewed `business_id`.
    async fn has_reviewed(&self, buyer_id: &str, business_id: &str) -> Result<bool>;

    /// Distinct businesses `buyer_id` has reviewed.
    async fn reviewed_business_ids(&self, buyer_id: &str) -> Result<HashSet<String>>;
}

/// [`ReviewLookup`] reading the `reviews` table.
#[derive(Debug, Clone)]
pub struct SeaOrmReviewLookup {
    db: DatabaseConnection,
}

impl SeaOrmReviewLookup {
    /// Creates a lookup over `db`.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReviewLookup for SeaOrmReviewLookup {
    async fn has_reviewed(&self, buyer_id: &str, business_id: &str) -> Result<bool> {
        let review = Review::find()
            .filter(review::Column::BuyerId.eq(buyer_id))
            .filter(review::Column::BusinessId.eq(business_id))
            .one(&self.db)
            .await?;
        Ok(review.is_some())
    }

    async fn reviewed_business_ids(&self, buyer_id: &str) -> Result<HashSet<String>> {
        let ids: Vec<String> = Review::find()
            .select_only()
            .column(review::Column::BusinessId)
            .distinct()
            .filter(review::Column::BuyerId.eq(buyer_id))
            .into_tuple()
            .all(&self.db)
            .await?;
        Ok(ids.into_iter().collect())
    }
}
