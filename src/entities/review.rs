//! Review entity - Minimal read model of buyer reviews.
//!
//! Reviews are owned by the review collaborator. The reservation engine only
//! asks whether a buyer has reviewed a business, to annotate its responses.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Review database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reviews")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Buyer who wrote the review
    #[sea_orm(indexed)]
    pub buyer_id: String,
    /// Business that was reviewed
    pub business_id: String,
    /// When the review was written
    pub created_at: DateTimeUtc,
}

/// `Review` has no relationships the engine navigates
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
