// ============================================
// Interaction Store Gateway
// ============================================
//
// Narrow read/write access to users, catalog items and ratings.
// The engine only reads through this seam; the write path exists for
// callers that record new ratings.

mod memory;
mod snapshot;

pub use memory::{DatasetSnapshot, InMemoryStore};
pub use snapshot::RatingSnapshot;

use crate::error::Result;
use crate::models::{Item, ItemId, Rating, RatingValue, UserId};
use async_trait::async_trait;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Every rating row, unscored sentinel rows included
    async fn list_ratings(&self) -> Result<Vec<Rating>>;

    async fn list_items(&self) -> Result<Vec<Item>>;

    async fn list_users(&self) -> Result<Vec<UserId>>;

    async fn record_rating(&self, user_id: UserId, item_id: ItemId, score: RatingValue)
        -> Result<()>;

    async fn user_ratings(&self, user_id: UserId) -> Result<Vec<Rating>> {
        Ok(self
            .list_ratings()
            .await?
            .into_iter()
            .filter(|r| r.user_id == user_id)
            .collect())
    }

    async fn contains_user(&self, user_id: UserId) -> Result<bool> {
        Ok(self.list_users().await?.contains(&user_id))
    }

    async fn get_item(&self, item_id: ItemId) -> Result<Option<Item>> {
        Ok(self
            .list_items()
            .await?
            .into_iter()
            .find(|item| item.item_id == item_id))
    }
}
