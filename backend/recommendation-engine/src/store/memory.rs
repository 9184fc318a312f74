use super::InteractionStore;
use crate::error::{EngineError, Result};
use crate::models::{Item, ItemId, Rating, RatingValue, UserId};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Dataset file layout consumed by [`InMemoryStore::from_dataset`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    #[serde(default)]
    pub items: Vec<Item>,
    /// Users known to the system, including those without ratings
    #[serde(default)]
    pub users: Vec<UserId>,
    #[serde(default)]
    pub ratings: Vec<Rating>,
}

impl DatasetSnapshot {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset snapshot {}", path.display()))?;
        let snapshot: DatasetSnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse dataset snapshot {}", path.display()))?;

        info!(
            path = %path.display(),
            items = snapshot.items.len(),
            users = snapshot.users.len(),
            ratings = snapshot.ratings.len(),
            "Loaded dataset snapshot"
        );
        Ok(snapshot)
    }
}

/// Concurrent in-process store; last write wins per (user, item)
#[derive(Default)]
pub struct InMemoryStore {
    items: DashMap<ItemId, Item>,
    users: DashSet<UserId>,
    ratings: DashMap<(UserId, ItemId), Rating>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dataset(dataset: DatasetSnapshot) -> Self {
        let store = Self::new();
        for item in dataset.items {
            store.items.insert(item.item_id, item);
        }
        for user_id in dataset.users {
            store.users.insert(user_id);
        }
        for rating in dataset.ratings {
            store.upsert_rating(rating);
        }
        store
    }

    pub fn insert_item(&self, item: Item) {
        self.items.insert(item.item_id, item);
    }

    pub fn register_user(&self, user_id: UserId) {
        self.users.insert(user_id);
    }

    /// Insert a rating row as-is, keeping whichever observation is newest
    pub fn upsert_rating(&self, rating: Rating) {
        self.users.insert(rating.user_id);
        match self.ratings.entry((rating.user_id, rating.item_id)) {
            Entry::Occupied(mut existing) => {
                if rating.observed_at >= existing.get().observed_at {
                    existing.insert(rating);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(rating);
            }
        }
    }

    pub fn rating_count(&self) -> usize {
        self.ratings.len()
    }
}

#[async_trait]
impl InteractionStore for InMemoryStore {
    async fn list_ratings(&self) -> Result<Vec<Rating>> {
        let mut ratings: Vec<Rating> = self.ratings.iter().map(|r| r.value().clone()).collect();
        ratings.sort_by_key(|r| (r.user_id, r.item_id));
        Ok(ratings)
    }

    async fn list_items(&self) -> Result<Vec<Item>> {
        let mut items: Vec<Item> = self.items.iter().map(|i| i.value().clone()).collect();
        items.sort_by_key(|i| i.item_id);
        Ok(items)
    }

    async fn list_users(&self) -> Result<Vec<UserId>> {
        let mut users: Vec<UserId> = self.users.iter().map(|u| *u).collect();
        users.sort();
        Ok(users)
    }

    async fn record_rating(
        &self,
        user_id: UserId,
        item_id: ItemId,
        score: RatingValue,
    ) -> Result<()> {
        if !self.items.contains_key(&item_id) {
            return Err(EngineError::UnknownItem(item_id));
        }

        debug!(user_id = %user_id, item_id = %item_id, score = ?score, "Recording rating");
        self.upsert_rating(Rating {
            user_id,
            item_id,
            score,
            observed_at: Utc::now(),
        });
        Ok(())
    }

    async fn user_ratings(&self, user_id: UserId) -> Result<Vec<Rating>> {
        let mut ratings: Vec<Rating> = self
            .ratings
            .iter()
            .filter(|entry| entry.key().0 == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        ratings.sort_by_key(|r| r.item_id);
        Ok(ratings)
    }

    async fn contains_user(&self, user_id: UserId) -> Result<bool> {
        Ok(self.users.contains(&user_id))
    }

    async fn get_item(&self, item_id: ItemId) -> Result<Option<Item>> {
        Ok(self.items.get(&item_id).map(|item| item.value().clone()))
    }
}
