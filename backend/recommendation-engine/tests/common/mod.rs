#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use recommendation_engine::error::{EngineError, Result};
use recommendation_engine::models::{Item, ItemId, Rating, RatingValue, UserId};
use recommendation_engine::{InMemoryStore, InteractionStore};
use std::collections::BTreeSet;
use tokio::sync::Semaphore;

pub fn item(id: u64, tags: &[&str], mean: f64, members: u64) -> Item {
    Item {
        item_id: ItemId(id),
        name: format!("title-{}", id),
        feature_tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
        mean_score: mean,
        members,
    }
}

pub fn rating(user: u64, item: u64, score: u8) -> Rating {
    Rating {
        user_id: UserId(user),
        item_id: ItemId(item),
        score: RatingValue::Scored(score),
        observed_at: Utc::now(),
    }
}

/// 8 tagged items, 6 users with overlapping tastes, plus one registered
/// user (100) who never rated anything
pub fn catalog_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    let tags: [&[&str]; 8] = [
        &["action", "space"],
        &["action", "mecha"],
        &["space", "drama"],
        &["drama", "romance"],
        &["romance", "comedy"],
        &["comedy", "slice-of-life"],
        &["mystery", "drama"],
        &["mystery", "horror"],
    ];
    for (i, item_tags) in tags.iter().enumerate() {
        let id = i as u64 + 1;
        store.insert_item(item(id, item_tags, 6.0 + (id % 4) as f64, 100 * id));
    }

    for user in 1..=6u64 {
        for id in 1..=8u64 {
            if (user + id) % 3 == 0 {
                continue;
            }
            let score = ((user * 7 + id * 3) % 10 + 1) as u8;
            store.upsert_rating(rating(user, id, score));
        }
    }
    store.register_user(UserId(100));
    store
}

/// Store whose `list_ratings` blocks until the gate is opened, so a
/// retrain stays `running` for as long as a test needs
pub struct GatedStore {
    inner: InMemoryStore,
    gate: Semaphore,
}

impl GatedStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl InteractionStore for GatedStore {
    async fn list_ratings(&self) -> Result<Vec<Rating>> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| EngineError::Store(e.to_string()))?;
        self.inner.list_ratings().await
    }

    async fn list_items(&self) -> Result<Vec<Item>> {
        self.inner.list_items().await
    }

    async fn list_users(&self) -> Result<Vec<UserId>> {
        self.inner.list_users().await
    }

    async fn record_rating(&self, user_id: UserId, item_id: ItemId, score: RatingValue) -> Result<()> {
        self.inner.record_rating(user_id, item_id, score).await
    }

    async fn user_ratings(&self, user_id: UserId) -> Result<Vec<Rating>> {
        self.inner.user_ratings(user_id).await
    }

    async fn contains_user(&self, user_id: UserId) -> Result<bool> {
        self.inner.contains_user(user_id).await
    }
}
