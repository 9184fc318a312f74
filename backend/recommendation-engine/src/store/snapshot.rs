use super::InteractionStore;
use crate::error::Result;
use crate::models::{Item, ItemId, Rating, ScoredRating, UserId, UserProfile};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::info;

/// Immutable view of the ratings a training run works from.
///
/// Read once at job start; concurrent writes to the store after that
/// point are not visible to the run.
#[derive(Debug, Clone)]
pub struct RatingSnapshot {
    ratings: Vec<ScoredRating>,
    items: Vec<Item>,
    unscored_rows: usize,
    taken_at: DateTime<Utc>,
}

impl RatingSnapshot {
    /// Resolve duplicates by latest observation, then drop unscored rows
    pub fn new(raw: Vec<Rating>, items: Vec<Item>) -> Self {
        let mut latest: HashMap<(UserId, ItemId), Rating> = HashMap::with_capacity(raw.len());
        for rating in raw {
            let key = (rating.user_id, rating.item_id);
            match latest.get(&key) {
                Some(existing) if existing.observed_at > rating.observed_at => {}
                _ => {
                    latest.insert(key, rating);
                }
            }
        }

        let mut unscored_rows = 0;
        let mut ratings: Vec<ScoredRating> = latest
            .into_values()
            .filter_map(|r| match r.score.score() {
                Some(score) => Some(ScoredRating {
                    user_id: r.user_id,
                    item_id: r.item_id,
                    score,
                }),
                None => {
                    unscored_rows += 1;
                    None
                }
            })
            .collect();
        ratings.sort_by_key(|r| (r.user_id, r.item_id));

        Self {
            ratings,
            items,
            unscored_rows,
            taken_at: Utc::now(),
        }
    }

    pub fn from_scored(ratings: Vec<ScoredRating>, items: Vec<Item>) -> Self {
        let mut ratings = ratings;
        ratings.sort_by_key(|r| (r.user_id, r.item_id));
        Self {
            ratings,
            items,
            unscored_rows: 0,
            taken_at: Utc::now(),
        }
    }

    pub async fn capture(store: &dyn InteractionStore) -> Result<Self> {
        let raw = store.list_ratings().await?;
        let items = store.list_items().await?;
        let snapshot = Self::new(raw, items);

        info!(
            ratings = snapshot.ratings.len(),
            unscored_rows = snapshot.unscored_rows,
            items = snapshot.items.len(),
            users = snapshot.user_count(),
            "Captured rating snapshot"
        );
        Ok(snapshot)
    }

    pub fn ratings(&self) -> &[ScoredRating] {
        &self.ratings
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn unscored_rows(&self) -> usize {
        self.unscored_rows
    }

    pub fn user_ids(&self) -> BTreeSet<UserId> {
        self.ratings.iter().map(|r| r.user_id).collect()
    }

    pub fn user_count(&self) -> usize {
        self.user_ids().len()
    }

    /// Scored ratings grouped per user
    pub fn profiles(&self) -> BTreeMap<UserId, UserProfile> {
        let mut profiles: BTreeMap<UserId, UserProfile> = BTreeMap::new();
        for rating in &self.ratings {
            let profile = profiles
                .entry(rating.user_id)
                .or_insert_with(|| UserProfile::new(rating.user_id));
            profile.ratings.insert(rating.item_id, rating.score);
            profile.interacted.insert(rating.item_id);
        }
        profiles
    }

    /// Same catalog, different ratings (used for train/test splits)
    pub fn with_ratings(&self, ratings: Vec<ScoredRating>) -> Self {
        Self::from_scored(ratings, self.items.clone())
    }
}
