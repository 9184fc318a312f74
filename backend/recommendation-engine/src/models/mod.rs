use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sentinel used on the wire for "interacted but unscored"
pub const UNSCORED_SENTINEL: i32 = -1;
pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 10;

/// A rating value: an integer score in [1, 10] or the unscored sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum RatingValue {
    Scored(u8),
    Unscored,
}

impl RatingValue {
    pub fn score(&self) -> Option<u8> {
        match self {
            RatingValue::Scored(s) => Some(*s),
            RatingValue::Unscored => None,
        }
    }
}

impl TryFrom<i32> for RatingValue {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        if value == UNSCORED_SENTINEL {
            return Ok(RatingValue::Unscored);
        }
        if (MIN_SCORE as i32..=MAX_SCORE as i32).contains(&value) {
            Ok(RatingValue::Scored(value as u8))
        } else {
            Err(format!(
                "rating score must be in [{}, {}] or {}, got {}",
                MIN_SCORE, MAX_SCORE, UNSCORED_SENTINEL, value
            ))
        }
    }
}

impl From<RatingValue> for i32 {
    fn from(value: RatingValue) -> Self {
        match value {
            RatingValue::Scored(s) => s as i32,
            RatingValue::Unscored => UNSCORED_SENTINEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub score: RatingValue,
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

/// A rating that carries a real score; the unit every training computation consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScoredRating {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: ItemId,
    pub name: String,
    #[serde(default)]
    pub feature_tags: BTreeSet<String>,
    /// Community mean score as published by the catalog
    #[serde(default)]
    pub mean_score: f64,
    /// Community size as published by the catalog
    #[serde(default)]
    pub members: u64,
}

impl Item {
    pub fn popularity_weight(&self) -> f64 {
        popularity_score(self.mean_score, self.members)
    }
}

/// `mean_rating * ln(members + 1)`
pub fn popularity_score(mean_rating: f64, members: u64) -> f64 {
    mean_rating * ((members as f64) + 1.0).ln()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Content,  // TF-IDF over feature tags
    ItemCf,   // item-item cosine
    UserCf,   // user-user cosine
    Hybrid,   // weighted blend of the three above
    Popularity,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Content,
        StrategyKind::ItemCf,
        StrategyKind::UserCf,
        StrategyKind::Popularity,
        StrategyKind::Hybrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Content => "content",
            StrategyKind::ItemCf => "item_cf",
            StrategyKind::UserCf => "user_cf",
            StrategyKind::Hybrid => "hybrid",
            StrategyKind::Popularity => "popularity",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StrategyKind::Content => "Feature-tag similarity using TF-IDF and cosine similarity",
            StrategyKind::ItemCf => "Item-item similarity over user rating patterns",
            StrategyKind::UserCf => "Similar users' ratings weighted by user-user similarity",
            StrategyKind::Hybrid => "Weighted blend of content, item-based and user-based scores",
            StrategyKind::Popularity => "Global ranking by mean rating and community size",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "content" | "content_based" => Ok(StrategyKind::Content),
            "item_cf" | "item_based" => Ok(StrategyKind::ItemCf),
            "user_cf" | "user_based" => Ok(StrategyKind::UserCf),
            "hybrid" => Ok(StrategyKind::Hybrid),
            "popularity" | "popular" => Ok(StrategyKind::Popularity),
            other => Err(format!("unknown strategy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RetrainTarget {
    Strategy(StrategyKind),
    All,
}

impl RetrainTarget {
    pub fn strategies(&self) -> Vec<StrategyKind> {
        match self {
            RetrainTarget::Strategy(kind) => vec![*kind],
            RetrainTarget::All => StrategyKind::ALL.to_vec(),
        }
    }
}

impl fmt::Display for RetrainTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrainTarget::Strategy(kind) => f.write_str(kind.as_str()),
            RetrainTarget::All => f.write_str("all"),
        }
    }
}

impl FromStr for RetrainTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(RetrainTarget::All);
        }
        s.parse::<StrategyKind>().map(RetrainTarget::Strategy)
    }
}

impl From<RetrainTarget> for String {
    fn from(target: RetrainTarget) -> Self {
        target.to_string()
    }
}

impl TryFrom<String> for RetrainTarget {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StrategyKind> for RetrainTarget {
    fn from(kind: StrategyKind) -> Self {
        RetrainTarget::Strategy(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item_id: ItemId,
    pub score: f64,
}

/// A user's interaction history as seen by the scoring strategies
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserProfile {
    pub user_id: UserId,
    /// Scored interactions only
    pub ratings: BTreeMap<ItemId, u8>,
    /// Every interacted item, scored or not
    pub interacted: HashSet<ItemId>,
}

impl UserProfile {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    /// Build from raw ratings; later observations win per item
    pub fn from_ratings<'a>(user_id: UserId, ratings: impl IntoIterator<Item = &'a Rating>) -> Self {
        let mut latest: BTreeMap<ItemId, &Rating> = BTreeMap::new();
        for rating in ratings.into_iter().filter(|r| r.user_id == user_id) {
            match latest.get(&rating.item_id) {
                Some(existing) if existing.observed_at > rating.observed_at => {}
                _ => {
                    latest.insert(rating.item_id, rating);
                }
            }
        }

        let mut profile = Self::new(user_id);
        for (item_id, rating) in latest {
            profile.interacted.insert(item_id);
            if let Some(score) = rating.score.score() {
                profile.ratings.insert(item_id, score);
            }
        }
        profile
    }

    pub fn with_rating(mut self, item_id: ItemId, score: u8) -> Self {
        self.ratings.insert(item_id, score);
        self.interacted.insert(item_id);
        self
    }

    pub fn rating_count(&self) -> usize {
        self.ratings.len()
    }

    pub fn has_interacted(&self, item_id: ItemId) -> bool {
        self.interacted.contains(&item_id)
    }

    pub fn liked(&self, threshold: u8) -> impl Iterator<Item = (ItemId, u8)> + '_ {
        self.ratings
            .iter()
            .filter(move |(_, score)| **score >= threshold)
            .map(|(item, score)| (*item, *score))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrainStatus {
    Idle,
    Running,
    Completed,
    Error,
}

impl RetrainStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetrainStatus::Completed | RetrainStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyFailure {
    pub strategy: StrategyKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainJob {
    pub job_id: Uuid,
    pub target: RetrainTarget,
    pub status: RetrainStatus,
    /// 0..=100
    pub progress: u8,
    pub message: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub succeeded: Vec<StrategyKind>,
    pub failed: Vec<StrategyFailure>,
}

impl RetrainJob {
    pub fn idle(target: RetrainTarget) -> Self {
        Self {
            job_id: Uuid::nil(),
            target,
            status: RetrainStatus::Idle,
            progress: 0,
            message: "No retrain has been requested".to_string(),
            started_at: None,
            finished_at: None,
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn start(target: RetrainTarget) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            target,
            status: RetrainStatus::Running,
            progress: 0,
            message: format!("Retraining {} started", target),
            started_at: Some(Utc::now()),
            finished_at: None,
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RetrainStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_value_wire_format() {
        let scored: RatingValue = serde_json::from_str("9").unwrap();
        assert_eq!(scored, RatingValue::Scored(9));

        let unscored: RatingValue = serde_json::from_str("-1").unwrap();
        assert_eq!(unscored, RatingValue::Unscored);
        assert_eq!(serde_json::to_string(&unscored).unwrap(), "-1");

        assert!(serde_json::from_str::<RatingValue>("0").is_err());
        assert!(serde_json::from_str::<RatingValue>("11").is_err());
    }

    #[test]
    fn test_strategy_kind_parsing() {
        assert_eq!("item_cf".parse::<StrategyKind>().unwrap(), StrategyKind::ItemCf);
        assert_eq!("Content_Based".parse::<StrategyKind>().unwrap(), StrategyKind::Content);
        assert!("svd".parse::<StrategyKind>().is_err());

        assert_eq!("all".parse::<RetrainTarget>().unwrap(), RetrainTarget::All);
        assert_eq!(
            "hybrid".parse::<RetrainTarget>().unwrap(),
            RetrainTarget::Strategy(StrategyKind::Hybrid)
        );
        assert_eq!(RetrainTarget::All.strategies().len(), 5);
    }

    #[test]
    fn test_popularity_weight() {
        let item = Item {
            item_id: ItemId(1),
            name: "Cowboy Bebop".to_string(),
            feature_tags: BTreeSet::new(),
            mean_score: 8.0,
            members: 0,
        };
        assert_eq!(item.popularity_weight(), 0.0);

        let popular = Item { members: 1000, ..item };
        assert!((popular.popularity_weight() - 8.0 * 1001f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn test_profile_last_write_wins() {
        let t0 = Utc::now();
        let ratings = vec![
            Rating {
                user_id: UserId(1),
                item_id: ItemId(10),
                score: RatingValue::Scored(4),
                observed_at: t0,
            },
            Rating {
                user_id: UserId(1),
                item_id: ItemId(10),
                score: RatingValue::Scored(9),
                observed_at: t0 + chrono::Duration::seconds(5),
            },
            Rating {
                user_id: UserId(1),
                item_id: ItemId(11),
                score: RatingValue::Unscored,
                observed_at: t0,
            },
            Rating {
                user_id: UserId(2),
                item_id: ItemId(12),
                score: RatingValue::Scored(7),
                observed_at: t0,
            },
        ];

        let profile = UserProfile::from_ratings(UserId(1), &ratings);
        assert_eq!(profile.ratings.get(&ItemId(10)), Some(&9));
        assert_eq!(profile.rating_count(), 1);
        assert!(profile.has_interacted(ItemId(11)));
        assert!(!profile.has_interacted(ItemId(12)));
    }
}
