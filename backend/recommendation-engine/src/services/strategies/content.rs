use super::ScoringStrategy;
use crate::error::{EngineError, Result};
use crate::models::{Item, ItemId, ScoredItem, StrategyKind, UserProfile};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

/// Sparse TF-IDF vector: (tag index, weight), sorted by tag index
type TagVector = Vec<(u32, f64)>;

/// Content-based scoring over TF-IDF feature-tag vectors.
///
/// Similarities are computed on demand against the candidate set found
/// through the inverted tag index, so only items sharing at least one tag
/// are ever compared.
#[derive(Debug, Clone)]
pub struct ContentStrategy {
    vectors: HashMap<ItemId, TagVector>,
    postings: HashMap<u32, Vec<ItemId>>,
    catalog: HashSet<ItemId>,
    popularity: HashMap<ItemId, f64>,
    vocabulary_size: usize,
    liked_threshold: u8,
}

impl ContentStrategy {
    pub fn fit(items: &[Item], popularity: &HashMap<ItemId, f64>, liked_threshold: u8) -> Result<Self> {
        // tag -> document frequency, ordered for stable indices
        let mut document_frequency: BTreeMap<&str, usize> = BTreeMap::new();
        for item in items {
            for tag in &item.feature_tags {
                *document_frequency.entry(tag.as_str()).or_insert(0) += 1;
            }
        }
        if document_frequency.is_empty() {
            return Err(EngineError::DataInsufficient(
                "no catalog item carries feature tags".to_string(),
            ));
        }

        let n_docs = items.len() as f64;
        let mut vocabulary: HashMap<&str, (u32, f64)> = HashMap::new();
        for (index, (tag, df)) in document_frequency.iter().enumerate() {
            // smoothed idf
            let idf = ((1.0 + n_docs) / (1.0 + *df as f64)).ln() + 1.0;
            vocabulary.insert(tag, (index as u32, idf));
        }

        let mut vectors = HashMap::with_capacity(items.len());
        let mut postings: HashMap<u32, Vec<ItemId>> = HashMap::new();
        for item in items {
            if item.feature_tags.is_empty() {
                continue;
            }
            let tf = 1.0 / item.feature_tags.len() as f64;
            let mut vector: TagVector = item
                .feature_tags
                .iter()
                .filter_map(|tag| vocabulary.get(tag.as_str()))
                .map(|(index, idf)| (*index, tf * idf))
                .collect();
            vector.sort_by_key(|(index, _)| *index);

            let norm = vector.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
            if norm <= 0.0 {
                continue;
            }
            for (index, weight) in vector.iter_mut() {
                *weight /= norm;
                postings.entry(*index).or_default().push(item.item_id);
            }
            vectors.insert(item.item_id, vector);
        }

        info!(
            items = items.len(),
            vectorized = vectors.len(),
            vocabulary = document_frequency.len(),
            "Built TF-IDF item vectors"
        );

        Ok(Self {
            vectors,
            postings,
            catalog: items.iter().map(|item| item.item_id).collect(),
            popularity: popularity.clone(),
            vocabulary_size: document_frequency.len(),
            liked_threshold,
        })
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary_size
    }

    /// Cosine similarity of two items' tag vectors (0 when either has none)
    pub fn similarity(&self, a: ItemId, b: ItemId) -> f64 {
        match (self.vectors.get(&a), self.vectors.get(&b)) {
            (Some(va), Some(vb)) => dot(va, vb),
            _ => 0.0,
        }
    }

    /// Content neighbors of `item_id`: similarity desc, popularity desc, id asc
    pub fn similar_items(&self, item_id: ItemId, n: usize) -> Result<Vec<ScoredItem>> {
        if !self.catalog.contains(&item_id) {
            return Err(EngineError::UnknownItem(item_id));
        }

        let mut neighbors: Vec<ScoredItem> = self
            .sharing_tags_with([item_id].into_iter())
            .into_iter()
            .filter(|candidate| *candidate != item_id)
            .filter_map(|candidate| {
                let score = self.similarity(item_id, candidate);
                (score > 0.0).then_some(ScoredItem {
                    item_id: candidate,
                    score,
                })
            })
            .collect();

        neighbors.sort_by(|a, b| self.tie_break(a, a.score, b, b.score));
        neighbors.truncate(n);
        Ok(neighbors)
    }

    fn sharing_tags_with(&self, seeds: impl Iterator<Item = ItemId>) -> HashSet<ItemId> {
        let mut candidates = HashSet::new();
        for seed in seeds {
            let Some(vector) = self.vectors.get(&seed) else {
                continue;
            };
            for (index, _) in vector {
                if let Some(items) = self.postings.get(index) {
                    candidates.extend(items.iter().copied());
                }
            }
        }
        candidates
    }

    fn liked<'p>(&'p self, profile: &'p UserProfile) -> impl Iterator<Item = (ItemId, u8)> + 'p {
        profile
            .liked(self.liked_threshold)
            .filter(move |(item_id, _)| self.vectors.contains_key(item_id))
    }

    /// Highest raw similarity between `item_id` and any liked item
    fn max_similarity(&self, profile: &UserProfile, item_id: ItemId) -> f64 {
        self.liked(profile)
            .map(|(liked, _)| self.similarity(liked, item_id))
            .fold(0.0, f64::max)
    }

    fn tie_break(&self, a: &ScoredItem, a_raw: f64, b: &ScoredItem, b_raw: f64) -> Ordering {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b_raw.partial_cmp(&a_raw).unwrap_or(Ordering::Equal))
            .then_with(|| {
                let pa = self.popularity.get(&a.item_id).copied().unwrap_or(0.0);
                let pb = self.popularity.get(&b.item_id).copied().unwrap_or(0.0);
                pb.partial_cmp(&pa).unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.item_id.cmp(&b.item_id))
    }
}

fn dot(a: &TagVector, b: &TagVector) -> f64 {
    let (mut i, mut j, mut sum) = (0, 0, 0.0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                sum += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    sum
}

impl ScoringStrategy for ContentStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Content
    }

    /// Rating-weighted mean cosine similarity against the user's liked items
    fn score_candidates(&self, profile: &UserProfile) -> Result<HashMap<ItemId, f64>> {
        let liked: Vec<(ItemId, u8)> = self.liked(profile).collect();
        if liked.is_empty() {
            return Err(EngineError::DataInsufficient(format!(
                "user {} has no liked items with feature tags",
                profile.user_id
            )));
        }

        let weight_total: f64 = liked.iter().map(|(_, r)| *r as f64).sum();
        let candidates = self.sharing_tags_with(liked.iter().map(|(item_id, _)| *item_id));

        let scores: HashMap<ItemId, f64> = candidates
            .into_iter()
            .filter(|candidate| !profile.has_interacted(*candidate))
            .filter_map(|candidate| {
                let weighted: f64 = liked
                    .iter()
                    .map(|(item_id, r)| *r as f64 * self.similarity(*item_id, candidate))
                    .sum();
                let score = weighted / weight_total;
                (score > 0.0).then_some((candidate, score))
            })
            .collect();

        debug!(
            user_id = %profile.user_id,
            liked = liked.len(),
            candidates = scores.len(),
            "Content scoring"
        );
        Ok(scores)
    }

    fn predict_score(&self, profile: &UserProfile, item_id: ItemId) -> Option<f64> {
        let (weighted, total) = profile
            .ratings
            .iter()
            .map(|(rated, r)| (self.similarity(*rated, item_id), *r as f64))
            .filter(|(sim, _)| *sim > 0.0)
            .fold((0.0, 0.0), |(w, t), (sim, r)| (w + sim * r, t + sim));

        (total > 0.0).then(|| weighted / total)
    }

    fn rank(&self, profile: &UserProfile, scores: HashMap<ItemId, f64>) -> Vec<ScoredItem> {
        let mut ranked: Vec<(ScoredItem, f64)> = scores
            .into_iter()
            .map(|(item_id, score)| {
                (
                    ScoredItem { item_id, score },
                    self.max_similarity(profile, item_id),
                )
            })
            .collect();
        ranked.sort_by(|(a, a_raw), (b, b_raw)| self.tie_break(a, *a_raw, b, *b_raw));
        ranked.into_iter().map(|(item, _)| item).collect()
    }
}
