// Utility functions for recommendation-engine

use crate::models::{ItemId, ScoredItem};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Scale a score to [0, 1] by the largest score of its set
pub fn scale_score(score: f64, max: f64) -> f64 {
    if max < f64::EPSILON {
        0.0
    } else {
        (score / max).clamp(0.0, 1.0)
    }
}

/// Scale every score of a candidate map by the map's maximum.
///
/// The best candidate maps to 1 and every positive score stays above 0,
/// so a scored candidate always outweighs one the map does not contain.
pub fn scale_scores(scores: &HashMap<ItemId, f64>) -> HashMap<ItemId, f64> {
    let max = scores.values().copied().fold(0.0, f64::max);
    scores
        .iter()
        .map(|(item, s)| (*item, scale_score(*s, max)))
        .collect()
}

/// Score descending, item id ascending
pub fn compare_scored(a: &ScoredItem, b: &ScoredItem) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.item_id.cmp(&b.item_id))
}

pub fn sort_scored(items: &mut [ScoredItem]) {
    items.sort_by(compare_scored);
}

pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_score() {
        assert!((scale_score(5.0, 10.0) - 0.5).abs() < 0.001);
        assert!((scale_score(10.0, 10.0) - 1.0).abs() < 0.001);
        assert!((scale_score(-1.0, 10.0) - 0.0).abs() < 0.001);
        // no positive score in the set
        assert_eq!(scale_score(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_scale_scores_keeps_lowest_above_zero() {
        let scores: HashMap<ItemId, f64> =
            [(ItemId(1), 2.0), (ItemId(2), 8.0), (ItemId(3), 4.0)].into_iter().collect();
        let scaled = scale_scores(&scores);
        assert!((scaled[&ItemId(1)] - 0.25).abs() < 1e-9);
        assert_eq!(scaled[&ItemId(2)], 1.0);
        assert!((scaled[&ItemId(3)] - 0.5).abs() < 1e-9);

        let single: HashMap<ItemId, f64> = [(ItemId(9), 0.3)].into_iter().collect();
        assert_eq!(scale_scores(&single)[&ItemId(9)], 1.0);
    }

    #[test]
    fn test_sort_scored_breaks_ties_by_id() {
        let mut items = vec![
            ScoredItem { item_id: ItemId(3), score: 1.0 },
            ScoredItem { item_id: ItemId(1), score: 1.0 },
            ScoredItem { item_id: ItemId(2), score: 2.0 },
        ];
        sort_scored(&mut items);
        let ids: Vec<u64> = items.iter().map(|i| i.item_id.0).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(Vec::<f64>::new()), None);
        assert_eq!(mean(vec![1.0, 2.0, 3.0]), Some(2.0));
    }
}
