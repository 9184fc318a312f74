use crate::models::{ScoredRating, UserId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Per-user leave-k-out partition of a rating set
#[derive(Debug, Clone, Default)]
pub struct TrainTestSplit {
    pub train: Vec<ScoredRating>,
    pub test: Vec<ScoredRating>,
}

impl TrainTestSplit {
    pub fn test_users(&self) -> usize {
        self.test
            .iter()
            .map(|r| r.user_id)
            .collect::<std::collections::BTreeSet<_>>()
            .len()
    }
}

/// Hold out `floor(n * ratio)` of each user's ratings, clamped to
/// `[1, n - 1]`. Users with fewer than 2 ratings stay entirely in train.
/// The same seed and input always produce the same partition.
pub fn leave_k_out(ratings: &[ScoredRating], test_ratio: f64, seed: u64) -> TrainTestSplit {
    let mut by_user: BTreeMap<UserId, Vec<ScoredRating>> = BTreeMap::new();
    for rating in ratings {
        by_user.entry(rating.user_id).or_default().push(*rating);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut split = TrainTestSplit::default();

    for (_, mut user_ratings) in by_user {
        let n = user_ratings.len();
        if n < 2 {
            split.train.extend(user_ratings);
            continue;
        }

        user_ratings.sort_by_key(|r| r.item_id);
        user_ratings.shuffle(&mut rng);

        let n_test = ((n as f64 * test_ratio).floor() as usize).clamp(1, n - 1);
        let train = user_ratings.split_off(n_test);
        split.test.extend(user_ratings);
        split.train.extend(train);
    }

    split
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemId;
    use std::collections::HashSet;

    fn ratings() -> Vec<ScoredRating> {
        let mut out = Vec::new();
        for user in 1..=4u64 {
            for item in 1..=(user * 3) {
                out.push(ScoredRating {
                    user_id: UserId(user),
                    item_id: ItemId(item),
                    score: ((user + item) % 10 + 1) as u8,
                });
            }
        }
        // single-rating user
        out.push(ScoredRating {
            user_id: UserId(9),
            item_id: ItemId(1),
            score: 5,
        });
        out
    }

    #[test]
    fn test_every_split_user_in_both_partitions() {
        let split = leave_k_out(&ratings(), 0.2, 42);

        let train_users: HashSet<UserId> = split.train.iter().map(|r| r.user_id).collect();
        let test_users: HashSet<UserId> = split.test.iter().map(|r| r.user_id).collect();

        assert!(test_users.is_subset(&train_users));
        assert!(!test_users.contains(&UserId(9)));
        assert!(train_users.contains(&UserId(9)));
        assert_eq!(split.test_users(), 4);
    }

    #[test]
    fn test_hold_out_counts() {
        let split = leave_k_out(&ratings(), 0.2, 42);
        let held = |user: u64| split.test.iter().filter(|r| r.user_id == UserId(user)).count();

        assert_eq!(held(1), 1); // floor(0.6) clamped up to 1
        assert_eq!(held(2), 1); // floor(1.2)
        assert_eq!(held(4), 2); // floor(2.4)
        assert_eq!(split.train.len() + split.test.len(), ratings().len());
    }

    #[test]
    fn test_partitions_are_disjoint() {
        let split = leave_k_out(&ratings(), 0.5, 7);
        let train: HashSet<(UserId, ItemId)> =
            split.train.iter().map(|r| (r.user_id, r.item_id)).collect();
        assert!(split
            .test
            .iter()
            .all(|r| !train.contains(&(r.user_id, r.item_id))));
    }

    #[test]
    fn test_same_seed_same_split() {
        let a = leave_k_out(&ratings(), 0.2, 42);
        let b = leave_k_out(&ratings(), 0.2, 42);
        assert_eq!(a.test, b.test);
        assert_eq!(a.train, b.train);
    }
}
