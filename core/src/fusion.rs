use std::collections::HashMap;
use std::hash::Hash;

/// Default RRF constant.
pub const DEFAULT_RRF_K: f32 = 60.0;

/// Reciprocal Rank Fusion over any number of ranked candidate lists.
#[derive(Debug, Clone, Copy)]
pub struct RrfFusion {
    k: f32,
}

impl RrfFusion {
    pub fn new(k: f32) -> Self {
        Self { k }
    }

    /// Fuses ranked lists of ids, best first.
    ///
    /// RRF formula: score(d) = Σ 1 / (k + rank_i(d)), ranks starting at 1.
    /// An id appearing in several lists is returned once. Ties keep the
    /// order in which ids were first seen.
    pub fn fuse<T, L>(&self, rankings: L) -> Vec<(T, f32)>
    where
        T: Clone + Eq + Hash,
        L: IntoIterator<Item = Vec<T>>,
    {
        let mut order: Vec<T> = Vec::new();
        let mut scores: HashMap<T, f32> = HashMap::new();

        for ranking in rankings {
            for (rank, id) in ranking.into_iter().enumerate() {
                let contribution = 1.0 / (self.k + rank as f32 + 1.0);
                match scores.get_mut(&id) {
                    Some(score) => *score += contribution,
                    None => {
                        scores.insert(id.clone(), contribution);
                        order.push(id);
                    }
                }
            }
        }

        let mut fused: Vec<(T, f32)> = order
            .into_iter()
            .map(|id| {
                let score = scores[&id];
                (id, score)
            })
            .collect();
        // Stable sort keeps first-seen order among equal scores.
        fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        fused
    }
}

impl Default for RrfFusion {
    fn default() -> Self {
        Self::new(DEFAULT_RRF_K)
    }
}
