use crate::error::{Error, Result};
use crate::haar::{NUM_CHANNELS, NUM_PIXELS_SQUARED, Signature, Weights};

/// Theoretical extremes of the raw score for one query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBounds {
    /// Reached by a candidate with an identical signature.
    pub best: f64,
    /// Reached by a candidate with zero averages and no shared coefficient.
    pub worst: f64,
}

impl ScoreBounds {
    /// Map a raw score onto `[0, 1]`; 1.0 means identical.
    pub fn similarity(&self, score: f64) -> f64 {
        let range = self.worst - self.best;
        if range <= 0.0 {
            return if score <= self.best { 1.0 } else { 0.0 };
        }
        (1.0 - (score - self.best) / range).clamp(0.0, 1.0)
    }
}

pub fn best_and_worst_possible_score(query: &Signature, weights: &Weights) -> ScoreBounds {
    // The candidate's averages are unknown; assume zero.
    let mut worst = 0.0;
    for channel in 0..NUM_CHANNELS {
        worst += weights.for_average(channel) * query.averages[channel].abs();
    }

    // An identical candidate cancels the average term and shares every coefficient.
    let mut best = 0.0;
    for (channel, coefs) in query.coefficients.iter().enumerate() {
        for &c in coefs {
            best -= weights.for_coefficient(c, channel);
        }
    }

    ScoreBounds { best, worst }
}

/// Score one pair without reusing the query layout. Lower is better, and
/// `score(a, b) == score(b, a)`.
pub fn score(query: &Signature, candidate: &Signature, weights: &Weights) -> Result<f64> {
    QueryScorer::new(query, weights)?.score(candidate)
}

/// Presence table of signed coefficient positions for one channel.
struct PositionMap {
    present: Vec<bool>,
}

impl PositionMap {
    fn new(coefs: &[i32]) -> Self {
        let mut present = vec![false; 2 * NUM_PIXELS_SQUARED];
        for &c in coefs {
            present[slot(c)] = true;
        }
        PositionMap { present }
    }

    fn contains(&self, coefficient: i32) -> Option<bool> {
        let pos = coefficient.unsigned_abs() as usize;
        if pos == 0 || pos >= NUM_PIXELS_SQUARED {
            return None;
        }
        Some(self.present[slot(coefficient)])
    }
}

fn slot(coefficient: i32) -> usize {
    (coefficient as i64 + NUM_PIXELS_SQUARED as i64) as usize
}

/// A query laid out for scanning many candidates.
pub struct QueryScorer<'a> {
    signature: &'a Signature,
    weights: &'a Weights,
    maps: [PositionMap; NUM_CHANNELS],
    bounds: ScoreBounds,
}

impl<'a> QueryScorer<'a> {
    pub fn new(signature: &'a Signature, weights: &'a Weights) -> Result<Self> {
        signature
            .validate()
            .map_err(|e| Error::IncompatibleSignature(format!("query: {e}")))?;
        let maps = std::array::from_fn(|channel| PositionMap::new(&signature.coefficients[channel]));
        Ok(QueryScorer {
            signature,
            weights,
            maps,
            bounds: best_and_worst_possible_score(signature, weights),
        })
    }

    pub fn signature(&self) -> &Signature {
        self.signature
    }

    pub fn bounds(&self) -> ScoreBounds {
        self.bounds
    }

    /// Raw distance to `candidate`.
    pub fn score(&self, candidate: &Signature) -> Result<f64> {
        let mut score = 0.0;
        for channel in 0..NUM_CHANNELS {
            score += self.weights.for_average(channel)
                * (self.signature.averages[channel] - candidate.averages[channel]).abs();
        }

        for (channel, coefs) in candidate.coefficients.iter().enumerate() {
            let map = &self.maps[channel];
            for &c in coefs {
                let shared = map.contains(c).ok_or_else(|| {
                    Error::IncompatibleSignature(format!(
                        "candidate coefficient {c} out of range in channel {channel}"
                    ))
                })?;
                if shared {
                    score -= self.weights.for_coefficient(c, channel);
                }
            }
        }

        Ok(score)
    }

    /// Normalized similarity to `candidate` in `[0, 1]`.
    pub fn similarity(&self, candidate: &Signature) -> Result<f64> {
        Ok(self.bounds.similarity(self.score(candidate)?))
    }
}
