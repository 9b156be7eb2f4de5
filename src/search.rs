use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::haar::{Signature, SketchType, Weights};
use crate::score::QueryScorer;
use crate::store::{CandidatePoolProvider, SignatureStore};
use crate::{AlbumId, ImageId, codec};

/// Which albums results may come from, relative to the query's album.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchRestriction {
    #[default]
    None,
    SameAlbum,
    DifferentAlbum,
}

impl SearchRestriction {
    pub fn admits(&self, query_album: Option<AlbumId>, candidate_album: Option<AlbumId>) -> bool {
        match self {
            SearchRestriction::None => true,
            SearchRestriction::SameAlbum => {
                query_album.is_some() && query_album == candidate_album
            }
            SearchRestriction::DifferentAlbum => query_album != candidate_album,
        }
    }
}

impl fmt::Display for SearchRestriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchRestriction::None => "none",
            SearchRestriction::SameAlbum => "same-album",
            SearchRestriction::DifferentAlbum => "different-album",
        };
        f.write_str(name)
    }
}

impl FromStr for SearchRestriction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(SearchRestriction::None),
            "same-album" => Ok(SearchRestriction::SameAlbum),
            "different-album" => Ok(SearchRestriction::DifferentAlbum),
            other => Err(Error::InvalidArgument(format!("unknown restriction: {other}"))),
        }
    }
}

/// Similarity window, both ends as fractions in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub min: f64,
    pub max: f64,
}

impl Threshold {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) || min > max {
            return Err(Error::InvalidArgument(format!(
                "similarity window [{min}, {max}] must satisfy 0 <= min <= max <= 1"
            )));
        }
        Ok(Threshold { min, max })
    }

    /// Window from whole percentages, as users type them.
    pub fn from_percent(min: f64, max: f64) -> Result<Self> {
        Threshold::new(min / 100.0, max / 100.0)
    }

    pub fn full() -> Self {
        Threshold { min: 0.0, max: 1.0 }
    }

    /// Exclusive upper end. Rounded up to the next whole percent so that a
    /// window like `[50%, 50%]` still admits 50.4%.
    pub fn supremum(&self) -> f64 {
        // 0.29 * 100.0 is 28.999..., so nudge before flooring.
        ((self.max * 100.0 + 1e-6).floor() + 1.0) / 100.0
    }

    pub fn contains(&self, similarity: f64) -> bool {
        similarity >= self.min && similarity < self.supremum()
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Threshold { min: 0.9, max: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: ImageId,
    pub album: Option<AlbumId>,
    pub signature: Signature,
}

/// Signatures eligible for one search, sorted by id, each id once.
#[derive(Debug, Clone, Default)]
pub struct CandidatePool {
    entries: Vec<Candidate>,
}

impl CandidatePool {
    /// Later entries replace earlier ones with the same id.
    pub fn from_entries(entries: impl IntoIterator<Item = Candidate>) -> Self {
        let by_id: BTreeMap<ImageId, Candidate> = entries.into_iter().map(|c| (c.id, c)).collect();
        CandidatePool {
            entries: by_id.into_values().collect(),
        }
    }

    /// Load every signature of an available image, optionally limited to
    /// `scope`. Undecodable signatures are skipped.
    pub fn build(
        store: &dyn SignatureStore,
        provider: &dyn CandidatePoolProvider,
        scope: Option<&HashSet<ImageId>>,
    ) -> Result<Self> {
        let albums = provider.album_memberships()?;
        let mut entries = Vec::new();
        let mut malformed = 0usize;

        store.for_each(&mut |id, sig| {
            let Some(&album) = albums.get(&id) else {
                return;
            };
            if scope.is_some_and(|s| !s.contains(&id)) {
                return;
            }
            match sig {
                Ok(signature) => entries.push(Candidate {
                    id,
                    album: Some(album),
                    signature,
                }),
                Err(e) => {
                    malformed += 1;
                    log::warn!("Skipping signature of image {id}: {e}");
                }
            }
        })?;

        log::debug!(
            "Candidate pool: {} signatures, {} malformed",
            entries.len(),
            malformed
        );
        Ok(CandidatePool::from_entries(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: ImageId) -> Option<&Candidate> {
        self.entries
            .binary_search_by_key(&id, |c| c.id)
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.entries.iter()
    }
}

/// The image being searched for.
#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    /// Catalog id; `None` for an image that is not in the catalog.
    pub id: Option<ImageId>,
    pub album: Option<AlbumId>,
    pub signature: &'a Signature,
}

impl<'a> Query<'a> {
    pub fn external(signature: &'a Signature) -> Self {
        Query {
            id: None,
            album: None,
            signature,
        }
    }

    pub fn from_candidate(candidate: &'a Candidate) -> Self {
        Query {
            id: Some(candidate.id),
            album: candidate.album,
            signature: &candidate.signature,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdMatches {
    /// Mean similarity of `matches`, 0 when there are none.
    pub average: f64,
    pub matches: BTreeMap<ImageId, f64>,
}

/// The `max_results` closest candidates, most similar first.
pub fn best_matches(
    query: &Signature,
    pool: &CandidatePool,
    max_results: usize,
    weights: &Weights,
) -> Result<Vec<(ImageId, f64)>> {
    if max_results == 0 || pool.is_empty() {
        return Ok(Vec::new());
    }

    let scorer = QueryScorer::new(query, weights)?;
    let mut scored = pool
        .iter()
        .map(|c| Ok((scorer.score(&c.signature)?, c.id)))
        .collect::<Result<Vec<(f64, ImageId)>>>()?;

    let by_score = |a: &(f64, ImageId), b: &(f64, ImageId)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));
    if scored.len() > max_results {
        scored.select_nth_unstable_by(max_results - 1, by_score);
        scored.truncate(max_results);
    }
    scored.sort_by(by_score);

    let bounds = scorer.bounds();
    Ok(scored
        .into_iter()
        .map(|(score, id)| (id, bounds.similarity(score)))
        .collect())
}

/// Every candidate inside the similarity window, except the query itself.
pub fn best_matches_with_threshold(
    query: &Query<'_>,
    pool: &CandidatePool,
    threshold: Threshold,
    restriction: SearchRestriction,
    weights: &Weights,
) -> Result<ThresholdMatches> {
    let mut result = ThresholdMatches::default();
    if pool.is_empty() {
        return Ok(result);
    }

    let scorer = QueryScorer::new(query.signature, weights)?;
    let bounds = scorer.bounds();
    let mut total = 0.0;

    for candidate in pool.iter() {
        if Some(candidate.id) == query.id {
            continue;
        }
        if !restriction.admits(query.album, candidate.album) {
            continue;
        }
        let score = scorer.score(&candidate.signature)?;
        // Past the worst bound; no window admits it, not even one opening at 0%.
        if score > bounds.worst {
            continue;
        }
        let similarity = bounds.similarity(score);
        if threshold.contains(similarity) {
            total += similarity;
            result.matches.insert(candidate.id, similarity);
        }
    }

    if !result.matches.is_empty() {
        result.average = total / result.matches.len() as f64;
    }
    Ok(result)
}

/// Sketch search: rank the pool against a signature in text form.
pub fn best_matches_for_signature_text(
    text: &str,
    pool: &CandidatePool,
    max_results: usize,
    sketch: SketchType,
) -> Result<Vec<(ImageId, f64)>> {
    let signature = codec::decode_text(text)?;
    best_matches(&signature, pool, max_results, Weights::get(sketch))
}
