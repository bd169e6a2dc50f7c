//! Cosine-similarity search over stored part embeddings.
//!
//! The engine operates entirely through the [`Store`] trait. The calling
//! application embeds the query text, builds a [`SearchRequest`], and
//! passes whichever store implementation it uses.
//!
//! # Algorithm
//!
//! 1. Fetch candidates: enabled, embedded parts of enabled files whose model
//!    matches the query and whose group flag intersects the filter.
//! 2. Decode each vector and score it with [`cosine_similarity`]. Parts with
//!    a malformed buffer or a different dimension are skipped and reported.
//! 3. Drop NaN scores and scores below `min_similarity`.
//! 4. Keep the best `top_k` in a min-heap (O(N log K)). Equal scores rank
//!    the lower part id first.
//! 5. Load the winning parts and return them by descending score. A winner
//!    disabled after the snapshot is dropped from the candidates and the
//!    remainder is ranked again, so the result still holds up to `top_k`
//!    live hits.
//!
//! Cancellation is checked while scanning and again before returning; a
//! cancelled search yields [`SearchOutcome::Cancelled`] and no hits.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::embedding::{blob_to_vec, cosine_similarity};
use crate::error::{Result, StoreError};
use crate::group::GroupMask;
use crate::models::FilePart;
use crate::store::{EmbeddedPart, PartFilter, Store};

pub const DEFAULT_TOP_K: usize = 10;

/// Candidates scored between two cancellation checks.
const CANCEL_POLL_INTERVAL: usize = 256;

/// Shared flag a caller flips to abandon a running search.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// Inputs for a single search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    /// Only vectors produced by this model are compared.
    pub model: String,
    /// `None` searches every group.
    pub group_mask: Option<GroupMask>,
    pub top_k: usize,
    /// Results scoring below this are dropped, in `[-1, 1]`.
    pub min_similarity: f32,
}

impl SearchRequest {
    pub fn new(vector: Vec<f32>, model: impl Into<String>) -> Self {
        Self {
            vector,
            model: model.into(),
            group_mask: None,
            top_k: DEFAULT_TOP_K,
            min_similarity: -1.0,
        }
    }

    pub fn with_groups(mut self, mask: GroupMask) -> Self {
        self.group_mask = Some(mask);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.vector.is_empty() {
            return Err(StoreError::invalid("vector", "query vector is empty"));
        }
        if self.vector.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::invalid("vector", "query vector is not finite"));
        }
        if self.model.trim().is_empty() {
            return Err(StoreError::invalid("model", "must not be empty"));
        }
        if !(-1.0..=1.0).contains(&self.min_similarity) {
            return Err(StoreError::invalid(
                "min_similarity",
                format!("{} is outside [-1, 1]", self.min_similarity),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub part: FilePart,
    pub score: f32,
}

/// A candidate left out of the ranking because its vector was unusable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedPart {
    pub part_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResults {
    /// Best matches, highest score first.
    pub hits: Vec<SearchHit>,
    /// Number of candidates scored.
    pub scanned: usize,
    pub skipped: Vec<SkippedPart>,
}

#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Completed(SearchResults),
    Cancelled,
}

impl SearchOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SearchOutcome::Cancelled)
    }

    /// Results of a completed search.
    pub fn completed(self) -> Option<SearchResults> {
        match self {
            SearchOutcome::Completed(results) => Some(results),
            SearchOutcome::Cancelled => None,
        }
    }
}

/// A scored part id. Orders by score, then prefers the lower id.
#[derive(Debug, Clone, Copy)]
struct Ranked {
    score: f32,
    id: i64,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Outcome of [`rank`]: winning `(part id, score)` pairs, best first.
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    pub ranked: Vec<(i64, f32)>,
    pub scanned: usize,
    pub skipped: Vec<SkippedPart>,
}

/// Score `candidates` against `query` and keep the best `top_k`.
///
/// Returns `None` if `cancel` fires before ranking finishes.
pub fn rank(
    query: &[f32],
    candidates: &[EmbeddedPart],
    top_k: usize,
    min_similarity: f32,
    cancel: &CancelToken,
) -> Option<Ranking> {
    let capacity = top_k.min(candidates.len()).saturating_add(1);
    let mut heap: BinaryHeap<Reverse<Ranked>> = BinaryHeap::with_capacity(capacity);
    let mut ranking = Ranking::default();

    for (i, candidate) in candidates.iter().enumerate() {
        if i % CANCEL_POLL_INTERVAL == 0 && cancel.is_cancelled() {
            return None;
        }

        let score = match blob_to_vec(&candidate.embedding)
            .and_then(|vector| cosine_similarity(query, &vector))
        {
            Ok(score) => score,
            Err(e) => {
                warn!(part_id = candidate.id, error = %e, "skipping part during search");
                ranking.skipped.push(SkippedPart {
                    part_id: candidate.id,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        ranking.scanned += 1;

        if score.is_nan() || score < min_similarity || top_k == 0 {
            continue;
        }
        let entry = Ranked {
            score,
            id: candidate.id,
        };
        if heap.len() < top_k {
            heap.push(Reverse(entry));
        } else if heap.peek().is_some_and(|Reverse(worst)| entry > *worst) {
            heap.pop();
            heap.push(Reverse(entry));
        }
    }

    if cancel.is_cancelled() {
        return None;
    }

    let mut best: Vec<Ranked> = heap.into_iter().map(|Reverse(r)| r).collect();
    best.sort_by(|a, b| b.cmp(a));
    ranking.ranked = best.into_iter().map(|r| (r.id, r.score)).collect();
    Some(ranking)
}

/// Run a similarity search against `store`.
pub async fn search<S>(
    store: &S,
    request: &SearchRequest,
    cancel: &CancelToken,
) -> Result<SearchOutcome>
where
    S: Store + ?Sized,
{
    request.validate()?;
    if request.top_k == 0 {
        return Ok(SearchOutcome::Completed(SearchResults::default()));
    }
    if cancel.is_cancelled() {
        return Ok(SearchOutcome::Cancelled);
    }

    let filter = PartFilter {
        model: request.model.clone(),
        group_mask: request.group_mask,
    };
    let mut candidates = store.embedded_parts(&filter).await?;
    debug!(candidates = candidates.len(), model = %request.model, "scoring candidates");

    let rank_candidates = |candidates: &[EmbeddedPart]| {
        rank(
            &request.vector,
            candidates,
            request.top_k,
            request.min_similarity,
            cancel,
        )
    };
    let Some(Ranking {
        mut ranked,
        scanned,
        skipped,
    }) = rank_candidates(&candidates)
    else {
        return Ok(SearchOutcome::Cancelled);
    };

    let mut hits = Vec::with_capacity(ranked.len());
    loop {
        hits.clear();
        let mut vanished = Vec::new();
        for &(id, score) in &ranked {
            match store.get_part(id).await? {
                Some(part) if part.is_enabled => hits.push(SearchHit { part, score }),
                _ => vanished.push(id),
            }
        }
        if vanished.is_empty() {
            break;
        }
        debug!(parts = ?vanished, "parts disabled after ranking, ranking again");
        candidates.retain(|c| !vanished.contains(&c.id));
        match rank_candidates(&candidates) {
            Some(next) => ranked = next.ranked,
            None => return Ok(SearchOutcome::Cancelled),
        }
    }

    if cancel.is_cancelled() {
        return Ok(SearchOutcome::Cancelled);
    }
    Ok(SearchOutcome::Completed(SearchResults {
        hits,
        scanned,
        skipped,
    }))
}
