//! Cross-dataset comparison: hash coverage, inclusion latency and per-block
//! similarity of a candidate against a reference.
//!
//! Reference block numbers are read on the shared 1-based axis, so a Mined
//! reference lines up with simulated candidates that count blocks from 1.

use std::collections::{BTreeMap, HashMap, HashSet};

use blockcmp_data::{Dataset, SourceLabel};
use serde::Serialize;
use tracing::debug;

/// Block inclusion delay of matched transactions, in blocks.
///
/// Positive values mean the reference included the transaction later than
/// the candidate did.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LatencyStats {
    pub matched: usize,
    pub mean: f64,
    pub min: i64,
    pub max: i64,
}

/// Jaccard index of one block present in both datasets.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BlockSimilarity {
    pub block: u64,
    pub jaccard: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimilarityStats {
    pub aligned_blocks: usize,
    /// Unweighted mean of the per-block indices.
    pub mean_jaccard: f64,
    pub per_block: Vec<BlockSimilarity>,
}

/// Result of comparing `candidate` against `reference`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub reference: SourceLabel,
    pub candidate: SourceLabel,
    /// Distinct hashes in the reference.
    pub reference_size: usize,
    /// Distinct hashes found in both datasets.
    pub matched: usize,
    /// `matched / reference_size` as a percentage, 0 for an empty reference.
    pub coverage: f64,
    /// Absent when no hash matched.
    pub latency: Option<LatencyStats>,
    /// Absent when no block number occurs in both datasets.
    pub similarity: Option<SimilarityStats>,
}

/// Percentage of the reference's hashes that the candidate also holds.
pub fn coverage(reference: &Dataset, candidate: &Dataset) -> (usize, usize, f64) {
    let reference_hashes = reference.hashes();
    let candidate_hashes = candidate.hashes();
    let matched = reference_hashes.intersection(&candidate_hashes).count();

    let percent = if reference_hashes.is_empty() {
        0.0
    } else {
        matched as f64 / reference_hashes.len() as f64 * 100.0
    };
    (matched, reference_hashes.len(), percent)
}

/// First aligned block each hash appears in.
fn first_blocks(dataset: &Dataset) -> HashMap<&str, u64> {
    let mut blocks = HashMap::new();
    for record in dataset.records() {
        if record.hash.is_empty() {
            continue;
        }
        blocks
            .entry(record.hash.as_str())
            .or_insert_with(|| dataset.aligned_block(record));
    }
    blocks
}

/// Inclusion latency over hashes present in both datasets.
pub fn latency(reference: &Dataset, candidate: &Dataset) -> Option<LatencyStats> {
    let reference_blocks = first_blocks(reference);
    let candidate_blocks = first_blocks(candidate);

    let deltas: Vec<i64> = candidate_blocks
        .iter()
        .filter_map(|(hash, candidate_block)| {
            reference_blocks
                .get(hash)
                .map(|reference_block| *reference_block as i64 - *candidate_block as i64)
        })
        .collect();

    let min = deltas.iter().copied().min()?;
    let max = deltas.iter().copied().max()?;
    let mean = deltas.iter().map(|d| *d as f64).sum::<f64>() / deltas.len() as f64;

    Some(LatencyStats {
        matched: deltas.len(),
        mean,
        min,
        max,
    })
}

fn block_hash_sets(dataset: &Dataset) -> BTreeMap<u64, HashSet<&str>> {
    let mut blocks: BTreeMap<u64, HashSet<&str>> = BTreeMap::new();
    for record in dataset.records() {
        let hashes = blocks.entry(dataset.aligned_block(record)).or_default();
        if !record.hash.is_empty() {
            hashes.insert(record.hash.as_str());
        }
    }
    blocks
}

/// `|a ∩ b| / |a ∪ b|`, 1.0 when both sets are empty.
pub fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Per-block Jaccard similarity over block numbers present in both
/// datasets.
pub fn similarity(reference: &Dataset, candidate: &Dataset) -> Option<SimilarityStats> {
    let reference_blocks = block_hash_sets(reference);
    let candidate_blocks = block_hash_sets(candidate);

    let per_block: Vec<BlockSimilarity> = reference_blocks
        .iter()
        .filter_map(|(block, reference_hashes)| {
            candidate_blocks.get(block).map(|candidate_hashes| BlockSimilarity {
                block: *block,
                jaccard: jaccard(reference_hashes, candidate_hashes),
            })
        })
        .collect();

    if per_block.is_empty() {
        return None;
    }

    let mean_jaccard = per_block.iter().map(|b| b.jaccard).sum::<f64>() / per_block.len() as f64;
    Some(SimilarityStats {
        aligned_blocks: per_block.len(),
        mean_jaccard,
        per_block,
    })
}

/// Compares `candidate` against `reference`.
pub fn compare(reference: &Dataset, candidate: &Dataset) -> ComparisonResult {
    let (matched, reference_size, coverage) = coverage(reference, candidate);
    let latency = latency(reference, candidate);
    let similarity = similarity(reference, candidate);

    if latency.is_none() {
        debug!(
            reference = %reference.label(),
            candidate = %candidate.label(),
            "no matching hashes, latency omitted"
        );
    }

    ComparisonResult {
        reference: reference.label(),
        candidate: candidate.label(),
        reference_size,
        matched,
        coverage,
        latency,
        similarity,
    }
}
