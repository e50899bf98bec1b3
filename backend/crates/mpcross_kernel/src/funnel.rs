//! Funnel canonicalisation (spec.md §4.1).
//!
//! A funnel is the ordered tuple of founder IDs describing a line's cross.
//! Two funnels are equal iff their tuples are equal; funnel IDs are
//! assigned in order of first occurrence, same as marker patterns.

use std::collections::HashMap;

use crate::error::KernelError;

/// A distinct funnel.
#[derive(Debug, Clone)]
pub struct FunnelRecord {
    pub id: usize,
    /// Ordered founder-ID tuple, length `n_founders`.
    pub founders: Vec<u8>,
    /// The tuple packed into a fixed-width integer: 4 bits per founder slot
    /// (founder IDs are < 16, so 4 bits is always sufficient), most
    /// significant slot first. Fits in a `u64` for `n_founders <= 16`.
    pub encoding: u64,
}

/// Output of canonicalising the funnels observed across a set of lines.
pub struct FunnelTable {
    /// `line_to_funnel[i]` is the funnel ID of line `i`.
    pub line_to_funnel: Vec<usize>,
    pub funnels: Vec<FunnelRecord>,
}

fn encode(tuple: &[u8]) -> u64 {
    tuple.iter().fold(0u64, |acc, &f| (acc << 4) | (f as u64 & 0xF))
}

/// Canonicalises the funnel tuples observed across a set of lines.
///
/// Fails with [`KernelError::PedigreeError`] aggregating every line whose
/// funnel tuple has the wrong length or names a founder ID `>= n_founders`,
/// mirroring the original's aggregated funnel-validation error.
pub fn canonicalize_funnels(
    lines: &[Vec<u8>],
    n_founders: usize,
) -> Result<FunnelTable, KernelError> {
    let mut problems = Vec::new();
    for (line_idx, tuple) in lines.iter().enumerate() {
        if tuple.len() != n_founders {
            problems.push(format!(
                "line {line_idx}: funnel has {} entries, expected {n_founders}",
                tuple.len()
            ));
            continue;
        }
        if let Some(&bad) = tuple.iter().find(|&&f| f as usize >= n_founders) {
            problems.push(format!(
                "line {line_idx}: funnel names founder {bad}, but only {n_founders} founders are defined"
            ));
        }
    }
    if !problems.is_empty() {
        return Err(KernelError::PedigreeError {
            detail: problems.join("; "),
        });
    }

    let mut line_to_funnel = Vec::with_capacity(lines.len());
    let mut funnels = Vec::new();
    let mut seen: HashMap<Vec<u8>, usize> = HashMap::new();

    for tuple in lines {
        let id = *seen.entry(tuple.clone()).or_insert_with(|| {
            let id = funnels.len();
            funnels.push(FunnelRecord {
                id,
                founders: tuple.clone(),
                encoding: encode(tuple),
            });
            id
        });
        line_to_funnel.push(id);
    }

    Ok(FunnelTable {
        line_to_funnel,
        funnels,
    })
}
