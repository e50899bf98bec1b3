//! Marker-pattern canonicalisation (SPEC_FULL.md / spec.md §4.1).
//!
//! Deduplicates markers by segregation pattern: markers whose founder-allele
//! vector and heterozygote map are identical after relabelling alleles to a
//! dense `0..k-1` range collapse onto one pattern ID. IDs are assigned in
//! order of first occurrence, so the ID space is contiguous and
//! deterministic for a fixed marker order.

use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::error::KernelError;

/// Marker observation / founder-allele code. Non-negative; [`MISSING`]
/// denotes no call.
pub type AlleleCode = i32;

/// Sentinel for "no call" in raw founder-allele input.
pub const MISSING: AlleleCode = -9;

/// Maximum distinct alleles permitted at a single marker (data-model
/// invariant vi).
pub const MAX_ALLELES: usize = 64;

/// A single marker's raw data before canonicalisation: a founder-allele
/// vector of length `n_founders`, plus a heterozygote map keyed by unordered
/// pairs of *raw* founder-allele codes.
#[derive(Debug, Clone)]
pub struct RawMarker {
    pub founder_alleles: Vec<AlleleCode>,
    pub heterozygotes: BTreeMap<(AlleleCode, AlleleCode), AlleleCode>,
}

/// The canonical, dense form of a marker pattern shared by every marker
/// that maps to this pattern ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CanonicalKey {
    founder_alleles: Vec<u8>,
    heterozygotes: Vec<((u8, u8), u8)>,
}

/// A distinct marker pattern.
#[derive(Debug, Clone)]
pub struct MarkerPattern {
    pub id: usize,
    /// Dense-relabelled founder-allele vector, length `n_founders`.
    pub founder_alleles: Vec<u8>,
    /// Heterozygote map restricted to pairs occurring in `founder_alleles`,
    /// values in the same dense observation-code space as
    /// `founder_alleles`.
    pub heterozygotes: BTreeMap<(u8, u8), u8>,
    /// Count of distinct observation codes reachable at this pattern
    /// (homozygote codes union heterozygote-derived codes).
    pub n_observed_values: usize,
}

/// Per-marker raw-value recoding produced alongside pattern canonicalisation.
///
/// Two markers sharing a pattern ID need not share raw allele codes (marker A
/// might use founder codes `{10, 20}` while marker B uses `{5, 9}` and still
/// densify to the same pattern); callers that need to recode a line's raw
/// observed final-genotype call into the pattern's dense code space must go
/// through the specific marker's recoding, not the pattern's.
#[derive(Debug, Clone)]
pub struct MarkerRecoding {
    /// Maps a raw observation code (founder-allele or heterozygote value) at
    /// this marker to its dense code in the marker's pattern. A raw value
    /// absent from this map cannot occur under the marker's founder/het
    /// model and should be treated as unobservable by callers.
    pub value_to_dense: HashMap<AlleleCode, u8>,
}

/// Output of canonicalising a full marker set.
pub struct PatternTable {
    /// `marker_to_pattern[m]` is the pattern ID of marker `m`.
    pub marker_to_pattern: Vec<usize>,
    pub patterns: Vec<MarkerPattern>,
    /// `recodings[m]` recodes marker `m`'s raw observation codes into its
    /// pattern's dense code space; same length and order as the input
    /// marker slice.
    pub recodings: Vec<MarkerRecoding>,
}

/// Canonicalises a set of raw markers into a dense pattern table.
///
/// Fails with [`KernelError::TooManyAlleles`] if any marker has more than
/// [`MAX_ALLELES`] distinct founder alleles, and with
/// [`KernelError::UnsupportedFounderCount`] if `n_founders` is not one of
/// 2, 4, 8, 16.
pub fn canonicalize_patterns(
    markers: &[RawMarker],
    n_founders: usize,
) -> Result<PatternTable, KernelError> {
    if !matches!(n_founders, 2 | 4 | 8 | 16) {
        return Err(KernelError::UnsupportedFounderCount { found: n_founders });
    }

    let mut marker_to_pattern = Vec::with_capacity(markers.len());
    let mut patterns = Vec::new();
    let mut recodings = Vec::with_capacity(markers.len());
    let mut seen: HashMap<CanonicalKey, usize> = HashMap::new();

    for (marker_idx, marker) in markers.iter().enumerate() {
        if marker.founder_alleles.len() != n_founders {
            return Err(KernelError::ShapeMismatch {
                detail: format!(
                    "marker {marker_idx} founder-allele vector has length {}, expected {n_founders}",
                    marker.founder_alleles.len()
                ),
            });
        }

        let (dense_founders, raw_to_dense) = densify_founders(&marker.founder_alleles);
        if raw_to_dense.len() > MAX_ALLELES {
            return Err(KernelError::TooManyAlleles {
                marker: marker_idx,
                found: raw_to_dense.len(),
            });
        }

        let mut het_in_dense: BTreeMap<(u8, u8), AlleleCode> = BTreeMap::new();
        for (&(a, b), &value) in marker.heterozygotes.iter() {
            if let (Some(&da), Some(&db)) = (raw_to_dense.get(&a), raw_to_dense.get(&b)) {
                let (lo, hi) = if da <= db { (da, db) } else { (db, da) };
                het_in_dense.insert((lo, hi), value);
            }
            // Pairs referencing alleles absent from this marker's founders
            // are not observable here; per spec.md §3 "absent entries mean
            // the heterozygote is not observable", so they are dropped
            // rather than erroring.
        }

        // Observation-code space: first the k dense founder codes (0..k-1,
        // keyed back to their own raw founder codes so a raw homozygous
        // final-genotype call recodes to the same dense value), then any
        // heterozygote-derived raw values not already covered, in
        // first-occurrence order.
        let k = raw_to_dense.len();
        let mut raw_value_to_dense: HashMap<AlleleCode, u8> = raw_to_dense
            .iter()
            .map(|(&raw, &dense)| (raw, dense))
            .collect();
        let mut next_value_code = k as AlleleCode;
        let mut heterozygotes: BTreeMap<(u8, u8), u8> = BTreeMap::new();
        for (&pair, &raw_value) in het_in_dense.iter() {
            let dense_value = *raw_value_to_dense.entry(raw_value).or_insert_with(|| {
                let v = next_value_code as u8;
                next_value_code += 1;
                v
            });
            heterozygotes.insert(pair, dense_value);
        }
        let n_observed_values = next_value_code as usize;
        recodings.push(MarkerRecoding {
            value_to_dense: raw_value_to_dense,
        });

        let key = CanonicalKey {
            founder_alleles: dense_founders.clone(),
            heterozygotes: heterozygotes.iter().map(|(&k, &v)| (k, v)).collect(),
        };

        let pattern_id = *seen.entry(key).or_insert_with(|| {
            let id = patterns.len();
            patterns.push(MarkerPattern {
                id,
                founder_alleles: dense_founders,
                heterozygotes,
                n_observed_values,
            });
            id
        });
        marker_to_pattern.push(pattern_id);
    }

    Ok(PatternTable {
        marker_to_pattern,
        patterns,
        recodings,
    })
}

/// Relabels raw founder-allele codes to dense `0..k-1` values in order of
/// first occurrence, leaving `MISSING` as-is (encoded as `0xFF` in the
/// dense vector, consistent with the packed-triangular missing sentinel).
fn densify_founders(raw: &[AlleleCode]) -> (Vec<u8>, HashMap<AlleleCode, u8>) {
    let mut raw_to_dense: HashMap<AlleleCode, u8> = HashMap::new();
    let mut dense = Vec::with_capacity(raw.len());
    for &code in raw {
        if code == MISSING {
            dense.push(crate::triangular::MISSING_BYTE);
            continue;
        }
        let next = raw_to_dense.len() as u8;
        let dense_code = *raw_to_dense.entry(code).or_insert(next);
        dense.push(dense_code);
    }
    (dense, raw_to_dense)
}
