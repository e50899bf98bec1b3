//! RF estimator (spec.md §4.4).
//!
//! For each marker pair in a requested upper-triangular region and each
//! recombination-fraction grid level, accumulates per-line log-likelihoods
//! across every design, then post-processes into theta/lod/lkhd.
//!
//! Grounded on `original_source/src/estimateRF.cpp`: validation order (grid
//! before region, region before allocation), the per-design/per-pair/per-line
//! accumulation loop, and the post-processing pass producing theta/lod/lkhd
//! with the 0xFF/NaN "no data" sentinel.

use crate::design::Design;
use crate::error::{Advisory, KernelError};
use crate::lookup::{LookupTable, Regime};
use crate::triangular::MISSING_BYTE;

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

/// 1 GiB, the lookup-memory advisory threshold (spec.md §4.4).
const LOOKUP_MEMORY_ADVISORY_BYTES: u64 = 1 << 30;
/// 4 GiB, the result-memory advisory threshold (spec.md §4.4).
const RESULT_MEMORY_ADVISORY_BYTES: u64 = 4 << 30;

/// A half-open marker index range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerRange {
    pub start: usize,
    pub end: usize,
}

impl MarkerRange {
    pub fn new(start: usize, end: usize) -> Self {
        MarkerRange { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Request for one RF estimation run.
pub struct RfRequest<'a> {
    pub designs: &'a [Design],
    /// Strictly increasing, one entry exactly 0.5 (spec.md data model (ii)).
    pub grid: &'a [f64],
    pub marker1_range: MarkerRange,
    pub marker2_range: MarkerRange,
    pub keep_lod: bool,
    pub keep_lkhd: bool,
}

/// RF estimation output for every pair in the requested region, in
/// `(marker1, marker2)` row-major order with `marker1` outer, matching
/// [`pairs_in_region`]'s iteration order.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RfResult {
    pub recombination_fractions: Vec<f64>,
    pub marker1_range: (usize, usize),
    pub marker2_range: (usize, usize),
    pub pairs: Vec<(usize, usize)>,
    /// `0xFF` = no data; otherwise an index into `recombination_fractions`.
    pub theta: Vec<u8>,
    pub lod: Option<Vec<f64>>,
    pub lkhd: Option<Vec<f64>>,
}

/// Validates the recombination-fraction grid (spec.md §4.4 contract) and
/// returns the index of the grid's `0.5` element.
fn validate_grid(grid: &[f64]) -> Result<usize, KernelError> {
    if grid.windows(2).any(|w| !(w[0] < w[1])) {
        return Err(KernelError::InvalidGrid {
            detail: "recombination-fraction grid must be strictly increasing".to_string(),
        });
    }
    let half_candidates: Vec<usize> = grid.iter().enumerate().filter(|&(_, &r)| r == 0.5).map(|(i, _)| i).collect();
    match half_candidates.as_slice() {
        [half] => Ok(*half),
        [] => Err(KernelError::InvalidGrid {
            detail: "recombination-fraction grid must contain an element exactly equal to 0.5".to_string(),
        }),
        _ => Err(KernelError::InvalidGrid {
            detail: "recombination-fraction grid must contain exactly one element equal to 0.5".to_string(),
        }),
    }
}

/// Validates that the requested region intersects the upper triangle
/// (`marker1 < marker2` for some pair in range), failing with
/// [`KernelError::RegionBelowDiagonal`] otherwise.
fn validate_region(marker1_range: MarkerRange, marker2_range: MarkerRange) -> Result<(), KernelError> {
    let intersects = marker1_range.start as i64 + 1 < marker2_range.end as i64;
    if !intersects {
        return Err(KernelError::RegionBelowDiagonal {
            m1_start: marker1_range.start,
            m1_end: marker1_range.end,
            m2_start: marker2_range.start,
            m2_end: marker2_range.end,
        });
    }
    Ok(())
}

/// Enumerates the pairs `(m1, m2)` with `m1 < m2` in the requested region, in
/// `m1`-outer, `m2`-inner order.
pub fn pairs_in_region(marker1_range: MarkerRange, marker2_range: MarkerRange) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for m1 in marker1_range.start..marker1_range.end {
        for m2 in marker2_range.start..marker2_range.end {
            if m1 < m2 {
                pairs.push((m1, m2));
            }
        }
    }
    pairs
}

fn regime_for(intercross_generations: u32) -> Regime {
    if intercross_generations == 0 {
        Regime::Funnel
    } else {
        Regime::Ai(intercross_generations)
    }
}

/// Runs the RF estimator over every design in `request`, returning the
/// result plus any advisories raised along the way.
pub fn estimate_rf(request: &RfRequest) -> Result<(RfResult, Vec<Advisory>), KernelError> {
    let half_index = validate_grid(request.grid)?;
    validate_region(request.marker1_range, request.marker2_range)?;

    let pairs = pairs_in_region(request.marker1_range, request.marker2_range);
    let n_levels = request.grid.len();
    let mut scores = vec![0.0f64; pairs.len() * n_levels];
    let mut advisories = Vec::new();

    for design in request.designs {
        let canonical = design.canonicalize()?;
        let selfing_levels = design.distinct_selfing_levels();
        let max_ai = design.max_ai_generations();
        let lookup = LookupTable::build(&canonical.patterns.patterns, design.n_founders, &selfing_levels, max_ai)?;

        let max_observed = canonical.patterns.patterns.iter().map(|p| p.n_observed_values).max().unwrap_or(0) as u64;
        let n_funnels = canonical.funnels.funnels.len() as u64;
        let n_pattern_pairs = crate::triangular::packed_len(canonical.patterns.patterns.len()) as u64;
        let estimated_lookup_bytes = n_pattern_pairs
            * (n_funnels + max_ai as u64)
            * selfing_levels.len() as u64
            * max_observed
            * max_observed
            * 8;
        if estimated_lookup_bytes > LOOKUP_MEMORY_ADVISORY_BYTES {
            let advisory = Advisory::LookupMemoryAboveThreshold { estimated_bytes: estimated_lookup_bytes };
            advisory.log();
            advisories.push(advisory);
        }

        let design_rows: Vec<Vec<f64>> = {
            // Emission only depends on (pattern pair, regime, selfing, r), not
            // on which line is asking; cache one table per distinct
            // (regime, selfing) slot actually used by this design's lines,
            // recomputed once per grid level instead of once per line.
            let compute_row = |&(m1, m2): &(usize, usize)| -> Result<Vec<f64>, KernelError> {
                let p1 = canonical.patterns.marker_to_pattern[m1];
                let p2 = canonical.patterns.marker_to_pattern[m2];
                let line_slots: Vec<(Option<u32>, Regime)> =
                    design.lines.iter().map(|l| (design.selfing_for(l), regime_for(l.intercross_generations))).collect();
                let mut distinct_slots = line_slots.clone();
                distinct_slots.sort_by_key(|&(s, r)| (s, match r { Regime::Funnel => (0u32, 0u32), Regime::Ai(a) => (1, a) }));
                distinct_slots.dedup();

                let mut row = vec![0.0f64; n_levels];
                for (level_idx, &r) in request.grid.iter().enumerate() {
                    let tables: Vec<(Option<u32>, Regime, Option<crate::lookup::EmissionTable>)> = distinct_slots
                        .iter()
                        .map(|&(selfing, regime)| {
                            lookup
                                .emission(&canonical.patterns.patterns, p1, p2, selfing, regime, r)
                                .map(|t| (selfing, regime, t))
                        })
                        .collect::<Result<Vec<_>, _>>()?;

                    for (line_idx, line) in design.lines.iter().enumerate() {
                        let (selfing, regime) = line_slots[line_idx];
                        let Some(v1) = design.recode_final(&canonical.patterns, m1, design.finals[line_idx][m1]) else {
                            continue;
                        };
                        let Some(v2) = design.recode_final(&canonical.patterns, m2, design.finals[line_idx][m2]) else {
                            continue;
                        };
                        let Some(slot_idx) = tables.iter().position(|(s, rg, _)| *s == selfing && *rg == regime) else {
                            continue;
                        };
                        let Some(table) = tables[slot_idx].2.as_ref() else {
                            continue;
                        };
                        let prob = table.get(v1 as usize, v2 as usize);
                        row[level_idx] += line.weight * prob.ln();
                    }
                }
                Ok(row)
            };

            #[cfg(not(target_arch = "wasm32"))]
            {
                pairs.par_iter().map(compute_row).collect::<Result<Vec<_>, _>>()?
            }
            #[cfg(target_arch = "wasm32")]
            {
                pairs.iter().map(compute_row).collect::<Result<Vec<_>, _>>()?
            }
        };

        for (pair_idx, row) in design_rows.into_iter().enumerate() {
            let base = pair_idx * n_levels;
            for (level_idx, value) in row.into_iter().enumerate() {
                scores[base + level_idx] += value;
            }
        }
    }

    let estimated_result_bytes = (scores.len() as u64) * 8
        + pairs.len() as u64 * if request.keep_lod { 8 } else { 0 }
        + pairs.len() as u64 * if request.keep_lkhd { 8 } else { 0 };
    if estimated_result_bytes > RESULT_MEMORY_ADVISORY_BYTES {
        let advisory = Advisory::ResultMemoryAboveThreshold { estimated_bytes: estimated_result_bytes };
        advisory.log();
        advisories.push(advisory);
    }

    let post_process = |chunk: &[f64]| -> (u8, f64, f64) {
        let has_data = chunk.iter().any(|&v| v != 0.0);
        if !has_data {
            return (MISSING_BYTE, f64::NAN, f64::NAN);
        }
        // First-wins on ties, matching `estimateRF.cpp`'s `std::max_element`
        // (which returns the first maximal element, not the last).
        let mut argmax = 0usize;
        let mut max_score = chunk[0];
        for (idx, &score) in chunk.iter().enumerate().skip(1) {
            if score > max_score {
                max_score = score;
                argmax = idx;
            }
        }
        let lod = max_score - chunk[half_index];
        (argmax as u8, lod, max_score)
    };

    let n_pairs = pairs.len();
    #[cfg(not(target_arch = "wasm32"))]
    let processed: Vec<(u8, f64, f64)> = scores.par_chunks(n_levels).map(post_process).collect();
    #[cfg(target_arch = "wasm32")]
    let processed: Vec<(u8, f64, f64)> = scores.chunks(n_levels).map(post_process).collect();

    let theta: Vec<u8> = processed.iter().map(|&(t, _, _)| t).collect();
    let lod = if request.keep_lod { Some(processed.iter().map(|&(_, l, _)| l).collect()) } else { None };
    let lkhd = if request.keep_lkhd { Some(processed.iter().map(|&(_, _, k)| k).collect()) } else { None };
    debug_assert_eq!(theta.len(), n_pairs);

    Ok((
        RfResult {
            recombination_fractions: request.grid.to_vec(),
            marker1_range: (request.marker1_range.start, request.marker1_range.end),
            marker2_range: (request.marker2_range.start, request.marker2_range.end),
            pairs,
            theta,
            lod,
            lkhd,
        },
        advisories,
    ))
}
