//! Haplotype-to-marker lookup table (spec.md §4.3).
//!
//! Projects the two-locus founder-pair joint distribution produced by
//! [`crate::probability`] through a pair of marker patterns into an
//! observable `a x b` table indexed by (marker-1 value, marker-2 value), and
//! filters pattern pairs whose projected likelihood surface is too flat to
//! be informative about recombination fraction.
//!
//! Grounded on `original_source/src/constructLookupTable.hpp`'s `isValid`
//! (the literal filter predicate, reproduced in [`is_informative`]) and its
//! outer `firstPattern`/`secondPattern` loop nest, reproduced here as a
//! `rayon` pass over the packed triangular pair index per §5's first named
//! parallel loop.

use crate::error::KernelError;
use crate::genotype::{all_founder_pair_states, observed_value};
use crate::pattern::MarkerPattern;
use crate::probability::{haplotype_pair_probabilities, CompressedProbs};
use crate::triangular::{pack_index, packed_len};

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

/// Number of points in the fine grid used by the informativeness filter
/// (spec.md §4.3).
pub const FINE_GRID_POINTS: usize = 101;
/// Minimum `|r_u - r_v|` at which two grid points are compared at all.
pub const FINE_GRID_SEPARATION: f64 = 0.06;
/// Minimum required L1 distance between projected tables at two
/// sufficiently separated recombination fractions.
pub const INFORMATIVE_L1_THRESHOLD: f64 = 0.003;

/// Which per-line regime an emission query falls under: a design's lines
/// with zero intercross generations use the funnel-regime table; lines with
/// one or more intercross generations use the AI-generation table keyed by
/// that generation count (spec.md §4.4 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Regime {
    Funnel,
    Ai(u32),
}

/// A projected `a x b` emission table, row-major by (marker-1 value,
/// marker-2 value).
#[derive(Debug, Clone)]
pub struct EmissionTable {
    a: usize,
    b: usize,
    values: Vec<f64>,
}

impl EmissionTable {
    fn zeros(a: usize, b: usize) -> Self {
        EmissionTable {
            a,
            b,
            values: vec![0.0; a * b],
        }
    }

    pub fn a(&self) -> usize {
        self.a
    }

    pub fn b(&self) -> usize {
        self.b
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.b + j]
    }

    #[inline]
    fn add(&mut self, i: usize, j: usize, v: f64) {
        self.values[i * self.b + j] += v;
    }

    /// L1 distance between two tables of identical shape.
    pub fn l1_distance(&self, other: &EmissionTable) -> f64 {
        debug_assert_eq!((self.a, self.b), (other.a, other.b));
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(x, y)| (x - y).abs())
            .sum()
    }
}

/// Projects a two-locus founder-pair joint distribution through a pair of
/// marker patterns into an observed-value emission table.
///
/// Genotype combinations whose observed value is unobservable at either
/// locus (spec.md §3: "absent entries mean the heterozygote is not
/// observable") contribute no mass; the returned table need not sum to 1.
pub fn project(
    n_founders: usize,
    pattern1: &MarkerPattern,
    pattern2: &MarkerPattern,
    probs: &CompressedProbs,
) -> EmissionTable {
    let states = all_founder_pair_states(n_founders);
    let mut table = EmissionTable::zeros(pattern1.n_observed_values, pattern2.n_observed_values);
    for &g1 in &states {
        let Some(v1) = observed_value(pattern1, g1) else {
            continue;
        };
        for &g2 in &states {
            let Some(v2) = observed_value(pattern2, g2) else {
                continue;
            };
            table.add(v1 as usize, v2 as usize, probs.pair_probability(n_founders, g1, g2));
        }
    }
    table
}

fn fine_grid() -> Vec<f64> {
    (0..FINE_GRID_POINTS)
        .map(|i| 0.5 * (i as f64) / (FINE_GRID_POINTS as f64 - 1.0))
        .collect()
}

/// The informativeness filter (spec.md §4.3): over a 101-point fine grid of
/// recombination fractions, every pair of grid points separated by more than
/// [`FINE_GRID_SEPARATION`] must disagree (L1 distance) by at least
/// [`INFORMATIVE_L1_THRESHOLD`], or the pattern pair is declared
/// inadmissible for this (regime, selfing) slot.
pub fn is_informative(
    n_founders: usize,
    pattern1: &MarkerPattern,
    pattern2: &MarkerPattern,
    ai_generations: u32,
    selfing_generations: Option<u32>,
) -> Result<bool, KernelError> {
    let grid = fine_grid();
    let mut tables = Vec::with_capacity(grid.len());
    for &r in &grid {
        let probs = haplotype_pair_probabilities(n_founders, r, ai_generations, selfing_generations)?;
        tables.push(project(n_founders, pattern1, pattern2, &probs));
    }
    for i in 0..grid.len() {
        for j in i..grid.len() {
            if (grid[i] - grid[j]).abs() > FINE_GRID_SEPARATION
                && tables[i].l1_distance(&tables[j]) < INFORMATIVE_L1_THRESHOLD
            {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Admissibility for one ordered pattern pair, across every selfing level
/// and AI generation this lookup table was built for.
struct PairAdmissibility {
    /// Indexed by position in the table's `selfing_levels`. Per-funnel
    /// admissibility has no funnel dimension here: this implementation's
    /// haplotype-probability model (see DESIGN.md) depends on founder count
    /// and selfing/AI regime only, not on a specific funnel's topology, so
    /// every funnel of a design shares one admissibility value per selfing
    /// level.
    funnel: Vec<bool>,
    /// Indexed by `[selfing_idx][ai_idx]`, `ai_idx = ai_generation - 1`.
    ai: Vec<Vec<bool>>,
}

/// Precomputed admissibility for every ordered pattern pair a design's RF
/// estimation or Viterbi imputation might query, per spec.md §4.3.
pub struct LookupTable {
    n_founders: usize,
    selfing_levels: Vec<Option<u32>>,
    max_ai: u32,
    pairs: Vec<PairAdmissibility>,
}

impl LookupTable {
    /// Builds admissibility data for every pattern pair.
    ///
    /// `selfing_levels` lists the distinct selfing regimes to precompute
    /// (`None` denotes infinite selfing); `max_ai` is the largest intercross
    /// generation count observed among the design's lines.
    pub fn build(
        patterns: &[MarkerPattern],
        n_founders: usize,
        selfing_levels: &[Option<u32>],
        max_ai: u32,
    ) -> Result<LookupTable, KernelError> {
        if !matches!(n_founders, 2 | 4 | 8 | 16) {
            return Err(KernelError::UnsupportedFounderCount { found: n_founders });
        }
        let n = patterns.len();
        let mut pairs: Vec<PairAdmissibility> = Vec::with_capacity(packed_len(n));
        #[cfg(not(target_arch = "wasm32"))]
        {
            let results: Result<Vec<PairAdmissibility>, KernelError> = (0..n)
                .into_par_iter()
                .flat_map_iter(move |col| (0..=col).map(move |row| (row, col)))
                .map(|(row, col)| {
                    build_pair_admissibility(
                        n_founders,
                        &patterns[row],
                        &patterns[col],
                        selfing_levels,
                        max_ai,
                    )
                })
                .collect();
            let mut flat = results?;
            // par_iter over `col` with `flat_map_iter` preserves per-col
            // ordering and col ordering itself, which matches pack_index's
            // col-major fill order exactly.
            pairs.append(&mut flat);
        }
        #[cfg(target_arch = "wasm32")]
        {
            for col in 0..n {
                for row in 0..=col {
                    pairs.push(build_pair_admissibility(
                        n_founders,
                        &patterns[row],
                        &patterns[col],
                        selfing_levels,
                        max_ai,
                    )?);
                }
            }
        }

        Ok(LookupTable {
            n_founders,
            selfing_levels: selfing_levels.to_vec(),
            max_ai,
            pairs,
        })
    }

    fn selfing_index(&self, level: Option<u32>) -> Option<usize> {
        self.selfing_levels.iter().position(|&l| l == level)
    }

    /// Whether `(pattern1, pattern2)` is admissible under the funnel regime
    /// at the given selfing level.
    pub fn funnel_admissible(&self, pattern1: usize, pattern2: usize, selfing: Option<u32>) -> bool {
        let Some(s) = self.selfing_index(selfing) else {
            return false;
        };
        self.pairs[pack_index(pattern1, pattern2)].funnel[s]
    }

    /// Whether `(pattern1, pattern2)` is admissible under `ai_generations`
    /// intercrossing at the given selfing level.
    pub fn ai_admissible(
        &self,
        pattern1: usize,
        pattern2: usize,
        selfing: Option<u32>,
        ai_generations: u32,
    ) -> bool {
        let Some(s) = self.selfing_index(selfing) else {
            return false;
        };
        let ai_idx = (ai_generations.saturating_sub(1)) as usize;
        self.pairs[pack_index(pattern1, pattern2)]
            .ai
            .get(s)
            .and_then(|row| row.get(ai_idx))
            .copied()
            .unwrap_or(false)
    }

    /// Projects the emission table for `(pattern1, pattern2)` at
    /// recombination fraction `r` under `regime`, or `None` if the pair is
    /// inadmissible for that slot (spec.md §4.3: "inadmissible combinations
    /// have zeroed emissions" — modelled here as `None` so callers skip the
    /// pair rather than score a spurious all-zero table).
    pub fn emission(
        &self,
        patterns: &[MarkerPattern],
        pattern1: usize,
        pattern2: usize,
        selfing: Option<u32>,
        regime: Regime,
        r: f64,
    ) -> Result<Option<EmissionTable>, KernelError> {
        let admissible = match regime {
            Regime::Funnel => self.funnel_admissible(pattern1, pattern2, selfing),
            Regime::Ai(ai) => self.ai_admissible(pattern1, pattern2, selfing, ai),
        };
        if !admissible {
            return Ok(None);
        }
        let ai_param = match regime {
            Regime::Funnel => 0,
            Regime::Ai(ai) => ai,
        };
        let probs = haplotype_pair_probabilities(self.n_founders, r, ai_param, selfing)?;
        Ok(Some(project(self.n_founders, &patterns[pattern1], &patterns[pattern2], &probs)))
    }

    pub fn max_ai(&self) -> u32 {
        self.max_ai
    }
}

fn build_pair_admissibility(
    n_founders: usize,
    pattern1: &MarkerPattern,
    pattern2: &MarkerPattern,
    selfing_levels: &[Option<u32>],
    max_ai: u32,
) -> Result<PairAdmissibility, KernelError> {
    let mut funnel = Vec::with_capacity(selfing_levels.len());
    let mut ai = Vec::with_capacity(selfing_levels.len());
    for &selfing in selfing_levels {
        funnel.push(is_informative(n_founders, pattern1, pattern2, 0, selfing)?);
        let mut ai_row = Vec::with_capacity(max_ai as usize);
        for ai_gen in 1..=max_ai {
            ai_row.push(is_informative(n_founders, pattern1, pattern2, ai_gen, selfing)?);
        }
        ai.push(ai_row);
    }
    Ok(PairAdmissibility { funnel, ai })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{canonicalize_patterns, RawMarker};
    use std::collections::BTreeMap;

    fn raw(founders: &[i32]) -> RawMarker {
        RawMarker {
            founder_alleles: founders.to_vec(),
            heterozygotes: BTreeMap::new(),
        }
    }

    #[test]
    fn fine_grid_spans_zero_to_half_inclusive() {
        let grid = fine_grid();
        assert_eq!(grid.len(), FINE_GRID_POINTS);
        assert_eq!(grid[0], 0.0);
        assert!((grid[grid.len() - 1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn identical_markers_are_informative_under_finite_selfing() {
        let markers = vec![raw(&[0, 1]), raw(&[0, 1])];
        let table = canonicalize_patterns(&markers, 2).unwrap();
        let pattern = &table.patterns[0];
        // A perfectly polymorphic two-founder marker pair must be
        // informative: at r=0 the markers are fully coupled, at r=0.5 fully
        // independent, a strong signal no selfing regime flattens out.
        assert!(is_informative(2, pattern, pattern, 0, Some(3)).unwrap());
    }

    #[test]
    fn lookup_table_builds_and_reports_symmetric_admissibility() {
        let markers = vec![raw(&[0, 1]), raw(&[0, 1])];
        let table = canonicalize_patterns(&markers, 2).unwrap();
        let lookup = LookupTable::build(&table.patterns, 2, &[Some(2)], 2).unwrap();
        let a = lookup.funnel_admissible(0, 0, Some(2));
        assert!(a);
        // no AI lines in this fixture's design, but the slot should still be
        // computed and queryable.
        let _ = lookup.ai_admissible(0, 0, Some(2), 1);
    }

    #[test]
    fn emission_returns_none_for_unknown_selfing_level() {
        let markers = vec![raw(&[0, 1]), raw(&[0, 1])];
        let table = canonicalize_patterns(&markers, 2).unwrap();
        let lookup = LookupTable::build(&table.patterns, 2, &[Some(2)], 1).unwrap();
        let result = lookup.emission(&table.patterns, 0, 0, Some(99), Regime::Funnel, 0.1).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn project_assigns_mass_only_to_reachable_observed_pairs() {
        let markers = vec![raw(&[0, 1]), raw(&[0, 1])];
        let table = canonicalize_patterns(&markers, 2).unwrap();
        let pattern = &table.patterns[0];
        let probs = haplotype_pair_probabilities(2, 0.1, 0, Some(2)).unwrap();
        let emitted = project(2, pattern, pattern, &probs);
        assert_eq!(emitted.a(), 2);
        assert_eq!(emitted.b(), 2);
        let total: f64 = (0..2).flat_map(|i| (0..2).map(move |j| (i, j))).map(|(i, j)| emitted.get(i, j)).sum();
        assert!(total > 0.0 && total <= 1.0 + 1e-9);
    }
}
