//! Shared experimental-design data shapes consumed by the RF estimator
//! (§4.4) and the Viterbi imputer (§4.5) — spec.md §6's "plain data" external
//! interface, in Rust form.

use std::collections::BTreeMap;

use crate::error::KernelError;
use crate::funnel::{canonicalize_funnels, FunnelTable};
use crate::pattern::{canonicalize_patterns, AlleleCode, PatternTable, RawMarker, MISSING};

/// Whether a design's lines are recoded under finite or infinite selfing
/// (spec.md §4.5). This is a per-design property (mirrors the original's
/// `pedigree@selfing` slot), not per-line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfingRegime {
    Finite,
    Infinite,
}

/// Per-line pedigree metadata (spec.md §3 "Line metadata").
#[derive(Debug, Clone)]
pub struct LineMetadata {
    /// Ordered founder-ID tuple describing this line's cross.
    pub funnel: Vec<u8>,
    pub intercross_generations: u32,
    pub selfing_generations: u32,
    pub weight: f64,
}

/// One experimental design: a founder panel, observed lines, and the
/// pedigree metadata needed to place each line in the right emission and
/// transition regime.
#[derive(Debug, Clone)]
pub struct Design {
    pub n_founders: usize,
    pub n_markers: usize,
    pub n_lines: usize,
    pub selfing_regime: SelfingRegime,
    /// `founder_alleles[marker][founder]`.
    pub founder_alleles: Vec<Vec<AlleleCode>>,
    /// Per-marker heterozygote encoding, keyed by unordered raw allele pair.
    pub heterozygotes: Vec<BTreeMap<(AlleleCode, AlleleCode), AlleleCode>>,
    /// `finals[line][marker]`; [`MISSING`] denotes no call.
    pub finals: Vec<Vec<AlleleCode>>,
    pub lines: Vec<LineMetadata>,
}

/// The canonicalised form of a [`Design`]: marker patterns (with per-marker
/// recoding) and the funnel table.
pub struct CanonicalDesign {
    pub patterns: PatternTable,
    pub funnels: FunnelTable,
}

impl Design {
    fn validate_shape(&self) -> Result<(), KernelError> {
        if self.founder_alleles.len() != self.n_markers {
            return Err(KernelError::ShapeMismatch {
                detail: format!(
                    "founder_alleles has {} marker columns, expected n_markers={}",
                    self.founder_alleles.len(),
                    self.n_markers
                ),
            });
        }
        if self.heterozygotes.len() != self.n_markers {
            return Err(KernelError::ShapeMismatch {
                detail: format!(
                    "heterozygotes has {} entries, expected n_markers={}",
                    self.heterozygotes.len(),
                    self.n_markers
                ),
            });
        }
        if self.finals.len() != self.n_lines {
            return Err(KernelError::ShapeMismatch {
                detail: format!("finals has {} lines, expected n_lines={}", self.finals.len(), self.n_lines),
            });
        }
        if self.lines.len() != self.n_lines {
            return Err(KernelError::ShapeMismatch {
                detail: format!("line metadata has {} entries, expected n_lines={}", self.lines.len(), self.n_lines),
            });
        }
        for (line_idx, row) in self.finals.iter().enumerate() {
            if row.len() != self.n_markers {
                return Err(KernelError::ShapeMismatch {
                    detail: format!(
                        "finals row for line {line_idx} has {} markers, expected n_markers={}",
                        row.len(),
                        self.n_markers
                    ),
                });
            }
        }
        Ok(())
    }

    /// Canonicalises this design's markers into patterns and its lines'
    /// funnels into a funnel table.
    pub fn canonicalize(&self) -> Result<CanonicalDesign, KernelError> {
        self.validate_shape()?;
        let raw_markers: Vec<RawMarker> = self
            .founder_alleles
            .iter()
            .zip(&self.heterozygotes)
            .map(|(alleles, hets)| RawMarker {
                founder_alleles: alleles.clone(),
                heterozygotes: hets.clone(),
            })
            .collect();
        let patterns = canonicalize_patterns(&raw_markers, self.n_founders)?;
        let funnel_tuples: Vec<Vec<u8>> = self.lines.iter().map(|l| l.funnel.clone()).collect();
        let funnels = canonicalize_funnels(&funnel_tuples, self.n_founders)?;
        Ok(CanonicalDesign { patterns, funnels })
    }

    /// Recodes a raw observed final-genotype call at `marker` into that
    /// marker's pattern-local dense observation code. Returns `None` for
    /// [`MISSING`] or for a raw value unreachable under the marker's
    /// founder/het model.
    pub fn recode_final(&self, patterns: &PatternTable, marker: usize, raw_value: AlleleCode) -> Option<u8> {
        if raw_value == MISSING {
            return None;
        }
        patterns.recodings[marker].value_to_dense.get(&raw_value).copied()
    }

    /// The selfing value to pass to [`crate::probability`] for a line: under
    /// [`SelfingRegime::Infinite`] this is always `None` regardless of the
    /// line's own `selfing_generations`, since the absorbing infinite-
    /// selfing model ignores generation count entirely.
    pub fn selfing_for(&self, line: &LineMetadata) -> Option<u32> {
        match self.selfing_regime {
            SelfingRegime::Infinite => None,
            SelfingRegime::Finite => Some(line.selfing_generations),
        }
    }

    /// The distinct selfing levels present among this design's lines, in the
    /// representation [`crate::lookup::LookupTable::build`] expects.
    pub fn distinct_selfing_levels(&self) -> Vec<Option<u32>> {
        match self.selfing_regime {
            SelfingRegime::Infinite => vec![None],
            SelfingRegime::Finite => {
                let mut levels: Vec<u32> = self.lines.iter().map(|l| l.selfing_generations).collect();
                levels.sort_unstable();
                levels.dedup();
                levels.into_iter().map(Some).collect()
            }
        }
    }

    /// The largest intercross-generation count among this design's lines,
    /// at least 1 (the lookup table always builds at least one AI slot even
    /// if every line is funnel-regime, matching the original's
    /// `maxAIGenerations` sizing).
    pub fn max_ai_generations(&self) -> u32 {
        self.lines
            .iter()
            .map(|l| l.intercross_generations)
            .max()
            .unwrap_or(0)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_design() -> Design {
        Design {
            n_founders: 2,
            n_markers: 2,
            n_lines: 2,
            selfing_regime: SelfingRegime::Finite,
            founder_alleles: vec![vec![0, 1], vec![0, 1]],
            heterozygotes: vec![BTreeMap::new(), BTreeMap::new()],
            finals: vec![vec![0, 0], vec![1, 1]],
            lines: vec![
                LineMetadata { funnel: vec![0, 1], intercross_generations: 0, selfing_generations: 3, weight: 1.0 },
                LineMetadata { funnel: vec![1, 0], intercross_generations: 0, selfing_generations: 5, weight: 1.0 },
            ],
        }
    }

    #[test]
    fn canonicalizes_without_error() {
        let design = tiny_design();
        let canonical = design.canonicalize().unwrap();
        assert_eq!(canonical.patterns.patterns.len(), 1);
        assert_eq!(canonical.funnels.funnels.len(), 2);
    }

    #[test]
    fn distinct_selfing_levels_deduplicated_and_sorted() {
        let design = tiny_design();
        assert_eq!(design.distinct_selfing_levels(), vec![Some(3), Some(5)]);
    }

    #[test]
    fn infinite_selfing_collapses_to_single_none_level() {
        let mut design = tiny_design();
        design.selfing_regime = SelfingRegime::Infinite;
        assert_eq!(design.distinct_selfing_levels(), vec![None]);
        assert_eq!(design.selfing_for(&design.lines[0]), None);
    }

    #[test]
    fn recode_final_maps_raw_founder_code_to_dense_pattern_value() {
        let design = tiny_design();
        let canonical = design.canonicalize().unwrap();
        assert_eq!(design.recode_final(&canonical.patterns, 0, 0), Some(0));
        assert_eq!(design.recode_final(&canonical.patterns, 0, crate::pattern::MISSING), None);
    }

    #[test]
    fn shape_mismatch_reported_for_wrong_finals_length() {
        let mut design = tiny_design();
        design.finals.pop();
        let err = design.canonicalize();
        assert!(matches!(err, Err(KernelError::ShapeMismatch { .. })));
    }
}
