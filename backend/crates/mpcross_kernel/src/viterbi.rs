//! Viterbi founder imputer (spec.md §4.5).
//!
//! Runs a per-chromosome max-product HMM over founder/founder-pair states:
//! transitions come from the two-locus joint founder-pair distribution
//! (§4.2) at the gap's Haldane-derived recombination fraction; emissions are
//! a deterministic indicator against the observed marker value, with a fixed
//! substitution probability when the observation is missing.
//!
//! Grounded on `original_source/src/imputeFounders.cpp`: the outer
//! chromosome-by-chromosome driver, the infinite-selfing
//! heterozygote-to-missing substitution (with its single aggregated
//! warning), and the key-table construction loop (diagonal = founder index
//! + 1, off-diagonal = dense pair index starting at `nFounders + 1`).
//!
//! Emissions are not read from the §4.3 lookup tables here: those tables
//! marginalise over hidden founder state to produce an *observed-value*
//! distribution (what the RF estimator needs), whereas Viterbi tracks the
//! hidden state explicitly and needs, for a specific candidate state, the
//! probability of the state itself transitioning plus whether that state's
//! mapped observation matches what was actually observed. The latter is
//! exactly [`crate::genotype::observed_value`]; the former is
//! [`crate::probability::haplotype_pair_probabilities`]. See DESIGN.md.

use crate::design::{Design, SelfingRegime};
use crate::error::{Advisory, KernelError};
use crate::genotype::{all_founder_pair_states, observed_value};
use crate::pattern::MarkerPattern;
use crate::probability::{haplotype_pair_probabilities, single_locus_probabilities, FounderPair};
use crate::pattern::MISSING as RAW_MISSING_FINAL;

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

/// Converts a Haldane genetic distance in Morgans to a recombination
/// fraction (GLOSSARY: `r = (1 - e^{-2d}) / 2`).
pub fn haldane_to_rf(distance_morgans: f64) -> f64 {
    (1.0 - (-2.0 * distance_morgans).exp()) / 2.0
}

/// Recombination fraction across a gap given two Haldane cM positions.
fn gap_to_rf(pos1_cm: f64, pos2_cm: f64) -> f64 {
    haldane_to_rf((pos2_cm - pos1_cm) / 100.0)
}

/// One chromosome's ordered markers (as indices into the design's marker
/// columns) and their Haldane cM map positions. `markers.len() ==
/// positions_cm.len()`.
#[derive(Debug, Clone)]
pub struct ChromosomeMap {
    pub markers: Vec<usize>,
    pub positions_cm: Vec<f64>,
}

/// A user-facing key-table row: founder pair `(founder_i, founder_j)` (equal
/// for a homozygote) maps to `code` (spec.md §4.5's "diagonal = founder
/// index 1..F; off-diagonal = dense index F+1..F+F(F-1)/2, symmetric").
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct KeyEntry {
    pub founder_i: u8,
    pub founder_j: u8,
    pub code: u8,
}

/// Builds the key table for `n_founders` founders.
pub fn build_key_table(n_founders: usize) -> Vec<KeyEntry> {
    let mut entries = Vec::with_capacity(n_founders + n_founders * (n_founders - 1) / 2);
    for i in 0..n_founders {
        entries.push(KeyEntry { founder_i: i as u8, founder_j: i as u8, code: (i + 1) as u8 });
    }
    let mut counter = n_founders + 1;
    for i in 0..n_founders {
        for j in (i + 1)..n_founders {
            entries.push(KeyEntry { founder_i: i as u8, founder_j: j as u8, code: counter as u8 });
            counter += 1;
        }
    }
    entries
}

fn code_for_state(key: &[KeyEntry], state: FounderPair) -> u8 {
    let (a, b) = match state {
        FounderPair::Homo(i) => (i, i),
        FounderPair::Het(i, j) => (i, j),
    };
    key.iter()
        .find(|k| (k.founder_i == a && k.founder_j == b) || (k.founder_i == b && k.founder_j == a))
        .map(|k| k.code)
        .expect("key table covers every founder pair")
}

/// Request for one imputation run, covering every chromosome of a single
/// design.
pub struct ViterbiRequest<'a> {
    pub design: &'a Design,
    pub chromosomes: &'a [ChromosomeMap],
    pub homozygote_missing_prob: f64,
    pub heterozygote_missing_prob: f64,
}

/// Imputation output: `codes[line][marker]` is the re-encoded key code;
/// columns not covered by any chromosome in the request are left `0`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ViterbiResult {
    pub codes: Vec<Vec<u8>>,
    pub key: Vec<KeyEntry>,
}

#[inline]
fn ln_or_neg_inf(p: f64) -> f64 {
    if p <= 0.0 {
        f64::NEG_INFINITY
    } else {
        p.ln()
    }
}

/// Whether `dense_value` at `pattern` is a heterozygote-derived observation
/// code, i.e. does not name one of the pattern's founder homozygote codes.
fn is_heterozygous_value(pattern: &MarkerPattern, dense_value: u8) -> bool {
    !pattern.founder_alleles.contains(&dense_value)
}

fn emission_log_prob(
    pattern: &MarkerPattern,
    state: FounderPair,
    observed: Option<u8>,
    homozygote_missing_prob: f64,
    heterozygote_missing_prob: f64,
) -> f64 {
    match observed {
        None => {
            let p = match state {
                FounderPair::Homo(_) => homozygote_missing_prob,
                FounderPair::Het(_, _) => heterozygote_missing_prob,
            };
            ln_or_neg_inf(p)
        }
        Some(v) => match observed_value(pattern, state) {
            Some(ov) if ov == v => 0.0,
            _ => f64::NEG_INFINITY,
        },
    }
}

fn single_locus_prior(single: &crate::probability::SingleLocusProbs, state: FounderPair) -> f64 {
    match state {
        FounderPair::Homo(_) => single.homo,
        FounderPair::Het(_, _) => single.het,
    }
}

/// Runs founder imputation over every chromosome and line in `request`.
pub fn impute_founders(request: &ViterbiRequest) -> Result<(ViterbiResult, Vec<Advisory>), KernelError> {
    if !(0.0..=1.0).contains(&request.homozygote_missing_prob) || !(0.0..=1.0).contains(&request.heterozygote_missing_prob) {
        return Err(KernelError::ShapeMismatch {
            detail: "missing-emission probabilities must lie in [0, 1]".to_string(),
        });
    }

    let design = request.design;
    let canonical = design.canonicalize()?;
    let key = build_key_table(design.n_founders);
    // Under infinite selfing the hidden state is founder identity alone
    // (spec.md §4.5): heterozygote states never occur (single_locus_probabilities
    // puts zero mass on `het` for `selfing_generations = None`), so including
    // them here would later divide a transition probability by a zero marginal.
    let states: Vec<FounderPair> = if design.selfing_regime == SelfingRegime::Infinite {
        (0..design.n_founders as u8).map(FounderPair::Homo).collect()
    } else {
        all_founder_pair_states(design.n_founders)
    };

    let mut treat_as_missing = vec![vec![false; design.n_markers]; design.n_lines];
    let mut advisories = Vec::new();
    if design.selfing_regime == SelfingRegime::Infinite {
        let mut first_substitution = None;
        for marker in 0..design.n_markers {
            let pattern = &canonical.patterns.patterns[canonical.patterns.marker_to_pattern[marker]];
            for line in 0..design.n_lines {
                let raw = design.finals[line][marker];
                if raw == RAW_MISSING_FINAL {
                    continue;
                }
                if let Some(dense) = design.recode_final(&canonical.patterns, marker, raw) {
                    if is_heterozygous_value(pattern, dense) {
                        treat_as_missing[line][marker] = true;
                        first_substitution.get_or_insert((line, marker));
                    }
                }
            }
        }
        if let Some((line, marker)) = first_substitution {
            let advisory = Advisory::HeterozygoteUnderInfiniteSelfing { line, marker };
            advisory.log();
            advisories.push(advisory);
        }
    }

    let mut codes = vec![vec![0u8; design.n_markers]; design.n_lines];

    for chromosome in request.chromosomes {
        if chromosome.markers.is_empty() {
            continue;
        }
        let line_results: Vec<Result<Vec<u8>, KernelError>> = {
            let run_line = |line: usize| -> Result<Vec<u8>, KernelError> {
                viterbi_single_line(
                    design,
                    &canonical.patterns.patterns,
                    &canonical.patterns.marker_to_pattern,
                    &canonical.patterns.recodings,
                    &states,
                    &key,
                    chromosome,
                    line,
                    &treat_as_missing[line],
                    request.homozygote_missing_prob,
                    request.heterozygote_missing_prob,
                )
            };
            #[cfg(not(target_arch = "wasm32"))]
            {
                (0..design.n_lines).into_par_iter().map(run_line).collect()
            }
            #[cfg(target_arch = "wasm32")]
            {
                (0..design.n_lines).map(run_line).collect()
            }
        };

        for (line, result) in line_results.into_iter().enumerate() {
            let path_codes = result?;
            for (t, &marker) in chromosome.markers.iter().enumerate() {
                codes[line][marker] = path_codes[t];
            }
        }
    }

    Ok((ViterbiResult { codes, key }, advisories))
}

#[allow(clippy::too_many_arguments)]
fn viterbi_single_line(
    design: &Design,
    patterns: &[MarkerPattern],
    marker_to_pattern: &[usize],
    recodings: &[crate::pattern::MarkerRecoding],
    states: &[FounderPair],
    key: &[KeyEntry],
    chromosome: &ChromosomeMap,
    line: usize,
    treat_as_missing: &[bool],
    homozygote_missing_prob: f64,
    heterozygote_missing_prob: f64,
) -> Result<Vec<u8>, KernelError> {
    let n_states = states.len();
    let metadata = &design.lines[line];
    let selfing = design.selfing_for(metadata);
    let ai = metadata.intercross_generations;
    let single = single_locus_probabilities(design.n_founders, selfing)?;

    let recode = |marker: usize| -> Option<u8> {
        if treat_as_missing[marker] {
            return None;
        }
        let raw = design.finals[line][marker];
        if raw == RAW_MISSING_FINAL {
            return None;
        }
        recodings[marker].value_to_dense.get(&raw).copied()
    };

    let first_marker = chromosome.markers[0];
    let first_pattern = &patterns[marker_to_pattern[first_marker]];
    let first_observed = recode(first_marker);

    let mut log_score = vec![0.0; n_states];
    for (s_idx, &state) in states.iter().enumerate() {
        let prior = ln_or_neg_inf(single_locus_prior(&single, state));
        let emission = emission_log_prob(first_pattern, state, first_observed, homozygote_missing_prob, heterozygote_missing_prob);
        log_score[s_idx] = prior + emission;
    }
    if log_score.iter().all(|&v| v == f64::NEG_INFINITY) {
        return Err(KernelError::ImpossibleData { line, marker: first_marker });
    }

    let n_m = chromosome.markers.len();
    let mut backpointers: Vec<Vec<usize>> = Vec::with_capacity(n_m.saturating_sub(1));

    for t in 1..n_m {
        let marker = chromosome.markers[t];
        let pattern = &patterns[marker_to_pattern[marker]];
        let observed = recode(marker);
        let r = gap_to_rf(chromosome.positions_cm[t - 1], chromosome.positions_cm[t]);
        let probs = haplotype_pair_probabilities(design.n_founders, r, ai, selfing)?;

        let mut new_score = vec![f64::NEG_INFINITY; n_states];
        let mut back = vec![0usize; n_states];
        for (s2_idx, &s2) in states.iter().enumerate() {
            let emission = emission_log_prob(pattern, s2, observed, homozygote_missing_prob, heterozygote_missing_prob);
            if emission == f64::NEG_INFINITY {
                continue;
            }
            for (s1_idx, &s1) in states.iter().enumerate() {
                if log_score[s1_idx] == f64::NEG_INFINITY {
                    continue;
                }
                let marginal = single_locus_prior(&single, s1);
                if marginal == 0.0 {
                    continue;
                }
                let trans = probs.pair_probability(design.n_founders, s1, s2) / marginal;
                let candidate = log_score[s1_idx] + ln_or_neg_inf(trans) + emission;
                if candidate > new_score[s2_idx] {
                    new_score[s2_idx] = candidate;
                    back[s2_idx] = s1_idx;
                }
            }
        }
        if new_score.iter().all(|&v| v == f64::NEG_INFINITY) {
            return Err(KernelError::ImpossibleData { line, marker });
        }
        backpointers.push(back);
        log_score = new_score;
    }

    let (best_idx, _) =
        log_score.iter().enumerate().max_by(|a, b| a.1.partial_cmp(b.1).unwrap()).expect("at least one state");
    let mut path = vec![0usize; n_m];
    path[n_m - 1] = best_idx;
    for t in (0..n_m - 1).rev() {
        path[t] = backpointers[t][path[t + 1]];
    }

    Ok(path.into_iter().map(|s_idx| code_for_state(key, states[s_idx])).collect())
}
