//! Haplotype-probability generator (spec.md §4.2).
//!
//! Produces the joint distribution over founder-pair genotypes at one or
//! two loci, parameterised by founder count, selfing regime, selfing
//! generations, recombination fraction and intercross (AI) generations.
//!
//! The concrete closed-form formulas used here are an independent
//! derivation (see DESIGN.md, "Open Question decisions" item 3): the
//! original formula headers (`probabilities.hpp`/`probabilitiesN.h`) were
//! not present in the retrieved source pack, only the driver
//! (`imputeFounders.cpp`) and lookup-table builder
//! (`constructLookupTable.hpp`) that consume them. The model below is a
//! six-state absorbing Markov chain over two-locus founder-track identity,
//! cross-checked against the textbook Haldane-Waddington RIL asymptote
//! `r* = 2r/(1+2r)`.
//!
//! Two physical chromatids (the line's pair of homologues) each
//! independently accumulate "is locus 2 on the same founder-track as locus
//! 1" status across funnel-construction and intercross generations; the
//! resulting pre-selfing phase then evolves through selfing generations via
//! a 5-state chain {double-het coupling, double-het repulsion,
//! single-locus-het, homozygous-parental, homozygous-recombinant}, the
//! last two being absorbing. Probability mass for each of the four
//! founder-relational classes (equal pair & homozygous, equal pair &
//! heterozygous, share exactly one founder, share none) is then spread
//! uniformly across the symmetry orbit of that class for the given founder
//! count, consistent with Design Notes §9's "compressed haplotype
//! probabilities" requirement.

use crate::error::KernelError;

/// A single-locus founder-pair genotype: homozygous for one founder, or
/// heterozygous for an unordered pair of distinct founders.
///
/// `Het`'s two fields are not required to be pre-sorted by construction;
/// equality and hashing are defined on the unordered pair, so `Het(1, 3)`
/// and `Het(3, 1)` compare equal. Prefer [`FounderPair::het`] to construct
/// a canonical (sorted) value.
#[derive(Debug, Clone, Copy)]
pub enum FounderPair {
    Homo(u8),
    Het(u8, u8),
}

impl PartialEq for FounderPair {
    fn eq(&self, other: &Self) -> bool {
        self.as_set() == other.as_set()
    }
}
impl Eq for FounderPair {}

impl std::hash::Hash for FounderPair {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_set().hash(state);
    }
}

impl FounderPair {
    pub fn het(a: u8, b: u8) -> Self {
        if a <= b {
            FounderPair::Het(a, b)
        } else {
            FounderPair::Het(b, a)
        }
    }

    fn as_set(self) -> (u8, Option<u8>) {
        match self {
            FounderPair::Homo(i) => (i, None),
            FounderPair::Het(i, j) => (i, Some(j)),
        }
    }

    fn shares_with(self, other: FounderPair) -> usize {
        let (a0, a1) = self.as_set();
        let (b0, b1) = other.as_set();
        let mut count = 0;
        for x in [Some(a0), a1] {
            if let Some(x) = x {
                if Some(x) == Some(b0) || (b1.is_some() && Some(x) == b1) {
                    count += 1;
                }
            }
        }
        count.min(2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    EqualHomo,
    EqualHet,
    Partial,
    Disjoint,
}

fn classify(a: FounderPair, b: FounderPair) -> Relation {
    if a == b {
        return match a {
            FounderPair::Homo(_) => Relation::EqualHomo,
            FounderPair::Het(_, _) => Relation::EqualHet,
        };
    }
    if a.shares_with(b) >= 1 {
        Relation::Partial
    } else {
        Relation::Disjoint
    }
}

/// Founder-pair joint distribution at two loci, compressed by symmetry
/// class (spec.md §3, §4.2, §9).
#[derive(Debug, Clone, Copy)]
pub struct CompressedProbs {
    /// Total probability mass on (locus1, locus2) sharing the identical
    /// homozygous founder.
    pub same_homo: f64,
    /// Total mass on (locus1, locus2) sharing the identical heterozygous
    /// founder pair (either phase).
    pub same_het: f64,
    /// Total mass on (locus1, locus2) genotypes sharing exactly one
    /// founder.
    pub partial: f64,
    /// Total mass on (locus1, locus2) genotypes sharing no founder.
    pub disjoint: f64,
}

impl CompressedProbs {
    /// Probability of the specific ordered pair `(locus1, locus2)` under
    /// this distribution, for a given founder count.
    pub fn pair_probability(&self, n_founders: usize, locus1: FounderPair, locus2: FounderPair) -> f64 {
        let f = n_founders as f64;
        match classify(locus1, locus2) {
            Relation::EqualHomo => self.same_homo / f,
            Relation::EqualHet => self.same_het / (f * (f - 1.0) / 2.0),
            Relation::Partial => self.partial / (f * f * (f - 1.0)),
            Relation::Disjoint => {
                let k = f * (f + 1.0) / 2.0;
                let orbit = k * k - f - f * (f - 1.0) / 2.0 - f * f * (f - 1.0);
                self.disjoint / orbit
            }
        }
    }
}

/// Single-locus founder-pair marginal distribution.
#[derive(Debug, Clone, Copy)]
pub struct SingleLocusProbs {
    /// Probability of being homozygous for any one specific founder.
    pub homo: f64,
    /// Probability of being heterozygous for any one specific unordered
    /// founder pair.
    pub het: f64,
}

impl SingleLocusProbs {
    pub fn homozygous(&self) -> f64 {
        self.homo
    }

    pub fn heterozygous(&self) -> f64 {
        self.het
    }
}

fn log2_founders(n_founders: usize) -> Result<u32, KernelError> {
    match n_founders {
        2 => Ok(1),
        4 => Ok(2),
        8 => Ok(3),
        16 => Ok(4),
        other => Err(KernelError::UnsupportedFounderCount { found: other }),
    }
}

/// Probability that a single physical chromatid carries the same founder
/// at both loci after `generations` independent recombination-bearing
/// meioses at recombination fraction `r`.
fn same_track(generations: u32, r: f64) -> f64 {
    (1.0 + (1.0 - 2.0 * r).powi(generations as i32)) / 2.0
}

#[derive(Debug, Clone, Copy)]
struct SelfingMasses {
    hc: f64,
    ht: f64,
    sh: f64,
    parental: f64,
    recombinant: f64,
}

fn selfing_step(m: SelfingMasses, r: f64) -> SelfingMasses {
    let stay = (1.0 - r).powi(2) / 2.0;
    let flip = r.powi(2) / 2.0;
    let to_sh = 2.0 * r * (1.0 - r);
    SelfingMasses {
        hc: m.hc * stay + m.ht * flip,
        ht: m.hc * flip + m.ht * stay,
        sh: (m.hc + m.ht) * to_sh + m.sh * 0.5,
        parental: m.parental + m.hc * stay + m.ht * flip + m.sh * 0.25,
        recombinant: m.recombinant + m.hc * flip + m.ht * stay + m.sh * 0.25,
    }
}

fn selfing_masses(z: f64, r: f64, selfing_generations: Option<u32>) -> SelfingMasses {
    match selfing_generations {
        Some(s) => {
            let mut m = SelfingMasses {
                hc: 1.0 - z,
                ht: z,
                sh: 0.0,
                parental: 0.0,
                recombinant: 0.0,
            };
            for _ in 0..s {
                m = selfing_step(m, r);
            }
            m
        }
        None => {
            // Infinite selfing: Hc/Ht/SH are transient and fully absorb.
            // Absorption probabilities follow the classical
            // Haldane-Waddington result: starting from Hc, P(absorb to
            // Parental) = 1/(1+2r), P(absorb to Recombinant) = 2r/(1+2r);
            // Ht is the mirror image.
            let denom = 1.0 + 2.0 * r;
            let parental = (1.0 - z) * (1.0 / denom) + z * (2.0 * r / denom);
            let recombinant = (1.0 - z) * (2.0 * r / denom) + z * (1.0 / denom);
            SelfingMasses {
                hc: 0.0,
                ht: 0.0,
                sh: 0.0,
                parental,
                recombinant,
            }
        }
    }
}

/// Produces the two-locus founder-pair joint distribution.
///
/// `selfing_generations = None` means infinite selfing (spec.md §4.5's
/// "infinite" selfing regime); `Some(s)` means exactly `s` finite selfing
/// generations.
pub fn haplotype_pair_probabilities(
    n_founders: usize,
    r: f64,
    ai_generations: u32,
    selfing_generations: Option<u32>,
) -> Result<CompressedProbs, KernelError> {
    let log2f = log2_founders(n_founders)?;
    let n = log2f.saturating_sub(1) + ai_generations;
    let z = (1.0 - (1.0 - 2.0 * r).powi(n as i32)) / 2.0;
    let m = selfing_masses(z, r, selfing_generations);
    Ok(CompressedProbs {
        same_homo: m.parental,
        same_het: m.hc + m.ht,
        partial: m.sh,
        disjoint: m.recombinant,
    })
}

/// Produces the single-locus founder-pair marginal distribution (used for
/// the Viterbi imputer's initial-state prior).
pub fn single_locus_probabilities(
    n_founders: usize,
    selfing_generations: Option<u32>,
) -> Result<SingleLocusProbs, KernelError> {
    log2_founders(n_founders)?;
    let f = n_founders as f64;
    let het_total = match selfing_generations {
        Some(s) => 0.5_f64.powi(s as i32),
        None => 0.0,
    };
    let homo_total = 1.0 - het_total;
    Ok(SingleLocusProbs {
        homo: homo_total / f,
        het: het_total / (f * (f - 1.0) / 2.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinite_selfing_two_founders_matches_haldane_waddington_asymptote() {
        for &r in &[0.01, 0.05, 0.1, 0.2, 0.3, 0.45] {
            let probs = haplotype_pair_probabilities(2, r, 0, None).unwrap();
            let expected_recombinant = 2.0 * r / (1.0 + 2.0 * r);
            assert!((probs.disjoint - expected_recombinant).abs() < 1e-12);
            assert!((probs.same_homo - (1.0 - expected_recombinant)).abs() < 1e-12);
        }
    }

    #[test]
    fn masses_always_sum_to_one() {
        for &r in &[0.0, 0.1, 0.25, 0.5] {
            for ai in [0u32, 1, 3] {
                for s in [Some(0u32), Some(1), Some(5), None] {
                    let probs = haplotype_pair_probabilities(4, r, ai, s).unwrap();
                    let total = probs.same_homo + probs.same_het + probs.partial + probs.disjoint;
                    assert!((total - 1.0).abs() < 1e-9, "r={r} ai={ai} s={s:?} total={total}");
                }
            }
        }
    }

    #[test]
    fn single_locus_heterozygosity_halves_each_selfing_generation() {
        for s in 0..8u32 {
            let probs = single_locus_probabilities(2, Some(s)).unwrap();
            assert!((probs.het - 0.5_f64.powi(s as i32)).abs() < 1e-12);
        }
    }

    #[test]
    fn single_locus_infinite_selfing_has_no_heterozygosity() {
        let probs = single_locus_probabilities(8, None).unwrap();
        assert_eq!(probs.het, 0.0);
        assert!((probs.homo * 8.0 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_recombination_fraction_freezes_phase_under_selfing() {
        // r=0: a double heterozygote in coupling phase can only ever
        // resolve to the parental homozygote.
        let probs = haplotype_pair_probabilities(2, 0.0, 0, None).unwrap();
        assert!((probs.same_homo - 1.0).abs() < 1e-12);
        assert_eq!(probs.disjoint, 0.0);
    }

    #[test]
    fn pair_probability_normalises_within_each_orbit() {
        let probs = haplotype_pair_probabilities(4, 0.1, 0, Some(3)).unwrap();
        let mut total = 0.0;
        let states: Vec<FounderPair> = (0..4u8)
            .map(FounderPair::Homo)
            .chain((0..4u8).flat_map(|i| (i + 1..4u8).map(move |j| FounderPair::het(i, j))))
            .collect();
        for &a in &states {
            for &b in &states {
                total += probs.pair_probability(4, a, b);
            }
        }
        assert!((total - 1.0).abs() < 1e-9, "total={total}");
    }
}
