//! Helpers for mapping founder-pair latent states to observed marker
//! values, shared by the lookup-table projection (§4.3) and the Viterbi
//! emission model (§4.5).

use crate::pattern::MarkerPattern;
use crate::probability::FounderPair;
use crate::triangular::MISSING_BYTE;

/// The dense observation code a marker pattern would show for a given
/// founder-pair genotype, or `None` if that genotype's call was never
/// observed and so has no assigned code (spec.md §3: "absent entries mean
/// the heterozygote is not observable"; the same holds for a homozygote
/// whose founder allele is itself missing).
pub fn observed_value(pattern: &MarkerPattern, genotype: FounderPair) -> Option<u8> {
    match genotype {
        FounderPair::Homo(i) => {
            let v = pattern.founder_alleles[i as usize];
            if v == MISSING_BYTE {
                None
            } else {
                Some(v)
            }
        }
        FounderPair::Het(a, b) => {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            pattern.heterozygotes.get(&(lo, hi)).copied()
        }
    }
}

/// Enumerates every founder-pair genotype for `n_founders`: homozygotes
/// first (founder index order), then heterozygotes in ascending `(i, j)`
/// order. This is the canonical ordering used for HMM state indices and for
/// the Viterbi key-table codes (spec.md §4.5's "diagonal = founder index
/// 1..F; off-diagonal = dense index F+1..F+F(F-1)/2").
pub fn all_founder_pair_states(n_founders: usize) -> Vec<FounderPair> {
    let mut states = Vec::with_capacity(n_founders + n_founders * (n_founders - 1) / 2);
    for i in 0..n_founders as u8 {
        states.push(FounderPair::Homo(i));
    }
    for i in 0..n_founders as u8 {
        for j in (i + 1)..n_founders as u8 {
            states.push(FounderPair::Het(i, j));
        }
    }
    states
}
