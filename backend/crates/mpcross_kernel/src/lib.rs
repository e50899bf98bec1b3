//! Computational kernel for multi-parent experimental-cross genetic
//! analysis: pairwise recombination-fraction estimation, per-line founder
//! imputation via a Viterbi HMM, and anti-Robinson marker ordering via
//! simulated annealing.
//!
//! Every public entry point is a pure function over plain data (spec.md
//! §6): argument marshalling, pedigree parsing, hierarchical clustering and
//! CLI/I/O are external collaborators and stay out of this crate entirely
//! (spec.md §1). Fallible entry points return [`error::KernelError`]; any
//! non-fatal conditions worth surfacing (memory-threshold notices,
//! heterozygote-under-infinite-selfing substitutions) are collected into a
//! `Vec<error::Advisory>` returned alongside the primary result rather than
//! raised as errors.
//!
//! # Modules
//!
//! - [`triangular`]: packed-triangular addressing shared by every matrix in
//!   this crate.
//! - [`pattern`], [`funnel`]: marker-pattern and funnel canonicalisation.
//! - [`genotype`]: founder-pair state enumeration and observed-value
//!   lookup, shared by the lookup-table projection and the Viterbi
//!   emission model.
//! - [`probability`]: the haplotype-probability generator.
//! - [`lookup`]: the haplotype-to-marker lookup table and its
//!   informativeness filter.
//! - [`design`]: the plain-data experimental-design shape consumed by both
//!   [`rf`] and [`viterbi`].
//! - [`rf`]: the RF estimator.
//! - [`viterbi`]: the founder imputer.
//! - [`arsa`]: the anti-Robinson simulated-annealing ordering optimiser.
//! - [`error`]: the shared error taxonomy and advisory type.

pub mod arsa;
pub mod design;
pub mod error;
pub mod funnel;
pub mod genotype;
pub mod lookup;
pub mod pattern;
pub mod probability;
pub mod rf;
pub mod triangular;
pub mod viterbi;

pub use arsa::{optimize_order, ArsaRequest, ArsaResult};
pub use design::{CanonicalDesign, Design, LineMetadata, SelfingRegime};
pub use error::{Advisory, KernelError};
pub use funnel::{canonicalize_funnels, FunnelRecord, FunnelTable};
pub use lookup::{LookupTable, Regime};
pub use pattern::{canonicalize_patterns, AlleleCode, MarkerPattern, PatternTable, RawMarker, MISSING};
pub use probability::{haplotype_pair_probabilities, single_locus_probabilities, CompressedProbs, FounderPair, SingleLocusProbs};
pub use rf::{estimate_rf, MarkerRange, RfRequest, RfResult};
pub use triangular::{pack_index, packed_len, PackedTriangle, PackedTriangleBytes, MISSING_BYTE};
pub use viterbi::{build_key_table, haldane_to_rf, impute_founders, ChromosomeMap, KeyEntry, ViterbiRequest, ViterbiResult};

#[cfg(feature = "wasm")]
mod wasm_entry {
    //! Placeholder host-binding surface, feature-gated and unused by
    //! default (DESIGN.md: kept only as an optional re-export point since
    //! marshalling itself is out of scope per spec.md §1).
    #[allow(unused_imports)]
    use wasm_bindgen::prelude::*;
}
