//! Error taxonomy and non-fatal advisories for the kernel.

use thiserror::Error;

/// All fatal conditions a kernel entry point can return.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("shape mismatch: {detail}")]
    ShapeMismatch { detail: String },

    #[error("invalid recombination-fraction grid: {detail}")]
    InvalidGrid { detail: String },

    #[error("requested region [{m1_start}, {m1_end}) x [{m2_start}, {m2_end}) lies entirely below the main diagonal")]
    RegionBelowDiagonal {
        m1_start: usize,
        m1_end: usize,
        m2_start: usize,
        m2_end: usize,
    },

    #[error("unsupported founder count {found}: must be one of 2, 4, 8, 16")]
    UnsupportedFounderCount { found: usize },

    #[error("marker {marker} has {found} distinct alleles, more than the supported maximum of 64")]
    TooManyAlleles { marker: usize, found: usize },

    #[error("no state has positive probability at line {line}, marker {marker}")]
    ImpossibleData { line: usize, marker: usize },

    #[error("funnel validation failed: {detail}")]
    PedigreeError { detail: String },
}

/// Non-fatal notices surfaced alongside a successful result.
#[derive(Debug, Clone, PartialEq)]
pub enum Advisory {
    /// A heterozygote call was observed for a line/marker that is recoded
    /// under infinite selfing; the call was substituted with "missing".
    HeterozygoteUnderInfiniteSelfing { line: usize, marker: usize },
    /// Projected lookup-table memory exceeds the 1 GiB guidance threshold.
    LookupMemoryAboveThreshold { estimated_bytes: u64 },
    /// Projected RF result-buffer memory exceeds the 4 GiB guidance threshold.
    ResultMemoryAboveThreshold { estimated_bytes: u64 },
}

impl Advisory {
    /// Emits this advisory through the `log` facade at `warn!` level.
    pub fn log(&self) {
        match self {
            Advisory::HeterozygoteUnderInfiniteSelfing { line, marker } => {
                log::warn!(
                    "heterozygote observed under infinite selfing at line {line}, marker {marker}; substituted with missing"
                );
            }
            Advisory::LookupMemoryAboveThreshold { estimated_bytes } => {
                log::warn!(
                    "projected lookup-table memory {estimated_bytes} bytes exceeds 1 GiB guidance threshold"
                );
            }
            Advisory::ResultMemoryAboveThreshold { estimated_bytes } => {
                log::warn!(
                    "projected RF result-buffer memory {estimated_bytes} bytes exceeds 4 GiB guidance threshold"
                );
            }
        }
    }
}
