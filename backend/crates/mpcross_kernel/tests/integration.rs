//! End-to-end tests exercising the public crate API the way a caller would:
//! building a [`Design`] from plain data, then running RF estimation,
//! founder imputation and marker ordering against it.

use std::collections::BTreeMap;

use mpcross_kernel::{
    estimate_rf, impute_founders, optimize_order, pack_index, packed_len, ArsaRequest, ChromosomeMap, Design,
    LineMetadata, MarkerRange, PackedTriangleBytes, RfRequest, SelfingRegime, ViterbiRequest, MISSING,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn two_founder_ril_design() -> Design {
    // Four markers, two founders, three RIL lines each selfed for 3
    // generations from a simple AB funnel. Markers 0 and 1 are in near-
    // perfect coupling; marker 2 is unlinked noise; marker 3 repeats marker
    // 0's pattern.
    let lines = vec![
        LineMetadata { funnel: vec![0, 1], intercross_generations: 0, selfing_generations: 3, weight: 1.0 },
        LineMetadata { funnel: vec![0, 1], intercross_generations: 0, selfing_generations: 3, weight: 1.0 },
        LineMetadata { funnel: vec![0, 1], intercross_generations: 0, selfing_generations: 3, weight: 1.0 },
    ];
    Design {
        n_founders: 2,
        n_markers: 4,
        n_lines: 3,
        selfing_regime: SelfingRegime::Finite,
        founder_alleles: vec![vec![0, 1], vec![0, 1], vec![0, 1], vec![0, 1]],
        heterozygotes: vec![BTreeMap::new(); 4],
        finals: vec![vec![0, 0, 1, 0], vec![1, 1, 0, 1], vec![0, 0, 0, 0]],
        lines,
    }
}

#[test]
fn rf_estimation_runs_over_a_full_design_and_orders_pairs_correctly() {
    let design = two_founder_ril_design();
    let request = RfRequest {
        designs: std::slice::from_ref(&design),
        grid: &[0.0, 0.1, 0.25, 0.4, 0.5],
        marker1_range: MarkerRange::new(0, 4),
        marker2_range: MarkerRange::new(0, 4),
        keep_lod: true,
        keep_lkhd: true,
    };
    let (result, advisories) = estimate_rf(&request).unwrap();

    // 4 markers => C(4,2) = 6 pairs in the upper triangle.
    assert_eq!(result.pairs.len(), 6);
    assert_eq!(result.theta.len(), 6);
    assert!(result.lod.is_some());
    assert!(result.lkhd.is_some());
    assert!(advisories.is_empty());

    // Pair (0, 3) repeats the same segregation pattern across all lines and
    // should be estimated as perfectly linked.
    let idx = result.pairs.iter().position(|&p| p == (0, 3)).unwrap();
    assert_eq!(result.theta[idx], 0);
    assert!(result.lod.as_ref().unwrap()[idx] > 0.0);
}

#[test]
fn rf_estimation_rejects_region_entirely_below_diagonal() {
    let design = two_founder_ril_design();
    let request = RfRequest {
        designs: std::slice::from_ref(&design),
        grid: &[0.0, 0.25, 0.5],
        marker1_range: MarkerRange::new(2, 4),
        marker2_range: MarkerRange::new(0, 2),
        keep_lod: false,
        keep_lkhd: false,
    };
    assert!(estimate_rf(&request).is_err());
}

#[test]
fn founder_imputation_recovers_homozygous_founder_one_line() {
    let design = two_founder_ril_design();
    let chromosome = ChromosomeMap { markers: vec![0, 1, 2, 3], positions_cm: vec![0.0, 5.0, 40.0, 45.0] };
    let request = ViterbiRequest {
        design: &design,
        chromosomes: std::slice::from_ref(&chromosome),
        homozygote_missing_prob: 0.05,
        heterozygote_missing_prob: 0.1,
    };
    let (result, _advisories) = impute_founders(&request).unwrap();

    // Line 2 ([0,0,0,0]) is homozygous founder 0 at every marker; its
    // imputed path should be founder 1's key code at every marker.
    let founder_one_code = result.key.iter().find(|k| k.founder_i == 0 && k.founder_j == 0).unwrap().code;
    assert_eq!(result.codes[2], vec![founder_one_code; 4]);
}

#[test]
fn arsa_orders_markers_by_an_rf_derived_distance_matrix() {
    // Build a tiny packed-triangular "distance" matrix from an RF-style
    // theta estimate (here just hand-coded ranks) and confirm ARSA recovers
    // the already-sorted order as a fixed point.
    let n = 4;
    let levels: Vec<f64> = (0..n).map(|k| k as f64).collect();
    let mut bytes = vec![0u8; packed_len(n)];
    for col in 0..n {
        for row in 0..=col {
            bytes[pack_index(row, col)] = (col - row) as u8;
        }
    }
    let dist = PackedTriangleBytes::new(n, bytes, levels).unwrap();

    let request = ArsaRequest { n, dist: &dist, cool: 0.8, temperature_min: 1e-6, n_reps: 3 };
    let mut rng = StdRng::seed_from_u64(2024);
    let result = optimize_order(&request, &mut rng).unwrap();

    let identity: Vec<usize> = (0..n).collect();
    let identity_z: f64 = {
        let mut z = 0.0;
        for i in 0..n - 1 {
            for j in (i + 1)..n {
                z += (j - i) as f64 * dist.value(identity[i], identity[j]).unwrap();
            }
        }
        z
    };
    assert!((result.z - identity_z).abs() < 1e-9);
    assert_eq!(result.permutation.len(), n);
}

#[test]
fn design_with_missing_final_genotypes_is_accepted() {
    let mut design = two_founder_ril_design();
    design.finals[0][2] = MISSING;
    let canonical = design.canonicalize().unwrap();
    assert_eq!(canonical.patterns.marker_to_pattern.len(), 4);
}
