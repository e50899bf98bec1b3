//! Anti-Robinson simulated-annealing marker ordering (spec.md §4.6).
//!
//! Finds a permutation that approximately maximises
//! `Z(pi) = sum_{i<j} (j-i) * D[pi(i), pi(j)]` over a packed-triangular
//! byte-coded distance matrix, via simulated annealing with two move types
//! (swap and insertion) and O(n) closed-form deltas.
//!
//! Grounded directly on `original_source/src/arsaRaw.cpp`: `getPairForSwap`,
//! `computeDelta` (the swap delta, reused verbatim for temperature
//! calibration and swap-move scoring), the 5000-draw calibration loop, the
//! three-part insertion delta (`delta1`/`delta2`/`delta3`), and the
//! intentionally asymmetric swap/insertion acceptance predicates (preserved
//! exactly, not unified — see DESIGN.md).

use rand::Rng;

use crate::error::KernelError;
use crate::triangular::PackedTriangleBytes;

/// One ARSA run's parameters (spec.md §4.6, §6).
pub struct ArsaRequest<'a> {
    pub n: usize,
    pub dist: &'a PackedTriangleBytes,
    /// Geometric cooling rate, in (0, 1).
    pub cool: f64,
    /// Stopping temperature, > 0.
    pub temperature_min: f64,
    /// Number of independent restarts, >= 1.
    pub n_reps: u32,
}

/// The best permutation found across all restarts, plus its objective
/// value.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ArsaResult {
    pub permutation: Vec<usize>,
    pub z: f64,
}

fn validate(request: &ArsaRequest) -> Result<(), KernelError> {
    if request.n != request.dist.n() {
        return Err(KernelError::ShapeMismatch {
            detail: format!(
                "ARSA request n={} does not match distance matrix n={}",
                request.n,
                request.dist.n()
            ),
        });
    }
    if !(request.cool > 0.0 && request.cool < 1.0) {
        return Err(KernelError::ShapeMismatch {
            detail: format!("cool must lie in (0, 1), got {}", request.cool),
        });
    }
    if !(request.temperature_min > 0.0) {
        return Err(KernelError::ShapeMismatch {
            detail: format!("temperatureMin must be positive, got {}", request.temperature_min),
        });
    }
    if request.n_reps == 0 {
        return Err(KernelError::ShapeMismatch {
            detail: "nReps must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// Symmetric distance between two item identities, or `0.0` if the stored
/// byte is the "no data" sentinel. Per §6's boundary invariant ("ignored by
/// all algorithms"), a missing pairwise distance contributes no pull toward
/// either ordering rather than failing the run.
#[inline]
fn dist_value(dist: &PackedTriangleBytes, a: usize, b: usize) -> f64 {
    dist.value(a, b).unwrap_or(0.0)
}

/// The anti-Robinson objective computed from scratch (spec.md §4.6).
pub fn compute_z(permutation: &[usize], dist: &PackedTriangleBytes) -> f64 {
    let n = permutation.len();
    let mut z = 0.0;
    for i in 0..n.saturating_sub(1) {
        let k = permutation[i];
        for j in (i + 1)..n {
            let l = permutation[j];
            z += (j - i) as f64 * dist_value(dist, k, l);
        }
    }
    z
}

/// Fisher-Yates over a contiguous source array (spec.md §4.6 step 1),
/// matching `arsaRaw.cpp`'s `consecutive`/`rbegin() + i` swap-to-the-back
/// idiom.
fn random_permutation(rng: &mut impl Rng, n: usize) -> Vec<usize> {
    let mut consecutive: Vec<usize> = (0..n).collect();
    let mut permutation = vec![0usize; n];
    for i in 0..n {
        let remaining = n - i;
        let mut idx = (rng.gen::<f64>() * remaining as f64) as usize;
        if idx >= remaining {
            idx = remaining - 1;
        }
        permutation[i] = consecutive[idx];
        let last = n - 1 - i;
        consecutive.swap(idx, last);
    }
    permutation
}

/// Draws a uniformly random distinct pair of positions in `0..n`
/// (`getPairForSwap`).
fn draw_pair(rng: &mut impl Rng, n: usize) -> (usize, usize) {
    loop {
        let mut a = (rng.gen::<f64>() * n as f64) as usize;
        let mut b = (rng.gen::<f64>() * n as f64) as usize;
        if a == n {
            a -= 1;
        }
        if b == n {
            b -= 1;
        }
        if a != b {
            return (a, b);
        }
    }
}

/// O(n) delta for swapping the items at positions `a` and `b`
/// (`computeDelta`), reused both for swap-move scoring and for temperature
/// calibration.
fn swap_delta(permutation: &[usize], a: usize, b: usize, dist: &PackedTriangleBytes) -> f64 {
    let n = permutation.len();
    let perm_a = permutation[a];
    let perm_b = permutation[b];
    let mut delta = 0.0;
    for i in 0..n {
        if i == a || i == b {
            continue;
        }
        let perm_i = permutation[i];
        let weight = (i as i64 - a as i64).abs() - (i as i64 - b as i64).abs();
        if weight == 0 {
            continue;
        }
        delta += weight as f64 * (dist_value(dist, perm_i, perm_b) - dist_value(dist, perm_i, perm_a));
    }
    delta
}

/// O(n) delta for removing the item at position `a` and re-inserting it at
/// position `b`, shifting the intervening block by one (spec.md §4.6's
/// `delta1 + span*delta2 + delta3` decomposition).
fn insertion_delta(permutation: &[usize], a: usize, b: usize, dist: &PackedTriangleBytes) -> f64 {
    let n = permutation.len();
    let span = (a as i64 - b as i64).unsigned_abs() as f64;
    let perm_a = permutation[a];
    let mut delta1 = 0.0;
    let mut delta2 = 0.0;
    let mut delta3 = 0.0;

    if b > a {
        let mut span2 = span + 1.0;
        for c1 in (a + 1)..=b {
            for c2 in (b + 1)..n {
                delta1 += dist_value(dist, permutation[c1], permutation[c2]);
            }
            for c2 in 0..a {
                delta1 -= dist_value(dist, permutation[c1], permutation[c2]);
            }
        }
        for c1 in 0..a {
            delta2 += dist_value(dist, perm_a, permutation[c1]);
        }
        for c1 in (b + 1)..n {
            delta2 -= dist_value(dist, perm_a, permutation[c1]);
        }
        for c1 in (a + 1)..=b {
            span2 -= 2.0;
            delta3 += span2 * dist_value(dist, perm_a, permutation[c1]);
        }
    } else {
        let mut span2 = span + 1.0;
        for c1 in b..a {
            for c2 in (a + 1)..n {
                delta1 -= dist_value(dist, permutation[c1], permutation[c2]);
            }
            for c2 in 0..b {
                delta1 += dist_value(dist, permutation[c1], permutation[c2]);
            }
        }
        for c1 in 0..b {
            delta2 -= dist_value(dist, perm_a, permutation[c1]);
        }
        for c1 in (a + 1)..n {
            delta2 += dist_value(dist, perm_a, permutation[c1]);
        }
        for c1 in b..a {
            span2 -= 2.0;
            delta3 -= span2 * dist_value(dist, perm_a, permutation[c1]);
        }
    }

    delta1 + span * delta2 + delta3
}

/// Mutates `permutation` in place: removes the item at `a`, shifts the
/// intervening block by one, and re-inserts it at `b`.
fn apply_insertion(permutation: &mut [usize], a: usize, b: usize) {
    let moved = permutation[a];
    if b > a {
        for i in a..b {
            permutation[i] = permutation[i + 1];
        }
    } else {
        for i in ((b + 1)..=a).rev() {
            permutation[i] = permutation[i - 1];
        }
    }
    permutation[b] = moved;
}

const ACCEPT_TOLERANCE: f64 = -1e-8;

/// Calibrates the initial temperature via 5000 random swap draws (spec.md
/// §4.6 step 3): among swaps yielding a negative delta, T0 is the largest
/// magnitude observed. If no draw yields a negative delta, T0 = 0 and the
/// caller must run zero annealing iterations (this is an explicit contract,
/// not a derived edge case of the `log(T0)` formula below).
fn calibrate_initial_temperature(permutation: &[usize], dist: &PackedTriangleBytes, rng: &mut impl Rng) -> f64 {
    let n = permutation.len();
    let mut t0 = 0.0f64;
    for _ in 0..5000 {
        let (a, b) = draw_pair(rng, n);
        let delta = swap_delta(permutation, a, b, dist);
        if delta < 0.0 && delta.abs() > t0 {
            t0 = delta.abs();
        }
    }
    t0
}

/// Runs one restart's annealing schedule starting from `initial`, returning
/// the best permutation and objective value found during the restart.
fn anneal_restart(
    initial: Vec<usize>,
    initial_z: f64,
    dist: &PackedTriangleBytes,
    cool: f64,
    temperature_min: f64,
    rng: &mut impl Rng,
) -> (Vec<usize>, f64) {
    let n = initial.len();
    let mut best_permutation = initial.clone();
    let mut best_z = initial_z;

    let t0 = calibrate_initial_temperature(&initial, dist, rng);
    if t0 <= 0.0 {
        return (best_permutation, best_z);
    }

    let n_loop = ((temperature_min.ln() - t0.ln()) / cool.ln()).floor();
    if !(n_loop > 0.0) {
        return (best_permutation, best_z);
    }
    let n_loop = n_loop as u64;

    let mut current = initial;
    let mut z = initial_z;
    let mut temperature = t0;
    let inner_moves = 100 * n as u64;

    for _ in 0..n_loop {
        for _ in 0..inner_moves {
            let (a, b) = draw_pair(rng, n);
            if rng.gen::<f64>() <= 0.5 {
                let delta = swap_delta(&current, a, b, dist);
                if delta > ACCEPT_TOLERANCE {
                    z += delta;
                    current.swap(a, b);
                    if z > best_z {
                        best_z = z;
                        best_permutation = current.clone();
                    }
                } else if rng.gen::<f64>() <= (delta / temperature).exp() {
                    z += delta;
                    current.swap(a, b);
                }
            } else {
                let delta = insertion_delta(&current, a, b, dist);
                if delta > ACCEPT_TOLERANCE || rng.gen::<f64>() <= (delta / temperature).exp() {
                    z += delta;
                    apply_insertion(&mut current, a, b);
                }
                if delta > ACCEPT_TOLERANCE && z > best_z {
                    best_z = z;
                    best_permutation = current.clone();
                }
            }
        }
        temperature *= cool;
    }

    (best_permutation, best_z)
}

/// Runs the full ARSA optimiser: `n_reps` independent restarts, tracking the
/// best `(permutation, Z)` across all of them (spec.md §4.6 step 8).
///
/// The RNG is acquired for the whole restart loop and all draws are serial,
/// per §5's RNG-ownership note; parallelising across restarts would need
/// independent streams and is out of scope here.
pub fn optimize_order(request: &ArsaRequest, rng: &mut impl Rng) -> Result<ArsaResult, KernelError> {
    validate(request)?;

    if request.n == 0 {
        return Ok(ArsaResult { permutation: Vec::new(), z: 0.0 });
    }
    if request.n == 1 {
        return Ok(ArsaResult { permutation: vec![0], z: 0.0 });
    }

    let mut best_overall: Option<(Vec<usize>, f64)> = None;
    for _ in 0..request.n_reps {
        let initial = random_permutation(rng, request.n);
        let initial_z = compute_z(&initial, request.dist);
        let (permutation, z) =
            anneal_restart(initial, initial_z, request.dist, request.cool, request.temperature_min, rng);
        if best_overall.as_ref().map_or(true, |&(_, best_z)| z > best_z) {
            best_overall = Some((permutation, z));
        }
    }

    let (permutation, z) = best_overall.expect("n_reps >= 1 guarantees at least one restart");
    Ok(ArsaResult { permutation, z })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rank_distance_matrix(n: usize) -> PackedTriangleBytes {
        let levels: Vec<f64> = (0..n).map(|k| k as f64).collect();
        let mut bytes = vec![0u8; crate::triangular::packed_len(n)];
        for col in 0..n {
            for row in 0..=col {
                bytes[crate::triangular::pack_index(row, col)] = (col - row) as u8;
            }
        }
        PackedTriangleBytes::new(n, bytes, levels).unwrap()
    }

    #[test]
    fn swap_delta_matches_recomputed_z_difference() {
        let dist = rank_distance_matrix(6);
        let mut rng = StdRng::seed_from_u64(7);
        let perm = random_permutation(&mut rng, 6);
        let z_before = compute_z(&perm, &dist);
        let delta = swap_delta(&perm, 1, 4, &dist);
        let mut after = perm.clone();
        after.swap(1, 4);
        let z_after = compute_z(&after, &dist);
        assert!((z_after - z_before - delta).abs() < 1e-6 * z_before.abs().max(1.0));
    }

    #[test]
    fn insertion_delta_matches_recomputed_z_difference_both_directions() {
        let dist = rank_distance_matrix(7);
        let mut rng = StdRng::seed_from_u64(11);
        let perm = random_permutation(&mut rng, 7);

        for &(a, b) in &[(1usize, 5usize), (5usize, 1usize)] {
            let z_before = compute_z(&perm, &dist);
            let delta = insertion_delta(&perm, a, b, &dist);
            let mut after = perm.clone();
            apply_insertion(&mut after, a, b);
            let z_after = compute_z(&after, &dist);
            assert!(
                (z_after - z_before - delta).abs() < 1e-6 * z_before.abs().max(1.0),
                "a={a} b={b} expected_delta={delta} actual_delta={}",
                z_after - z_before
            );
        }
    }

    #[test]
    fn scenario_b_rank_distance_converges_to_identity_objective() {
        let n = 5;
        let dist = rank_distance_matrix(n);
        let identity: Vec<usize> = (0..n).collect();
        let optimal_z = compute_z(&identity, &dist);

        let request = ArsaRequest { n, dist: &dist, cool: 0.85, temperature_min: 1e-6, n_reps: 4 };
        let mut rng = StdRng::seed_from_u64(42);
        let result = optimize_order(&request, &mut rng).unwrap();

        assert!((result.z - optimal_z).abs() < 1e-9, "z={} optimal={}", result.z, optimal_z);
    }

    #[test]
    fn scenario_f_more_restarts_is_never_worse() {
        let n = 8;
        let dist = rank_distance_matrix(n);

        let one_rep = ArsaRequest { n, dist: &dist, cool: 0.5, temperature_min: 1e-6, n_reps: 1 };
        let mut rng_one = StdRng::seed_from_u64(99);
        let result_one = optimize_order(&one_rep, &mut rng_one).unwrap();

        let three_reps = ArsaRequest { n, dist: &dist, cool: 0.5, temperature_min: 1e-6, n_reps: 3 };
        let mut rng_three = StdRng::seed_from_u64(99);
        let result_three = optimize_order(&three_reps, &mut rng_three).unwrap();

        assert!(result_three.z >= result_one.z - 1e-9);
    }

    #[test]
    fn rejects_cool_outside_unit_interval() {
        let dist = rank_distance_matrix(3);
        let request = ArsaRequest { n: 3, dist: &dist, cool: 1.0, temperature_min: 1e-6, n_reps: 1 };
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(optimize_order(&request, &mut rng), Err(KernelError::ShapeMismatch { .. })));
    }

    #[test]
    fn rejects_mismatched_n() {
        let dist = rank_distance_matrix(3);
        let request = ArsaRequest { n: 4, dist: &dist, cool: 0.5, temperature_min: 1e-6, n_reps: 1 };
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(optimize_order(&request, &mut rng), Err(KernelError::ShapeMismatch { .. })));
    }

    #[test]
    fn single_element_permutation_is_trivial() {
        let dist = rank_distance_matrix(1);
        let request = ArsaRequest { n: 1, dist: &dist, cool: 0.5, temperature_min: 1e-6, n_reps: 2 };
        let mut rng = StdRng::seed_from_u64(1);
        let result = optimize_order(&request, &mut rng).unwrap();
        assert_eq!(result.permutation, vec![0]);
        assert_eq!(result.z, 0.0);
    }
}
