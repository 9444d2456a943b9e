//! Default transfer operators.
//!
//! Spatial pair: block average down, injection (replication) up; the pair
//! satisfies `coarsen(refine(c)) == c` exactly, so applying it twice
//! stabilizes. Parameter pair: the same scheme along the step axis, used by
//! nested iteration and MG/Opt to move per-step parameter vectors between
//! problem resolutions.

use ndarray::{Array2, ArrayView2, s};

/// Halves the feature axis by averaging adjacent pairs.
pub fn coarsen(x: ArrayView2<f64>) -> Array2<f64> {
    let even = x.slice(s![.., 0..;2]);
    let odd = x.slice(s![.., 1..;2]);
    0.5 * (&even.slice(s![.., ..odd.ncols()]) + &odd) // odd tail would be dropped
}

/// Doubles the feature axis by replicating every column.
pub fn refine(x: ArrayView2<f64>) -> Array2<f64> {
    let (rows, cols) = x.dim();
    Array2::from_shape_fn((rows, cols * 2), |(r, c)| x[(r, c / 2)])
}

/// Block-averages `rfactor` adjacent per-step parameter vectors into one.
///
/// # Arguments
/// * `fine` - Concatenated per-step vectors, `per_step` values each.
/// * `per_step` - Flat length of one step's parameters.
/// * `rfactor` - Steps merged into one coarse step.
pub fn restrict_params(fine: &[f64], per_step: usize, rfactor: usize) -> Vec<f64> {
    let fine_steps = fine.len() / per_step;
    let coarse_steps = fine_steps / rfactor;
    let mut coarse = vec![0.0; coarse_steps * per_step];

    for (c, chunk) in coarse.chunks_mut(per_step).enumerate() {
        for f in c * rfactor..(c + 1) * rfactor {
            let src = &fine[f * per_step..(f + 1) * per_step];
            for (acc, v) in chunk.iter_mut().zip(src) {
                *acc += v / rfactor as f64;
            }
        }
    }

    coarse
}

/// Replicates every coarse per-step parameter vector `rfactor` times.
pub fn prolong_params(coarse: &[f64], per_step: usize, rfactor: usize) -> Vec<f64> {
    let coarse_steps = coarse.len() / per_step;
    let mut fine = Vec::with_capacity(coarse_steps * rfactor * per_step);

    for c in 0..coarse_steps {
        let src = &coarse[c * per_step..(c + 1) * per_step];
        for _ in 0..rfactor {
            fine.extend_from_slice(src);
        }
    }

    fine
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    #[test]
    fn coarsen_averages_adjacent_pairs() {
        let x = array![[0.0, 2.0, 4.0, 8.0]];
        assert_eq!(coarsen(x.view()), array![[1.0, 6.0]]);
    }

    #[test]
    fn refine_then_coarsen_is_identity_on_coarse_vectors() {
        let c = array![[1.0, -3.5], [0.25, 7.0]];
        let xc = coarsen(refine(c.view()).view());
        assert_eq!(xc, c);
    }

    #[test]
    fn coarsen_refine_pair_stabilizes_after_one_round() {
        let x = array![[0.1f64, 0.9, -0.4, 0.6, 2.0, -2.0]];

        let once = coarsen(refine(coarsen(x.view()).view()).view());
        let twice = coarsen(
            refine(coarsen(refine(once.view()).view()).view()).view(),
        );

        let diff = (&once - &coarsen(refine(once.view()).view()))
            .iter()
            .map(|d| d.abs())
            .fold(0.0f64, f64::max);
        assert!(diff < 1e-15);
        assert_eq!(once, twice.slice(s![.., ..once.ncols()]).to_owned());
    }

    #[test]
    fn param_pair_roundtrip() {
        let fine = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let coarse = restrict_params(&fine, 2, 2);
        assert_eq!(coarse, vec![2.0, 3.0, 6.0, 7.0]);

        let back = prolong_params(&coarse, 2, 2);
        assert_eq!(back, vec![2.0, 3.0, 2.0, 3.0, 6.0, 7.0, 6.0, 7.0]);

        // restriction of a replicated vector gives it back exactly
        assert_eq!(restrict_params(&back, 2, 2), coarse);
    }
}
