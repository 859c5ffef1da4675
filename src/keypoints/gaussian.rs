//! Separable Gaussian smoothing with mirrored borders.

use ndarray::{Array2, ArrayView2, Axis};

/// Largest kernel radius, whatever the sigma.
pub const MAX_KERNEL_RADIUS: usize = 256;

/// Normalized 1D Gaussian taps of radius `round(4 sigma)`, at most
/// [`MAX_KERNEL_RADIUS`].
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = ((4.0 * sigma).round().min(MAX_KERNEL_RADIUS as f32) as usize).max(1);
    let denom = 2.0 * sigma * sigma;
    let mut taps: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let d = i as f32 - radius as f32;
            (-d * d / denom).exp()
        })
        .collect();
    let sum: f32 = taps.iter().sum();
    taps.iter_mut().for_each(|t| *t /= sum);
    taps
}

/// Mirror `idx` into `0..len`, repeating the edge sample: `fedcba|abcdef|fedcba`.
#[inline]
fn reflect_index(idx: isize, len: usize) -> usize {
    let period = 2 * len as isize;
    let m = idx.rem_euclid(period);
    if m < len as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

fn filter_line(src: &[f32], dst: &mut [f32], taps: &[f32]) {
    let radius = (taps.len() / 2) as isize;
    let len = src.len();
    for (x, out) in dst.iter_mut().enumerate() {
        let mut acc = 0.0;
        for (k, &tap) in taps.iter().enumerate() {
            let sx = reflect_index(x as isize + k as isize - radius, len);
            acc += tap * src[sx];
        }
        *out = acc;
    }
}

/// Smooth `map` with a Gaussian of standard deviation `sigma`.
///
/// A non positive or non finite `sigma` returns a copy of the input.
pub fn gaussian_blur(map: ArrayView2<'_, f32>, sigma: f32) -> Array2<f32> {
    let (rows, cols) = map.dim();
    if !(sigma > 0.0 && sigma.is_finite()) || rows == 0 || cols == 0 {
        return map.to_owned();
    }
    let taps = gaussian_kernel(sigma);

    let mut horizontal = Array2::<f32>::zeros((rows, cols));
    let mut src = vec![0.0; cols];
    let mut dst = vec![0.0; cols];
    for (row_in, mut row_out) in map.axis_iter(Axis(0)).zip(horizontal.axis_iter_mut(Axis(0))) {
        src.iter_mut().zip(row_in.iter()).for_each(|(s, &v)| *s = v);
        filter_line(&src, &mut dst, &taps);
        row_out.iter_mut().zip(dst.iter()).for_each(|(o, &v)| *o = v);
    }

    let mut blurred = Array2::<f32>::zeros((rows, cols));
    let mut src = vec![0.0; rows];
    let mut dst = vec![0.0; rows];
    for (col_in, mut col_out) in horizontal
        .axis_iter(Axis(1))
        .zip(blurred.axis_iter_mut(Axis(1)))
    {
        src.iter_mut().zip(col_in.iter()).for_each(|(s, &v)| *s = v);
        filter_line(&src, &mut dst, &taps);
        col_out.iter_mut().zip(dst.iter()).for_each(|(o, &v)| *o = v);
    }
    blurred
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let taps = gaussian_kernel(3.0);
        assert_eq!(taps.len(), 25);
        assert_relative_eq!(taps.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        for i in 0..taps.len() / 2 {
            assert_relative_eq!(taps[i], taps[taps.len() - 1 - i]);
        }
    }

    #[test]
    fn reflect_repeats_edge_sample() {
        let mirrored: Vec<usize> = (-3..9).map(|i| reflect_index(i, 6)).collect();
        assert_eq!(mirrored, vec![2, 1, 0, 0, 1, 2, 3, 4, 5, 5, 4, 3]);
        // Maps smaller than the kernel keep folding.
        assert_eq!(reflect_index(-7, 2), 1);
        assert_eq!(reflect_index(5, 1), 0);
    }

    #[test]
    fn constant_map_stays_constant() {
        let map = Array2::from_elem((7, 5), 0.25f32);
        let blurred = gaussian_blur(map.view(), 3.0);
        for &v in blurred.iter() {
            assert_relative_eq!(v, 0.25, epsilon = 1e-6);
        }
    }

    #[test]
    fn impulse_spreads_symmetrically() {
        let mut map = Array2::<f32>::zeros((31, 31));
        map[[15, 15]] = 1.0;
        let blurred = gaussian_blur(map.view(), 2.0);
        assert_relative_eq!(blurred.sum(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(blurred[[15, 12]], blurred[[15, 18]]);
        assert_relative_eq!(blurred[[12, 15]], blurred[[15, 12]], epsilon = 1e-7);
        assert!(blurred[[15, 15]] > blurred[[15, 16]]);
    }

    #[test]
    fn huge_sigma_is_capped() {
        let taps = gaussian_kernel(1e30);
        assert_eq!(taps.len(), 2 * MAX_KERNEL_RADIUS + 1);
        assert!(taps.iter().all(|t| t.is_finite()));

        let map = Array2::from_elem((6, 8), 0.5f32);
        let blurred = gaussian_blur(map.view(), 1e30);
        for &v in blurred.iter() {
            assert_relative_eq!(v, 0.5, epsilon = 1e-5);
        }
    }

    #[test]
    fn non_finite_sigma_leaves_map_unchanged() {
        let mut map = Array2::<f32>::zeros((5, 5));
        map[[2, 2]] = 1.0;
        assert_eq!(gaussian_blur(map.view(), f32::NAN), map);
        assert_eq!(gaussian_blur(map.view(), f32::INFINITY), map);
    }
}
