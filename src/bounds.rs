use std::borrow::Cow;

use crate::basis::{gll_nodes, gll_weights, legendre_all};

/// Bounds a nodal tensor polynomial over the whole reference domain.
pub trait BoundsProvider: Send + Sync {
    /// Returns a certified `[min, max]` range of the polynomial interpolating `values`.
    ///
    /// `values` holds the nodal values on a tensor grid of the given `shape` (axis 0 fastest).
    /// The returned range must contain every value the polynomial takes on `[-1, 1]^k`, where
    /// `k` is the number of axes.
    fn range(&self, values: &[f64], shape: &[usize]) -> [f64; 2];
}

/// Certified polynomial bounds through a Legendre expansion.
///
/// The polynomial is sampled on a uniform grid with `oversample` intervals per axis and the
/// sampled range is widened by the worst-case error of piecewise multilinear interpolation,
/// with the second derivatives bounded through the Legendre coefficients. The result is then
/// intersected with the cruder `c_0 ± Σ|c_k|` bound.
///
/// The nodal values must live on Gauss-Lobatto-Legendre nodes.
#[derive(Debug, Clone)]
pub struct LegendreBounds {
    oversample: usize,
    cache: Vec<Transform>,
}

/// Per node count: nodal to modal matrix and modal to sample matrix.
#[derive(Debug, Clone)]
struct Transform {
    n: usize,
    // n x n, row k gives the k-th Legendre coefficient
    to_modal: Vec<f64>,
    // (oversample + 1) x n, row j evaluates the expansion at the j-th sample point
    to_samples: Vec<f64>,
    // max |P_k''| on [-1, 1], attained at the endpoints
    curvature: Vec<f64>,
}

impl Transform {
    fn new(n: usize, oversample: usize) -> Self {
        let nodes = gll_nodes(n);
        let weights = gll_weights(&nodes);
        let degree = n - 1;
        let mut to_modal = vec![0.; n * n];
        let mut p = vec![0.; n];
        for (i, (&z, &w)) in nodes.iter().zip(&weights).enumerate() {
            legendre_all(n, z, &mut p);
            for k in 0..n {
                // The GLL rule is not exact for P_N^2, hence the modified norm of the last mode.
                let gamma = if k == degree {
                    2. / degree as f64
                } else {
                    2. / (2 * k + 1) as f64
                };
                to_modal[k * n + i] = w * p[k] / gamma;
            }
        }
        let m = oversample;
        let mut to_samples = vec![0.; (m + 1) * n];
        for j in 0..=m {
            let t = -1. + 2. * j as f64 / m as f64;
            legendre_all(n, t, &mut to_samples[j * n..(j + 1) * n]);
        }
        let curvature = (0..n)
            .map(|k| {
                let k = k as f64;
                (k - 1.) * k * (k + 1.) * (k + 2.) / 8.
            })
            .map(|c: f64| c.max(0.))
            .collect();
        Self {
            n,
            to_modal,
            to_samples,
            curvature,
        }
    }
}

impl LegendreBounds {
    /// Constructs a new `LegendreBounds` caching the transforms for the given node counts.
    pub fn new<I>(oversample: usize, counts: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let oversample = oversample.max(1);
        let mut cache: Vec<Transform> = Vec::new();
        for n in counts {
            if n >= 2 && !cache.iter().any(|t| t.n == n) {
                cache.push(Transform::new(n, oversample));
            }
        }
        Self { oversample, cache }
    }

    /// The number of sampling intervals per axis.
    pub fn oversample(&self) -> usize {
        self.oversample
    }

    fn transform(&self, n: usize) -> Cow<'_, Transform> {
        match self.cache.iter().find(|t| t.n == n) {
            Some(t) => Cow::Borrowed(t),
            None => Cow::Owned(Transform::new(n, self.oversample)),
        }
    }
}

impl Default for LegendreBounds {
    fn default() -> Self {
        Self::new(16, [])
    }
}

impl BoundsProvider for LegendreBounds {
    fn range(&self, values: &[f64], shape: &[usize]) -> [f64; 2] {
        assert_eq!(
            values.len(),
            shape.iter().product::<usize>(),
            "Nodal values do not match the shape."
        );
        let transforms: Vec<_> = shape.iter().map(|&n| self.transform(n)).collect();

        // Nodal -> modal, one axis at a time
        let mut modal = values.to_vec();
        for (axis, t) in transforms.iter().enumerate() {
            modal = apply_axis(&modal, shape, axis, &t.to_modal, t.n);
        }

        // Modal -> samples
        let m = self.oversample;
        let mut samples = modal.clone();
        let mut sample_shape = shape.to_vec();
        for (axis, t) in transforms.iter().enumerate() {
            samples = apply_axis(&samples, &sample_shape, axis, &t.to_samples, m + 1);
            sample_shape[axis] = m + 1;
        }
        let (lo, hi) = samples
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });

        // Interpolation error: h^2 / 8 * max |d^2 p / dr_a^2| summed over the axes
        let h = 2. / m as f64;
        let mut err = 0.;
        let mut tail = 0.;
        for (flat, &c) in modal.iter().enumerate() {
            let c = c.abs();
            if flat > 0 {
                tail += c;
            }
            let mut rest = flat;
            for t in &transforms {
                let k = rest % t.n;
                rest /= t.n;
                err += h * h / 8. * c * t.curvature[k];
            }
        }

        let c0 = modal[0];
        [(lo - err).max(c0 - tail), (hi + err).min(c0 + tail)]
    }
}

/// Contracts `mat` (`rows x shape[axis]`) with `data` along `axis`.
fn apply_axis(data: &[f64], shape: &[usize], axis: usize, mat: &[f64], rows: usize) -> Vec<f64> {
    let inner: usize = shape[..axis].iter().product();
    let n = shape[axis];
    let outer: usize = shape[axis + 1..].iter().product();
    let mut out = vec![0.; inner * rows * outer];
    for o in 0..outer {
        for r in 0..rows {
            let row = &mat[r * n..(r + 1) * n];
            for i in 0..inner {
                out[i + inner * (r + rows * o)] = row
                    .iter()
                    .enumerate()
                    .map(|(k, &a)| a * data[i + inner * (k + n * o)])
                    .sum();
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::basis::{BasisProvider, GllBasis};

    fn nodal<F: Fn(f64) -> f64>(n: usize, f: F) -> Vec<f64> {
        gll_nodes(n).into_iter().map(f).collect()
    }

    #[test]
    fn linear_function_is_bounded_exactly() {
        let bounds = LegendreBounds::new(8, [4]);
        let values = nodal(4, |x| 3. * x - 1.);

        let [lo, hi] = bounds.range(&values, &[4]);

        assert!((lo - (-4.)).abs() < 1e-12);
        assert!((hi - 2.).abs() < 1e-12);
        assert_eq!(bounds.oversample(), 8);
        assert_eq!(LegendreBounds::default().oversample(), 16);
    }

    #[test]
    fn range_contains_interior_extremum() {
        // 1 - x^2 peaks between the nodes of a 4 node basis
        let bounds = LegendreBounds::default();
        let values = nodal(4, |x| 1. - x * x);

        let [lo, hi] = bounds.range(&values, &[4]);

        assert!(lo <= 1e-12);
        assert!(hi >= 1.);
        assert!(hi < 1.05);
    }

    #[test]
    fn constant_in_two_dimensions() {
        let bounds = LegendreBounds::default();
        let values = vec![2.5; 12];

        let [lo, hi] = bounds.range(&values, &[3, 4]);

        assert!((lo - 2.5).abs() < 1e-12);
        assert!((hi - 2.5).abs() < 1e-12);
    }

    #[test]
    fn bilinear_saddle() {
        let bounds = LegendreBounds::new(4, [3]);
        let nodes = gll_nodes(3);
        let values: Vec<f64> = nodes
            .iter()
            .flat_map(|&s| nodes.iter().map(move |&r| r * s))
            .collect();

        let [lo, hi] = bounds.range(&values, &[3, 3]);

        assert!((lo + 1.).abs() < 1e-12);
        assert!((hi - 1.).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn range_is_certified(values in proptest::collection::vec(-10f64..10., 6),
                              samples in proptest::collection::vec(-1f64..1., 20)) {
            let n = 6;
            let bounds = LegendreBounds::new(16, [n]);
            let basis = GllBasis::new([n]);
            let [lo, hi] = bounds.range(&values, &[n]);
            let mut w = vec![0.; n];
            for x in samples.into_iter().chain([-1., 1.]) {
                basis.weights(n, 0, x, &mut w);
                let v: f64 = w.iter().zip(&values).map(|(a, b)| a * b).sum();
                prop_assert!(v >= lo - 1e-9 && v <= hi + 1e-9);
            }
        }
    }
}
