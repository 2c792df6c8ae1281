use rayon::prelude::*;

use crate::basis::BasisProvider;
use crate::bounds::BoundsProvider;
use crate::linalg::{inverse, mat_vec};
use crate::mesh::{Element, Mesh};
use crate::tensor::TensorWeights;

/// A bounding box of one element.
///
/// It combines an axis-aligned box with an oriented box. The oriented box is an affine map
/// `y = A (x - c)` taking the (relaxed) element into the unit cube `[-1, 1]^D`, so that a point
/// `x` can only be in the element if `|A (x - c)|_∞ <= 1`. For an element whose shape is close to
/// a parallelepiped this is much tighter than the axis-aligned test.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox<const D: usize> {
    pub(crate) min: [f64; D],
    pub(crate) max: [f64; D],
    pub(crate) center: [f64; D],
    pub(crate) axes: [[f64; D]; D],
}

impl<const D: usize> BoundingBox<D> {
    /// Computes the bounding box of an element.
    ///
    /// The oriented frame is the inverse of the Jacobian at the element center. The element's
    /// boundary (its edges in 2D, its faces in 3D) is bounded in that frame with `bounds`, and
    /// both boxes are then enlarged by the relative tolerance `tol`.
    pub fn build(
        element: &Element<'_, D>,
        tol: f64,
        basis: &dyn BasisProvider,
        bounds: &dyn BoundsProvider,
    ) -> Self {
        let n = element.nodes_per_axis();

        // Position and Jacobian at the center
        let mut weights = TensorWeights::new(n);
        weights.set(basis, 1, &[0.; D]);
        let mut x0 = [0.; D];
        let mut jac = [[0.; D]; D];
        for c in 0..D {
            let jet = weights.jet(element.coords(c));
            x0[c] = jet.value;
            jac[c] = jet.grad;
        }

        // Boundary faces, as per-coordinate nodal arrays
        let faces: Vec<_> = (0..D)
            .flat_map(|axis| [false, true].map(|upper| (axis, upper)))
            .map(|(axis, upper)| {
                let mut shape = Vec::new();
                let values: [Vec<f64>; D] = std::array::from_fn(|c| {
                    let (values, s) = element.face(c, axis, upper);
                    shape = s;
                    values
                });
                (values, shape)
            })
            .collect();

        // Axis-aligned box
        let mut min = [f64::INFINITY; D];
        let mut max = [f64::NEG_INFINITY; D];
        for (values, shape) in &faces {
            for c in 0..D {
                let [lo, hi] = bounds.range(&values[c], shape);
                min[c] = min[c].min(lo);
                max[c] = max[c].max(hi);
            }
        }

        // Oriented frame and its inverse
        let (frame, frame_inv) = match inverse(&jac) {
            Some(inv) => (inv, jac),
            None => {
                log::warn!("Singular Jacobian at the element center, falling back to a loose box.");
                let half: [f64; D] = std::array::from_fn(|c| {
                    let h = 0.5 * (max[c] - min[c]);
                    if h > 0. {
                        h
                    } else {
                        1.
                    }
                });
                let mut frame = [[0.; D]; D];
                let mut frame_inv = [[0.; D]; D];
                for c in 0..D {
                    frame[c][c] = 1. / half[c];
                    frame_inv[c][c] = half[c];
                }
                (frame, frame_inv)
            }
        };

        // Oriented box: bound y = frame (x - x0) on the boundary
        let mut ymin = [f64::INFINITY; D];
        let mut ymax = [f64::NEG_INFINITY; D];
        for (values, shape) in &faces {
            let len = values[0].len();
            for i in 0..D {
                let y: Vec<f64> = (0..len)
                    .map(|k| (0..D).map(|c| frame[i][c] * (values[c][k] - x0[c])).sum())
                    .collect();
                let [lo, hi] = bounds.range(&y, shape);
                ymin[i] = ymin[i].min(lo);
                ymax[i] = ymax[i].max(hi);
            }
        }

        let ymid: [f64; D] = std::array::from_fn(|i| 0.5 * (ymin[i] + ymax[i]));
        let offset = mat_vec(&frame_inv, &ymid);
        let center = std::array::from_fn(|c| x0[c] + offset[c]);
        let mut axes = frame;
        for (row, (lo, hi)) in axes.iter_mut().zip(ymin.iter().zip(&ymax)) {
            let half = 0.5 * (hi - lo) * (1. + tol);
            let scale = if half > 0. { 1. / half } else { f64::MAX };
            for v in row.iter_mut() {
                *v *= scale;
            }
        }

        for c in 0..D {
            let d = 0.5 * (max[c] - min[c]) * tol;
            min[c] -= d;
            max[c] += d;
        }

        Self {
            min,
            max,
            center,
            axes,
        }
    }

    /// Returns `false` if `x` is definitely outside the element.
    pub fn contains(&self, x: &[f64; D]) -> bool {
        if (0..D).any(|c| x[c] < self.min[c] || x[c] > self.max[c]) {
            return false;
        }
        (0..D).all(|i| {
            let y: f64 = (0..D).map(|c| self.axes[i][c] * (x[c] - self.center[c])).sum();
            y.abs() <= 1.
        })
    }

    /// The lower corner of the axis-aligned box.
    pub fn min(&self) -> [f64; D] {
        self.min
    }

    /// The upper corner of the axis-aligned box.
    pub fn max(&self) -> [f64; D] {
        self.max
    }

    /// The center of the oriented box.
    pub fn center(&self) -> [f64; D] {
        self.center
    }

    /// The matrix mapping the oriented box onto the unit cube.
    pub fn axes(&self) -> [[f64; D]; D] {
        self.axes
    }
}

/// Computes the bounding boxes of all elements of a mesh, in parallel.
pub fn bounding_boxes<const D: usize>(
    mesh: &Mesh<D>,
    tol: f64,
    basis: &dyn BasisProvider,
    bounds: &dyn BoundsProvider,
) -> Vec<BoundingBox<D>> {
    (0..mesh.element_count())
        .into_par_iter()
        .map(|e| BoundingBox::build(&mesh.element(e), tol, basis, bounds))
        .collect()
}
