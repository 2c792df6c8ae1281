use rayon::prelude::*;

use crate::findpts::Location;

/// A trait to locate one or several query points within a mesh.
pub trait PointLocator<const D: usize> {
    /// Locates one query point within a mesh.
    ///
    /// Points outside of the mesh are reported as the closest boundary point of the closest
    /// candidate element, or as not found when no element is close enough to be a candidate.
    fn locate_one(&self, point: &[f64; D]) -> Location<D>;

    /// Locates several query points within a mesh.
    fn locate_many(&self, points: &[[f64; D]]) -> Vec<Location<D>> {
        points.iter().map(|point| self.locate_one(point)).collect()
    }

    /// Locates several query points within a mesh in parallel.
    fn par_locate_many(&self, points: &[[f64; D]]) -> Vec<Location<D>>
    where
        Self: std::marker::Sync,
    {
        points
            .par_iter()
            .map(|point| self.locate_one(point))
            .collect()
    }
}
