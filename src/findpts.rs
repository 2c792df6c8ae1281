use anyhow::{ensure, Result};
use itertools::{izip, Itertools};
use rayon::prelude::*;
use smallvec::SmallVec;

use crate::basis::{BasisProvider, GllBasis};
use crate::bounding_box::{bounding_boxes, BoundingBox};
use crate::bounds::{BoundsProvider, LegendreBounds};
use crate::config::FindPtsConfig;
use crate::field::FieldEvaluator;
use crate::hash::SpatialHash;
use crate::mesh::Mesh;
use crate::point_locator::PointLocator;
use crate::solver::{Constraint, ElementSolver, SolverState};

/// How a query point relates to the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    /// Inside an element, to the Newton tolerance.
    Internal,
    /// On the boundary of an element, or the closest boundary point of a candidate element.
    Border,
    /// No element is close enough to be a candidate.
    NotFound,
}

/// The result of locating one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location<const D: usize> {
    pub code: Code,
    /// The element the point was found in, [`None`] if not found.
    pub element: Option<usize>,
    /// Reference coordinates within `element`.
    pub r: [f64; D],
    /// Squared distance between the point and the image of `r`.
    pub dist2: f64,
    /// Which reference coordinates ended on the element boundary.
    pub constraints: [Constraint; D],
    /// Whether the Newton iteration converged.
    pub converged: bool,
}

impl<const D: usize> Location<D> {
    pub fn not_found() -> Self {
        Self {
            code: Code::NotFound,
            element: None,
            r: [0.; D],
            dist2: f64::MAX,
            constraints: [Constraint::Free; D],
            converged: false,
        }
    }

    fn from_state(element: usize, state: &SolverState<D>) -> Self {
        let code = if state.flags.is_interior() {
            Code::Internal
        } else {
            Code::Border
        };
        Self {
            code,
            element: Some(element),
            r: state.r,
            dist2: state.dist2,
            constraints: state.flags.current,
            converged: state.flags.converged,
        }
    }

    pub fn is_found(&self) -> bool {
        self.code != Code::NotFound
    }

    /// Keeps the better of two results for the same point.
    ///
    /// An internal result is final. Otherwise the candidate wins if it is internal or strictly
    /// closer.
    fn merge(&mut self, candidate: Self) {
        if self.code == Code::Internal {
            return;
        }
        if candidate.code == Code::Internal
            || self.code == Code::NotFound
            || candidate.dist2 < self.dist2
        {
            *self = candidate;
        }
    }
}

/// Point location in a spectral element mesh.
///
/// Query points are first matched against the spatial hash and the element bounding boxes,
/// then located within each candidate element with a constrained Newton iteration. Points are
/// processed in groups sharing a candidate element, so that the basis weights and the element
/// data are reused across the group.
pub struct FindPoints<const D: usize> {
    mesh: Mesh<D>,
    boxes: Vec<BoundingBox<D>>,
    hash: SpatialHash<D>,
    config: FindPtsConfig,
    basis: Box<dyn BasisProvider>,
}

impl<const D: usize> FindPoints<D> {
    /// Prepares a mesh whose nodes are Gauss-Lobatto-Legendre nodes along each reference axis.
    pub fn new(mesh: Mesh<D>, config: FindPtsConfig) -> Result<Self> {
        let n = mesh.nodes_per_axis();
        let bounds = LegendreBounds::new(config.bound_oversample, n);
        Self::with_providers(mesh, config, Box::new(GllBasis::new(n)), &bounds)
    }

    /// Prepares a mesh with a custom basis and polynomial bounds.
    ///
    /// `bounds` is only needed while building the bounding boxes.
    pub fn with_providers(
        mesh: Mesh<D>,
        config: FindPtsConfig,
        basis: Box<dyn BasisProvider>,
        bounds: &dyn BoundsProvider,
    ) -> Result<Self> {
        config.validate()?;
        let nel = mesh.element_count();
        if let Some(size) = config.max_hash_size {
            ensure!(
                size >= nel,
                "The hash table size {} is smaller than the number of elements {}.",
                size,
                nel
            );
        }

        let boxes = bounding_boxes(&mesh, config.box_tolerance, &*basis, bounds);
        let node_count = nel * mesh.nodes_per_element();
        let hash = SpatialHash::build(&boxes, config.hash_size(nel, node_count));
        log::debug!(
            "Prepared {} elements with {} nodes each for point location.",
            nel,
            mesh.nodes_per_element()
        );

        Ok(Self {
            mesh,
            boxes,
            hash,
            config,
            basis,
        })
    }

    pub fn mesh(&self) -> &Mesh<D> {
        &self.mesh
    }

    pub fn bounding_boxes(&self) -> &[BoundingBox<D>] {
        &self.boxes
    }

    pub fn hash(&self) -> &SpatialHash<D> {
        &self.hash
    }

    pub fn config(&self) -> &FindPtsConfig {
        &self.config
    }

    /// Elements whose bounding box contains `x`.
    pub fn candidates(&self, x: &[f64; D]) -> SmallVec<[usize; 8]> {
        self.hash
            .query(x)
            .iter()
            .copied()
            .filter(|&e| self.boxes[e].contains(x))
            .collect()
    }

    /// An evaluator of nodal fields laid out like the mesh coordinates.
    pub fn field_evaluator(&self) -> FieldEvaluator<'_, D> {
        FieldEvaluator::new(&self.mesh, &*self.basis)
    }

    /// Interpolates a nodal field at reference coordinates `r` of `element`.
    pub fn evaluate(&self, field: &[f64], element: usize, r: &[f64; D]) -> Result<f64> {
        self.field_evaluator().evaluate(field, element, r)
    }

    /// Interpolates a nodal field at located points, giving [`None`] for points not found.
    pub fn evaluate_many(
        &self,
        field: &[f64],
        locations: &[Location<D>],
    ) -> Result<Vec<Option<f64>>> {
        self.field_evaluator().evaluate_many(field, locations)
    }

    /// `(element, point)` pairs sorted by element, points in increasing order within a group.
    fn sorted_pairs(&self, points: &[[f64; D]]) -> Vec<(usize, usize)> {
        let mut pairs: Vec<_> = points
            .iter()
            .enumerate()
            .flat_map(|(i, x)| self.candidates(x).into_iter().map(move |e| (e, i)))
            .collect();
        pairs.sort_by_key(|&(e, _)| e);
        pairs
    }

    /// Runs the Newton iteration for a group of points against one element.
    fn solve_group(&self, element: usize, idx: &[usize], points: &[[f64; D]]) -> Vec<Location<D>> {
        let solver = ElementSolver::new(self.mesh.element(element), &*self.basis, &self.config);
        let mut states: Vec<_> = idx.iter().map(|&i| solver.seed(points[i])).collect();
        solver.solve(&mut states);
        states
            .iter()
            .map(|state| Location::from_state(element, state))
            .collect()
    }
}

impl<const D: usize> PointLocator<D> for FindPoints<D> {
    fn locate_one(&self, point: &[f64; D]) -> Location<D> {
        let mut best = Location::not_found();
        for e in self.candidates(point) {
            if best.code == Code::Internal {
                break;
            }
            let solver = ElementSolver::new(self.mesh.element(e), &*self.basis, &self.config);
            best.merge(Location::from_state(e, &solver.locate(*point)));
        }
        best
    }

    fn locate_many(&self, points: &[[f64; D]]) -> Vec<Location<D>> {
        let pairs = self.sorted_pairs(points);
        let mut locations = vec![Location::not_found(); points.len()];

        for (e, group) in &pairs.iter().group_by(|&&(e, _)| e) {
            let idx: Vec<usize> = group
                .map(|&(_, i)| i)
                .filter(|&i| locations[i].code != Code::Internal)
                .collect();
            if idx.is_empty() {
                continue;
            }
            for (&i, location) in izip!(&idx, self.solve_group(e, &idx, points)) {
                locations[i].merge(location);
            }
        }

        log::debug!(
            "Located {} of {} points from {} candidate pairs.",
            locations.iter().filter(|l| l.is_found()).count(),
            points.len(),
            pairs.len()
        );
        locations
    }

    fn par_locate_many(&self, points: &[[f64; D]]) -> Vec<Location<D>>
    where
        Self: std::marker::Sync,
    {
        let mut pairs: Vec<_> = points
            .par_iter()
            .enumerate()
            .flat_map(|(i, x)| {
                self.candidates(x)
                    .into_iter()
                    .map(|e| (e, i))
                    .collect::<Vec<_>>()
            })
            .collect();
        pairs.par_sort_by_key(|&(e, _)| e);

        let groups: Vec<(usize, Vec<usize>)> = pairs
            .iter()
            .group_by(|&&(e, _)| e)
            .into_iter()
            .map(|(e, group)| (e, group.map(|&(_, i)| i).collect()))
            .collect();
        let results: Vec<Vec<Location<D>>> = groups
            .par_iter()
            .map(|(e, idx)| self.solve_group(*e, idx, points))
            .collect();

        // Merging in element order gives the same answer as the sequential version
        let mut locations = vec![Location::not_found(); points.len()];
        for ((_, idx), group) in izip!(&groups, results) {
            for (&i, location) in izip!(idx, group) {
                locations[i].merge(location);
            }
        }
        locations
    }
}
