//! Constrained Newton iteration locating points within one element.
//!
//! For a target `x`, the solver minimizes `|x - X(r)|²` over the reference cube `[-1, 1]^D`,
//! where `X` is the element map. Each iteration is a trust-region step: a step whose actual
//! decrease falls short of its predicted decrease is rejected and the radius shrunk, a very good
//! one grows the radius. Coordinates reaching the cube boundary are pinned there until the
//! gradient says to move back inside, so points outside the element converge to the closest
//! point of its boundary.

use std::borrow::Cow;

use crate::basis::BasisProvider;
use crate::config::FindPtsConfig;
use crate::linalg::{mat_t_vec, norm2};
use crate::mesh::{multi_index, Element};
use crate::tensor::TensorWeights;

mod state;
mod step;

pub use state::{Constraint, SolverState, StepFlags};

/// Position, Jacobian and second derivatives of the element map at one reference point.
struct Geometry<const D: usize> {
    x: [f64; D],
    jac: [[f64; D]; D],
    // hess[c][a][b] = ∂²x_c / ∂r_a ∂r_b, only filled on request
    hess: [[[f64; D]; D]; D],
}

/// Newton solver bound to one element.
pub struct ElementSolver<'a, const D: usize> {
    element: Element<'a, D>,
    basis: &'a dyn BasisProvider,
    nodes: [Cow<'a, [f64]>; D],
    config: &'a FindPtsConfig,
}

impl<'a, const D: usize> ElementSolver<'a, D> {
    pub fn new(
        element: Element<'a, D>,
        basis: &'a dyn BasisProvider,
        config: &'a FindPtsConfig,
    ) -> Self {
        let n = element.nodes_per_axis();
        Self {
            element,
            basis,
            nodes: std::array::from_fn(|a| basis.nodes(n[a])),
            config,
        }
    }

    /// A fresh state for `x`, starting at the reference coordinates of the closest element node.
    pub fn seed(&self, x: [f64; D]) -> SolverState<D> {
        let idx = multi_index(
            &self.element.nodes_per_axis(),
            self.element.nearest_node(&x),
        );
        let r = std::array::from_fn(|a| self.nodes[a][idx[a]]);
        SolverState::new(x, r, self.config.initial_trust_radius)
    }

    /// Seeds and solves a single point.
    pub fn locate(&self, x: [f64; D]) -> SolverState<D> {
        let mut states = [self.seed(x)];
        self.solve(&mut states);
        states[0]
    }

    /// Iterates on a batch of points until every one has converged or the iteration limit is
    /// reached, and returns the number of iterations run.
    ///
    /// Points are binned by their number of pinned coordinates at the start of each iteration.
    /// Only the constrained bins need second derivatives of the map.
    pub fn solve(&self, states: &mut [SolverState<D>]) -> usize {
        let mut weights = TensorWeights::new(self.element.nodes_per_axis());
        // One bin per number of pinned coordinates, 0 to D
        let mut bins: Vec<Vec<usize>> = vec![Vec::new(); D + 1];
        let mut iterations = 0;
        while iterations < self.config.max_iterations {
            bins.iter_mut().for_each(Vec::clear);
            for (i, p) in states.iter().enumerate() {
                if !p.flags.converged {
                    bins[p.flags.constrained_count()].push(i);
                }
            }
            if bins.iter().all(Vec::is_empty) {
                break;
            }
            for (pinned, bin) in bins.iter().enumerate() {
                for &i in bin {
                    self.iterate(&mut states[i], &mut weights, pinned > 0);
                }
            }
            iterations += 1;
        }

        log::trace!(
            "Solved {} points in {} iterations, {} unconverged.",
            states.len(),
            iterations,
            states.iter().filter(|p| !p.flags.converged).count()
        );
        iterations
    }

    fn evaluate(
        &self,
        weights: &mut TensorWeights<D>,
        r: &[f64; D],
        with_hessian: bool,
    ) -> Geometry<D> {
        weights.set(self.basis, if with_hessian { 2 } else { 1 }, r);
        let mut geo = Geometry {
            x: [0.; D],
            jac: [[0.; D]; D],
            hess: [[[0.; D]; D]; D],
        };
        for c in 0..D {
            let jet = weights.jet(self.element.coords(c));
            geo.x[c] = jet.value;
            geo.jac[c] = jet.grad;
            geo.hess[c] = jet.hess;
        }
        geo
    }

    fn iterate(&self, p: &mut SolverState<D>, weights: &mut TensorWeights<D>, with_hessian: bool) {
        let geo = self.evaluate(weights, &p.r, with_hessian);
        let resid: [f64; D] = std::array::from_fn(|c| p.x[c] - geo.x[c]);
        if self.reject_prior_step(p, &resid) {
            return;
        }

        p.flags.previous = p.flags.current;
        let grad = mat_t_vec(&geo.jac, &resid);
        let mut current = p.flags.current;
        for (c, &g) in current.iter_mut().zip(&grad) {
            if c.released_by(g) {
                *c = Constraint::Free;
            }
        }

        let tol = self.config.newton_tolerance;
        match current.iter().filter(|c| !c.is_free()).count() {
            0 => step::volume_step(p, &geo.jac, &resid, tol),
            k if k == D => step::vertex_step(p, current),
            _ => step::constrained_step(p, current, &geo.jac, &geo.hess, &resid, tol),
        }

        if p.flags.converged && p.r != p.oldr {
            // The last step was too small to matter for r, but dist2 should match it
            weights.set(self.basis, 0, &p.r);
            let x: [f64; D] = std::array::from_fn(|c| weights.value(self.element.coords(c)));
            let resid: [f64; D] = std::array::from_fn(|c| p.x[c] - x[c]);
            p.dist2 = norm2(&resid);
            p.oldr = p.r;
        }
    }

    /// Compares the decrease achieved by the last step with its prediction.
    ///
    /// A poor step is undone and the trust region shrunk to a fraction of its length. Returns
    /// `true` if no new step should be taken this iteration.
    fn reject_prior_step(&self, p: &mut SolverState<D>, resid: &[f64; D]) -> bool {
        let config = self.config;
        let dist2 = norm2(resid);
        let decr = p.dist2 - dist2;
        let pred = p.dist2p;

        if decr < config.reject_threshold * pred {
            let step = p
                .r
                .iter()
                .zip(&p.oldr)
                .map(|(r, oldr)| (r - oldr).abs())
                .fold(0., f64::max);
            p.r = p.oldr;
            p.flags.current = p.flags.previous;
            p.tr = step * config.reject_shrink;
            p.dist2p = f64::MIN;
            if pred < p.dist2 * config.newton_tolerance {
                p.flags.converged = true;
            }
            return true;
        }

        if decr >= config.very_good_threshold * pred {
            p.tr *= config.trust_growth;
        }
        p.dist2 = dist2;
        p.oldr = p.r;
        p.flags.converged
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use rstest::rstest;

    use super::*;
    use crate::basis::GllBasis;
    use crate::mesh::Mesh;

    fn square(n: usize) -> Result<Mesh<2>> {
        Mesh::grid([-1., -1.], [1., 1.], [1, 1], [n, n])
    }

    fn annulus() -> Result<Mesh<2>> {
        Mesh::from_fn([7, 7], 1, |_, [r, t]| {
            let rho = 1.5 + 0.5 * r;
            let theta = std::f64::consts::FRAC_PI_4 * (t + 1.);
            [rho * theta.cos(), rho * theta.sin()]
        })
    }

    /// Image of `r` under the interpolated element map.
    fn image<const D: usize>(mesh: &Mesh<D>, basis: &GllBasis, r: &[f64; D]) -> [f64; D] {
        let mut weights = TensorWeights::new(mesh.nodes_per_axis());
        weights.set(basis, 0, r);
        std::array::from_fn(|c| weights.value(mesh.element(0).coords(c)))
    }

    #[rstest]
    #[case([0., 0.])]
    #[case([0.3, -0.2])]
    #[case([-0.99, 0.999])]
    fn interior_points_of_identity_element(#[case] x: [f64; 2]) -> Result<()> {
        let mesh = square(5)?;
        let basis = GllBasis::new([5]);
        let config = FindPtsConfig::default();
        let solver = ElementSolver::new(mesh.element(0), &basis, &config);

        let p = solver.locate(x);

        assert!(p.flags.is_interior());
        for a in 0..2 {
            assert!((p.r[a] - x[a]).abs() < 1e-12);
        }
        assert!(p.dist2 < 1e-24);

        Ok(())
    }

    #[test]
    fn outside_point_projects_onto_edge() -> Result<()> {
        let mesh = square(5)?;
        let basis = GllBasis::new([5]);
        let config = FindPtsConfig::default();
        let solver = ElementSolver::new(mesh.element(0), &basis, &config);

        let p = solver.locate([1.5, 0.2]);

        assert!(p.flags.converged);
        assert_eq!(p.r[0], 1.);
        assert!((p.r[1] - 0.2).abs() < 1e-12);
        assert_eq!(p.flags.current, [Constraint::Upper, Constraint::Free]);
        assert!((p.dist2 - 0.25).abs() < 1e-12);

        Ok(())
    }

    #[test]
    fn far_point_ends_on_a_corner() -> Result<()> {
        let mesh = square(5)?;
        let basis = GllBasis::new([5]);
        let config = FindPtsConfig::default();
        let solver = ElementSolver::new(mesh.element(0), &basis, &config);

        let p = solver.locate([3., 3.]);

        assert!(p.flags.converged);
        assert_eq!(p.r, [1., 1.]);
        assert_eq!(p.flags.current, [Constraint::Upper; 2]);
        assert!((p.dist2 - 8.).abs() < 1e-12);

        Ok(())
    }

    #[test]
    fn seed_is_the_closest_node() -> Result<()> {
        let mesh = square(5)?;
        let basis = GllBasis::new([5]);
        let config = FindPtsConfig::default();
        let solver = ElementSolver::new(mesh.element(0), &basis, &config);

        let p = solver.seed([0.9, -0.1]);

        assert_eq!(p.r, [1., 0.]);
        assert_eq!(p.flags.current, [Constraint::Upper, Constraint::Free]);
        assert_eq!(p.dist2, f64::MAX);
        assert_eq!(p.tr, config.initial_trust_radius);

        Ok(())
    }

    #[test]
    fn curved_element_round_trip() -> Result<()> {
        let mesh = annulus()?;
        let basis = GllBasis::new([7]);
        let config = FindPtsConfig::default();
        let solver = ElementSolver::new(mesh.element(0), &basis, &config);

        let samples = [-0.8, -0.35, 0., 0.4, 0.8];
        let mut states = Vec::new();
        let mut expected = Vec::new();
        for &r0 in &samples {
            for &r1 in &samples {
                let r = [r0, r1];
                states.push(solver.seed(image(&mesh, &basis, &r)));
                expected.push(r);
            }
        }

        let iterations = solver.solve(&mut states);

        assert!(iterations <= config.max_iterations);
        for (p, r) in states.iter().zip(&expected) {
            assert!(p.flags.is_interior());
            assert!((p.r[0] - r[0]).abs() < 1e-10);
            assert!((p.r[1] - r[1]).abs() < 1e-10);
        }

        Ok(())
    }

    #[test]
    fn outside_curved_element_reaches_the_boundary() -> Result<()> {
        let mesh = annulus()?;
        let basis = GllBasis::new([7]);
        let config = FindPtsConfig::default();
        let solver = ElementSolver::new(mesh.element(0), &basis, &config);

        // Beyond the outer arc, on the diagonal
        let p = solver.locate([2.5 * 0.5f64.sqrt(), 2.5 * 0.5f64.sqrt()]);

        assert!(p.flags.converged);
        assert_eq!(p.r[0], 1.);
        assert_eq!(p.flags.current[0], Constraint::Upper);
        assert!(p.r[1].abs() < 1e-6);
        assert!((p.dist2 - 0.25).abs() < 1e-6);

        Ok(())
    }

    #[test]
    fn accepted_steps_never_increase_the_distance() -> Result<()> {
        let mesh = annulus()?;
        let basis = GllBasis::new([7]);
        let config = FindPtsConfig::default().with_max_iterations(1);
        let solver = ElementSolver::new(mesh.element(0), &basis, &config);

        for x in [[0.1, 2.3], [-0.5, 0.3], [1.2, 0.9], [3., -1.]] {
            let mut states = [solver.seed(x)];
            let mut last = f64::MAX;
            for _ in 0..100 {
                let tr = states[0].tr;
                let oldr = states[0].oldr;
                let r = states[0].r;
                solver.solve(&mut states);
                let p = &states[0];
                if p.dist2p == f64::MIN {
                    // Rejected: back to the previous point with a smaller region
                    assert_eq!(p.r, oldr);
                    let step = (0..2).map(|a| (r[a] - oldr[a]).abs()).fold(0., f64::max);
                    assert!(p.tr <= step * config.reject_shrink);
                    assert!(p.tr < tr);
                }
                assert!(p.dist2 <= last * (1. + 1e-12) + 1e-24);
                last = p.dist2;
                for a in 0..2 {
                    assert!((-1. ..=1.).contains(&p.r[a]));
                    if p.r[a].abs() == 1. {
                        assert!(!p.flags.current[a].is_free());
                    }
                }
                if p.flags.converged {
                    break;
                }
            }
            assert!(states[0].flags.converged);
        }

        Ok(())
    }

    #[test]
    fn twisted_hexahedron() -> Result<()> {
        let mesh = Mesh::from_fn([3, 3, 3], 1, |_, [r, s, t]| {
            [r + 0.1 * s * t, s + 0.1 * r * r, t + 0.05 * r * s]
        })?;
        let basis = GllBasis::new([3]);
        let config = FindPtsConfig::default();
        let solver = ElementSolver::new(mesh.element(0), &basis, &config);

        let r = [0.3, -0.5, 0.7];
        let x = [r[0] + 0.1 * r[1] * r[2], r[1] + 0.1 * r[0] * r[0], r[2] + 0.05 * r[0] * r[1]];
        let p = solver.locate(x);

        assert!(p.flags.is_interior());
        for a in 0..3 {
            assert!((p.r[a] - r[a]).abs() < 1e-12);
        }

        Ok(())
    }

    #[test]
    fn cube_edge_projection() -> Result<()> {
        let mesh = Mesh::grid([-1.; 3], [1.; 3], [1; 3], [3; 3])?;
        let basis = GllBasis::new([3]);
        let config = FindPtsConfig::default();
        let solver = ElementSolver::new(mesh.element(0), &basis, &config);

        let p = solver.locate([2., 2., 0.25]);

        assert!(p.flags.converged);
        assert_eq!(&p.r[..2], &[1., 1.]);
        assert!((p.r[2] - 0.25).abs() < 1e-12);
        assert_eq!(
            p.flags.current,
            [Constraint::Upper, Constraint::Upper, Constraint::Free]
        );
        assert!((p.dist2 - 2.).abs() < 1e-12);

        Ok(())
    }

    #[test]
    fn rejected_steps_revert_and_shrink_the_trust_region() -> Result<()> {
        // Three quarters of an annulus in a single element, strongly curved
        let mesh = Mesh::from_fn([10, 10], 1, |_, [r, t]| {
            let rho = 1.5 + 0.5 * r;
            let theta = 2.2 * t;
            [rho * theta.cos(), rho * theta.sin()]
        })?;
        let basis = GllBasis::new([10]);
        let config = FindPtsConfig::default().with_max_iterations(1);
        let solver = ElementSolver::new(mesh.element(0), &basis, &config);

        let mut rejections = 0;
        for i in 0..30 {
            for j in 0..30 {
                let x = [-2.5 + 5. * i as f64 / 29., -2.5 + 5. * j as f64 / 29.];
                let mut states = [solver.seed(x)];
                let mut rebound = None;
                for _ in 0..200 {
                    let before = states[0];
                    solver.solve(&mut states);
                    let p = &states[0];
                    if let Some(tr) = rebound.take() {
                        // The step after a rejection always counts as very good
                        assert_eq!(p.tr, tr * config.trust_growth);
                    }
                    if p.dist2p == f64::MIN && before.dist2p != f64::MIN {
                        rejections += 1;
                        assert_eq!(p.r, before.oldr);
                        assert_eq!(p.oldr, before.oldr);
                        assert_eq!(p.flags.current, before.flags.previous);
                        assert_eq!(p.dist2, before.dist2);
                        let step = (0..2)
                            .map(|a| (before.r[a] - before.oldr[a]).abs())
                            .fold(0., f64::max);
                        assert_eq!(p.tr, step * config.reject_shrink);
                        assert!(p.tr < before.tr);
                        if p.flags.converged {
                            assert!(before.dist2p < before.dist2 * config.newton_tolerance);
                        } else {
                            rebound = Some(p.tr);
                        }
                    }
                    if p.flags.converged {
                        break;
                    }
                }
            }
        }
        assert!(rejections > 0);

        Ok(())
    }

    #[test]
    fn point_outside_curved_hexahedron_face() -> Result<()> {
        // Spherical shell sector, radius in [1, 2], both angles in [-0.6, 0.6]
        let mesh = Mesh::from_fn([8, 8, 8], 1, |_, [r, s, t]| {
            let rho = 1.5 + 0.5 * r;
            let (theta, phi) = (0.6 * s, 0.6 * t);
            [
                rho * phi.cos() * theta.cos(),
                rho * phi.cos() * theta.sin(),
                rho * phi.sin(),
            ]
        })?;
        let basis = GllBasis::new([8]);
        let config = FindPtsConfig::default();
        let solver = ElementSolver::new(mesh.element(0), &basis, &config);

        let (rho, theta, phi) = (2.3f64, 0.1f64, 0.2f64);
        let x = [
            rho * phi.cos() * theta.cos(),
            rho * phi.cos() * theta.sin(),
            rho * phi.sin(),
        ];
        let p = solver.locate(x);

        assert!(p.flags.converged);
        assert_eq!(
            p.flags.current,
            [Constraint::Upper, Constraint::Free, Constraint::Free]
        );
        assert_eq!(p.r[0], 1.);
        assert!((p.r[1] - 1. / 6.).abs() < 1e-6);
        assert!((p.r[2] - 1. / 3.).abs() < 1e-6);
        assert!((p.dist2 - 0.09).abs() < 1e-6);

        Ok(())
    }

    #[test]
    fn batch_with_every_constraint_count() -> Result<()> {
        let mesh = Mesh::grid([-1.; 3], [1.; 3], [1; 3], [3; 3])?;
        let basis = GllBasis::new([3]);
        let config = FindPtsConfig::default();
        let solver = ElementSolver::new(mesh.element(0), &basis, &config);
        let points = [
            [0.2, 0.3, -0.1],
            [1.5, 0.2, 0.1],
            [2., 2., 0.25],
            [3., 3., 3.],
        ];

        let mut states: Vec<_> = points.iter().map(|&x| solver.seed(x)).collect();
        solver.solve(&mut states);

        for (pinned, (p, &x)) in states.iter().zip(&points).enumerate() {
            assert_eq!(*p, solver.locate(x));
            assert!(p.flags.converged);
            assert_eq!(p.flags.constrained_count(), pinned);
        }

        Ok(())
    }
}
