//! Single trust-region steps for one point.
//!
//! Which routine runs depends on how many reference coordinates are pinned to the element
//! boundary once the constraints that should be released have been released:
//!
//! - none: [`volume_step`], a Gauss-Newton step that cascades onto faces, edges and vertices
//!   as it hits the bounds;
//! - some: [`constrained_step`], a full Newton step (with second derivatives) on the free
//!   coordinates, minimizing the quadratic model over the box of admissible steps;
//! - all: [`vertex_step`], nothing left to move.

use smallvec::SmallVec;

use super::state::{Constraint, SolverState};
use crate::linalg::{cholesky_solve, mat_t_vec, mat_vec, norm2, solve};

type Axes = SmallVec<[usize; 3]>;

/// Admissible reference coordinates for one step: `[-1, 1]` intersected with the trust region.
#[derive(Debug, Clone, Copy)]
struct StepBounds<const D: usize> {
    lo: [f64; D],
    hi: [f64; D],
    // Whether each bound is the element boundary rather than the trust region
    lo_wall: [bool; D],
    hi_wall: [bool; D],
}

impl<const D: usize> StepBounds<D> {
    fn new(r: &[f64; D], tr: f64) -> Self {
        let mut bounds = Self {
            lo: [-1.; D],
            hi: [1.; D],
            lo_wall: [true; D],
            hi_wall: [true; D],
        };
        for a in 0..D {
            if r[a] - tr > -1. {
                bounds.lo[a] = r[a] - tr;
                bounds.lo_wall[a] = false;
            }
            if r[a] + tr < 1. {
                bounds.hi[a] = r[a] + tr;
                bounds.hi_wall[a] = false;
            }
        }
        bounds
    }

    fn bound(&self, a: usize, side: Constraint) -> f64 {
        match side {
            Constraint::Lower => self.lo[a],
            Constraint::Upper => self.hi[a],
            Constraint::Free => unreachable!("A free coordinate has no bound."),
        }
    }

    /// The constraint left on axis `a` after stopping on `side`: trust region bounds do not pin.
    fn pin(&self, a: usize, side: Constraint) -> Constraint {
        match side {
            Constraint::Lower if self.lo_wall[a] => Constraint::Lower,
            Constraint::Upper if self.hi_wall[a] => Constraint::Upper,
            _ => Constraint::Free,
        }
    }
}

/// Stores the outcome of a step.
fn finish<const D: usize>(
    p: &mut SolverState<D>,
    r: [f64; D],
    current: [Constraint; D],
    step: f64,
    dist2p: f64,
    tol: f64,
) {
    p.r = r;
    p.flags.current = current;
    p.flags.converged = step < tol;
    p.dist2p = dist2p;
    p.sync_constraints();
}

/// Unconstrained step from an interior point.
///
/// The Gauss-Newton step `J dr = resid` is scaled back to the first bound it crosses. That
/// coordinate is then pinned and the remaining ones take a Gauss-Newton step of their own from
/// there, until either a step fits or every coordinate is pinned. Once, a pinned coordinate
/// whose multiplier points back inside is released and the cascade resumed.
pub(crate) fn volume_step<const D: usize>(
    p: &mut SolverState<D>,
    jac: &[[f64; D]; D],
    resid: &[f64; D],
    tol: f64,
) {
    let bounds = StepBounds::new(&p.r, p.tr);
    let r0 = p.r;
    let mut dr = [0.; D];
    let mut res = *resid;
    let mut hit = [Constraint::Free; D];
    let mut relaxed = false;

    loop {
        let free: Axes = (0..D).filter(|&a| hit[a].is_free()).collect();
        if !free.is_empty() {
            let delta = gauss_newton(jac, &res, &free);

            // Smallest fraction of the step reaching a bound
            let mut fac = 1.;
            let mut first = None;
            for &a in &free {
                let nr = r0[a] + dr[a] + delta[a];
                let side = if nr < bounds.lo[a] {
                    Constraint::Lower
                } else if nr > bounds.hi[a] {
                    Constraint::Upper
                } else {
                    continue;
                };
                let f = (bounds.bound(a, side) - r0[a] - dr[a]) / delta[a];
                if f < fac {
                    fac = f;
                    first = Some((a, side));
                }
            }
            let fac: f64 = fac.max(0.);
            for &a in &free {
                dr[a] += fac * delta[a];
            }
            if let Some((a, side)) = first {
                hit[a] = side;
                dr[a] = bounds.bound(a, side) - r0[a];
            }
            let jdr = mat_vec(jac, &dr);
            res = std::array::from_fn(|c| resid[c] - jdr[c]);
            if first.is_some() {
                continue;
            }
        }

        if !relaxed {
            let grad = mat_t_vec(jac, &res);
            if let Some(a) = (0..D).find(|&a| hit[a].released_by(grad[a])) {
                hit[a] = Constraint::Free;
                relaxed = true;
                continue;
            }
        }
        break;
    }

    let mut current = [Constraint::Free; D];
    let mut r = [0.; D];
    for a in 0..D {
        current[a] = bounds.pin(a, hit[a]);
        r[a] = match current[a].value() {
            Some(v) => v,
            None => (r0[a] + dr[a]).clamp(-1., 1.),
        };
    }
    let step = dr.iter().map(|d| d.abs()).sum();
    let dist2p = norm2(resid) - norm2(&res);
    finish(p, r, current, step, dist2p, tol);
}

/// Gauss-Newton step on the `free` coordinates, zero on the others.
///
/// Falls back to the Cauchy point along the steepest descent direction when the restricted
/// Jacobian is rank deficient.
fn gauss_newton<const D: usize>(jac: &[[f64; D]; D], res: &[f64; D], free: &[usize]) -> [f64; D] {
    let mut delta = [0.; D];
    if free.len() == D {
        if let Some(d) = solve(*jac, *res) {
            return d;
        }
    } else {
        let k = free.len();
        let mut a = [[0.; 3]; 3];
        let mut b = [0.; 3];
        for (i, &fi) in free.iter().enumerate() {
            b[i] = (0..D).map(|c| jac[c][fi] * res[c]).sum();
            for (j, &fj) in free.iter().enumerate() {
                a[i][j] = (0..D).map(|c| jac[c][fi] * jac[c][fj]).sum();
            }
        }
        if let Some(x) = cholesky_solve(k, &a, &b) {
            for (i, &fi) in free.iter().enumerate() {
                delta[fi] = x[i];
            }
            return delta;
        }
    }

    let grad = mat_t_vec(jac, res);
    for &a in free {
        delta[a] = grad[a];
    }
    let jg = mat_vec(jac, &delta);
    let (gg, jgjg) = (norm2(&delta), norm2(&jg));
    let t = if jgjg > 0. && jgjg.is_finite() {
        gg / jgjg
    } else {
        0.
    };
    delta.map(|d| t * d)
}

/// Newton step on the free coordinates of a point sitting on a face or an edge.
///
/// The model is `m(d) = -yᵀd + dᵀAd / 2` with `y = Jᵀ resid` and
/// `A = JᵀJ - Σ_c resid_c ∇²x_c`, all restricted to the free coordinates. It is minimized over
/// the box of admissible steps by checking the unconstrained minimizer of the box interior and
/// of every face, edge and corner of the box.
pub(crate) fn constrained_step<const D: usize>(
    p: &mut SolverState<D>,
    current: [Constraint; D],
    jac: &[[f64; D]; D],
    hess: &[[[f64; D]; D]; D],
    resid: &[f64; D],
    tol: f64,
) {
    let free: Axes = (0..D).filter(|&a| current[a].is_free()).collect();
    let k = free.len();
    debug_assert!(k > 0 && k < D);
    let bounds = StepBounds::new(&p.r, p.tr);

    let mut a = [[0.; 3]; 3];
    let mut y = [0.; 3];
    let mut lo = [0.; 3];
    let mut hi = [0.; 3];
    for (i, &fi) in free.iter().enumerate() {
        y[i] = (0..D).map(|c| jac[c][fi] * resid[c]).sum();
        for (j, &fj) in free.iter().enumerate() {
            a[i][j] = (0..D)
                .map(|c| jac[c][fi] * jac[c][fj] - resid[c] * hess[c][fi][fj])
                .sum();
        }
        lo[i] = bounds.lo[fi] - p.r[fi];
        hi[i] = bounds.hi[fi] - p.r[fi];
    }
    let model = |d: &[f64; 3]| -> f64 {
        (0..k)
            .map(|i| {
                let ad: f64 = (0..k).map(|j| a[i][j] * d[j]).sum();
                -y[i] * d[i] + 0.5 * d[i] * ad
            })
            .sum()
    };

    // Each free coordinate is either left free or put on its lower or upper bound
    let mut best: Option<(f64, [f64; 3], [Constraint; 3])> = None;
    for combo in 0..3usize.pow(k as u32) {
        let mut sides = [Constraint::Free; 3];
        let mut d = [0.; 3];
        let mut code = combo;
        for i in 0..k {
            sides[i] = match code % 3 {
                0 => Constraint::Free,
                1 => Constraint::Lower,
                _ => Constraint::Upper,
            };
            code /= 3;
            d[i] = match sides[i] {
                Constraint::Free => 0.,
                Constraint::Lower => lo[i],
                Constraint::Upper => hi[i],
            };
        }
        let sub: Axes = (0..k).filter(|&i| sides[i].is_free()).collect();
        if !sub.is_empty() {
            let mut aa = [[0.; 3]; 3];
            let mut bb = [0.; 3];
            for (u, &i) in sub.iter().enumerate() {
                bb[u] = y[i]
                    - (0..k)
                        .filter(|j| !sub.contains(j))
                        .map(|j| a[i][j] * d[j])
                        .sum::<f64>();
                for (v, &j) in sub.iter().enumerate() {
                    aa[u][v] = a[i][j];
                }
            }
            let Some(x) = cholesky_solve(sub.len(), &aa, &bb) else {
                continue;
            };
            if sub
                .iter()
                .enumerate()
                .any(|(u, &i)| x[u] < lo[i] || x[u] > hi[i])
            {
                continue;
            }
            for (u, &i) in sub.iter().enumerate() {
                d[i] = x[u];
            }
        }
        let v = model(&d);
        if best.map_or(true, |(bv, ..)| v < bv || bv.is_nan()) {
            best = Some((v, d, sides));
        }
    }
    let (v, d, sides) = best.unwrap_or((0., [0.; 3], [Constraint::Free; 3]));

    let mut new = current;
    let mut r = p.r;
    let mut step = 0.;
    for (i, &fi) in free.iter().enumerate() {
        new[fi] = bounds.pin(fi, sides[i]);
        r[fi] = match new[fi].value() {
            Some(val) => val,
            None => (p.r[fi] + d[i]).clamp(-1., 1.),
        };
        step += d[i].abs();
    }
    finish(p, r, new, step, -2. * v, tol);
}

/// A point pinned along every axis with nothing to release stays where it is.
pub(crate) fn vertex_step<const D: usize>(p: &mut SolverState<D>, current: [Constraint; D]) {
    p.flags.current = current;
    p.flags.converged = true;
    p.dist2p = 0.;
}
