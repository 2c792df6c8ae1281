use crate::basis::BasisProvider;

/// Value, gradient and (optionally) Hessian of a nodal tensor polynomial at one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Jet<const D: usize> {
    pub(crate) value: f64,
    pub(crate) grad: [f64; D],
    pub(crate) hess: [[f64; D]; D],
}

impl<const D: usize> Default for Jet<D> {
    fn default() -> Self {
        Self {
            value: 0.,
            grad: [0.; D],
            hess: [[0.; D]; D],
        }
    }
}

/// Per-axis basis weights at one reference point, reused across evaluations.
///
/// Holds derivatives up to `order` (0, 1 or 2) so that several nodal fields of the same element
/// can be contracted against the same weights.
#[derive(Debug, Clone)]
pub(crate) struct TensorWeights<const D: usize> {
    n: [usize; D],
    order: usize,
    w: [Vec<f64>; D],
}

impl<const D: usize> TensorWeights<D> {
    pub(crate) fn new(n: [usize; D]) -> Self {
        Self {
            n,
            order: 0,
            w: std::array::from_fn(|a| vec![0.; 3 * n[a]]),
        }
    }

    /// Evaluates the weights at `r` with derivatives up to `order`.
    pub(crate) fn set<B: BasisProvider + ?Sized>(&mut self, basis: &B, order: usize, r: &[f64; D]) {
        debug_assert!(order <= 2);
        self.order = order;
        for (a, w) in self.w.iter_mut().enumerate() {
            basis.weights(self.n[a], order, r[a], w);
        }
    }

    /// Order-0 weight of node `i` along axis `a`.
    fn w0(&self, a: usize, i: usize) -> f64 {
        self.w[a][i]
    }

    fn wk(&self, a: usize, k: usize, i: usize) -> f64 {
        self.w[a][k * self.n[a] + i]
    }

    /// Interpolates `values` at the current point.
    pub(crate) fn value(&self, values: &[f64]) -> f64 {
        let mut idx = [0usize; D];
        let mut sum = 0.;
        for &v in values {
            let prod: f64 = (0..D).map(|a| self.w0(a, idx[a])).product();
            sum += v * prod;
            advance(&mut idx, &self.n);
        }
        sum
    }

    /// Interpolates `values` and its derivatives at the current point, up to the order the
    /// weights were set with.
    pub(crate) fn jet(&self, values: &[f64]) -> Jet<D> {
        let mut jet = Jet::default();
        let mut idx = [0usize; D];
        for &v in values {
            let w0: [f64; D] = std::array::from_fn(|a| self.w0(a, idx[a]));
            jet.value += v * w0.iter().product::<f64>();
            if self.order >= 1 {
                let w1: [f64; D] = std::array::from_fn(|a| self.wk(a, 1, idx[a]));
                for a in 0..D {
                    let others: f64 = (0..D).filter(|&b| b != a).map(|b| w0[b]).product();
                    jet.grad[a] += v * w1[a] * others;
                    if self.order >= 2 {
                        jet.hess[a][a] += v * self.wk(a, 2, idx[a]) * others;
                        for b in a + 1..D {
                            let rest: f64 = (0..D)
                                .filter(|&c| c != a && c != b)
                                .map(|c| w0[c])
                                .product();
                            jet.hess[a][b] += v * w1[a] * w1[b] * rest;
                        }
                    }
                }
            }
            advance(&mut idx, &self.n);
        }
        for a in 0..D {
            for b in 0..a {
                jet.hess[a][b] = jet.hess[b][a];
            }
        }
        jet
    }
}

/// Steps a multi-index to the next node, axis 0 running fastest.
fn advance<const D: usize>(idx: &mut [usize; D], n: &[usize; D]) {
    for a in 0..D {
        idx[a] += 1;
        if idx[a] < n[a] {
            return;
        }
        idx[a] = 0;
    }
}
