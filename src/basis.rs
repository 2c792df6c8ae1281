use std::borrow::Cow;

/// Evaluates a one-dimensional nodal polynomial basis.
///
/// Every element of a mesh is the tensor product of such bases, one per reference axis, so this
/// is the only piece of polynomial machinery the point locator needs.
pub trait BasisProvider: Send + Sync {
    /// Returns the `n` reference coordinates of the nodes in increasing order.
    ///
    /// The first node must be `-1` and the last one `1`.
    fn nodes(&self, n: usize) -> Cow<'_, [f64]>;

    /// Evaluates the `n` basis functions and their derivatives up to `order` at `x`.
    ///
    /// `out` must hold at least `(order + 1) * n` values; on return `out[k * n + i]` is the
    /// `k`-th derivative of the `i`-th basis function.
    fn weights(&self, n: usize, order: usize, x: f64, out: &mut [f64]);
}

/// Lagrange interpolation on Gauss-Lobatto-Legendre nodes.
#[derive(Debug, Clone, Default)]
pub struct GllBasis {
    cache: Vec<Lagrange>,
}

/// Nodes and barycentric weights of one Lagrange basis.
#[derive(Debug, Clone)]
struct Lagrange {
    nodes: Vec<f64>,
    // 1 / prod_{j != i} (z_i - z_j)
    scale: Vec<f64>,
}

impl Lagrange {
    fn new(n: usize) -> Self {
        let nodes = gll_nodes(n);
        let scale = (0..n)
            .map(|i| {
                let prod: f64 = (0..n)
                    .filter(|&j| j != i)
                    .map(|j| nodes[i] - nodes[j])
                    .product();
                1. / prod
            })
            .collect();
        Self { nodes, scale }
    }

    fn eval(&self, order: usize, x: f64, out: &mut [f64]) {
        let n = self.nodes.len();
        assert!(order <= 2, "Only derivatives up to order 2 are supported.");
        assert!(
            out.len() >= (order + 1) * n,
            "Output buffer too small for {} weights.",
            (order + 1) * n
        );
        for i in 0..n {
            // Value and derivatives of prod_{j != i} (x - z_j), built one factor at a time.
            let (mut p0, mut p1, mut p2) = (1., 0., 0.);
            for (j, &z) in self.nodes.iter().enumerate() {
                if j == i {
                    continue;
                }
                let d = x - z;
                p2 = p2 * d + 2. * p1;
                p1 = p1 * d + p0;
                p0 *= d;
            }
            let s = self.scale[i];
            out[i] = s * p0;
            if order >= 1 {
                out[n + i] = s * p1;
            }
            if order >= 2 {
                out[2 * n + i] = s * p2;
            }
        }
    }
}

impl GllBasis {
    /// Constructs a basis with precomputed node sets for the given node counts.
    ///
    /// Other node counts still work but have their nodes recomputed on every call.
    pub fn new<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let mut cache: Vec<Lagrange> = Vec::new();
        for n in counts {
            if n >= 2 && !cache.iter().any(|l| l.nodes.len() == n) {
                cache.push(Lagrange::new(n));
            }
        }
        Self { cache }
    }

    fn cached(&self, n: usize) -> Option<&Lagrange> {
        self.cache.iter().find(|l| l.nodes.len() == n)
    }
}

impl BasisProvider for GllBasis {
    fn nodes(&self, n: usize) -> Cow<'_, [f64]> {
        match self.cached(n) {
            Some(lagrange) => Cow::Borrowed(&lagrange.nodes),
            None => Cow::Owned(gll_nodes(n)),
        }
    }

    fn weights(&self, n: usize, order: usize, x: f64, out: &mut [f64]) {
        match self.cached(n) {
            Some(lagrange) => lagrange.eval(order, x, out),
            None => Lagrange::new(n).eval(order, x, out),
        }
    }
}

/// Computes the `n` Gauss-Lobatto-Legendre nodes on `[-1, 1]` in increasing order.
///
/// The nodes are the endpoints together with the roots of `P'_{n-1}`. They are found with a
/// Newton iteration started from the Chebyshev-Gauss-Lobatto nodes, using the three-term
/// Legendre recurrence.
pub fn gll_nodes(n: usize) -> Vec<f64> {
    assert!(n >= 2, "At least two nodes are needed, got {n}.");
    let degree = n - 1;
    let mut x: Vec<f64> = (0..n)
        .map(|i| -(std::f64::consts::PI * i as f64 / degree as f64).cos())
        .collect();
    for _ in 0..100 {
        let mut change: f64 = 0.;
        for xi in x.iter_mut() {
            let (p_prev, p) = legendre_pair(degree, *xi);
            let new = *xi - (*xi * p - p_prev) / (n as f64 * p);
            change = change.max((new - *xi).abs());
            *xi = new;
        }
        if change <= f64::EPSILON {
            break;
        }
    }
    // Pin the endpoints exactly and symmetrize the interior.
    x[0] = -1.;
    x[degree] = 1.;
    for i in 1..n / 2 {
        let v = 0.5 * (x[degree - i] - x[i]);
        x[i] = -v;
        x[degree - i] = v;
    }
    if n % 2 == 1 {
        x[n / 2] = 0.;
    }
    x
}

/// Returns `(P_{k-1}(x), P_k(x))`.
pub(crate) fn legendre_pair(k: usize, x: f64) -> (f64, f64) {
    if k == 0 {
        return (0., 1.);
    }
    let (mut p0, mut p1) = (1., x);
    for j in 2..=k {
        let p2 = ((2 * j - 1) as f64 * x * p1 - (j - 1) as f64 * p0) / j as f64;
        p0 = p1;
        p1 = p2;
    }
    (p0, p1)
}

/// Evaluates the Legendre polynomials `P_0..P_{n-1}` at `x`.
pub(crate) fn legendre_all(n: usize, x: f64, out: &mut [f64]) {
    if n == 0 {
        return;
    }
    out[0] = 1.;
    if n > 1 {
        out[1] = x;
    }
    for j in 2..n {
        out[j] = ((2 * j - 1) as f64 * x * out[j - 1] - (j - 1) as f64 * out[j - 2]) / j as f64;
    }
}

/// Gauss-Lobatto-Legendre quadrature weights for the given nodes.
pub(crate) fn gll_weights(nodes: &[f64]) -> Vec<f64> {
    let n = nodes.len();
    let degree = n - 1;
    nodes
        .iter()
        .map(|&x| {
            let (_, p) = legendre_pair(degree, x);
            2. / ((degree * n) as f64 * p * p)
        })
        .collect()
}
