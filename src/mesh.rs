use anyhow::{anyhow, ensure, Result};

use crate::basis::gll_nodes;

/// A mesh of tensor-product spectral elements in `D` dimensions.
///
/// Every element has the same number of nodes `n[a]` along each reference axis `a`. The nodal
/// coordinates are stored per physical coordinate: `coords[c]` holds the `c`-th coordinate of
/// every node of every element, element after element, and within an element the nodes are
/// numbered with reference axis 0 running fastest.
#[derive(Debug, Clone)]
pub struct Mesh<const D: usize> {
    n: [usize; D],
    coords: [Vec<f64>; D],
    element_count: usize,
}

/// A borrowed view of one element of a [`Mesh`].
#[derive(Debug, Clone, Copy)]
pub struct Element<'a, const D: usize> {
    n: [usize; D],
    coords: [&'a [f64]; D],
}

/// An iterator over the elements of a [`Mesh`].
pub struct Elements<'a, const D: usize> {
    mesh: &'a Mesh<D>,
    idx: usize,
}

impl<'a, const D: usize> Iterator for Elements<'a, D> {
    type Item = Element<'a, D>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.mesh.element_count {
            return None;
        }
        let element = self.mesh.element(self.idx);
        self.idx += 1;
        Some(element)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.mesh.element_count - self.idx;
        (remaining, Some(remaining))
    }
}

impl<'a, const D: usize> ExactSizeIterator for Elements<'a, D> {}

impl<const D: usize> Mesh<D> {
    /// Constructs a new `Mesh` from per-axis node counts and per-coordinate nodal arrays.
    ///
    /// Fails if a node count is smaller than 2, if the arrays do not all have the same length or
    /// if that length is not a non-zero multiple of the number of nodes per element.
    pub fn new(n: [usize; D], coords: [Vec<f64>; D]) -> Result<Self> {
        ensure!(D == 2 || D == 3, "Only 2D and 3D meshes are supported.");
        ensure!(
            n.iter().all(|&na| na >= 2),
            "Elements need at least two nodes per axis, got {:?}.",
            n
        );
        let nodes: usize = n.iter().product();
        let len = coords[0].len();
        ensure!(
            coords.iter().all(|c| c.len() == len),
            "All coordinate arrays should have the same length."
        );
        ensure!(
            len > 0 && len % nodes == 0,
            "The coordinate arrays should hold a non-zero multiple of {} nodes, got {}.",
            nodes,
            len
        );
        Ok(Self {
            n,
            coords,
            element_count: len / nodes,
        })
    }

    /// Constructs a mesh by mapping the Gauss-Lobatto-Legendre nodes of every element.
    ///
    /// `f(e, r)` returns the physical position of the point with reference coordinates `r` in
    /// element `e`.
    pub fn from_fn<F>(n: [usize; D], element_count: usize, f: F) -> Result<Self>
    where
        F: Fn(usize, [f64; D]) -> [f64; D],
    {
        ensure!(element_count > 0, "A mesh needs at least one element.");
        ensure!(
            n.iter().all(|&na| na >= 2),
            "Elements need at least two nodes per axis, got {:?}.",
            n
        );
        let nodes: [Vec<f64>; D] = std::array::from_fn(|a| gll_nodes(n[a]));
        let per_element: usize = n.iter().product();
        let mut coords: [Vec<f64>; D] =
            std::array::from_fn(|_| Vec::with_capacity(per_element * element_count));
        for e in 0..element_count {
            for flat in 0..per_element {
                let idx = multi_index(&n, flat);
                let r = std::array::from_fn(|a| nodes[a][idx[a]]);
                let x = f(e, r);
                for (c, xc) in coords.iter_mut().zip(x) {
                    c.push(xc);
                }
            }
        }
        Self::new(n, coords)
    }

    /// Constructs a structured box mesh of straight-sided elements.
    ///
    /// The box `[lo, hi]` is split into `divisions[a]` elements along each axis, and elements are
    /// numbered with axis 0 running fastest.
    pub fn grid(lo: [f64; D], hi: [f64; D], divisions: [usize; D], n: [usize; D]) -> Result<Self> {
        ensure!(
            divisions.iter().all(|&d| d > 0),
            "There should be at least one element along each axis."
        );
        if let Some(a) = (0..D).find(|&a| lo[a] >= hi[a]) {
            return Err(anyhow!(
                "The box bounds should be increasing, got {} >= {} along axis {}.",
                lo[a],
                hi[a],
                a
            ));
        }
        let element_count = divisions.iter().product();
        Self::from_fn(n, element_count, |e, r| {
            let cell = multi_index(&divisions, e);
            std::array::from_fn(|a| {
                let h = (hi[a] - lo[a]) / divisions[a] as f64;
                lo[a] + h * (cell[a] as f64 + 0.5 * (r[a] + 1.))
            })
        })
    }

    /// Returns the number of nodes per reference axis.
    pub fn nodes_per_axis(&self) -> [usize; D] {
        self.n
    }

    /// Returns the number of nodes of one element.
    pub fn nodes_per_element(&self) -> usize {
        self.n.iter().product()
    }

    /// Returns the number of elements.
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Returns the nodal array of the `c`-th physical coordinate.
    pub fn coords(&self, c: usize) -> &[f64] {
        &self.coords[c]
    }

    /// Returns a view of element `e`.
    ///
    /// # Panics
    ///
    /// Panics if `e` is out of range.
    pub fn element(&self, e: usize) -> Element<'_, D> {
        let nodes = self.nodes_per_element();
        let range = e * nodes..(e + 1) * nodes;
        Element {
            n: self.n,
            coords: std::array::from_fn(|c| &self.coords[c][range.clone()]),
        }
    }

    /// Returns an iterator over the elements.
    pub fn elements(&self) -> Elements<'_, D> {
        Elements { mesh: self, idx: 0 }
    }
}

impl<'a, const D: usize> Element<'a, D> {
    /// Returns the number of nodes per reference axis.
    pub fn nodes_per_axis(&self) -> [usize; D] {
        self.n
    }

    /// Returns the number of nodes.
    pub fn node_count(&self) -> usize {
        self.coords[0].len()
    }

    /// Returns the nodal values of the `c`-th physical coordinate.
    pub fn coords(&self, c: usize) -> &'a [f64] {
        self.coords[c]
    }

    /// Returns the physical position of the node with flat index `idx`.
    pub fn node(&self, idx: usize) -> [f64; D] {
        std::array::from_fn(|c| self.coords[c][idx])
    }

    /// Returns the flat index of the node closest to `x`.
    ///
    /// Ties go to the lowest index.
    pub fn nearest_node(&self, x: &[f64; D]) -> usize {
        let mut best = 0;
        let mut best_dist2 = f64::INFINITY;
        for idx in 0..self.node_count() {
            let dist2: f64 = (0..D)
                .map(|c| {
                    let d = self.coords[c][idx] - x[c];
                    d * d
                })
                .sum();
            if dist2 < best_dist2 {
                best = idx;
                best_dist2 = dist2;
            }
        }
        best
    }

    /// Gathers the nodal values of coordinate `c` on the boundary face where reference axis
    /// `axis` is at its `upper` (`+1`) or lower (`-1`) end.
    ///
    /// The face keeps the remaining axes in their original order, axis 0 running fastest.
    pub(crate) fn face(&self, c: usize, axis: usize, upper: bool) -> (Vec<f64>, Vec<usize>) {
        let fixed = if upper { self.n[axis] - 1 } else { 0 };
        let shape: Vec<usize> = (0..D).filter(|&a| a != axis).map(|a| self.n[a]).collect();
        let values = (0..self.node_count())
            .filter(|&flat| multi_index(&self.n, flat)[axis] == fixed)
            .map(|flat| self.coords[c][flat])
            .collect();
        (values, shape)
    }
}

/// Splits a flat index into a multi-index, axis 0 running fastest.
pub(crate) fn multi_index<const D: usize>(shape: &[usize; D], mut flat: usize) -> [usize; D] {
    let mut idx = [0; D];
    for (i, &n) in idx.iter_mut().zip(shape) {
        *i = flat % n;
        flat /= n;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_mesh_from_arrays() -> Result<()> {
        let x = vec![0., 1., 0., 1.];
        let y = vec![0., 0., 1., 1.];
        let mesh = Mesh::new([2, 2], [x, y])?;

        assert_eq!(mesh.element_count(), 1);
        assert_eq!(mesh.nodes_per_element(), 4);
        assert_eq!(mesh.element(0).node(3), [1., 1.]);

        Ok(())
    }

    #[test]
    fn invalid_meshes_return_errors() {
        // Mismatched lengths
        assert!(Mesh::new([2, 2], [vec![0.; 4], vec![0.; 3]]).is_err());
        // Not a multiple of the element size
        assert!(Mesh::new([2, 2], [vec![0.; 6], vec![0.; 6]]).is_err());
        // Empty
        assert!(Mesh::new([2, 2], [vec![], vec![]]).is_err());
        // Too few nodes
        assert!(Mesh::new([1, 2], [vec![0.; 2], vec![0.; 2]]).is_err());
        // Bad box
        assert!(Mesh::grid([0., 1.], [1., 0.], [1, 1], [3, 3]).is_err());
    }

    #[test]
    fn grid_numbering() -> Result<()> {
        let mesh = Mesh::grid([0., 0.], [2., 3.], [2, 3], [3, 3])?;

        assert_eq!(mesh.element_count(), 6);
        // Element 1 is the second one along x, element 2 starts the second row
        let e1 = mesh.element(1);
        assert_eq!(e1.node(0), [1., 0.]);
        assert_eq!(e1.node(8), [2., 1.]);
        let e2 = mesh.element(2);
        assert_eq!(e2.node(0), [0., 1.]);
        assert_eq!(e2.node(4), [0.5, 1.5]);

        Ok(())
    }

    #[test]
    fn iterate_over_elements() -> Result<()> {
        let mesh = Mesh::grid([0., 0., 0.], [1., 1., 1.], [2, 1, 1], [2, 2, 2])?;

        let mut elements = mesh.elements();

        assert_eq!(elements.len(), 2);
        assert_eq!(elements.next().map(|e| e.node(7)), Some([0.5, 1., 1.]));
        assert_eq!(elements.next().map(|e| e.node(0)), Some([0.5, 0., 0.]));
        assert!(elements.next().is_none());

        Ok(())
    }

    #[test]
    fn nearest_node_in_element() -> Result<()> {
        let mesh = Mesh::grid([0., 0.], [1., 1.], [1, 1], [3, 3])?;
        let element = mesh.element(0);

        assert_eq!(element.nearest_node(&[0.9, 0.1]), 2);
        assert_eq!(element.nearest_node(&[0.45, 0.55]), 4);
        assert_eq!(element.nearest_node(&[-3., 7.]), 6);

        Ok(())
    }

    #[test]
    fn faces_keep_axis_order() -> Result<()> {
        let mesh = Mesh::grid([0., 0., 0.], [1., 1., 1.], [1, 1, 1], [2, 3, 4])?;
        let element = mesh.element(0);

        let (values, shape) = element.face(2, 1, true);
        assert_eq!(shape, vec![2, 4]);
        assert_eq!(values.len(), 8);
        assert_eq!(values[0], 0.);
        assert_eq!(values[7], 1.);

        let (values, shape) = element.face(1, 1, true);
        assert_eq!(shape, vec![2, 4]);
        assert!(values.iter().all(|&y| y == 1.));

        Ok(())
    }

    #[test]
    fn index_round_trip() {
        let shape = [3, 4, 5];
        for flat in 0..60 {
            let [i, j, k] = multi_index(&shape, flat);
            assert_eq!(i + 3 * (j + 4 * k), flat);
        }
        assert_eq!(multi_index(&shape, 13), [1, 0, 1]);
    }
}
