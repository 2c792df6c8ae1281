use crate::bounding_box::BoundingBox;

/// A uniform grid over the union of the element bounding boxes.
///
/// The grid has the same number of cells `n` along every axis. Each cell stores the list of
/// elements whose axis-aligned box overlaps it, in a compressed layout: the elements of cell `c`
/// are `elements[offsets[c]..offsets[c + 1]]`.
///
/// The resolution is chosen as the largest `n` for which the whole table (the offsets plus one
/// entry per overlapped cell per element) fits in the requested maximum size.
#[derive(Debug, Clone)]
pub struct SpatialHash<const D: usize> {
    min: [f64; D],
    max: [f64; D],
    // n / (max - min), per axis
    fac: [f64; D],
    n: usize,
    offsets: Vec<usize>,
    elements: Vec<usize>,
    max_count: usize,
}

impl<const D: usize> SpatialHash<D> {
    /// Builds the hash table of a set of bounding boxes.
    ///
    /// `max_size` bounds `n^D + 1 + Σ cells(e)`. If even a single cell does not fit, a single cell
    /// is used anyway.
    pub fn build(boxes: &[BoundingBox<D>], max_size: usize) -> Self {
        let mut min = [f64::INFINITY; D];
        let mut max = [f64::NEG_INFINITY; D];
        for bbox in boxes {
            for c in 0..D {
                min[c] = min[c].min(bbox.min[c]);
                max[c] = max[c].max(bbox.max[c]);
            }
        }
        if boxes.is_empty() {
            min = [0.; D];
            max = [1.; D];
        }
        for c in 0..D {
            if !(max[c] > min[c]) {
                // Flat union: widen it so that cells have a non-zero size
                let pad = if min[c] == 0. { 1. } else { min[c].abs() * 1e-8 };
                min[c] -= pad;
                max[c] += pad;
            }
        }

        let mut hash = Self {
            min,
            max,
            fac: [0.; D],
            n: 1,
            offsets: Vec::new(),
            elements: Vec::new(),
            max_count: 0,
        };

        // Binary search for the largest feasible resolution: `lo` always fits, `hi` never does.
        let nel = boxes.len();
        let mut lo = 1;
        let mut hi = max_size
            .saturating_sub(nel)
            .max(1)
            .checked_add(1)
            .map(|room| (room as f64).powf(1. / D as f64).ceil() as usize + 1)
            .unwrap_or(usize::MAX);
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            hash.set_resolution(mid);
            if hash.table_size(boxes, max_size).is_some() {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        hash.set_resolution(lo);
        if hash.table_size(boxes, max_size).is_none() {
            log::warn!(
                "Hash table size {} is too small for {} elements, using a single cell.",
                max_size,
                nel
            );
        }
        hash.fill(boxes);

        log::debug!(
            "Spatial hash: {} cells per axis, {} entries for {} elements, at most {} per cell.",
            hash.n,
            hash.elements.len(),
            nel,
            hash.max_count
        );

        hash
    }

    fn set_resolution(&mut self, n: usize) {
        self.n = n;
        for c in 0..D {
            self.fac[c] = n as f64 / (self.max[c] - self.min[c]);
        }
    }

    /// Digitizes one coordinate, clamping to the grid.
    fn index_1d(&self, c: usize, x: f64) -> usize {
        let i = ((x - self.min[c]) * self.fac[c]).floor();
        if i < 0. {
            0
        } else if i >= (self.n - 1) as f64 {
            self.n - 1
        } else {
            // NaN also ends up here and maps to cell 0
            i as usize
        }
    }

    /// The range of cells `[lo, hi)` along each axis covered by a box.
    fn cell_range(&self, bbox: &BoundingBox<D>) -> [(usize, usize); D] {
        std::array::from_fn(|c| {
            (
                self.index_1d(c, bbox.min[c]),
                self.index_1d(c, bbox.max[c]) + 1,
            )
        })
    }

    /// Total table size at the current resolution, or [`None`] once it exceeds `max_size`.
    fn table_size(&self, boxes: &[BoundingBox<D>], max_size: usize) -> Option<usize> {
        let mut size = self.n.checked_pow(D as u32)?.checked_add(1)?;
        if size > max_size {
            return None;
        }
        for bbox in boxes {
            let cells: usize = self
                .cell_range(bbox)
                .iter()
                .map(|(lo, hi)| hi - lo)
                .product();
            size += cells;
            if size > max_size {
                return None;
            }
        }
        Some(size)
    }

    /// Counting sort of the elements into the cells they overlap.
    fn fill(&mut self, boxes: &[BoundingBox<D>]) {
        let cell_count = self.n.pow(D as u32);
        let ranges: Vec<_> = boxes.iter().map(|bbox| self.cell_range(bbox)).collect();

        // First pass: count
        let mut offsets = vec![0usize; cell_count + 1];
        for range in &ranges {
            for cell in self.cells_in(range) {
                offsets[cell + 1] += 1;
            }
        }
        self.max_count = offsets.iter().copied().max().unwrap_or(0);
        for i in 0..cell_count {
            offsets[i + 1] += offsets[i];
        }

        // Second pass: fill, using a write cursor per cell
        let mut cursor = offsets.clone();
        let mut elements = vec![0usize; offsets[cell_count]];
        for (e, range) in ranges.iter().enumerate() {
            for cell in self.cells_in(range) {
                elements[cursor[cell]] = e;
                cursor[cell] += 1;
            }
        }

        self.offsets = offsets;
        self.elements = elements;
    }

    /// Flat indices of the cells in a multi-dimensional range, axis 0 running fastest.
    fn cells_in(&self, range: &[(usize, usize); D]) -> impl Iterator<Item = usize> {
        let n = self.n;
        let range = *range;
        let count: usize = range.iter().map(|(lo, hi)| hi - lo).product();
        (0..count).map(move |mut k| {
            let mut cell = 0;
            let mut stride = 1;
            for &(lo, hi) in range.iter() {
                let len = hi - lo;
                cell += (lo + k % len) * stride;
                k /= len;
                stride *= n;
            }
            cell
        })
    }

    /// Returns the flat index of the cell containing `x`, clamped to the grid.
    pub fn cell(&self, x: &[f64; D]) -> usize {
        (0..D)
            .rev()
            .fold(0, |cell, c| cell * self.n + self.index_1d(c, x[c]))
    }

    /// Returns the candidate elements for a point.
    ///
    /// This is a superset of the elements whose bounding box contains `x`. Points outside the
    /// hashed region get the candidates of the nearest boundary cell.
    pub fn query(&self, x: &[f64; D]) -> &[usize] {
        let cell = self.cell(x);
        &self.elements[self.offsets[cell]..self.offsets[cell + 1]]
    }

    /// The number of cells along each axis.
    pub fn resolution(&self) -> usize {
        self.n
    }

    /// The largest number of elements in any cell.
    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// The total size of the table (offsets and element lists).
    pub fn table_size_used(&self) -> usize {
        self.offsets.len() + self.elements.len()
    }
}
