use anyhow::{ensure, Result};

/// Tunables of the point locator.
///
/// The trust region constants are empirical and work well across a wide range of meshes; most
/// users only ever touch the tolerances and the hash table size.
///
/// ### Default Values
/// - `max_hash_size`: `None` (the total number of mesh nodes)
/// - `box_tolerance`: `0.01`
/// - `newton_tolerance`: `1e-12`
/// - `max_iterations`: `50`
/// - `reject_threshold`: `0.01`
/// - `very_good_threshold`: `0.9`
/// - `trust_growth`: `2.0`
/// - `reject_shrink`: `0.25`
/// - `initial_trust_radius`: `1.0`
/// - `bound_oversample`: `16`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FindPtsConfig {
    /// Upper bound on the size of the spatial hash table (offsets plus element lists).
    pub max_hash_size: Option<usize>,

    /// Relative enlargement of the element bounding boxes.
    pub box_tolerance: f64,

    /// Newton iterations stop once a step is smaller than this (1-norm in reference space).
    pub newton_tolerance: f64,

    /// Maximum number of Newton iterations per point and element.
    pub max_iterations: usize,

    /// A step achieving less than this fraction of its predicted decrease is rejected.
    pub reject_threshold: f64,

    /// A step achieving at least this fraction of its predicted decrease grows the trust region.
    pub very_good_threshold: f64,

    /// Trust region growth factor after a very good step.
    pub trust_growth: f64,

    /// After a rejected step, the trust radius becomes this fraction of the step length.
    pub reject_shrink: f64,

    /// Trust radius of a fresh point.
    pub initial_trust_radius: f64,

    /// Sampling intervals per axis used by the default polynomial bounds.
    pub bound_oversample: usize,
}

impl Default for FindPtsConfig {
    fn default() -> Self {
        Self {
            max_hash_size: None,
            box_tolerance: 0.01,
            newton_tolerance: 1e-12,
            max_iterations: 50,
            reject_threshold: 0.01,
            very_good_threshold: 0.9,
            trust_growth: 2.,
            reject_shrink: 0.25,
            initial_trust_radius: 1.,
            bound_oversample: 16,
        }
    }
}

impl FindPtsConfig {
    pub fn with_max_hash_size(mut self, size: usize) -> Self {
        self.max_hash_size = Some(size);
        self
    }

    pub fn with_box_tolerance(mut self, tol: f64) -> Self {
        self.box_tolerance = tol;
        self
    }

    pub fn with_newton_tolerance(mut self, tol: f64) -> Self {
        self.newton_tolerance = tol;
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_bound_oversample(mut self, oversample: usize) -> Self {
        self.bound_oversample = oversample;
        self
    }

    /// The hash table size to use for a mesh with the given numbers of elements and nodes.
    pub(crate) fn hash_size(&self, element_count: usize, node_count: usize) -> usize {
        self.max_hash_size
            .unwrap_or(node_count)
            .max(element_count + 2)
    }

    /// Checks that all values are usable.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.box_tolerance >= 0. && self.box_tolerance.is_finite(),
            "The box tolerance should be non-negative, got {}.",
            self.box_tolerance
        );
        ensure!(
            self.newton_tolerance > 0. && self.newton_tolerance.is_finite(),
            "The Newton tolerance should be positive, got {}.",
            self.newton_tolerance
        );
        ensure!(self.max_iterations > 0, "At least one iteration is needed.");
        ensure!(
            0. <= self.reject_threshold && self.reject_threshold <= self.very_good_threshold,
            "Expected 0 <= reject threshold <= very good threshold, got {} and {}.",
            self.reject_threshold,
            self.very_good_threshold
        );
        ensure!(
            self.trust_growth >= 1.,
            "The trust region growth factor should be at least 1, got {}.",
            self.trust_growth
        );
        ensure!(
            0. < self.reject_shrink && self.reject_shrink < 1.,
            "The rejection shrink factor should be in (0, 1), got {}.",
            self.reject_shrink
        );
        ensure!(
            self.initial_trust_radius > 0.,
            "The initial trust radius should be positive, got {}.",
            self.initial_trust_radius
        );
        ensure!(
            self.bound_oversample > 0,
            "The bound oversampling should be positive."
        );
        Ok(())
    }
}
