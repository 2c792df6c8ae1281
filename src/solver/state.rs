/// How one reference coordinate is constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Constraint {
    /// The coordinate moves freely inside `(-1, 1)`.
    #[default]
    Free,
    /// The coordinate is pinned to `-1`.
    Lower,
    /// The coordinate is pinned to `1`.
    Upper,
}

impl Constraint {
    /// The pinned value, if any.
    pub fn value(self) -> Option<f64> {
        match self {
            Self::Free => None,
            Self::Lower => Some(-1.),
            Self::Upper => Some(1.),
        }
    }

    /// The constraint implied by a coordinate sitting exactly on a bound.
    pub fn from_coordinate(r: f64) -> Self {
        if r == -1. {
            Self::Lower
        } else if r == 1. {
            Self::Upper
        } else {
            Self::Free
        }
    }

    pub fn is_free(self) -> bool {
        matches!(self, Self::Free)
    }

    /// Returns `true` if moving along `grad` from the pinned bound goes back into the interior.
    pub(crate) fn released_by(self, grad: f64) -> bool {
        match self {
            Self::Free => false,
            Self::Lower => grad > 0.,
            Self::Upper => grad < 0.,
        }
    }
}

/// The constraint pattern of a point, with the pattern of its previous accepted position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepFlags<const D: usize> {
    /// Constraints at the current position.
    pub current: [Constraint; D],
    /// Constraints at the position before the last step, restored if that step is rejected.
    pub previous: [Constraint; D],
    /// Set once the iteration has converged.
    pub converged: bool,
}

impl<const D: usize> StepFlags<D> {
    /// Flags for a fresh point at reference coordinates `r`.
    pub fn at(r: &[f64; D]) -> Self {
        let current: [Constraint; D] = std::array::from_fn(|a| Constraint::from_coordinate(r[a]));
        Self {
            current,
            previous: current,
            converged: false,
        }
    }

    /// The number of pinned coordinates.
    pub fn constrained_count(&self) -> usize {
        self.current.iter().filter(|c| !c.is_free()).count()
    }

    /// Returns `true` if the point converged without any pinned coordinate.
    pub fn is_interior(&self) -> bool {
        self.converged && self.constrained_count() == 0
    }
}

/// Newton iteration state of one point against one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverState<const D: usize> {
    /// Target physical position.
    pub x: [f64; D],
    /// Current reference coordinates, always in `[-1, 1]^D`.
    pub r: [f64; D],
    /// Reference coordinates before the last step.
    pub oldr: [f64; D],
    /// Squared distance between `x` and the image of `r`.
    pub dist2: f64,
    /// Predicted decrease of `dist2` for the last step.
    pub dist2p: f64,
    /// Trust region radius.
    pub tr: f64,
    pub flags: StepFlags<D>,
}

impl<const D: usize> SolverState<D> {
    /// A fresh state targeting `x`, starting from `r` with trust radius `tr`.
    pub fn new(x: [f64; D], r: [f64; D], tr: f64) -> Self {
        Self {
            x,
            r,
            oldr: r,
            dist2: f64::MAX,
            dist2p: 0.,
            tr,
            flags: StepFlags::at(&r),
        }
    }

    /// Marks free coordinates that landed exactly on a bound as pinned.
    pub(crate) fn sync_constraints(&mut self) {
        for (c, &r) in self.flags.current.iter_mut().zip(&self.r) {
            if c.is_free() {
                *c = Constraint::from_coordinate(r);
            }
        }
    }
}
