//! Point location and interpolation in high-order spectral element meshes.
//!
//! Given a mesh of curved quadrilaterals or hexahedra, each described by its nodal coordinates
//! on a Gauss-Lobatto-Legendre grid, this crate finds for any physical point the element
//! containing it and the reference coordinates of the point within that element. Points
//! outside the mesh get the closest boundary point of a nearby element.
//!
//! The search has two phases:
//! - a broad phase with a uniform spatial hash over per-element bounding boxes,
//! - a narrow phase running a constrained trust-region Newton iteration in each candidate
//!   element.
//!
//! ```
//! use findpts::{Code, FindPoints, FindPtsConfig, Mesh, PointLocator};
//!
//! let mesh = Mesh::grid([0., 0.], [2., 1.], [2, 1], [4, 4]).unwrap();
//! let findpts = FindPoints::new(mesh, FindPtsConfig::default()).unwrap();
//!
//! let location = findpts.locate_one(&[1.5, 0.5]);
//! assert_eq!(location.code, Code::Internal);
//! assert_eq!(location.element, Some(1));
//! ```

mod basis;
mod bounding_box;
mod bounds;
mod config;
mod field;
mod findpts;
mod hash;
mod linalg;
mod mesh;
mod point_locator;
mod solver;
mod tensor;

pub use basis::{gll_nodes, BasisProvider, GllBasis};
pub use bounding_box::{bounding_boxes, BoundingBox};
pub use bounds::{BoundsProvider, LegendreBounds};
pub use config::FindPtsConfig;
pub use field::FieldEvaluator;
pub use findpts::{Code, FindPoints, Location};
pub use hash::SpatialHash;
pub use mesh::{Element, Elements, Mesh};
pub use point_locator::PointLocator;
pub use solver::{Constraint, ElementSolver, SolverState, StepFlags};
