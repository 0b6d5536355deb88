//! Lazily evaluated functions over scalar fields on triangulated meshes.
//!
//! Models of surface processes are written as compositions of
//! [`MeshVariable`]s (one value per mesh point) and [`Parameter`]s (mutable scalars).
//! Arithmetic on these builds an [`Expr`] tree instead of computing anything;
//! [`evaluate`][Expr::evaluate] walks the tree against the current state of its leaves,
//! either at every point of a mesh or at arbitrary coordinates.
//! Spatial derivatives are computed numerically on the mesh with
//! [`fn_gradient`][Expr::fn_gradient] and compose like any other expression.
//!
//! Meshes are planar or spherical triangulations ([`PlanarMesh`], [`SphericalMesh`]),
//! built from a structured grid, an icosahedron, raw triangles or a Gmsh file,
//! refined and persisted with the tools in [`mesh`].

#![warn(missing_docs)]

pub mod config;

pub mod mesh;
#[doc(inline)]
pub use mesh::{
    Axis, Geometry, Mesh, MeshError, MeshId, PlanarMesh, Plane, Sphere, SphericalMesh, TriMesh,
};

pub mod variable;
#[doc(inline)]
pub use variable::MeshVariable;

pub mod function;
#[doc(inline)]
pub use function::{Expr, FnError, Parameter, Target};

pub mod parallel;

pub mod gmsh;

// nalgebra re-exports of common types for convenience

pub use nalgebra as na;
/// Type alias for a 2D `nalgebra` vector.
pub type Vec2 = na::Vector2<f64>;
/// Type alias for a 3D `nalgebra` vector.
pub type Vec3 = na::Vector3<f64>;
