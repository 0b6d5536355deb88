//! Triangulated meshes that [`MeshVariable`][crate::MeshVariable]s live on.
//!
//! Lazy functions only ever talk to a mesh through the [`Mesh`] trait:
//! native point coordinates, interpolation at arbitrary locations,
//! nodal derivatives and named point labels.
//! [`TriMesh`] is the implementation provided by this crate,
//! generic over the [`Geometry`] of the surface it covers.

/// Low-level mesh construction and corresponding tests.
mod mesh_construction;
#[cfg(test)]
pub(crate) use mesh_construction::{tiny_mesh_2d, unit_square};

pub mod geometry;
#[doc(inline)]
pub use geometry::{Geometry, Plane, Sphere};

mod persist;
mod refine;
mod spatial_index;
use spatial_index::SpatialIndex;

//

use fixedbitset as fb;
use nalgebra as na;
use nalgebra_sparse as nas;

use std::{
    cell::{OnceCell, RefCell},
    collections::{HashMap, HashSet},
    marker::PhantomData,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    config::{Extrapolation, MeshConfig},
    Vec2, Vec3,
};

/// Name of the label holding the mesh boundary points.
pub const BOUNDARY_LABEL: &str = "boundary";
/// Name of the label holding the points of the unrefined ancestor mesh.
pub const COARSE_LABEL: &str = "coarse";

/// Largest neighbour ring a gradient stencil is widened to
/// before the node is given up on.
const MAX_STENCIL_RINGS: usize = 4;

/// Error in building, querying or persisting a mesh.
#[derive(thiserror::Error, Debug)]
pub enum MeshError {
    /// A mesh needs at least one point and one triangle.
    #[error("Mesh has no points or no triangles")]
    Empty,
    /// A structured grid needs at least two points along each axis.
    #[error("Invalid grid resolution {nx} x {ny}, need at least 2 x 2")]
    InvalidResolution {
        /// Requested points along the first axis.
        nx: usize,
        /// Requested points along the second axis.
        ny: usize,
    },
    /// A triangle or label referred to a point that doesn't exist.
    #[error("Point index {index} out of bounds for a mesh with {len} points")]
    InvalidIndex {
        /// The offending index.
        index: usize,
        /// Number of points in the mesh.
        len: usize,
    },
    /// An array of nodal values didn't have one value per mesh point.
    #[error("Expected {expected} nodal values, got {found}")]
    ShapeMismatch {
        /// Number of points in the mesh.
        expected: usize,
        /// Length of the given array.
        found: usize,
    },
    /// A persisted mesh was written for a different geometry.
    #[error("Persisted mesh has geometry `{found}`, expected `{expected}`")]
    GeometryMismatch {
        /// Geometry of the mesh type being loaded.
        expected: &'static str,
        /// Geometry recorded in the file.
        found: String,
    },
    /// Reading or writing a mesh file failed.
    #[error("Mesh file I/O failed")]
    Io(#[from] std::io::Error),
    /// Encoding or decoding a persisted mesh failed.
    #[error("Mesh encoding failed")]
    Encoding(#[from] bincode::Error),
}

/// Process-unique identity of a mesh.
///
/// Used to decide whether an evaluation target
/// is the mesh a variable's data lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(u64);

impl MeshId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// One of the two tangential directions of a mesh.
///
/// On the plane these are `x` and `y`;
/// on the sphere they are east (longitude) and north (latitude).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    /// The first native coordinate.
    X,
    /// The second native coordinate.
    Y,
}

impl Axis {
    /// Both axes in order.
    pub const ALL: [Axis; 2] = [Axis::X, Axis::Y];

    /// Index of the axis in coordinate vectors.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
        }
    }

    /// The other axis.
    #[inline]
    pub fn other(self) -> Self {
        match self {
            Axis::X => Axis::Y,
            Axis::Y => Axis::X,
        }
    }
}

impl TryFrom<usize> for Axis {
    type Error = usize;

    fn try_from(dir: usize) -> Result<Self, Self::Error> {
        match dir {
            0 => Ok(Axis::X),
            1 => Ok(Axis::Y),
            other => Err(other),
        }
    }
}

/// The interface lazy functions consume from a mesh.
pub trait Mesh: std::fmt::Debug {
    /// Identity of this mesh.
    fn id(&self) -> MeshId;
    /// Number of points in the mesh.
    fn point_count(&self) -> usize;
    /// Native coordinates of every point.
    fn coords(&self) -> &[Vec2];
    /// Names of the two native axes.
    fn axis_names(&self) -> [&'static str; 2];
    /// Points on the boundary of the mesh.
    fn boundary(&self) -> &fb::FixedBitSet;
    /// The mesh point closest to `point` and its distance.
    fn nearest(&self, point: &Vec2) -> Option<(usize, f64)>;
    /// Interpolate nodal values at arbitrary points,
    /// also marking the points that fell outside the mesh.
    ///
    /// Those points are extrapolated,
    /// which is less accurate than interpolation.
    fn interpolate_flagged(
        &self,
        values: &na::DVector<f64>,
        points: &[Vec2],
    ) -> Result<(na::DVector<f64>, fb::FixedBitSet), MeshError>;
    /// Interpolate nodal values at arbitrary points,
    /// extrapolating the ones outside the mesh.
    fn interpolate(
        &self,
        values: &na::DVector<f64>,
        points: &[Vec2],
    ) -> Result<na::DVector<f64>, MeshError> {
        self.interpolate_flagged(values, points)
            .map(|(interpolated, _)| interpolated)
    }
    /// Nodal values of the partial derivative of `values` along `axis`.
    fn derivative(
        &self,
        values: &na::DVector<f64>,
        axis: Axis,
    ) -> Result<na::DVector<f64>, MeshError>;
    /// Store a named set of point indices, replacing any previous set with the name.
    fn set_label(&self, name: &str, indices: &[usize]) -> Result<(), MeshError>;
    /// Look up a named set of point indices in ascending order.
    fn get_label(&self, name: &str) -> Option<Vec<usize>>;
    /// Names of all labels on the mesh.
    fn label_names(&self) -> Vec<String>;
}

/// A triangulated mesh on a surface described by `G`.
///
/// Points and triangles are fixed after construction;
/// only the named labels can change.
/// Share the mesh between variables by wrapping it in an `Rc`
/// (see [`into_shared`][Self::into_shared]).
#[derive(Debug)]
pub struct TriMesh<G> {
    id: MeshId,
    config: MeshConfig,
    /// native coordinates as given at construction
    native: Vec<Vec2>,
    /// the same points embedded in 3D space
    points: Vec<Vec3>,
    triangles: Vec<[usize; 3]>,
    /// vertices sharing an edge with each vertex, sorted
    neighbours: Vec<Vec<usize>>,
    /// triangles touching each vertex
    vertex_triangles: Vec<Vec<usize>>,
    boundary: fb::FixedBitSet,
    labels: RefCell<HashMap<String, fb::FixedBitSet>>,
    /// derivative operators aren't always needed
    /// and take a fair bit of memory,
    /// so they're computed lazily on first access
    derivative_ops: OnceCell<[nas::CsrMatrix<f64>; 2]>,
    /// R-trees for point lookups, likewise built on first use
    spatial_index: OnceCell<SpatialIndex>,
    _geometry: PhantomData<G>,
}

/// A mesh on the Euclidean plane.
pub type PlanarMesh = TriMesh<Plane>;
/// A mesh on the unit sphere.
pub type SphericalMesh = TriMesh<Sphere>;

impl<G: Geometry> Clone for TriMesh<G> {
    /// Clones get a fresh identity,
    /// so variables on the original don't consider the clone their own mesh.
    fn clone(&self) -> Self {
        Self {
            id: MeshId::next(),
            config: self.config.clone(),
            native: self.native.clone(),
            points: self.points.clone(),
            triangles: self.triangles.clone(),
            neighbours: self.neighbours.clone(),
            vertex_triangles: self.vertex_triangles.clone(),
            boundary: self.boundary.clone(),
            labels: self.labels.clone(),
            derivative_ops: self.derivative_ops.clone(),
            spatial_index: self.spatial_index.clone(),
            _geometry: PhantomData,
        }
    }
}

impl<G: Geometry> TriMesh<G> {
    /// Construct a mesh from native point coordinates and triangles.
    ///
    /// The boundary is inferred from the triangulation:
    /// points on edges that belong to only one triangle.
    pub fn new(coords: Vec<Vec2>, triangles: Vec<[usize; 3]>) -> Result<Self, MeshError> {
        mesh_construction::build_mesh(coords, triangles, MeshConfig::default())
    }

    /// Replace the configuration of this mesh.
    pub fn with_config(mut self, config: MeshConfig) -> Self {
        if config.gradient_rings != self.config.gradient_rings {
            self.derivative_ops = OnceCell::new();
        }
        if config.tolerance != self.config.tolerance {
            self.spatial_index = OnceCell::new();
        }
        self.config = config;
        self
    }

    /// Mark the boundary points explicitly
    /// instead of using the ones inferred from the triangulation.
    pub fn with_boundary(mut self, boundary: fb::FixedBitSet) -> Result<Self, MeshError> {
        if let Some(index) = boundary.ones().find(|&i| i >= self.points.len()) {
            return Err(MeshError::InvalidIndex {
                index,
                len: self.points.len(),
            });
        }
        let mut boundary = boundary;
        boundary.grow(self.points.len());
        self.labels
            .get_mut()
            .insert(BOUNDARY_LABEL.to_string(), boundary.clone());
        self.boundary = boundary;
        Ok(self)
    }

    /// Wrap the mesh in an `Rc` for sharing between variables and functions.
    #[inline]
    pub fn into_shared(self) -> Rc<Self> {
        Rc::new(self)
    }

    /// The configuration this mesh was built with.
    #[inline]
    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// The points embedded in 3D space.
    #[inline]
    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    /// The triangles as triples of point indices.
    #[inline]
    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    /// Indices of the points sharing an edge with point `idx`.
    #[inline]
    pub fn neighbours(&self, idx: usize) -> &[usize] {
        &self.neighbours[idx]
    }

    /// Find the triangle containing `point`
    /// along with the barycentric weights of the point in it.
    pub fn locate(&self, point: &Vec2) -> Option<(usize, Vec3)> {
        let p = G::embed(point);
        let tol = self.config.tolerance;
        self.spatial_index().find_triangle(&p, |tri_idx| {
            let w = self.weights(tri_idx, &p)?;
            (w.min() >= -tol).then_some((tri_idx, w))
        })
    }

    fn spatial_index(&self) -> &SpatialIndex {
        self.spatial_index.get_or_init(|| {
            let start = std::time::Instant::now();
            let index =
                SpatialIndex::build::<G>(&self.points, &self.triangles, self.config.tolerance);
            self.log_timing("spatial index", start);
            index
        })
    }

    #[inline]
    fn weights(&self, tri_idx: usize, p: &Vec3) -> Option<Vec3> {
        let [a, b, c] = self.triangles[tri_idx];
        G::barycentric([&self.points[a], &self.points[b], &self.points[c]], p)
    }

    fn nearest_embedded(&self, p: &Vec3) -> Option<(usize, f64)> {
        let nearest = self.spatial_index().nearest(p)?;
        Some((nearest, G::distance(p, &self.points[nearest])))
    }

    /// Extrapolate to a point outside every triangle.
    fn extrapolate(&self, values: &na::DVector<f64>, p: &Vec3) -> f64 {
        let Some((nearest, _)) = self.nearest_embedded(p) else {
            return f64::NAN;
        };
        if self.config.extrapolation == Extrapolation::Nearest {
            return values[nearest];
        }
        // linear extrapolation from the triangle next to the nearest vertex
        // that the point is least far outside of
        let best = self.vertex_triangles[nearest]
            .iter()
            .filter_map(|&t| Some((t, self.weights(t, p)?)))
            .max_by(|(_, a), (_, b)| a.min().total_cmp(&b.min()));
        match best {
            Some((tri_idx, w)) => self.weighted_value(values, tri_idx, &w),
            None => values[nearest],
        }
    }

    #[inline]
    fn weighted_value(&self, values: &na::DVector<f64>, tri_idx: usize, w: &Vec3) -> f64 {
        let [a, b, c] = self.triangles[tri_idx];
        w.x * values[a] + w.y * values[b] + w.z * values[c]
    }

    /// Indices of all points within `rings` edges of point `idx`, excluding itself.
    fn stencil(&self, idx: usize, rings: usize) -> Vec<usize> {
        let mut visited: HashSet<usize> = HashSet::from([idx]);
        let mut frontier = vec![idx];
        let mut stencil = Vec::new();
        for _ in 0..rings {
            let mut next = Vec::new();
            for &v in &frontier {
                for &n in &self.neighbours[v] {
                    if visited.insert(n) {
                        next.push(n);
                        stencil.push(n);
                    }
                }
            }
            frontier = next;
        }
        stencil
    }

    /// Least-squares derivative weights of point `idx` against each stencil point.
    ///
    /// Returns `None` if the stencil doesn't span both tangential directions.
    fn stencil_weights(&self, idx: usize, stencil: &[usize]) -> Option<Vec<Vec2>> {
        let p = &self.points[idx];
        let [t0, t1] = G::tangent_frame(p);
        let offsets: Vec<(Vec2, f64)> = stencil
            .iter()
            .map(|&j| {
                let d = self.points[j] - p;
                let dt = Vec2::new(t0.dot(&d), t1.dot(&d));
                let dist_sq = dt.norm_squared();
                let w = if dist_sq > 1e-24 { 1.0 / dist_sq } else { 0.0 };
                (dt, w)
            })
            .collect();

        let normal: na::Matrix2<f64> = offsets
            .iter()
            .map(|(dt, w)| *w * dt * dt.transpose())
            .sum();
        // relative determinant check to stay scale-invariant
        let trace = normal.trace();
        if trace <= 0.0 || normal.determinant() <= 1e-12 * trace * trace {
            return None;
        }
        let inv = normal.try_inverse()?;
        Some(offsets.iter().map(|(dt, w)| inv * (*w * dt)).collect())
    }

    fn build_derivative_ops(&self) -> [nas::CsrMatrix<f64>; 2] {
        let start = std::time::Instant::now();
        let n = self.points.len();
        let mut ops = [nas::CooMatrix::new(n, n), nas::CooMatrix::new(n, n)];
        let mut degenerate = 0;

        for idx in 0..n {
            let mut rings = self.config.gradient_rings.max(1);
            let mut prev_len = 0;
            loop {
                let stencil = self.stencil(idx, rings);
                if let Some(weights) = self.stencil_weights(idx, &stencil) {
                    for (axis, op) in ops.iter_mut().enumerate() {
                        let mut diag = 0.0;
                        for (&j, w) in stencil.iter().zip(&weights) {
                            op.push(idx, j, w[axis]);
                            diag -= w[axis];
                        }
                        op.push(idx, idx, diag);
                    }
                    break;
                }
                // widen the stencil until it spans the tangent plane,
                // giving up if it stops growing
                if rings >= MAX_STENCIL_RINGS || stencil.len() == prev_len {
                    degenerate += 1;
                    break;
                }
                prev_len = stencil.len();
                rings += 1;
            }
        }

        if degenerate > 0 {
            log::warn!(
                "{degenerate} of {n} points have a degenerate gradient stencil; \
                their derivatives are zero"
            );
        }
        self.log_timing("derivative operators", start);
        ops.map(|coo| nas::CsrMatrix::from(&coo))
    }

    pub(crate) fn log_timing(&self, what: &str, start: std::time::Instant) {
        let level = if self.config.verbose {
            log::Level::Info
        } else {
            log::Level::Debug
        };
        log::log!(
            level,
            "{} mesh {:?}: built {what} for {} points in {:?}",
            G::NAME,
            self.id,
            self.points.len(),
            start.elapsed()
        );
    }
}

impl<G: Geometry> Mesh for TriMesh<G> {
    #[inline]
    fn id(&self) -> MeshId {
        self.id
    }

    #[inline]
    fn point_count(&self) -> usize {
        self.points.len()
    }

    #[inline]
    fn coords(&self) -> &[Vec2] {
        &self.native
    }

    #[inline]
    fn axis_names(&self) -> [&'static str; 2] {
        G::AXIS_NAMES
    }

    #[inline]
    fn boundary(&self) -> &fb::FixedBitSet {
        &self.boundary
    }

    fn nearest(&self, point: &Vec2) -> Option<(usize, f64)> {
        self.nearest_embedded(&G::embed(point))
    }

    fn interpolate_flagged(
        &self,
        values: &na::DVector<f64>,
        points: &[Vec2],
    ) -> Result<(na::DVector<f64>, fb::FixedBitSet), MeshError> {
        if values.len() != self.points.len() {
            return Err(MeshError::ShapeMismatch {
                expected: self.points.len(),
                found: values.len(),
            });
        }

        let mut extrapolated = fb::FixedBitSet::with_capacity(points.len());
        let result = na::DVector::from_iterator(
            points.len(),
            points
                .iter()
                .enumerate()
                .map(|(i, point)| match self.locate(point) {
                    Some((tri_idx, w)) => self.weighted_value(values, tri_idx, &w),
                    None => {
                        extrapolated.insert(i);
                        self.extrapolate(values, &G::embed(point))
                    }
                }),
        );
        let count = extrapolated.count_ones(..);
        if count > 0 {
            log::debug!(
                "extrapolated {count} of {} points outside mesh {:?}",
                points.len(),
                self.id
            );
        }
        Ok((result, extrapolated))
    }

    fn derivative(
        &self,
        values: &na::DVector<f64>,
        axis: Axis,
    ) -> Result<na::DVector<f64>, MeshError> {
        if values.len() != self.points.len() {
            return Err(MeshError::ShapeMismatch {
                expected: self.points.len(),
                found: values.len(),
            });
        }
        let ops = self
            .derivative_ops
            .get_or_init(|| self.build_derivative_ops());
        Ok(&ops[axis.index()] * values)
    }

    fn set_label(&self, name: &str, indices: &[usize]) -> Result<(), MeshError> {
        let len = self.points.len();
        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return Err(MeshError::InvalidIndex { index, len });
        }
        let mut bits = fb::FixedBitSet::with_capacity(len);
        bits.extend(indices.iter().copied());
        self.labels.borrow_mut().insert(name.to_string(), bits);
        Ok(())
    }

    fn get_label(&self, name: &str) -> Option<Vec<usize>> {
        self.labels
            .borrow()
            .get(name)
            .map(|bits| bits.ones().collect())
    }

    fn label_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.labels.borrow().keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

//
// tests
//
