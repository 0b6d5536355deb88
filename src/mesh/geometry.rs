//! The surfaces a [`TriMesh`][crate::mesh::TriMesh] can live on.
//!
//! Every mesh stores its points embedded in 3D space
//! together with their native 2D coordinates.
//! The geometry decides how the two relate,
//! what the tangential axes are at each point,
//! and how points are located inside triangles.

use nalgebra as na;

use crate::{Vec2, Vec3};

/// Trait allowing meshes to be generic over the surface they discretize.
/// Not intended to be implemented by users.
pub trait Geometry: Clone + Copy + std::fmt::Debug + 'static {
    /// Name stored in persisted meshes to check that a file matches the geometry.
    const NAME: &'static str;
    /// Names of the two native coordinate axes, used in descriptions.
    const AXIS_NAMES: [&'static str; 2];

    /// Map native coordinates to the embedding space.
    fn embed(native: &Vec2) -> Vec3;
    /// Map an embedded point back to native coordinates.
    fn native(point: &Vec3) -> Vec2;
    /// Unit tangent vectors along the two axes at a point.
    fn tangent_frame(point: &Vec3) -> [Vec3; 2];
    /// Barycentric weights of `point` relative to a triangle.
    ///
    /// The weights sum to one; negative weights mean the point is outside.
    /// Returns `None` for degenerate triangles
    /// or triangles the point cannot be projected onto.
    fn barycentric(tri: [&Vec3; 3], point: &Vec3) -> Option<Vec3>;
    /// The point halfway along the edge between `a` and `b`.
    fn midpoint(a: &Vec3, b: &Vec3) -> Vec3;
    /// Distance between two points along the surface.
    fn distance(a: &Vec3, b: &Vec3) -> f64;
    /// How far the surface patch covered by a triangle
    /// can bulge out of the flat triangle spanned by its vertices.
    fn envelope_padding(tri: [&Vec3; 3]) -> f64;
}

/// The Euclidean plane, with native coordinates `(x, y)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Plane;

impl Geometry for Plane {
    const NAME: &'static str = "plane";
    const AXIS_NAMES: [&'static str; 2] = ["X", "Y"];

    #[inline]
    fn embed(native: &Vec2) -> Vec3 {
        Vec3::new(native.x, native.y, 0.0)
    }

    #[inline]
    fn native(point: &Vec3) -> Vec2 {
        Vec2::new(point.x, point.y)
    }

    #[inline]
    fn tangent_frame(_point: &Vec3) -> [Vec3; 2] {
        [Vec3::x(), Vec3::y()]
    }

    fn barycentric(tri: [&Vec3; 3], point: &Vec3) -> Option<Vec3> {
        let e1 = Self::native(tri[1]) - Self::native(tri[0]);
        let e2 = Self::native(tri[2]) - Self::native(tri[0]);
        let rhs = Self::native(point) - Self::native(tri[0]);
        let mat = na::Matrix2::from_columns(&[e1, e2]);
        let l = mat.try_inverse()? * rhs;
        Some(Vec3::new(1.0 - l.x - l.y, l.x, l.y))
    }

    #[inline]
    fn midpoint(a: &Vec3, b: &Vec3) -> Vec3 {
        0.5 * (a + b)
    }

    #[inline]
    fn distance(a: &Vec3, b: &Vec3) -> f64 {
        (a - b).norm()
    }

    #[inline]
    fn envelope_padding(_tri: [&Vec3; 3]) -> f64 {
        0.0
    }
}

/// The unit sphere, with native coordinates `(lon, lat)` in radians.
///
/// Tangential axes point east and north.
/// Distances and derivatives are per unit arc length;
/// scale by the radius for a sphere of another size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sphere;

impl Geometry for Sphere {
    const NAME: &'static str = "sphere";
    const AXIS_NAMES: [&'static str; 2] = ["lon", "lat"];

    fn embed(native: &Vec2) -> Vec3 {
        let (lon, lat) = (native.x, native.y);
        Vec3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
    }

    fn native(point: &Vec3) -> Vec2 {
        let p = point.normalize();
        Vec2::new(p.y.atan2(p.x), p.z.clamp(-1.0, 1.0).asin())
    }

    fn tangent_frame(point: &Vec3) -> [Vec3; 2] {
        let ll = Self::native(point);
        let (lon, lat) = (ll.x, ll.y);
        let east = Vec3::new(-lon.sin(), lon.cos(), 0.0);
        let north = Vec3::new(-lat.sin() * lon.cos(), -lat.sin() * lon.sin(), lat.cos());
        [east, north]
    }

    fn barycentric(tri: [&Vec3; 3], point: &Vec3) -> Option<Vec3> {
        // gnomonic projection: find where the ray through `point`
        // crosses the flat triangle spanned by the vertices
        let mat = na::Matrix3::from_columns(&[*tri[0], *tri[1], *tri[2]]);
        let weights = mat.try_inverse()? * point;
        let total = weights.sum();
        if total <= 0.0 {
            // the ray hits the triangle's plane behind the origin,
            // i.e. the point is on the opposite hemisphere
            return None;
        }
        Some(weights / total)
    }

    #[inline]
    fn midpoint(a: &Vec3, b: &Vec3) -> Vec3 {
        (a + b).normalize()
    }

    #[inline]
    fn distance(a: &Vec3, b: &Vec3) -> f64 {
        a.cross(b).norm().atan2(a.dot(b))
    }

    fn envelope_padding(tri: [&Vec3; 3]) -> f64 {
        // every point of the spherical triangle is a point of the flat one
        // pushed outwards, at most from the plane's distance to the origin
        let normal = (tri[1] - tri[0]).cross(&(tri[2] - tri[0]));
        let norm = normal.norm();
        if norm <= 0.0 {
            return 1.0;
        }
        (1.0 - (normal / norm).dot(tri[0]).abs()).max(0.0)
    }
}

//
// tests
//
