//! R-tree lookups of mesh points and triangles.
//!
//! Both trees work in the embedding space,
//! where planar meshes have `z = 0`
//! and the chord distance between points on the sphere
//! orders them the same way as the arc distance.

use rstar::{primitives::GeomWithData, PointDistance, RTree, RTreeObject, AABB};

use super::Geometry;
use crate::Vec3;

type IndexedPoint = GeomWithData<[f64; 3], usize>;

/// Bounding box of one triangle,
/// grown to cover the patch of surface the triangle stands for.
#[derive(Clone, Debug)]
struct TriangleEnvelope {
    tri_idx: usize,
    min: [f64; 3],
    max: [f64; 3],
}

impl RTreeObject for TriangleEnvelope {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

impl PointDistance for TriangleEnvelope {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        (0..3)
            .map(|k| {
                let d = (self.min[k] - point[k]).max(point[k] - self.max[k]).max(0.0);
                d * d
            })
            .sum()
    }

    fn contains_point(&self, point: &[f64; 3]) -> bool {
        (0..3).all(|k| self.min[k] <= point[k] && point[k] <= self.max[k])
    }
}

#[derive(Clone)]
pub(super) struct SpatialIndex {
    points: RTree<IndexedPoint>,
    triangles: RTree<TriangleEnvelope>,
}

impl std::fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("points", &self.points.size())
            .field("triangles", &self.triangles.size())
            .finish()
    }
}

#[inline]
fn key(p: &Vec3) -> [f64; 3] {
    [p.x, p.y, p.z]
}

impl SpatialIndex {
    /// Bulk load both trees.
    ///
    /// `tol` pads every triangle envelope
    /// so points right on an edge are still found.
    pub fn build<G: Geometry>(points: &[Vec3], triangles: &[[usize; 3]], tol: f64) -> Self {
        let indexed: Vec<IndexedPoint> = points
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new(key(p), i))
            .collect();

        let envelopes: Vec<TriangleEnvelope> = triangles
            .iter()
            .enumerate()
            .map(|(tri_idx, &[a, b, c])| {
                let corners = [&points[a], &points[b], &points[c]];
                let pad = G::envelope_padding(corners) + tol;
                let mut min = [f64::MAX; 3];
                let mut max = [f64::MIN; 3];
                for p in corners {
                    for k in 0..3 {
                        min[k] = min[k].min(p[k] - pad);
                        max[k] = max[k].max(p[k] + pad);
                    }
                }
                TriangleEnvelope { tri_idx, min, max }
            })
            .collect();

        Self {
            points: RTree::bulk_load(indexed),
            triangles: RTree::bulk_load(envelopes),
        }
    }

    /// Index of the point closest to `p`.
    pub fn nearest(&self, p: &Vec3) -> Option<usize> {
        self.points.nearest_neighbor(&key(p)).map(|n| n.data)
    }

    /// Run `test` on the triangles whose envelope contains `p`
    /// until it returns something.
    pub fn find_triangle<R>(
        &self,
        p: &Vec3,
        mut test: impl FnMut(usize) -> Option<R>,
    ) -> Option<R> {
        self.triangles
            .locate_all_at_point(&key(p))
            .find_map(|t| test(t.tri_idx))
    }
}
