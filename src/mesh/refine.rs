//! Refinement of meshes by edge midpoint insertion.

use std::collections::HashMap;

use super::{mesh_construction::build_mesh, Geometry, MeshError, TriMesh, BOUNDARY_LABEL};
use crate::Vec3;

impl<G: Geometry> TriMesh<G> {
    /// Refine the mesh `levels` times.
    ///
    /// Each level inserts the midpoint of every edge
    /// and splits every triangle into four.
    /// New points are appended after the existing ones,
    /// so point indices of the parent mesh stay valid in the refined mesh:
    /// labels (including `coarse`, the points of the unrefined ancestor)
    /// carry over unchanged, while the boundary is recomputed
    /// and merged with the parent's boundary points.
    ///
    /// The refined mesh is a new mesh with its own identity.
    pub fn refine(&self, levels: usize) -> Result<Self, MeshError> {
        let mut mesh = self.clone();
        for _ in 0..levels {
            mesh = mesh.refine_once()?;
        }
        Ok(mesh)
    }

    fn refine_once(&self) -> Result<Self, MeshError> {
        let start = std::time::Instant::now();
        let parent_len = self.points.len();

        let mut new_points: Vec<Vec3> = Vec::new();
        let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
        let mut midpoint = |a: usize, b: usize| -> usize {
            *midpoints.entry((a.min(b), a.max(b))).or_insert_with(|| {
                new_points.push(G::midpoint(&self.points[a], &self.points[b]));
                parent_len + new_points.len() - 1
            })
        };

        let mut triangles = Vec::with_capacity(4 * self.triangles.len());
        for &[a, b, c] in &self.triangles {
            let ab = midpoint(a, b);
            let bc = midpoint(b, c);
            let ca = midpoint(c, a);
            triangles.extend([[a, ab, ca], [ab, b, bc], [ca, bc, c], [ab, bc, ca]]);
        }

        let mut native = self.native.clone();
        native.extend(new_points.iter().map(G::native));
        let len = native.len();

        let mut mesh: Self = build_mesh(native, triangles, self.config.clone())?;

        // boundary points of the parent remain boundary points
        let mut boundary = self.boundary.clone();
        boundary.grow(len);
        mesh.boundary.union_with(&boundary);

        let labels = mesh.labels.get_mut();
        for (name, bits) in self.labels.borrow().iter() {
            let mut bits = bits.clone();
            bits.grow(len);
            labels.insert(name.clone(), bits);
        }
        labels.insert(BOUNDARY_LABEL.to_string(), mesh.boundary.clone());

        log::debug!(
            "refined {} mesh from {parent_len} to {len} points in {:?}",
            G::NAME,
            start.elapsed()
        );
        Ok(mesh)
    }
}

//
// tests
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mesh::{tiny_mesh_2d, COARSE_LABEL},
        Mesh, SphericalMesh,
    };
    use approx::assert_relative_eq;

    #[test]
    fn refinement_preserves_coarse_points() {
        let mesh0 = tiny_mesh_2d();
        let mesh1 = mesh0.refine(1).unwrap();
        let mesh2 = mesh0.refine(2).unwrap();

        // 7 vertices + 12 edges, then 19 vertices + 42 edges
        assert_eq!(mesh1.point_count(), 19);
        assert_eq!(mesh1.triangles().len(), 24);
        assert_eq!(mesh2.point_count(), 61);
        assert_eq!(mesh2.triangles().len(), 96);

        let coarse0 = mesh0.get_label(COARSE_LABEL).unwrap();
        assert_eq!(mesh1.get_label(COARSE_LABEL).unwrap(), coarse0);
        assert_eq!(mesh2.get_label(COARSE_LABEL).unwrap(), coarse0);
        assert_eq!(&mesh2.coords()[..7], mesh0.coords());
    }

    #[test]
    fn refinement_recomputes_boundary() {
        let mesh = tiny_mesh_2d().refine(1).unwrap();
        // 6 outer vertices + 6 outer edge midpoints
        assert_eq!(mesh.boundary().count_ones(..), 12);
        assert_eq!(
            mesh.get_label(BOUNDARY_LABEL).unwrap(),
            mesh.boundary().ones().collect::<Vec<_>>()
        );
        assert!(!mesh.boundary().contains(3));
    }

    #[test]
    fn custom_labels_carry_over() {
        let mesh = tiny_mesh_2d();
        mesh.set_label("outlet", &[5, 6]).unwrap();
        let refined = mesh.refine(1).unwrap();
        assert_eq!(refined.get_label("outlet"), Some(vec![5, 6]));
        assert_ne!(refined.id(), mesh.id());
    }

    #[test]
    fn spherical_refinement_stays_on_sphere() {
        let mesh = SphericalMesh::icosahedral(2).unwrap();
        assert_eq!(mesh.point_count(), 162);
        assert_eq!(mesh.triangles().len(), 320);
        for p in mesh.points() {
            assert_relative_eq!(p.norm(), 1.0, epsilon = 1e-12);
        }
        assert_eq!(mesh.get_label(COARSE_LABEL).unwrap(), (0..12).collect::<Vec<_>>());
    }
}
