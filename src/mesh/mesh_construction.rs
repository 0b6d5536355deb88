use fixedbitset as fb;
use itertools::Itertools;

use std::{
    cell::{OnceCell, RefCell},
    collections::HashMap,
    marker::PhantomData,
};

use super::{
    Geometry, MeshError, MeshId, PlanarMesh, SphericalMesh, TriMesh, BOUNDARY_LABEL, COARSE_LABEL,
};
use crate::{config::MeshConfig, Sphere, Vec2, Vec3};

/// Construct a mesh from native coordinates and triangles,
/// inferring neighbours and the boundary from the triangulation.
pub(super) fn build_mesh<G: Geometry>(
    native: Vec<Vec2>,
    triangles: Vec<[usize; 3]>,
    config: MeshConfig,
) -> Result<TriMesh<G>, MeshError> {
    let start = std::time::Instant::now();
    let len = native.len();
    if len == 0 || triangles.is_empty() {
        return Err(MeshError::Empty);
    }
    if let Some(&index) = triangles.iter().flatten().find(|&&i| i >= len) {
        return Err(MeshError::InvalidIndex { index, len });
    }

    let points: Vec<Vec3> = native.iter().map(G::embed).collect();

    //
    // adjacency
    //

    let mut neighbours: Vec<Vec<usize>> = vec![Vec::new(); len];
    let mut vertex_triangles: Vec<Vec<usize>> = vec![Vec::new(); len];
    // every edge once per triangle it belongs to,
    // with the smaller vertex index first
    let mut edges: Vec<(usize, usize)> = Vec::with_capacity(3 * triangles.len());
    for (tri_idx, tri) in triangles.iter().enumerate() {
        for (k, &v) in tri.iter().enumerate() {
            let w = tri[(k + 1) % 3];
            neighbours[v].push(w);
            neighbours[w].push(v);
            vertex_triangles[v].push(tri_idx);
            edges.push((v.min(w), v.max(w)));
        }
    }
    for n in &mut neighbours {
        n.sort_unstable();
        n.dedup();
    }

    //
    // boundary
    //

    // an edge that belongs to only one triangle is on the boundary of the mesh
    let mut boundary = fb::FixedBitSet::with_capacity(len);
    for (count, (a, b)) in edges.into_iter().sorted_unstable().dedup_with_count() {
        if count == 1 {
            boundary.insert(a);
            boundary.insert(b);
        }
    }

    let mut coarse = fb::FixedBitSet::with_capacity(len);
    coarse.insert_range(..);
    let labels = HashMap::from([
        (BOUNDARY_LABEL.to_string(), boundary.clone()),
        (COARSE_LABEL.to_string(), coarse),
    ]);

    let mesh = TriMesh {
        id: MeshId::next(),
        config,
        native,
        points,
        triangles,
        neighbours,
        vertex_triangles,
        boundary,
        labels: RefCell::new(labels),
        derivative_ops: OnceCell::new(),
        spatial_index: OnceCell::new(),
        _geometry: PhantomData,
    };
    mesh.log_timing("topology", start);
    Ok(mesh)
}

impl PlanarMesh {
    /// Construct a structured rectangular grid
    /// with `nx` by `ny` points between the corners `min` and `max`.
    ///
    /// Each grid cell is split into two triangles along the same diagonal,
    /// so every interior point has a point-symmetric neighbourhood.
    pub fn structured(min: Vec2, max: Vec2, nx: usize, ny: usize) -> Result<Self, MeshError> {
        if nx < 2 || ny < 2 {
            return Err(MeshError::InvalidResolution { nx, ny });
        }
        let step = (max - min).component_div(&Vec2::new((nx - 1) as f64, (ny - 1) as f64));

        let coords: Vec<Vec2> = (0..ny)
            .cartesian_product(0..nx)
            .map(|(j, i)| min + Vec2::new(i as f64 * step.x, j as f64 * step.y))
            .collect();

        let idx = |i: usize, j: usize| j * nx + i;
        let triangles: Vec<[usize; 3]> = (0..ny - 1)
            .cartesian_product(0..nx - 1)
            .flat_map(|(j, i)| {
                [
                    [idx(i, j), idx(i + 1, j), idx(i + 1, j + 1)],
                    [idx(i, j), idx(i + 1, j + 1), idx(i, j + 1)],
                ]
            })
            .collect();

        Self::new(coords, triangles)
    }
}

impl SphericalMesh {
    /// Construct a mesh covering the whole sphere
    /// by refining an icosahedron `refinement_levels` times.
    ///
    /// The twelve icosahedron vertices form the `coarse` label.
    pub fn icosahedral(refinement_levels: usize) -> Result<Self, MeshError> {
        let t = (1.0 + 5f64.sqrt()) / 2.0;
        #[rustfmt::skip]
        let vertices = [
            (-1.0, t, 0.0), (1.0, t, 0.0), (-1.0, -t, 0.0), (1.0, -t, 0.0),
            (0.0, -1.0, t), (0.0, 1.0, t), (0.0, -1.0, -t), (0.0, 1.0, -t),
            (t, 0.0, -1.0), (t, 0.0, 1.0), (-t, 0.0, -1.0), (-t, 0.0, 1.0),
        ];
        #[rustfmt::skip]
        let triangles = vec![
            [0, 11, 5], [0, 5, 1], [0, 1, 7], [0, 7, 10], [0, 10, 11],
            [1, 5, 9], [5, 11, 4], [11, 10, 2], [10, 7, 6], [7, 1, 8],
            [3, 9, 4], [3, 4, 2], [3, 2, 6], [3, 6, 8], [3, 8, 9],
            [4, 9, 5], [2, 4, 11], [6, 2, 10], [8, 6, 7], [9, 8, 1],
        ];
        let coords = vertices
            .iter()
            .map(|&(x, y, z)| Sphere::native(&Vec3::new(x, y, z)))
            .collect();

        Self::new(coords, triangles)?.refine(refinement_levels)
    }
}

/// A small hexagon-shaped 2D mesh for testing basic functionality.
/// Shaped somewhat like this:
///    ____
///   /\  /\
///  /__\/__\
///  \  /\  /
///   \/__\/
///
/// with vertices and triangles ordered left to right, top to bottom.
/// The only interior vertex is 3, at the origin.
#[cfg(test)]
pub(crate) fn tiny_mesh_2d() -> PlanarMesh {
    let vertices = vec![
        Vec2::new(-0.5, 1.0),
        Vec2::new(0.5, 1.0),
        Vec2::new(-1.0, 0.0),
        Vec2::new(0.0, 0.0),
        Vec2::new(1.0, 0.0),
        Vec2::new(-0.5, -1.0),
        Vec2::new(0.5, -1.0),
    ];
    #[rustfmt::skip]
    let triangles = vec![
        [0, 2, 3],
        [0, 1, 3],
        [1, 3, 4],
        [2, 3, 5],
        [3, 5, 6],
        [3, 4, 6],
    ];
    PlanarMesh::new(vertices, triangles).expect("test mesh is valid")
}

/// A structured grid over the unit square with `n` points per side.
#[cfg(test)]
pub(crate) fn unit_square(n: usize) -> PlanarMesh {
    PlanarMesh::structured(Vec2::zeros(), Vec2::new(1.0, 1.0), n, n).expect("test mesh is valid")
}

//
// tests
//
