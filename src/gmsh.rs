//! Utilities for loading meshes generated with [`gmsh`](https://www.gmsh.info/).
//!
//! Only version 4.1 of the MSH format is supported,
//! as per the [`mshio`] library.

use std::collections::{BTreeMap, HashSet};

use crate::{mesh::MeshError, Mesh, PlanarMesh, Vec2};

/// Error in loading a mesh from a Gmsh .msh file.
#[derive(thiserror::Error, Debug)]
pub enum GmshError {
    /// Error parsing the .msh file.
    ///
    /// (Implementation note: parser error converted to string
    /// to avoid lifetime issues with the byte slices it contains)
    #[error("Parsing the .msh data failed: {0}")]
    ParseError(String),
    /// The given .msh file contains no nodes.
    #[error("Invalid .msh data: no nodes")]
    MissingNodes,
    /// The given .msh file contains no elements of the supported type.
    #[error("Invalid .msh data: no elements of the correct type")]
    MissingElements,
    /// The nodes and elements don't form a valid mesh.
    #[error(transparent)]
    Mesh(#[from] MeshError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct EntityId {
    dim: i32,
    tag: i32,
}

#[derive(Clone, Debug, Default)]
struct PhysicalGroup {
    entities: HashSet<EntityId>,
    nodes: Vec<usize>,
}

/// Load a planar triangle mesh from a `.msh` file.
///
/// First-order triangle elements in the file are interpreted as the triangles of the mesh.
/// These must be of type `Tri3` (see [`ElementType`][mshio::ElementType]).
/// The `z` coordinate of nodes is dropped to project the mesh to the plane.
///
/// # Physical groups
///
/// Every physical group in the file becomes a label on the mesh
/// named after the group's integer tag,
/// containing the nodes of every entity in the group.
/// (named groups are currently not supported due to limitations of [`mshio`]).
/// Nodes on the boundary of an entity belong to the lower-dimensional boundary entities,
/// so e.g. a group for a boundary curve should also contain the curve's end points.
pub fn load_trimesh_2d(bytes: &[u8]) -> Result<PlanarMesh, GmshError> {
    let msh = mshio::parse_msh_bytes(bytes).map_err(|e| GmshError::ParseError(format!("{}", e)))?;
    let nodes = msh.data.nodes.ok_or(GmshError::MissingNodes)?;
    let elements = msh.data.elements.ok_or(GmshError::MissingElements)?;

    let mut physical_groups = gather_physical_groups(msh.data.entities.as_ref());

    let mut vertices: Vec<Vec2> = Vec::new();
    for block in &nodes.node_blocks {
        let ent_id = EntityId {
            dim: block.entity_dim,
            tag: block.entity_tag,
        };
        let mut phys_groups: Vec<&mut PhysicalGroup> = physical_groups
            .values_mut()
            .filter(|pg| pg.entities.contains(&ent_id))
            .collect();

        for node in &block.nodes {
            let vert_idx = vertices.len();
            vertices.push(Vec2::new(node.x, node.y));
            for g in &mut phys_groups {
                g.nodes.push(vert_idx);
            }
        }
    }

    if vertices.is_empty() {
        return Err(GmshError::MissingNodes);
    }

    let triangles: Vec<[usize; 3]> = elements
        .element_blocks
        .iter()
        .filter(|block| block.element_type == mshio::ElementType::Tri3)
        .flat_map(|block| block.elements.iter())
        .filter_map(|el| match el.nodes[..] {
            [a, b, c] => Some([a, b, c]),
            _ => None,
        })
        .map(|[a, b, c]| Ok([node_index(a)?, node_index(b)?, node_index(c)?]))
        .collect::<Result<_, GmshError>>()?;
    if triangles.is_empty() {
        return Err(GmshError::MissingElements);
    }

    let mesh = PlanarMesh::new(vertices, triangles)?;
    for (group_id, group) in physical_groups.iter() {
        mesh.set_label(&format!("{}", group_id), &group.nodes)?;
    }
    log::debug!(
        "loaded gmsh mesh with {} points and {} physical groups",
        mesh.point_count(),
        physical_groups.len()
    );

    Ok(mesh)
}

/// Convert a node tag into an index in the vertex array.
///
/// Gmsh tags start at 1, so subtract 1.
/// (this assumes tags are sequential and in order,
/// which holds for files gmsh writes itself)
fn node_index(tag: u64) -> Result<usize, GmshError> {
    usize::try_from(tag)
        .ok()
        .and_then(|t| t.checked_sub(1))
        .ok_or_else(|| GmshError::ParseError(format!("invalid node tag {tag} in element")))
}

/// Collect the physical groups defined in a .msh file
/// into a structure we can easily look them up from.
///
/// This only populates the `entities` field of each group;
/// nodes are filled in while reading node blocks.
fn gather_physical_groups(
    entities: Option<&mshio::Entities<i32, f64>>,
) -> BTreeMap<i32, PhysicalGroup> {
    let Some(entities) = entities else {
        return BTreeMap::new();
    };

    let mut groups: BTreeMap<i32, PhysicalGroup> = BTreeMap::new();
    let mut add = |dim: i32, tag: i32, physical_tags: &[i32]| {
        for ptag in physical_tags {
            groups
                .entry(*ptag)
                .or_default()
                .entities
                .insert(EntityId { dim, tag });
        }
    };

    for point in &entities.points {
        add(0, point.tag, &point.physical_tags);
    }
    for curve in &entities.curves {
        add(1, curve.tag, &curve.physical_tags);
    }
    for surface in &entities.surfaces {
        add(2, surface.tag, &surface.physical_tags);
    }

    groups
}

//
// tests
//

#[cfg(test)]
mod tests {
    use super::*;

    /// A unit square split into four triangles around its center,
    /// with physical group 100 on the bottom edge.
    const SQUARE_MSH: &str = "\
$MeshFormat
4.1 0 8
$EndMeshFormat
$Entities
2 1 1 0
1 0 0 0 1 100
2 1 0 0 1 100
1 0 0 0 1 0 0 1 100 2 1 -2
1 0 0 0 1 1 0 0 1 1
$EndEntities
$Nodes
3 5 1 5
0 1 0 1
1
0 0 0
0 2 0 1
2
1 0 0
2 1 0 3
3
4
5
1 1 0
0 1 0
0.5 0.5 0
$EndNodes
$Elements
2 5 1 5
1 1 1 1
1 1 2
2 1 2 4
2 1 2 5
3 2 3 5
4 3 4 5
5 4 1 5
$EndElements
";

    #[test]
    fn load_square_with_physical_group() {
        let mesh = load_trimesh_2d(SQUARE_MSH.as_bytes()).expect("Failed to load mesh");
        assert_eq!(mesh.point_count(), 5);
        assert_eq!(mesh.triangles().len(), 4);
        assert_eq!(mesh.coords()[4], Vec2::new(0.5, 0.5));
        assert_eq!(mesh.boundary().ones().collect::<Vec<_>>(), vec![0, 1, 2, 3]);

        // the bottom edge group holds exactly the bottom vertices
        let bottom = mesh.get_label("100").expect("label didn't exist");
        assert_eq!(bottom, vec![0, 1]);
        for &i in &bottom {
            assert_eq!(mesh.coords()[i].y, 0.);
        }
    }

    #[test]
    fn invalid_data_is_rejected() {
        assert!(matches!(
            load_trimesh_2d(b"definitely not a mesh"),
            Err(GmshError::ParseError(_))
        ));

        // node tags start at 1
        let zero_tag = SQUARE_MSH.replace("4 3 4 5", "4 0 4 5");
        assert!(matches!(
            load_trimesh_2d(zero_tag.as_bytes()),
            Err(GmshError::ParseError(_))
        ));
    }
}
