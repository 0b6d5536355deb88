//! Saving meshes to disk and loading them back.
//!
//! A mesh is stored as a set of tables:
//! native coordinates, triangles, boundary points and labels,
//! along with the geometry name and configuration.
//! Topology is rebuilt on load, so a loaded mesh is equivalent to a freshly built one
//! (with a new identity).

use fixedbitset as fb;
use serde::{Deserialize, Serialize};

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use super::{mesh_construction::build_mesh, Geometry, MeshError, TriMesh};
use crate::{config::MeshConfig, parallel::WorkerContext, Vec2};

#[derive(Serialize, Deserialize)]
struct MeshRecord {
    geometry: String,
    coords: Vec<[f64; 2]>,
    triangles: Vec<[usize; 3]>,
    boundary: Vec<usize>,
    labels: BTreeMap<String, Vec<usize>>,
    config: MeshConfig,
}

impl<G: Geometry> TriMesh<G> {
    fn to_record(&self) -> MeshRecord {
        MeshRecord {
            geometry: G::NAME.to_string(),
            coords: self.native.iter().map(|c| [c.x, c.y]).collect(),
            triangles: self.triangles.clone(),
            boundary: self.boundary.ones().collect(),
            labels: self
                .labels
                .borrow()
                .iter()
                .map(|(name, bits)| (name.clone(), bits.ones().collect()))
                .collect(),
            config: self.config.clone(),
        }
    }

    fn from_record(record: MeshRecord) -> Result<Self, MeshError> {
        if record.geometry != G::NAME {
            return Err(MeshError::GeometryMismatch {
                expected: G::NAME,
                found: record.geometry,
            });
        }
        let coords = record
            .coords
            .iter()
            .map(|&[x, y]| Vec2::new(x, y))
            .collect();
        let mesh: Self = build_mesh(coords, record.triangles, record.config)?;
        let mut mesh = mesh.with_boundary(fb::FixedBitSet::from_iter(record.boundary))?;

        let len = mesh.points.len();
        let labels = mesh.labels.get_mut();
        for (name, indices) in record.labels {
            if let Some(&index) = indices.iter().find(|&&i| i >= len) {
                return Err(MeshError::InvalidIndex { index, len });
            }
            let mut bits = fb::FixedBitSet::with_capacity(len);
            bits.extend(indices);
            labels.insert(name, bits);
        }
        Ok(mesh)
    }

    /// Encode the mesh into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MeshError> {
        Ok(bincode::serialize(&self.to_record())?)
    }

    /// Decode a mesh encoded with [`to_bytes`][Self::to_bytes].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MeshError> {
        Self::from_record(bincode::deserialize(bytes)?)
    }

    /// Write the mesh to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MeshError> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, &self.to_record())?;
        writer.flush()?;
        log::debug!(
            "saved {} mesh with {} points to {}",
            G::NAME,
            self.points.len(),
            path.display()
        );
        Ok(())
    }

    /// Load a mesh written with [`save`][Self::save].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MeshError> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mesh = Self::from_record(bincode::deserialize_from(reader)?)?;
        log::debug!(
            "loaded {} mesh with {} points from {}",
            G::NAME,
            mesh.points.len(),
            path.display()
        );
        Ok(mesh)
    }

    /// Write this worker's partition of a distributed mesh
    /// to `dir`, returning the path written.
    ///
    /// Each worker writes its own file, suffixed with its rank
    /// when more than one worker is cooperating.
    pub fn save_partition(
        &self,
        dir: impl AsRef<Path>,
        stem: &str,
        ctx: &WorkerContext,
    ) -> Result<PathBuf, MeshError> {
        let path = dir.as_ref().join(partition_file_name(stem, ctx));
        self.save(&path)?;
        Ok(path)
    }
}

fn partition_file_name(stem: &str, ctx: &WorkerContext) -> String {
    if ctx.is_parallel() {
        format!("{stem}.{}-of-{}.mesh", ctx.rank(), ctx.size())
    } else {
        format!("{stem}.mesh")
    }
}

//
// tests
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Extrapolation,
        mesh::{tiny_mesh_2d, COARSE_LABEL},
        Mesh, PlanarMesh, SphericalMesh,
    };

    #[test]
    fn bytes_round_trip() {
        let mesh = tiny_mesh_2d().refine(1).unwrap().with_config(MeshConfig {
            extrapolation: Extrapolation::Nearest,
            ..Default::default()
        });
        mesh.set_label("channel", &[3, 10]).unwrap();

        let bytes = mesh.to_bytes().unwrap();
        let loaded = PlanarMesh::from_bytes(&bytes).unwrap();

        assert_ne!(loaded.id(), mesh.id());
        assert_eq!(loaded.coords(), mesh.coords());
        assert_eq!(loaded.triangles(), mesh.triangles());
        assert_eq!(loaded.boundary(), mesh.boundary());
        assert_eq!(loaded.config(), mesh.config());
        assert_eq!(loaded.get_label("channel"), Some(vec![3, 10]));
        assert_eq!(
            loaded.get_label(COARSE_LABEL),
            mesh.get_label(COARSE_LABEL)
        );
        assert_eq!(loaded.label_names(), mesh.label_names());
    }

    #[test]
    fn geometry_is_checked_on_load() {
        let bytes = tiny_mesh_2d().to_bytes().unwrap();
        assert!(matches!(
            SphericalMesh::from_bytes(&bytes),
            Err(MeshError::GeometryMismatch {
                expected: "sphere",
                ..
            })
        ));
        assert!(matches!(
            PlanarMesh::from_bytes(&bytes[..bytes.len() / 2]),
            Err(MeshError::Encoding(_))
        ));
    }

    #[test]
    fn file_round_trip() {
        let dir = std::env::temp_dir();
        let mesh = SphericalMesh::icosahedral(1).unwrap();
        let path = mesh
            .save_partition(&dir, "meshfn-persist-test", &WorkerContext::serial())
            .unwrap();
        assert_eq!(path, dir.join("meshfn-persist-test.mesh"));

        let loaded = SphericalMesh::load(&path).unwrap();
        assert_eq!(loaded.coords(), mesh.coords());
        assert_eq!(loaded.triangles(), mesh.triangles());
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            SphericalMesh::load(&path),
            Err(MeshError::Io(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn write_errors_are_reported() {
        // everything fits in the write buffer, so only the final flush fails
        let err = tiny_mesh_2d().save("/dev/full").unwrap_err();
        assert!(matches!(err, MeshError::Io(_)), "{err:?}");
    }

    #[test]
    fn partitions_are_named_per_worker() {
        let ctx = WorkerContext::new(2, 4).unwrap();
        assert_eq!(partition_file_name("topo", &ctx), "topo.2-of-4.mesh");
        assert_eq!(
            partition_file_name("topo", &WorkerContext::serial()),
            "topo.mesh"
        );
    }
}
