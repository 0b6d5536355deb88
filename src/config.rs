//! Tunable behaviour of meshes.

use serde::{Deserialize, Serialize};

/// How values are produced at query points outside every triangle of a mesh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extrapolation {
    /// Extend the linear interpolant of the nearest triangle.
    /// Accuracy drops quickly with distance from the mesh.
    #[default]
    Linear,
    /// Use the value at the nearest mesh point.
    Nearest,
}

/// Configuration of a [`TriMesh`][crate::TriMesh].
///
/// Every field has a default, so partial configurations can be deserialized:
/// ```
/// # use meshfn::{config::{Extrapolation, MeshConfig}};
/// let config: MeshConfig = serde_json::from_str(r#"{ "extrapolation": "nearest" }"#).unwrap();
/// assert_eq!(config.extrapolation, Extrapolation::Nearest);
/// assert_eq!(config.gradient_rings, 1);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Rings of neighbouring points used in the derivative stencil of each point.
    /// Stencils that can't resolve both directions are widened automatically.
    pub gradient_rings: usize,
    /// Behaviour for query points outside the mesh.
    pub extrapolation: Extrapolation,
    /// Slack allowed on barycentric weights
    /// when deciding whether a point is inside a triangle.
    pub tolerance: f64,
    /// Log construction timings at `info` level instead of `debug`.
    pub verbose: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            gradient_rings: 1,
            extrapolation: Extrapolation::Linear,
            tolerance: 1e-10,
            verbose: false,
        }
    }
}

//
// tests
//
