//! # stepnc-scene
//!
//! A pure Rust scene-graph engine for STEP-NC machining project
//! visualization.
//!
//! This library parses an XML project document describing a machining
//! plan (workplans, workingsteps, operations, toolpaths, and CAD shape
//! assemblies) into a typed model, builds a renderable scene graph with
//! resolved world transforms and picking IDs, and manages lazy loading
//! of deferred mesh and toolpath data through a rank-ordered queue.
//! Rendering itself is out of scope: draw traversals emit a
//! renderer-agnostic command list for the embedder to translate to its
//! GPU API.
//!
//! ## Features
//!
//! - Pure Rust implementation with no unsafe code
//! - Memoized model construction: shared geometry referenced from many
//!   parents builds once
//! - Chunked, resumable mesh loading for large inline or deferred shells
//! - Arena-based scene graph with append-only picking IDs
//! - Tool position queries by cumulative arc length along an operation
//! - Drift-free interactive camera with XML state persistence
//!
//! ## Example
//!
//! ```no_run
//! use stepnc_scene::Project;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let xml = std::fs::read_to_string("project.xml")?;
//! let project = Project::from_str(&xml)?;
//!
//! let (scene, loadables) = project.build_scene();
//! println!(
//!     "{} scene nodes, {} deferred meshes",
//!     scene.len(),
//!     loadables.len()
//! );
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod geom;
pub mod loader;
pub mod model;
pub mod scene;
pub mod view;

pub(crate) mod parser;
mod validator;

pub use error::{Error, Result};
pub use geom::BoundingBox;
pub use loader::{
    Admission, CHUNK_BUDGET, DataSource, FacetGroupData, FacetRow, LoadHandle, LoadPolicy,
    LoadQueue, LoadStep, MeshLoadTask, PumpStep, ShellData,
};
pub use model::{
    Annotation, AnnotationId, Executable, ExecutableBase, ExecutableId, Face, ModelStore,
    ObjectRef, Operation, OperationId, Placement, PlacementId, Project, ProjectTreeNode, Registry,
    Selective, Shape, ShapeChild, ShapeId, Shell, ShellId, ShellMesh, ShellState, Toolpath,
    ToolpathData, ToolpathId, ToolpathState, TreeNodeKind, Workingstep, Workplan,
};
pub use scene::{
    DrawCommand, DrawList, DrawOptions, Drawable, NodeId, PICK_ID_BUDGET, SceneGraph, SceneNode,
};
pub use view::{Projection, ViewVolume};
