//! Shapes, shells, and annotations
//!
//! A [`Shell`] is the leaf geometry of the model tree: a triangle mesh
//! with per-facet-group color, either embedded in the project document or
//! deferred behind an `href` and fetched on demand. A [`Shape`] composes
//! shells, wireframe annotations, and transformed child shapes into
//! assemblies; because children are referenced by arena index, a single
//! shape or shell can appear under many parents.

use std::collections::HashSet;

use nalgebra::{Matrix4, Point3, Vector3};

use crate::error::{Error, Result};
use crate::geom::BoundingBox;
use crate::loader::{LoadStep, MeshLoadTask, ShellData};
use crate::model::{AnnotationId, ModelStore, ShapeId, ShellId};

/// Default color for facet groups that do not declare one
pub(crate) const DEFAULT_FACE_COLOR: [f32; 3] = [0.7, 0.7, 0.7];

/// A group of facets sharing one color
#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    /// RGB color in `[0, 1]`
    pub color: [f32; 3],
    /// Vertex index triples into the owning mesh's point list
    pub triangles: Vec<[usize; 3]>,
    /// One unit normal per triangle
    pub normals: Vec<Vector3<f64>>,
}

impl Face {
    /// Create an empty face group with the given color
    pub fn new(color: [f32; 3]) -> Self {
        Self {
            color,
            triangles: Vec::new(),
            normals: Vec::new(),
        }
    }
}

/// A fully loaded triangle mesh
#[derive(Debug, Clone, PartialEq)]
pub struct ShellMesh {
    /// Shared vertex positions
    pub points: Vec<Point3<f64>>,
    /// Facet groups, each with its own color
    pub faces: Vec<Face>,
}

impl ShellMesh {
    /// Total facet count across all face groups
    pub fn facet_count(&self) -> usize {
        self.faces.iter().map(|f| f.triangles.len()).sum()
    }

    /// Bounding box of the vertex positions
    pub fn bounding_box(&self) -> BoundingBox {
        let mut bbox = BoundingBox::new();
        for p in &self.points {
            bbox.update(p, None);
        }
        bbox
    }
}

/// Load state of a shell
///
/// The mesh is present iff the state is `Loaded`. A loading shell holds
/// the suspended chunk task; dropping the state cancels the load.
#[derive(Debug)]
pub enum ShellState {
    /// No mesh data in memory
    Unloaded,
    /// A chunked load is in progress
    Loading(MeshLoadTask),
    /// Mesh data is resident
    Loaded(ShellMesh),
}

/// A lazily loaded triangle mesh with bounding box and size metadata
///
/// Inline shells are driven through the chunk task to completion at
/// construction. Deferred shells know only their `href`, declared
/// bounding box, and declared facet count until loaded through the load
/// queue. `unload` returns a shell to `Unloaded`, freeing the mesh; the
/// caller owns that lifecycle, nothing reclaims mesh memory implicitly.
#[derive(Debug)]
pub struct Shell {
    /// Document ID of this shell
    pub doc_id: String,
    /// Fetch location for deferred data, `None` for inline shells
    pub href: Option<String>,
    /// Declared facet count; drives the cost estimate and load ranking
    pub size: Option<u64>,
    /// Number of shapes referencing this shell
    pub use_count: u32,
    bbox: BoundingBox,
    state: ShellState,
}

impl Shell {
    /// Create a shell in the unloaded state
    pub fn new(doc_id: &str, href: Option<String>, size: Option<u64>, bbox: BoundingBox) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            href,
            size,
            use_count: 0,
            bbox,
            state: ShellState::Unloaded,
        }
    }

    /// True when mesh data is resident
    pub fn is_loaded(&self) -> bool {
        matches!(self.state, ShellState::Loaded(_))
    }

    /// True while a chunked load is suspended
    pub fn is_loading(&self) -> bool {
        matches!(self.state, ShellState::Loading(_))
    }

    /// The mesh, present iff loaded
    pub fn mesh(&self) -> Option<&ShellMesh> {
        match &self.state {
            ShellState::Loaded(mesh) => Some(mesh),
            _ => None,
        }
    }

    /// Best-known bounding box
    ///
    /// The declared box from the document until a load completes, after
    /// which the computed box is merged in.
    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Record another shape referencing this shell
    pub(crate) fn mark_use(&mut self) {
        self.use_count += 1;
    }

    /// Begin a chunked load from extracted shell data
    ///
    /// Replaces any in-flight load; the previous task is discarded.
    /// Loading an already-loaded shell is fatal; callers check
    /// `is_loaded` first, and the load queue never double-requests.
    pub fn begin_load(&mut self, data: ShellData) -> Result<()> {
        if self.is_loaded() {
            return Err(Error::InvalidModel(format!(
                "shell '{}' is already loaded",
                self.doc_id
            )));
        }
        self.state = ShellState::Loading(MeshLoadTask::new(data));
        Ok(())
    }

    /// Advance an in-flight load by one chunk
    ///
    /// Processes a bounded number of vertices/facets and returns
    /// `InProgress` when more remain, giving the caller a yield point
    /// between chunks. A parse failure abandons the task and leaves the
    /// shell unloaded.
    pub fn step_load(&mut self) -> Result<LoadStep> {
        match std::mem::replace(&mut self.state, ShellState::Unloaded) {
            ShellState::Loading(mut task) => match task.step() {
                Ok(Some(mesh)) => {
                    self.bbox.update_from(&mesh.bounding_box(), None);
                    self.state = ShellState::Loaded(mesh);
                    Ok(LoadStep::Complete)
                }
                Ok(None) => {
                    self.state = ShellState::Loading(task);
                    Ok(LoadStep::InProgress)
                }
                Err(e) => Err(e),
            },
            ShellState::Loaded(mesh) => {
                self.state = ShellState::Loaded(mesh);
                Ok(LoadStep::Complete)
            }
            ShellState::Unloaded => Err(Error::NotLoaded(format!(
                "shell '{}' has no load in progress",
                self.doc_id
            ))),
        }
    }

    /// Drive a load from data to completion in one call
    ///
    /// Used for inline shells at construction; deferred loads go through
    /// the load queue one chunk at a time instead.
    pub fn load_all(&mut self, data: ShellData) -> Result<()> {
        self.begin_load(data)?;
        loop {
            if matches!(self.step_load()?, LoadStep::Complete) {
                return Ok(());
            }
        }
    }

    /// Evict mesh data, returning to the unloaded state
    ///
    /// Also cancels an in-flight load. The declared metadata (href, size,
    /// bounding box) survives, so the shell can be loaded again later.
    pub fn unload(&mut self) {
        self.state = ShellState::Unloaded;
    }

    /// Load-priority score: `use_count * bounding volume / size`
    ///
    /// Favors small, frequently referenced, voluminous shells. Shells
    /// with no declared size rank as if size 1.
    pub fn rank(&self) -> f64 {
        let size = self.size.unwrap_or(1).max(1) as f64;
        f64::from(self.use_count) * self.bbox.volume() / size
    }

    /// Estimated facet cost of loading this shell, 0 when already loaded
    pub fn unloaded_cost(&self) -> u64 {
        if self.is_loaded() {
            0
        } else {
            self.size.unwrap_or(0)
        }
    }
}

/// A wireframe annotation attached to a shape
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Document ID of this annotation
    pub doc_id: String,
    /// Display label
    pub label: Option<String>,
    /// Polyline strips in shape-local coordinates
    pub polylines: Vec<Vec<Point3<f64>>>,
}

impl Annotation {
    /// Bounding box of all polyline points
    pub fn bounding_box(&self) -> BoundingBox {
        let mut bbox = BoundingBox::new();
        for polyline in &self.polylines {
            for p in polyline {
                bbox.update(p, None);
            }
        }
        bbox
    }
}

/// A child shape reference with its placement transform
#[derive(Debug, Clone)]
pub struct ShapeChild {
    /// The referenced shape
    pub shape: ShapeId,
    /// Maps child-local coordinates into this shape's space
    pub xform: Matrix4<f64>,
    /// Inverse of `xform`, maps this shape's coordinates into the child
    pub inv_xform: Matrix4<f64>,
}

/// A composite geometry node: shells, annotations, and transformed
/// child shapes
///
/// Immutable once built. The children list keeps document order; sorting
/// by label happens at scene-graph build time and is a presentation
/// concern only.
#[derive(Debug)]
pub struct Shape {
    /// Document ID of this shape
    pub doc_id: String,
    /// Display label, used for tree sorting
    pub label: Option<String>,
    /// Owned shell references
    pub shells: Vec<ShellId>,
    /// Owned annotation references
    pub annotations: Vec<AnnotationId>,
    /// Child shapes with their placements
    pub children: Vec<ShapeChild>,
}

impl Shape {
    /// Bounding box of the whole subtree in this shape's space
    ///
    /// Unions shell and annotation boxes with child boxes mapped through
    /// each child's placement. Reference cycles are cut by tracking the
    /// recursion path.
    pub fn bounding_box(&self, store: &ModelStore) -> BoundingBox {
        let mut bbox = BoundingBox::new();
        let mut path = Vec::new();
        self.bbox_into(store, None, &mut bbox, &mut path);
        bbox
    }

    fn bbox_into(
        &self,
        store: &ModelStore,
        xform: Option<&Matrix4<f64>>,
        out: &mut BoundingBox,
        path: &mut Vec<String>,
    ) {
        if path.iter().any(|id| id == &self.doc_id) {
            return;
        }
        path.push(self.doc_id.clone());
        for &shell in &self.shells {
            out.update_from(store.shell(shell).bounding_box(), xform);
        }
        for &annotation in &self.annotations {
            out.update_from(&store.annotation(annotation).bounding_box(), xform);
        }
        for child in &self.children {
            let child_xform = match xform {
                Some(m) => m * child.xform,
                None => child.xform,
            };
            store
                .shape(child.shape)
                .bbox_into(store, Some(&child_xform), out, path);
        }
        path.pop();
    }

    /// True if any shell in the subtree has loaded mesh data
    ///
    /// Short-circuits on the first hit.
    pub fn has_loaded_shell(&self, store: &ModelStore) -> bool {
        let mut path = Vec::new();
        self.has_loaded_shell_inner(store, &mut path)
    }

    fn has_loaded_shell_inner(&self, store: &ModelStore, path: &mut Vec<String>) -> bool {
        if path.iter().any(|id| id == &self.doc_id) {
            return false;
        }
        path.push(self.doc_id.clone());
        let found = self
            .shells
            .iter()
            .any(|&s| store.shell(s).is_loaded())
            || self.children.iter().any(|c| {
                store
                    .shape(c.shape)
                    .has_loaded_shell_inner(store, path)
            });
        path.pop();
        found
    }

    /// Estimated facet cost of loading every unloaded shell in the subtree
    ///
    /// Each distinct shell counts once, however many paths reach it; a
    /// shared shell is only fetched once.
    pub fn unloaded_cost(&self, store: &ModelStore) -> u64 {
        let mut seen_shapes = HashSet::new();
        let mut seen_shells = HashSet::new();
        self.unloaded_cost_inner(store, &mut seen_shapes, &mut seen_shells)
    }

    fn unloaded_cost_inner(
        &self,
        store: &ModelStore,
        seen_shapes: &mut HashSet<String>,
        seen_shells: &mut HashSet<ShellId>,
    ) -> u64 {
        if !seen_shapes.insert(self.doc_id.clone()) {
            return 0;
        }
        let mut cost = 0;
        for &shell in &self.shells {
            if seen_shells.insert(shell) {
                cost += store.shell(shell).unloaded_cost();
            }
        }
        for child in &self.children {
            cost += store
                .shape(child.shape)
                .unloaded_cost_inner(store, seen_shapes, seen_shells);
        }
        cost
    }
}
