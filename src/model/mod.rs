//! Data structures representing a machining project
//!
//! The model tree is stored in typed arenas owned by [`ModelStore`].
//! Elements reference each other by typed index, never by owning pointer,
//! so the same shell or shape can be shared by any number of parents
//! (the source documents describe DAGs, not strict trees). The
//! [`Registry`] maps document IDs to arena slots; a slot is registered
//! before its fields are populated, which is what lets re-entrant
//! references during construction resolve to the already-allocated
//! object instead of recursing forever.

mod executable;
mod project;
mod shape;
mod toolpath;

pub use executable::{Executable, ExecutableBase, Placement, Selective, Workingstep, Workplan};
pub use project::{Project, ProjectTreeNode, TreeNodeKind};
pub use shape::{Annotation, Face, Shape, ShapeChild, Shell, ShellMesh, ShellState};
pub(crate) use shape::DEFAULT_FACE_COLOR;
pub use toolpath::{Operation, Toolpath, ToolpathData, ToolpathState};

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Index of a [`Shell`] in the model store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShellId(pub(crate) usize);

/// Index of a [`Shape`] in the model store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeId(pub(crate) usize);

/// Index of an [`Annotation`] in the model store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnnotationId(pub(crate) usize);

/// Index of a [`Toolpath`] in the model store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ToolpathId(pub(crate) usize);

/// Index of an [`Operation`] in the model store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(pub(crate) usize);

/// Index of an [`Executable`] in the model store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutableId(pub(crate) usize);

/// Index of a [`Placement`] in the model store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlacementId(pub(crate) usize);

impl ShellId {
    /// Arena index of this shell
    pub fn index(&self) -> usize {
        self.0
    }
}

impl ShapeId {
    /// Arena index of this shape
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Typed reference to any constructed model object
///
/// This is what the registry stores per document ID. The tag carries the
/// element kind, so a cross-reference that names an element of the wrong
/// kind is detected at resolution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRef {
    /// A shape element
    Shape(ShapeId),
    /// A shell element
    Shell(ShellId),
    /// An annotation element
    Annotation(AnnotationId),
    /// A toolpath element
    Toolpath(ToolpathId),
    /// An operation element
    Operation(OperationId),
    /// A workplan, workingstep, or selective element
    Executable(ExecutableId),
    /// A placement element
    Placement(PlacementId),
}

impl ObjectRef {
    /// Human-readable kind name, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            ObjectRef::Shape(_) => "shape",
            ObjectRef::Shell(_) => "shell",
            ObjectRef::Annotation(_) => "annotation",
            ObjectRef::Toolpath(_) => "toolpath",
            ObjectRef::Operation(_) => "operation",
            ObjectRef::Executable(_) => "executable",
            ObjectRef::Placement(_) => "placement",
        }
    }
}

/// Mapping from document element IDs to constructed objects
///
/// At most one constructed object exists per document ID. Builders insert
/// the (placeholder) slot before populating it, so a second reference to
/// the same ID, including one reached re-entrantly through a cycle,
/// finds the entry and adopts it instead of constructing a duplicate.
#[derive(Debug, Default)]
pub struct Registry {
    objects: HashMap<String, ObjectRef>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
        }
    }

    /// Register a constructed object under its document ID
    ///
    /// Duplicate IDs are fatal; they indicate a malformed source document.
    pub fn insert(&mut self, id: &str, obj: ObjectRef) -> Result<()> {
        if self.objects.contains_key(id) {
            return Err(Error::InvalidModel(format!(
                "Duplicate document id '{}'",
                id
            )));
        }
        self.objects.insert(id.to_string(), obj);
        Ok(())
    }

    /// Look up a constructed object by document ID
    pub fn find(&self, id: &str) -> Option<ObjectRef> {
        self.objects.get(id).copied()
    }

    /// Number of registered objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if nothing has been registered
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterate over all registered (id, object) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, ObjectRef)> {
        self.objects.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Owning arenas for every constructed model object
///
/// The store is the sole owner of model data for the lifetime of one
/// loaded document. Shells and toolpaths are the only objects mutated
/// after construction (their load state changes); everything else is
/// read-only once built, except the `enabled` toggle on executables.
#[derive(Debug, Default)]
pub struct ModelStore {
    /// Shell arena
    pub shells: Vec<Shell>,
    /// Shape arena
    pub shapes: Vec<Shape>,
    /// Annotation arena
    pub annotations: Vec<Annotation>,
    /// Toolpath arena
    pub toolpaths: Vec<Toolpath>,
    /// Operation arena
    pub operations: Vec<Operation>,
    /// Executable arena
    pub executables: Vec<Executable>,
    /// Placement arena
    pub placements: Vec<Placement>,
}

impl ModelStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Shell by ID
    pub fn shell(&self, id: ShellId) -> &Shell {
        &self.shells[id.0]
    }

    /// Mutable shell by ID
    pub fn shell_mut(&mut self, id: ShellId) -> &mut Shell {
        &mut self.shells[id.0]
    }

    /// Shape by ID
    pub fn shape(&self, id: ShapeId) -> &Shape {
        &self.shapes[id.0]
    }

    /// Annotation by ID
    pub fn annotation(&self, id: AnnotationId) -> &Annotation {
        &self.annotations[id.0]
    }

    /// Toolpath by ID
    pub fn toolpath(&self, id: ToolpathId) -> &Toolpath {
        &self.toolpaths[id.0]
    }

    /// Mutable toolpath by ID
    pub fn toolpath_mut(&mut self, id: ToolpathId) -> &mut Toolpath {
        &mut self.toolpaths[id.0]
    }

    /// Operation by ID
    pub fn operation(&self, id: OperationId) -> &Operation {
        &self.operations[id.0]
    }

    /// Executable by ID
    pub fn executable(&self, id: ExecutableId) -> &Executable {
        &self.executables[id.0]
    }

    /// Mutable executable by ID, for the `enabled` toggle
    pub fn executable_mut(&mut self, id: ExecutableId) -> &mut Executable {
        &mut self.executables[id.0]
    }

    /// Placement by ID
    pub fn placement(&self, id: PlacementId) -> &Placement {
        &self.placements[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_rejects_duplicate_ids() {
        let mut reg = Registry::new();
        reg.insert("s1", ObjectRef::Shell(ShellId(0))).unwrap();
        let err = reg.insert("s1", ObjectRef::Shell(ShellId(1))).unwrap_err();
        assert!(err.to_string().contains("Duplicate document id 's1'"));
    }

    #[test]
    fn test_registry_find_returns_same_ref() {
        let mut reg = Registry::new();
        reg.insert("sh", ObjectRef::Shape(ShapeId(3))).unwrap();
        assert_eq!(reg.find("sh"), Some(ObjectRef::Shape(ShapeId(3))));
        assert_eq!(reg.find("missing"), None);
    }

    #[test]
    fn test_object_ref_kind_names() {
        assert_eq!(ObjectRef::Shell(ShellId(0)).kind(), "shell");
        assert_eq!(ObjectRef::Executable(ExecutableId(0)).kind(), "executable");
    }
}
