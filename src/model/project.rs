//! The project root
//!
//! A [`Project`] ties together the as-is and to-be workpiece shapes and
//! the root workplan, and owns the model store and registry built from
//! one document. It also produces the navigable project tree used by
//! tree displays.

use crate::error::Result;
use crate::geom::BoundingBox;
use crate::loader::LoadHandle;
use crate::model::{Executable, ExecutableId, ModelStore, ObjectRef, Registry, ShapeId};
use crate::scene::SceneGraph;

/// Kind tag for project-tree nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeNodeKind {
    /// The project root
    Project,
    /// A workplan sequence
    Workplan,
    /// A single machining step
    Workingstep,
    /// A group of alternatives
    Selective,
    /// A workpiece or assembly shape
    Shape,
    /// A fixture shape
    Fixture,
}

/// A node of the navigable project tree
///
/// A pure data structure; rendering it (as HTML list items, a TUI tree,
/// or anything else) is the embedder's concern.
#[derive(Debug, Clone)]
pub struct ProjectTreeNode {
    /// Display label
    pub label: String,
    /// What this node represents
    pub kind: TreeNodeKind,
    /// The executable behind this node, if any
    pub executable: Option<ExecutableId>,
    /// The shape behind this node, if any
    pub shape: Option<ShapeId>,
    /// Child nodes, display order
    pub children: Vec<ProjectTreeNode>,
}

/// A complete machining project
#[derive(Debug)]
pub struct Project {
    /// Project name
    pub name: Option<String>,
    /// Owning arenas for all model objects
    pub store: ModelStore,
    /// Document ID to object mapping
    pub registry: Registry,
    /// The root workplan
    pub main_workplan: ExecutableId,
    /// Workpiece geometry before machining
    pub as_is: Option<ShapeId>,
    /// Workpiece geometry after machining
    pub to_be: Option<ShapeId>,
}

impl Project {
    /// Parse a project from an XML document string
    ///
    /// Builds the full model tree (memoized by document ID, so shared
    /// geometry constructs once), then validates cross-references and
    /// model invariants. Inline shells and toolpaths are loaded during
    /// construction; deferred ones stay unloaded until requested through
    /// a load queue.
    pub fn from_str(xml: &str) -> Result<Self> {
        let project = crate::parser::parse_project(xml)?;
        crate::validator::validate_project(&project)?;
        Ok(project)
    }

    /// Look up any constructed object by document ID
    pub fn find(&self, id: &str) -> Option<ObjectRef> {
        self.registry.find(id)
    }

    /// Aggregate bounding box of the whole project
    pub fn bounding_box(&self) -> BoundingBox {
        let mut bbox = self
            .store
            .executable(self.main_workplan)
            .bounding_box(&self.store);
        for shape in [self.as_is, self.to_be].into_iter().flatten() {
            bbox.update_from(&self.store.shape(shape).bounding_box(&self.store), None);
        }
        bbox
    }

    /// Estimated facet/sample cost of loading everything still deferred
    ///
    /// Used by the confirmation gate before a bulk load.
    pub fn unloaded_cost(&self) -> u64 {
        let shells: u64 = self.store.shells.iter().map(|s| s.unloaded_cost()).sum();
        let toolpaths: u64 = self
            .store
            .toolpaths
            .iter()
            .map(|t| t.unloaded_cost())
            .sum();
        shells + toolpaths
    }

    /// Build the renderable scene graph and the list of deferred
    /// geometry it references
    ///
    /// The scene graph is rebuilt from scratch; it never mutates in
    /// place when the model changes. Construction fully completes,
    /// populating the loadables list, before any loading begins, so a
    /// caller can hand the list straight to a load queue.
    pub fn build_scene(&self) -> (SceneGraph, Vec<LoadHandle>) {
        crate::scene::build_scene(self)
    }

    /// Build the navigable project tree
    ///
    /// Shape children sort by label: missing labels last, ties kept in
    /// document order. The sort is presentational; it never reorders the
    /// model itself.
    pub fn project_tree(&self) -> ProjectTreeNode {
        let mut root = ProjectTreeNode {
            label: self
                .name
                .clone()
                .unwrap_or_else(|| "project".to_string()),
            kind: TreeNodeKind::Project,
            executable: None,
            shape: None,
            children: Vec::new(),
        };
        root.children
            .push(self.executable_tree(self.main_workplan));
        root
    }

    fn executable_tree(&self, id: ExecutableId) -> ProjectTreeNode {
        let executable = self.store.executable(id);
        let base = executable.base();
        let kind = match executable {
            Executable::Workingstep(_) => TreeNodeKind::Workingstep,
            Executable::Selective(_) => TreeNodeKind::Selective,
            Executable::Workplan(_) => TreeNodeKind::Workplan,
        };
        let mut node = ProjectTreeNode {
            label: base
                .name
                .clone()
                .unwrap_or_else(|| base.doc_id.clone()),
            kind,
            executable: Some(id),
            shape: None,
            children: Vec::new(),
        };
        if let Some(shape) = base.to_be {
            node.children
                .push(self.shape_tree(shape, TreeNodeKind::Shape, &mut Vec::new()));
        }
        if let Some(fixture) = base.fixture {
            node.children
                .push(self.shape_tree(fixture, TreeNodeKind::Fixture, &mut Vec::new()));
        }
        for &child in executable.elements() {
            node.children.push(self.executable_tree(child));
        }
        node
    }

    fn shape_tree(
        &self,
        id: ShapeId,
        kind: TreeNodeKind,
        path: &mut Vec<ShapeId>,
    ) -> ProjectTreeNode {
        let shape = self.store.shape(id);
        let mut node = ProjectTreeNode {
            label: shape
                .label
                .clone()
                .unwrap_or_else(|| shape.doc_id.clone()),
            kind,
            executable: None,
            shape: Some(id),
            children: Vec::new(),
        };
        if path.contains(&id) {
            return node;
        }
        path.push(id);

        let sorted = crate::scene::sorted_children(&self.store, shape);
        for child in sorted {
            node.children
                .push(self.shape_tree(child.shape, TreeNodeKind::Shape, path));
        }
        path.pop();
        node
    }
}
