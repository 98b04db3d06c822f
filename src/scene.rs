//! The renderable scene graph
//!
//! A [`SceneGraph`] is the parallel, renderable counterpart of the model
//! tree: a dense arena of nodes holding resolved world transforms, with
//! parent and children expressed as indices into the arena; nodes never
//! own each other. Node IDs are 1-based, assigned append-only, and double
//! as picking color indices; they are never reused or reassigned.
//!
//! Scene graphs are rebuilt from the model when it changes, not patched
//! in place. Traversal emits a renderer-agnostic [`DrawList`]; hooking
//! that to an actual GPU API is the embedder's concern.

use std::collections::HashSet;

use nalgebra::{Matrix4, Point3};
use tracing::warn;

use crate::geom::BoundingBox;
use crate::loader::LoadHandle;
use crate::model::{
    AnnotationId, Executable, ExecutableId, ModelStore, Project, Shape, ShapeChild, ShapeId,
    ShellId, ToolpathId,
};

/// Soft cap on assigned node IDs
///
/// IDs beyond this no longer fit the picking color encoding; assignment
/// continues in a degraded, pick-ambiguous mode with a logged warning.
pub const PICK_ID_BUDGET: usize = 8192;

/// Identifier of a scene node, 1-based
///
/// The numeric value is the node's picking color index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    fn index(self) -> usize {
        (self.0 - 1) as usize
    }
}

/// What a scene node draws
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drawable {
    /// Structure only; nothing of its own to draw
    Group,
    /// The shells and annotations of a shape
    Shape(ShapeId),
    /// A toolpath polyline
    Toolpath(ToolpathId),
}

/// One node of the scene graph
#[derive(Debug)]
pub struct SceneNode {
    /// This node's ID (also its picking color index)
    pub id: NodeId,
    /// Parent node, `None` for the root
    pub parent: Option<NodeId>,
    /// Child nodes in display order
    pub children: Vec<NodeId>,
    /// Resolved world transform
    pub xform: Matrix4<f64>,
    /// Display label
    pub label: Option<String>,
    /// Visibility override; `None` inherits from the parent
    pub visible: Option<bool>,
    /// Selection highlight flag
    pub selected: bool,
    /// World-space bounding box of this node's subtree
    pub bbox: BoundingBox,
    /// What this node draws
    pub drawable: Drawable,
}

/// Options for a draw traversal
#[derive(Debug, Clone, Copy, Default)]
pub struct DrawOptions {
    /// Picking pass: commands carry pick IDs and selection highlighting
    /// is suppressed
    pub picking: bool,
    /// Emit bounding-box wireframes for every node, not just selected
    /// ones
    pub show_bboxes: bool,
}

/// One renderer-agnostic draw command
#[derive(Debug)]
pub enum DrawCommand {
    /// Draw a loaded shell mesh
    Mesh {
        /// Emitting node
        node: NodeId,
        /// The shell whose mesh to draw
        shell: ShellId,
        /// World transform to apply
        xform: Matrix4<f64>,
        /// Render with selection highlight
        selected: bool,
        /// Picking color index, present only in picking passes
        pick_id: Option<u32>,
    },
    /// Draw a loaded toolpath polyline
    Polyline {
        /// Emitting node
        node: NodeId,
        /// The toolpath whose samples to draw
        toolpath: ToolpathId,
        /// World transform to apply
        xform: Matrix4<f64>,
        /// Render with selection highlight
        selected: bool,
        /// Picking color index, present only in picking passes
        pick_id: Option<u32>,
    },
    /// Draw annotation polylines
    AnnotationLines {
        /// Emitting node
        node: NodeId,
        /// The annotation whose polylines to draw
        annotation: AnnotationId,
        /// World transform to apply
        xform: Matrix4<f64>,
        /// Picking color index, present only in picking passes
        pick_id: Option<u32>,
    },
    /// Draw the 12-edge wireframe of a node's bounding box
    BboxEdges {
        /// Emitting node
        node: NodeId,
        /// World-space edge endpoints
        edges: [[Point3<f64>; 2]; 12],
    },
}

/// Flat list of draw commands from one traversal
#[derive(Debug, Default)]
pub struct DrawList {
    /// Commands in traversal order
    pub commands: Vec<DrawCommand>,
}

/// Arena of scene nodes
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: Vec<SceneNode>,
}

impl SceneGraph {
    /// Create an empty scene graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no nodes exist
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The root node, if any nodes exist
    ///
    /// The first node pushed is the root.
    pub fn root(&self) -> Option<NodeId> {
        self.nodes.first().map(|n| n.id)
    }

    /// Append a node, assigning the next ID
    ///
    /// IDs are never reused. Exceeding [`PICK_ID_BUDGET`] logs a warning
    /// and continues; picking becomes ambiguous past the cap, drawing
    /// does not.
    pub fn push(
        &mut self,
        parent: Option<NodeId>,
        label: Option<String>,
        xform: Matrix4<f64>,
        drawable: Drawable,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32 + 1);
        if self.nodes.len() + 1 > PICK_ID_BUDGET {
            warn!(
                assigned = self.nodes.len() + 1,
                budget = PICK_ID_BUDGET,
                "scene node count exceeds the picking color budget"
            );
        }
        self.nodes.push(SceneNode {
            id,
            parent,
            children: Vec::new(),
            xform,
            label,
            visible: None,
            selected: false,
            bbox: BoundingBox::new(),
            drawable,
        });
        if let Some(parent) = parent {
            self.nodes[parent.index()].children.push(id);
        }
        id
    }

    /// Node by ID
    pub fn node(&self, id: NodeId) -> &SceneNode {
        &self.nodes[id.index()]
    }

    /// Mutable node by ID
    pub fn node_mut(&mut self, id: NodeId) -> &mut SceneNode {
        &mut self.nodes[id.index()]
    }

    /// Resolve a picking color index back to its node
    pub fn node_by_pick_id(&self, pick_id: u32) -> Option<&SceneNode> {
        if pick_id == 0 || pick_id as usize > self.nodes.len() {
            return None;
        }
        Some(&self.nodes[(pick_id - 1) as usize])
    }

    /// Iterate over all nodes in assignment order
    pub fn iter(&self) -> impl Iterator<Item = &SceneNode> {
        self.nodes.iter()
    }

    /// Set the selection flag of one node
    pub fn set_selected(&mut self, id: NodeId, selected: bool) {
        self.node_mut(id).selected = selected;
    }

    /// Clear every selection flag
    pub fn clear_selection(&mut self) {
        for node in &mut self.nodes {
            node.selected = false;
        }
    }

    /// Set or clear a node's visibility override
    pub fn set_visible(&mut self, id: NodeId, visible: Option<bool>) {
        self.node_mut(id).visible = visible;
    }

    /// World-space bounding box wireframe of a node, 12 edges
    ///
    /// `None` when the node's box is empty.
    pub fn bbox_edges(&self, id: NodeId) -> Option<[[Point3<f64>; 2]; 12]> {
        let bbox = &self.node(id).bbox;
        if bbox.is_empty() {
            return None;
        }
        let c = bbox.corners();
        // Corner layout from BoundingBox::corners: bit 2 = x, bit 1 = y, bit 0 = z
        Some([
            // Four edges along z
            [c[0], c[1]],
            [c[2], c[3]],
            [c[4], c[5]],
            [c[6], c[7]],
            // Four edges along y
            [c[0], c[2]],
            [c[1], c[3]],
            [c[4], c[6]],
            [c[5], c[7]],
            // Four edges along x
            [c[0], c[4]],
            [c[1], c[5]],
            [c[2], c[6]],
            [c[3], c[7]],
        ])
    }

    /// Walk the graph emitting draw commands
    ///
    /// Visibility is inherited from the parent unless a node overrides
    /// it; an invisible node still recurses, so a child override can
    /// re-enable a subtree. Unloaded geometry is skipped, so a draw is
    /// always safe to interleave with in-flight loads. In a picking
    /// pass, selection highlighting is suppressed and every command
    /// carries its node's pick ID.
    pub fn draw(&self, store: &ModelStore, options: &DrawOptions) -> DrawList {
        let mut list = DrawList::default();
        if let Some(root) = self.root() {
            self.draw_node(store, root, true, options, &mut list);
        }
        list
    }

    fn draw_node(
        &self,
        store: &ModelStore,
        id: NodeId,
        inherited: bool,
        options: &DrawOptions,
        out: &mut DrawList,
    ) {
        let node = self.node(id);
        let visible = node.visible.unwrap_or(inherited);
        if visible {
            let pick_id = options.picking.then_some(id.0);
            let selected = node.selected && !options.picking;
            match node.drawable {
                Drawable::Group => {}
                Drawable::Shape(shape_id) => {
                    let shape = store.shape(shape_id);
                    for &shell in &shape.shells {
                        if !store.shell(shell).is_loaded() {
                            continue;
                        }
                        out.commands.push(DrawCommand::Mesh {
                            node: id,
                            shell,
                            xform: node.xform,
                            selected,
                            pick_id,
                        });
                    }
                    for &annotation in &shape.annotations {
                        out.commands.push(DrawCommand::AnnotationLines {
                            node: id,
                            annotation,
                            xform: node.xform,
                            pick_id,
                        });
                    }
                }
                Drawable::Toolpath(toolpath) => {
                    if store.toolpath(toolpath).is_loaded() {
                        out.commands.push(DrawCommand::Polyline {
                            node: id,
                            toolpath,
                            xform: node.xform,
                            selected,
                            pick_id,
                        });
                    }
                }
            }
            if (selected || options.show_bboxes) && !options.picking {
                if let Some(edges) = self.bbox_edges(id) {
                    out.commands.push(DrawCommand::BboxEdges { node: id, edges });
                }
            }
        }
        for &child in &self.node(id).children {
            self.draw_node(store, child, visible, options, out);
        }
    }
}

/// Shape children in display order: by label, missing labels last,
/// ties kept in document order
///
/// The sort is a presentation concern; the model's child list itself
/// keeps document order.
pub fn sorted_children<'a>(store: &ModelStore, shape: &'a Shape) -> Vec<&'a ShapeChild> {
    let mut children: Vec<&ShapeChild> = shape.children.iter().collect();
    children.sort_by(|a, b| {
        let la = store.shape(a.shape).label.as_deref();
        let lb = store.shape(b.shape).label.as_deref();
        match (la, lb) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
    });
    children
}

/// Build the scene graph for a project
///
/// Walks the executable tree, wrapping every shape and toolpath
/// reference in its own node with a resolved world transform; a shared
/// shell referenced from two steps gets two scene nodes over the one
/// model object. Deferred, still-unloaded geometry is collected into the
/// returned loadables list; construction fully completes before any of
/// it is fetched.
pub(crate) fn build_scene(project: &Project) -> (SceneGraph, Vec<LoadHandle>) {
    let store = &project.store;
    let mut sg = SceneGraph::new();
    let mut loadables = Vec::new();
    let mut seen = HashSet::new();

    let root = sg.push(
        None,
        project.name.clone(),
        Matrix4::identity(),
        Drawable::Group,
    );
    add_executable(
        project,
        &mut sg,
        &mut loadables,
        &mut seen,
        project.main_workplan,
        root,
        &Matrix4::identity(),
    );
    let mut root_bbox = BoundingBox::new();
    let children = sg.node(root).children.clone();
    for child in children {
        let child_bbox = sg.node(child).bbox;
        root_bbox.update_from(&child_bbox, None);
    }
    sg.node_mut(root).bbox = root_bbox;

    (sg, loadables)
}

fn add_executable(
    project: &Project,
    sg: &mut SceneGraph,
    loadables: &mut Vec<LoadHandle>,
    seen: &mut HashSet<LoadHandle>,
    id: ExecutableId,
    parent: NodeId,
    parent_world: &Matrix4<f64>,
) {
    let store = &project.store;
    let executable = store.executable(id);
    let base = executable.base();

    let world = match base.setup {
        Some(placement) => parent_world * store.placement(placement).xform,
        None => *parent_world,
    };
    let node = sg.push(
        Some(parent),
        Some(base.name.clone().unwrap_or_else(|| base.doc_id.clone())),
        world,
        Drawable::Group,
    );
    if !base.enabled {
        sg.node_mut(node).visible = Some(false);
    }

    for shape in [base.to_be, base.fixture].into_iter().flatten() {
        add_shape_subtree(project, sg, loadables, seen, shape, node, &world, &mut Vec::new());
    }

    if let Executable::Workingstep(ws) = executable {
        let operation = store.operation(ws.operation);
        for &tp in &operation.toolpaths {
            let toolpath = store.toolpath(tp);
            let tp_node = sg.push(
                Some(node),
                Some(toolpath.doc_id.clone()),
                world,
                Drawable::Toolpath(tp),
            );
            let mut bbox = BoundingBox::new();
            bbox.update_from(toolpath.bounding_box(), Some(&world));
            sg.node_mut(tp_node).bbox = bbox;
            if !toolpath.is_loaded() && toolpath.href.is_some() {
                let handle = LoadHandle::Toolpath(tp);
                if seen.insert(handle) {
                    loadables.push(handle);
                }
            }
        }
        if let Some(tool) = operation.tool {
            add_shape_subtree(project, sg, loadables, seen, tool, node, &world, &mut Vec::new());
        }
    }

    for &child in executable.elements() {
        add_executable(project, sg, loadables, seen, child, node, &world);
    }

    let mut bbox = BoundingBox::new();
    let children = sg.node(node).children.clone();
    for child in children {
        let child_bbox = sg.node(child).bbox;
        bbox.update_from(&child_bbox, None);
    }
    sg.node_mut(node).bbox = bbox;
}

#[allow(clippy::too_many_arguments)]
fn add_shape_subtree(
    project: &Project,
    sg: &mut SceneGraph,
    loadables: &mut Vec<LoadHandle>,
    seen: &mut HashSet<LoadHandle>,
    shape_id: ShapeId,
    parent: NodeId,
    world: &Matrix4<f64>,
    path: &mut Vec<ShapeId>,
) {
    if path.contains(&shape_id) {
        return;
    }
    path.push(shape_id);

    let store = &project.store;
    let shape = store.shape(shape_id);
    let node = sg.push(
        Some(parent),
        shape.label.clone().or_else(|| Some(shape.doc_id.clone())),
        *world,
        Drawable::Shape(shape_id),
    );

    let mut bbox = BoundingBox::new();
    bbox.update_from(&shape.bounding_box(store), Some(world));
    sg.node_mut(node).bbox = bbox;

    for &shell in &shape.shells {
        let shell_obj = store.shell(shell);
        if !shell_obj.is_loaded() && shell_obj.href.is_some() {
            let handle = LoadHandle::Shell(shell);
            if seen.insert(handle) {
                loadables.push(handle);
            }
        }
    }

    for child in sorted_children(store, shape) {
        let child_world = world * child.xform;
        add_shape_subtree(
            project, sg, loadables, seen, child.shape, node, &child_world, path,
        );
    }
    path.pop();
}
