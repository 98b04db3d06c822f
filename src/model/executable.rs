//! The machining process tree
//!
//! Executables mirror the manufacturing plan: a [`Workplan`] sequences
//! steps, a [`Workingstep`] performs one operation, and a [`Selective`]
//! groups alternatives of which only the enabled ones are shown. The
//! variant set is a closed enum matched exhaustively at construction;
//! the two workingstep subtypes this engine does not implement are
//! rejected by the parser with an unsupported-feature error rather than
//! registered as placeholders that fail on use.

use nalgebra::Matrix4;

use crate::geom::BoundingBox;
use crate::model::{ExecutableId, ModelStore, OperationId, PlacementId, ShapeId};

/// A named transform referenced as a setup by executables
#[derive(Debug, Clone)]
pub struct Placement {
    /// Document ID of this placement
    pub doc_id: String,
    /// Display name
    pub name: Option<String>,
    /// Maps setup-local coordinates into machine coordinates
    pub xform: Matrix4<f64>,
}

/// Fields shared by every executable variant
///
/// Everything here is read-only after construction except `enabled`,
/// which the UI toggles.
#[derive(Debug)]
pub struct ExecutableBase {
    /// Document ID of this executable
    pub doc_id: String,
    /// Display name
    pub name: Option<String>,
    /// Whether this step participates in drawing and aggregation
    pub enabled: bool,
    /// Workpiece geometry before this step
    pub as_is: Option<ShapeId>,
    /// Workpiece geometry after this step
    pub to_be: Option<ShapeId>,
    /// Fixture geometry holding the workpiece
    pub fixture: Option<ShapeId>,
    /// Setup placement positioning the workpiece
    pub setup: Option<PlacementId>,
}

/// A single machining step executing one operation
#[derive(Debug)]
pub struct Workingstep {
    /// Shared executable fields
    pub base: ExecutableBase,
    /// The operation this step executes
    pub operation: OperationId,
}

/// A group of alternative executables
///
/// All alternatives are present in the scene graph; disabled ones get a
/// visibility override so only enabled alternatives draw.
#[derive(Debug)]
pub struct Selective {
    /// Shared executable fields
    pub base: ExecutableBase,
    /// The alternatives, in document order
    pub elements: Vec<ExecutableId>,
}

/// An ordered sequence of executables
#[derive(Debug)]
pub struct Workplan {
    /// Shared executable fields
    pub base: ExecutableBase,
    /// The sequence, in execution order
    pub elements: Vec<ExecutableId>,
}

/// A step in the machining process tree
#[derive(Debug)]
pub enum Executable {
    /// A single machining step
    Workingstep(Workingstep),
    /// A group of alternatives
    Selective(Selective),
    /// A nested sequence
    Workplan(Workplan),
}

impl Executable {
    /// Shared fields of whichever variant this is
    pub fn base(&self) -> &ExecutableBase {
        match self {
            Executable::Workingstep(ws) => &ws.base,
            Executable::Selective(sel) => &sel.base,
            Executable::Workplan(wp) => &wp.base,
        }
    }

    /// Mutable shared fields
    pub fn base_mut(&mut self) -> &mut ExecutableBase {
        match self {
            Executable::Workingstep(ws) => &mut ws.base,
            Executable::Selective(sel) => &mut sel.base,
            Executable::Workplan(wp) => &mut wp.base,
        }
    }

    /// Child executables, empty for workingsteps
    pub fn elements(&self) -> &[ExecutableId] {
        match self {
            Executable::Workingstep(_) => &[],
            Executable::Selective(sel) => &sel.elements,
            Executable::Workplan(wp) => &wp.elements,
        }
    }

    /// Whether this step participates in drawing and aggregation
    pub fn is_enabled(&self) -> bool {
        self.base().enabled
    }

    /// Toggle participation
    pub fn set_enabled(&mut self, enabled: bool) {
        self.base_mut().enabled = enabled;
    }

    /// Kind name as it appears in the wire format
    pub fn tag(&self) -> &'static str {
        match self {
            Executable::Workingstep(_) => "workingstep",
            Executable::Selective(_) => "selective",
            Executable::Workplan(_) => "workplan",
        }
    }

    /// Aggregate bounding box of this step and everything below it
    ///
    /// Unions the as-is/to-be/fixture shape boxes and, for workingsteps,
    /// the operation's toolpath boxes, all mapped through the setup
    /// placement when one is present. Child executables contribute
    /// recursively; reference cycles are cut by tracking the recursion
    /// path.
    pub fn bounding_box(&self, store: &ModelStore) -> BoundingBox {
        let mut bbox = BoundingBox::new();
        let mut path = Vec::new();
        self.bbox_into(store, &mut bbox, &mut path);
        bbox
    }

    fn bbox_into(&self, store: &ModelStore, out: &mut BoundingBox, path: &mut Vec<String>) {
        let base = self.base();
        if path.iter().any(|id| id == &base.doc_id) {
            return;
        }
        path.push(base.doc_id.clone());

        let setup_xform = base.setup.map(|p| store.placement(p).xform);
        for shape in [base.as_is, base.to_be, base.fixture].into_iter().flatten() {
            out.update_from(&store.shape(shape).bounding_box(store), setup_xform.as_ref());
        }
        if let Executable::Workingstep(ws) = self {
            out.update_from(
                &store.operation(ws.operation).bounding_box(store),
                setup_xform.as_ref(),
            );
        }
        for &child in self.elements() {
            store.executable(child).bbox_into(store, out, path);
        }

        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Shape;
    use nalgebra::{Point3, Vector3};

    fn base(doc_id: &str) -> ExecutableBase {
        ExecutableBase {
            doc_id: doc_id.to_string(),
            name: None,
            enabled: true,
            as_is: None,
            to_be: None,
            fixture: None,
            setup: None,
        }
    }

    #[test]
    fn test_enabled_toggle() {
        let mut ex = Executable::Workplan(Workplan {
            base: base("wp1"),
            elements: Vec::new(),
        });
        assert!(ex.is_enabled());
        ex.set_enabled(false);
        assert!(!ex.is_enabled());
    }

    #[test]
    fn test_workplan_bbox_unions_children() {
        let mut store = ModelStore::new();

        let mut shell_a = crate::model::Shell::new(
            "sa",
            None,
            None,
            BoundingBox::from_extents(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)),
        );
        shell_a.mark_use();
        let mut shell_b = crate::model::Shell::new(
            "sb",
            None,
            None,
            BoundingBox::from_extents(Point3::new(5.0, 5.0, 5.0), Point3::new(6.0, 6.0, 6.0)),
        );
        shell_b.mark_use();
        store.shells.push(shell_a);
        store.shells.push(shell_b);

        for (i, doc_id) in ["shape_a", "shape_b"].iter().enumerate() {
            store.shapes.push(Shape {
                doc_id: doc_id.to_string(),
                label: None,
                shells: vec![crate::model::ShellId(i)],
                annotations: Vec::new(),
                children: Vec::new(),
            });
        }

        store.operations.push(empty_operation());
        let mut ws_a = base("ws_a");
        ws_a.to_be = Some(crate::model::ShapeId(0));
        let mut ws_b = base("ws_b");
        ws_b.to_be = Some(crate::model::ShapeId(1));
        store.executables.push(Executable::Workingstep(Workingstep {
            base: ws_a,
            operation: OperationId(0),
        }));
        store.executables.push(Executable::Workingstep(Workingstep {
            base: ws_b,
            operation: OperationId(0),
        }));

        let plan = Executable::Workplan(Workplan {
            base: base("wp"),
            elements: vec![ExecutableId(0), ExecutableId(1)],
        });
        let bbox = plan.bounding_box(&store);
        assert_eq!(bbox.minx, 0.0);
        assert_eq!(bbox.maxx, 6.0);
    }

    #[test]
    fn test_setup_placement_transforms_shapes() {
        let mut store = ModelStore::new();
        let mut shell = crate::model::Shell::new(
            "s",
            None,
            None,
            BoundingBox::from_extents(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)),
        );
        shell.mark_use();
        store.shells.push(shell);
        store.shapes.push(Shape {
            doc_id: "shape".to_string(),
            label: None,
            shells: vec![crate::model::ShellId(0)],
            annotations: Vec::new(),
            children: Vec::new(),
        });
        store.placements.push(Placement {
            doc_id: "pl".to_string(),
            name: Some("setup1".to_string()),
            xform: Matrix4::new_translation(&Vector3::new(100.0, 0.0, 0.0)),
        });
        store.operations.push(empty_operation());

        let mut b = base("ws");
        b.to_be = Some(crate::model::ShapeId(0));
        b.setup = Some(PlacementId(0));
        let ws = Executable::Workingstep(Workingstep {
            base: b,
            operation: OperationId(0),
        });
        let bbox = ws.bounding_box(&store);
        assert_eq!(bbox.minx, 100.0);
        assert_eq!(bbox.maxx, 101.0);
    }

    fn empty_operation() -> crate::model::Operation {
        crate::model::Operation {
            doc_id: "op".to_string(),
            name: None,
            toolpaths: Vec::new(),
            tool: None,
        }
    }
}
