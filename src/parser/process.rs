//! Process element parsing: executables, operations, toolpaths,
//! placements
//!
//! Executable construction is an exhaustive match over the wire tags.
//! The two workingstep subtypes this engine does not implement are
//! rejected here with an unsupported-feature error, so a malformed or
//! future document fails loudly at parse instead of producing a silently
//! wrong scene.

use crate::error::{Error, Result};
use crate::geom::BoundingBox;
use crate::model::{
    Executable, ExecutableBase, ExecutableId, ObjectRef, Operation, OperationId, Placement,
    PlacementId, Selective, Toolpath, ToolpathId, Workingstep, Workplan,
};

use super::geometry::wrong_kind;
use super::{
    Builder, expect_tag, id_list, parse_bbox_attr, parse_bool, parse_u64, require_attr,
    validate_attributes,
};

/// Attributes shared by every executable element
const EXECUTABLE_ATTRS: [&str; 8] = [
    "id", "name", "enabled", "as_is", "to_be", "fixture", "setup", "elements",
];

impl Builder<'_> {
    /// Build the executable behind a document ID reference
    pub fn build_executable_by_id(&mut self, id: &str, from_tag: &str) -> Result<ExecutableId> {
        let idx = self.resolve(id, from_tag)?;
        self.build_executable(idx)
    }

    /// Build an executable element, memoized
    pub fn build_executable(&mut self, idx: usize) -> Result<ExecutableId> {
        let doc = self.doc;
        let elem = doc.element(idx);
        match elem.tag.as_str() {
            "workingstep" | "selective" | "workplan" => {}
            "frame_definition_workingstep" | "compensation_workingstep" => {
                return Err(Error::Unsupported(format!(
                    "<{}> elements are not implemented",
                    elem.tag
                )));
            }
            other => {
                return Err(Error::InvalidXml(format!(
                    "<{}> is not an executable element",
                    other
                )));
            }
        }
        let id = require_attr(elem, "id")?;
        if let Some(existing) = self.registry.find(id) {
            return match existing {
                ObjectRef::Executable(exec_id) => Ok(exec_id),
                other => Err(wrong_kind(id, "executable", other)),
            };
        }
        let mut attrs: Vec<&str> = EXECUTABLE_ATTRS.to_vec();
        if elem.tag == "workingstep" {
            attrs.retain(|a| *a != "elements");
            attrs.push("op");
        }
        validate_attributes(&elem.attrs, &attrs, &elem.tag)?;

        let name = elem.attrs.get("name").cloned();
        let enabled = match elem.attrs.get("enabled") {
            Some(raw) => parse_bool("enabled", raw)?,
            None => true,
        };
        let as_is = match elem.attrs.get("as_is") {
            Some(shape_ref) => Some(self.build_shape_by_id(shape_ref, &elem.tag)?),
            None => None,
        };
        let to_be = match elem.attrs.get("to_be") {
            Some(shape_ref) => Some(self.build_shape_by_id(shape_ref, &elem.tag)?),
            None => None,
        };
        let fixture = match elem.attrs.get("fixture") {
            Some(shape_ref) => Some(self.build_shape_by_id(shape_ref, &elem.tag)?),
            None => None,
        };
        let setup = match elem.attrs.get("setup") {
            Some(placement_ref) => Some(self.build_placement_by_id(placement_ref, &elem.tag)?),
            None => None,
        };

        // Register a placeholder before building child executables, so a
        // reference cycle through the elements list resolves here instead
        // of recursing forever. The validator rejects such cycles later.
        let exec_id = ExecutableId(self.store.executables.len());
        self.store.executables.push(Executable::Workplan(Workplan {
            base: ExecutableBase {
                doc_id: id.to_string(),
                name: None,
                enabled: true,
                as_is: None,
                to_be: None,
                fixture: None,
                setup: None,
            },
            elements: Vec::new(),
        }));
        self.registry.insert(id, ObjectRef::Executable(exec_id))?;

        let base = ExecutableBase {
            doc_id: id.to_string(),
            name,
            enabled,
            as_is,
            to_be,
            fixture,
            setup,
        };
        let built = match elem.tag.as_str() {
            "workingstep" => {
                let op_ref = require_attr(elem, "op")?;
                let operation = self.build_operation_by_id(op_ref, "workingstep")?;
                Executable::Workingstep(Workingstep { base, operation })
            }
            "selective" => {
                let elements = self.build_element_list(elem)?;
                Executable::Selective(Selective { base, elements })
            }
            "workplan" => {
                let elements = self.build_element_list(elem)?;
                Executable::Workplan(Workplan { base, elements })
            }
            _ => unreachable!("tag already matched above"),
        };
        self.store.executables[exec_id.0] = built;
        Ok(exec_id)
    }

    fn build_element_list(
        &mut self,
        elem: &super::RawElement,
    ) -> Result<Vec<ExecutableId>> {
        let mut elements = Vec::new();
        if let Some(refs) = elem.attrs.get("elements") {
            let refs = refs.clone();
            for exec_ref in id_list(&refs) {
                elements.push(self.build_executable_by_id(exec_ref, &elem.tag)?);
            }
        }
        Ok(elements)
    }

    /// Build the operation behind a document ID reference
    pub fn build_operation_by_id(&mut self, id: &str, from_tag: &str) -> Result<OperationId> {
        let idx = self.resolve(id, from_tag)?;
        self.build_operation(idx)
    }

    /// Build an operation element, memoized
    pub fn build_operation(&mut self, idx: usize) -> Result<OperationId> {
        let doc = self.doc;
        let elem = doc.element(idx);
        expect_tag(elem, "operation")?;
        let id = require_attr(elem, "id")?;
        if let Some(existing) = self.registry.find(id) {
            return match existing {
                ObjectRef::Operation(op_id) => Ok(op_id),
                other => Err(wrong_kind(id, "operation", other)),
            };
        }
        validate_attributes(&elem.attrs, &["id", "name", "toolpaths", "tool"], "operation")?;

        let mut toolpaths = Vec::new();
        if let Some(refs) = elem.attrs.get("toolpaths") {
            for tp_ref in id_list(refs) {
                let tp_id = self.build_toolpath_by_id(tp_ref, "operation")?;
                self.store.toolpath_mut(tp_id).mark_use();
                toolpaths.push(tp_id);
            }
        }
        let tool = match elem.attrs.get("tool") {
            Some(shape_ref) => Some(self.build_shape_by_id(shape_ref, "operation")?),
            None => None,
        };

        let op_id = OperationId(self.store.operations.len());
        self.store.operations.push(Operation {
            doc_id: id.to_string(),
            name: elem.attrs.get("name").cloned(),
            toolpaths,
            tool,
        });
        self.registry.insert(id, ObjectRef::Operation(op_id))?;
        Ok(op_id)
    }

    /// Build the toolpath behind a document ID reference
    pub fn build_toolpath_by_id(&mut self, id: &str, from_tag: &str) -> Result<ToolpathId> {
        let idx = self.resolve(id, from_tag)?;
        self.build_toolpath(idx)
    }

    /// Build a toolpath element, memoized
    ///
    /// Inline toolpaths parse their samples immediately; deferred ones
    /// carry only metadata until serviced by a load queue.
    pub fn build_toolpath(&mut self, idx: usize) -> Result<ToolpathId> {
        let doc = self.doc;
        let elem = doc.element(idx);
        expect_tag(elem, "toolpath")?;
        let id = require_attr(elem, "id")?;
        if let Some(existing) = self.registry.find(id) {
            return match existing {
                ObjectRef::Toolpath(tp_id) => Ok(tp_id),
                other => Err(wrong_kind(id, "toolpath", other)),
            };
        }
        validate_attributes(&elem.attrs, &["id", "size", "bbox", "href"], "toolpath")?;

        let href = elem.attrs.get("href").cloned();
        let size = match elem.attrs.get("size") {
            Some(raw) => Some(parse_u64("toolpath size", raw)?),
            None => None,
        };
        let bbox = match elem.attrs.get("bbox") {
            Some(raw) => parse_bbox_attr(raw)?,
            None => BoundingBox::new(),
        };

        let tp_id = ToolpathId(self.store.toolpaths.len());
        self.store
            .toolpaths
            .push(Toolpath::new(id, href.clone(), size, bbox));
        self.registry.insert(id, ObjectRef::Toolpath(tp_id))?;

        if href.is_none() {
            let data = super::extract_toolpath_data(doc, idx)?;
            self.store.toolpath_mut(tp_id).load(data);
        } else if !elem.children.is_empty() {
            return Err(Error::InvalidXml(format!(
                "deferred toolpath '{}' must not contain inline data",
                id
            )));
        }
        Ok(tp_id)
    }

    /// Build the placement behind a document ID reference
    pub fn build_placement_by_id(&mut self, id: &str, from_tag: &str) -> Result<PlacementId> {
        let idx = self.resolve(id, from_tag)?;
        self.build_placement(idx)
    }

    /// Build a placement element, memoized
    pub fn build_placement(&mut self, idx: usize) -> Result<PlacementId> {
        let doc = self.doc;
        let elem = doc.element(idx);
        expect_tag(elem, "placement")?;
        let id = require_attr(elem, "id")?;
        if let Some(existing) = self.registry.find(id) {
            return match existing {
                ObjectRef::Placement(pl_id) => Ok(pl_id),
                other => Err(wrong_kind(id, "placement", other)),
            };
        }
        validate_attributes(&elem.attrs, &["id", "name", "xform"], "placement")?;
        let xform = super::parse_affine_attr(require_attr(elem, "xform")?)?;

        let pl_id = PlacementId(self.store.placements.len());
        self.store.placements.push(Placement {
            doc_id: id.to_string(),
            name: elem.attrs.get("name").cloned(),
            xform,
        });
        self.registry.insert(id, ObjectRef::Placement(pl_id))?;
        Ok(pl_id)
    }
}
