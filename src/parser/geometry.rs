//! Geometry element parsing: shapes, shells, annotations
//!
//! Builders memoize through the registry so shared sub-geometry
//! constructs once. A shape's arena slot and registry entry exist before
//! its children build, which is what cuts reference cycles in the source
//! document.

use nalgebra::{Matrix4, Point3};

use crate::error::{Error, Result};
use crate::geom::BoundingBox;
use crate::loader::{FacetGroupData, FacetRow, ShellData};
use crate::model::{
    Annotation, AnnotationId, ObjectRef, Shape, ShapeChild, ShapeId, Shell, ShellId, ToolpathData,
};

use super::{
    Builder, Document, expect_tag, id_list, parse_bbox_attr, parse_f64_finite, parse_triple_attr,
    parse_u64, require_attr, validate_attributes,
};

impl Builder<'_> {
    /// Build the shape behind a document ID reference
    pub fn build_shape_by_id(&mut self, id: &str, from_tag: &str) -> Result<ShapeId> {
        let idx = self.resolve(id, from_tag)?;
        self.build_shape(idx)
    }

    /// Build a shape element, memoized
    pub fn build_shape(&mut self, idx: usize) -> Result<ShapeId> {
        let doc = self.doc;
        let elem = doc.element(idx);
        expect_tag(elem, "shape")?;
        let id = require_attr(elem, "id")?;
        if let Some(existing) = self.registry.find(id) {
            return match existing {
                ObjectRef::Shape(shape_id) => Ok(shape_id),
                other => Err(wrong_kind(id, "shape", other)),
            };
        }
        validate_attributes(&elem.attrs, &["id", "label", "shells", "annotations"], "shape")?;

        // Slot and registry entry first: a child that references this
        // shape back resolves to the slot under construction
        let shape_id = ShapeId(self.store.shapes.len());
        self.store.shapes.push(Shape {
            doc_id: id.to_string(),
            label: elem.attrs.get("label").cloned(),
            shells: Vec::new(),
            annotations: Vec::new(),
            children: Vec::new(),
        });
        self.registry.insert(id, ObjectRef::Shape(shape_id))?;

        let mut shells = Vec::new();
        if let Some(refs) = elem.attrs.get("shells") {
            for shell_ref in id_list(refs) {
                let shell_id = self.build_shell_by_id(shell_ref, "shape")?;
                self.store.shell_mut(shell_id).mark_use();
                shells.push(shell_id);
            }
        }

        let mut annotations = Vec::new();
        if let Some(refs) = elem.attrs.get("annotations") {
            for ann_ref in id_list(refs) {
                annotations.push(self.build_annotation_by_id(ann_ref, "shape")?);
            }
        }

        let mut children = Vec::new();
        for &child_idx in &doc.element(idx).children {
            let child_elem = doc.element(child_idx);
            expect_tag(child_elem, "child")?;
            validate_attributes(&child_elem.attrs, &["ref", "xform"], "child")?;
            let child_ref = require_attr(child_elem, "ref")?;
            let xform = match child_elem.attrs.get("xform") {
                Some(raw) => super::parse_affine_attr(raw)?,
                None => Matrix4::identity(),
            };
            let inv_xform = xform.try_inverse().ok_or_else(|| {
                Error::InvalidModel(format!(
                    "child transform of shape '{}' is singular",
                    id
                ))
            })?;
            let child_shape = self.build_shape_by_id(child_ref, "child")?;
            children.push(ShapeChild {
                shape: child_shape,
                xform,
                inv_xform,
            });
        }

        let shape = &mut self.store.shapes[shape_id.0];
        shape.shells = shells;
        shape.annotations = annotations;
        shape.children = children;
        Ok(shape_id)
    }

    /// Build the shell behind a document ID reference
    pub fn build_shell_by_id(&mut self, id: &str, from_tag: &str) -> Result<ShellId> {
        let idx = self.resolve(id, from_tag)?;
        self.build_shell(idx)
    }

    /// Build a shell element, memoized
    ///
    /// Inline shells load their mesh immediately; deferred shells carry
    /// only metadata until serviced by a load queue.
    pub fn build_shell(&mut self, idx: usize) -> Result<ShellId> {
        let doc = self.doc;
        let elem = doc.element(idx);
        expect_tag(elem, "shell")?;
        let id = require_attr(elem, "id")?;
        if let Some(existing) = self.registry.find(id) {
            return match existing {
                ObjectRef::Shell(shell_id) => Ok(shell_id),
                other => Err(wrong_kind(id, "shell", other)),
            };
        }
        validate_attributes(&elem.attrs, &["id", "size", "bbox", "href"], "shell")?;

        let href = elem.attrs.get("href").cloned();
        let size = match elem.attrs.get("size") {
            Some(raw) => Some(parse_u64("shell size", raw)?),
            None => None,
        };
        let bbox = match elem.attrs.get("bbox") {
            Some(raw) => parse_bbox_attr(raw)?,
            None => BoundingBox::new(),
        };

        let shell_id = ShellId(self.store.shells.len());
        self.store
            .shells
            .push(Shell::new(id, href.clone(), size, bbox));
        self.registry.insert(id, ObjectRef::Shell(shell_id))?;

        if href.is_none() {
            let data = extract_shell_data(doc, idx)?;
            self.store.shell_mut(shell_id).load_all(data)?;
        } else if !elem.children.is_empty() {
            return Err(Error::InvalidXml(format!(
                "deferred shell '{}' must not contain inline data",
                id
            )));
        }
        Ok(shell_id)
    }

    /// Build the annotation behind a document ID reference
    pub fn build_annotation_by_id(&mut self, id: &str, from_tag: &str) -> Result<AnnotationId> {
        let idx = self.resolve(id, from_tag)?;
        self.build_annotation(idx)
    }

    /// Build an annotation element, memoized
    pub fn build_annotation(&mut self, idx: usize) -> Result<AnnotationId> {
        let doc = self.doc;
        let elem = doc.element(idx);
        expect_tag(elem, "annotation")?;
        let id = require_attr(elem, "id")?;
        if let Some(existing) = self.registry.find(id) {
            return match existing {
                ObjectRef::Annotation(ann_id) => Ok(ann_id),
                other => Err(wrong_kind(id, "annotation", other)),
            };
        }
        validate_attributes(&elem.attrs, &["id", "label"], "annotation")?;

        let mut polylines = Vec::new();
        for &poly_idx in &elem.children {
            let poly = doc.element(poly_idx);
            expect_tag(poly, "polyline")?;
            let mut points = Vec::with_capacity(poly.children.len());
            for &p_idx in &poly.children {
                let p = doc.element(p_idx);
                expect_tag(p, "p")?;
                validate_attributes(&p.attrs, &["l"], "p")?;
                let [x, y, z] = parse_triple_attr("annotation point", require_attr(p, "l")?)?;
                points.push(Point3::new(x, y, z));
            }
            polylines.push(points);
        }

        let ann_id = AnnotationId(self.store.annotations.len());
        self.store.annotations.push(Annotation {
            doc_id: id.to_string(),
            label: elem.attrs.get("label").cloned(),
            polylines,
        });
        self.registry.insert(id, ObjectRef::Annotation(ann_id))?;
        Ok(ann_id)
    }

    pub(super) fn resolve(&self, id: &str, from_tag: &str) -> Result<usize> {
        self.doc
            .by_id(id)
            .ok_or_else(|| Error::dangling_reference(from_tag, id))
    }
}

pub(super) fn wrong_kind(id: &str, expected: &str, found: ObjectRef) -> Error {
    Error::InvalidXml(format!(
        "reference '{}' expected a {} element, found a {}",
        id,
        expected,
        found.kind()
    ))
}

/// Extract the raw vertex and facet rows of an inline shell
///
/// Rows stay unparsed; the chunk task parses numbers so a large mesh
/// spreads its cost across steps.
pub(crate) fn extract_shell_data(doc: &Document, idx: usize) -> Result<ShellData> {
    let elem = doc.element(idx);
    let mut verts = Vec::new();
    let mut groups = Vec::new();

    for &child_idx in &elem.children {
        let child = doc.element(child_idx);
        match child.tag.as_str() {
            "verts" => {
                verts.reserve(child.children.len());
                for &v_idx in &child.children {
                    let v = doc.element(v_idx);
                    expect_tag(v, "v")?;
                    validate_attributes(&v.attrs, &["p"], "v")?;
                    verts.push(require_attr(v, "p")?.to_string());
                }
            }
            "facets" => {
                validate_attributes(&child.attrs, &["color"], "facets")?;
                let mut facets = Vec::with_capacity(child.children.len());
                for &f_idx in &child.children {
                    let f = doc.element(f_idx);
                    expect_tag(f, "f")?;
                    validate_attributes(&f.attrs, &["v", "n"], "f")?;
                    facets.push(FacetRow {
                        vertices: require_attr(f, "v")?.to_string(),
                        normal: f.attrs.get("n").cloned(),
                    });
                }
                groups.push(FacetGroupData {
                    color: child.attrs.get("color").cloned(),
                    facets,
                });
            }
            other => {
                return Err(Error::invalid_element(
                    other,
                    "not allowed inside <shell>",
                ));
            }
        }
    }
    Ok(ShellData { verts, groups })
}

/// Parse the sample rows of an inline toolpath
///
/// Enforces the loaded-toolpath invariants at the single entry point:
/// matched array lengths by construction and non-decreasing cumulative
/// distance.
pub(crate) fn extract_toolpath_data(doc: &Document, idx: usize) -> Result<ToolpathData> {
    let elem = doc.element(idx);
    let mut points = Vec::with_capacity(elem.children.len());
    let mut axes = Vec::with_capacity(elem.children.len());
    let mut dsamples = Vec::with_capacity(elem.children.len());
    let mut tsamples = Vec::with_capacity(elem.children.len());

    for &p_idx in &elem.children {
        let p = doc.element(p_idx);
        expect_tag(p, "p")?;
        validate_attributes(&p.attrs, &["l", "a", "d", "t"], "p")?;
        let [x, y, z] = parse_triple_attr("toolpath location", require_attr(p, "l")?)?;
        points.push(Point3::new(x, y, z));
        let axis = match p.attrs.get("a") {
            Some(raw) => {
                let [i, j, k] = parse_triple_attr("toolpath axis", raw)?;
                nalgebra::Vector3::new(i, j, k)
            }
            None => nalgebra::Vector3::new(0.0, 0.0, 1.0),
        };
        axes.push(axis);
        let d = parse_f64_finite("toolpath distance", require_attr(p, "d")?)?;
        if let Some(&prev) = dsamples.last() {
            if d < prev {
                return Err(Error::InvalidModel(format!(
                    "toolpath distance samples must be non-decreasing ({} after {})",
                    d, prev
                )));
            }
        }
        dsamples.push(d);
        tsamples.push(parse_f64_finite(
            "toolpath time",
            require_attr(p, "t")?,
        )?);
    }

    Ok(ToolpathData {
        points,
        axes,
        dsamples,
        tsamples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_document;

    #[test]
    fn test_extract_shell_data_rows() {
        let doc = parse_document(
            r#"<shell id="s1">
                 <verts><v p="0 0 0"/><v p="1 0 0"/><v p="0 1 0"/></verts>
                 <facets color="1 0 0"><f v="0 1 2" n="0 0 1"/></facets>
               </shell>"#,
        )
        .unwrap();
        let data = extract_shell_data(&doc, doc.root_index()).unwrap();
        assert_eq!(data.verts.len(), 3);
        assert_eq!(data.groups.len(), 1);
        assert_eq!(data.groups[0].color.as_deref(), Some("1 0 0"));
        assert_eq!(data.groups[0].facets[0].vertices, "0 1 2");
    }

    #[test]
    fn test_extract_shell_data_rejects_foreign_children() {
        let doc = parse_document(r#"<shell id="s1"><mesh/></shell>"#).unwrap();
        let err = extract_shell_data(&doc, doc.root_index()).unwrap_err();
        assert!(err.to_string().contains("not allowed inside <shell>"));
    }

    #[test]
    fn test_extract_toolpath_data_monotonic_guard() {
        let doc = parse_document(
            r#"<toolpath id="t1">
                 <p l="0 0 0" d="0" t="0"/>
                 <p l="1 0 0" d="1" t="0.1"/>
                 <p l="2 0 0" d="0.5" t="0.2"/>
               </toolpath>"#,
        )
        .unwrap();
        let err = extract_toolpath_data(&doc, doc.root_index()).unwrap_err();
        assert!(err.to_string().contains("non-decreasing"));
    }

    #[test]
    fn test_extract_toolpath_data_defaults_axis() {
        let doc = parse_document(
            r#"<toolpath id="t1">
                 <p l="0 0 0" d="0" t="0"/>
                 <p l="1 0 0" a="0 1 0" d="1" t="0.1"/>
               </toolpath>"#,
        )
        .unwrap();
        let data = extract_toolpath_data(&doc, doc.root_index()).unwrap();
        assert_eq!(data.axes[0], nalgebra::Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(data.axes[1], nalgebra::Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(data.points.len(), data.dsamples.len());
    }
}
