//! XML parsing for project documents
//!
//! Parsing happens in two phases. First a single quick-xml scan builds a
//! raw element arena with an id index; the document's
//! cross-references are by ID, so random access is needed regardless of
//! element nesting. Then typed builders walk the references from the
//! project root, allocating each object's arena slot and registry entry
//! *before* populating its fields, which lets re-entrant references to
//! the same ID (shared geometry, reference cycles) resolve to the slot
//! already being built instead of recursing forever.

mod geometry;
mod process;

use std::collections::HashMap;

use nalgebra::Matrix4;
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{Error, Result};
use crate::geom::{AFFINE_SIZE, BoundingBox, matrix_from_affine};
use crate::loader::ShellData;
use crate::model::{Executable, ModelStore, Project, Registry, ToolpathData};

pub(crate) use geometry::{extract_shell_data, extract_toolpath_data};

/// Default buffer capacity for XML parsing (4KB)
const XML_BUFFER_CAPACITY: usize = 4096;

/// One element of the scanned document
#[derive(Debug)]
pub(crate) struct RawElement {
    /// Element tag name
    pub tag: String,
    /// Attributes as key-value pairs
    pub attrs: HashMap<String, String>,
    /// Child elements, as indices into the document arena
    pub children: Vec<usize>,
}

/// A scanned document: element arena plus ID index
#[derive(Debug)]
pub(crate) struct Document {
    elements: Vec<RawElement>,
    index: HashMap<String, usize>,
    root: usize,
}

impl Document {
    /// Index of the root element
    pub fn root_index(&self) -> usize {
        self.root
    }

    /// Element by arena index
    pub fn element(&self, idx: usize) -> &RawElement {
        &self.elements[idx]
    }

    /// Arena index of the element with the given document ID
    pub fn by_id(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }
}

/// Scan an XML document into the element arena
///
/// Rejects DTD declarations (XXE hardening) and duplicate `id`
/// attributes. Text content is ignored; this format is attribute-driven.
pub(crate) fn parse_document(xml: &str) -> Result<Document> {
    // DOCTYPE declarations typically appear in the first couple of
    // kilobytes; scanning the prefix is enough to reject them
    let check_len = xml.len().min(2000);
    if xml[..check_len].to_lowercase().contains("<!doctype") {
        return Err(Error::InvalidXml(
            "DTD declarations are not allowed in project documents".to_string(),
        ));
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut elements: Vec<RawElement> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut root: Option<usize> = None;
    let mut buf = Vec::with_capacity(XML_BUFFER_CAPACITY);

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let idx = open_element(&mut elements, &mut index, &stack, &mut root, e)?;
                stack.push(idx);
            }
            Ok(Event::Empty(ref e)) => {
                open_element(&mut elements, &mut index, &stack, &mut root, e)?;
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(Error::Xml(e)),
        }
        buf.clear();
    }

    let root = root.ok_or_else(|| {
        Error::InvalidDocument("document contains no root element".to_string())
    })?;
    Ok(Document {
        elements,
        index,
        root,
    })
}

fn open_element(
    elements: &mut Vec<RawElement>,
    index: &mut HashMap<String, usize>,
    stack: &[usize],
    root: &mut Option<usize>,
    e: &quick_xml::events::BytesStart,
) -> Result<usize> {
    let tag = std::str::from_utf8(e.name().as_ref())
        .map_err(|err| Error::InvalidXml(err.to_string()))?
        .to_string();
    let attrs = parse_attributes(e)?;

    let idx = elements.len();
    if let Some(id) = attrs.get("id") {
        if index.insert(id.clone(), idx).is_some() {
            return Err(Error::InvalidModel(format!(
                "Duplicate document id '{}'",
                id
            )));
        }
    }
    elements.push(RawElement {
        tag,
        attrs,
        children: Vec::new(),
    });

    match stack.last() {
        Some(&parent) => elements[parent].children.push(idx),
        None => {
            if root.is_some() {
                return Err(Error::InvalidXml(
                    "document has more than one root element".to_string(),
                ));
            }
            *root = Some(idx);
        }
    }
    Ok(idx)
}

pub(crate) fn parse_attributes(
    e: &quick_xml::events::BytesStart,
) -> Result<HashMap<String, String>> {
    let mut attrs = HashMap::with_capacity(8);
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| Error::InvalidXml(e.to_string()))?;
        let value =
            std::str::from_utf8(&attr.value).map_err(|e| Error::InvalidXml(e.to_string()))?;
        attrs.insert(key.to_string(), value.to_string());
    }
    Ok(attrs)
}

/// Reject unknown attributes on an element
pub(crate) fn validate_attributes(
    attrs: &HashMap<String, String>,
    allowed: &[&str],
    element_name: &str,
) -> Result<()> {
    for key in attrs.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(Error::InvalidXml(format!(
                "Unknown attribute '{}' on <{}>",
                key, element_name
            )));
        }
    }
    Ok(())
}

pub(crate) fn require_attr<'a>(elem: &'a RawElement, name: &str) -> Result<&'a str> {
    elem.attrs
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| Error::missing_attribute(&elem.tag, name))
}

pub(crate) fn expect_tag(elem: &RawElement, expected: &str) -> Result<()> {
    if elem.tag != expected {
        return Err(Error::InvalidXml(format!(
            "expected <{}> element, found <{}>",
            expected, elem.tag
        )));
    }
    Ok(())
}

pub(crate) fn parse_f64_finite(field: &str, value: &str) -> Result<f64> {
    let parsed: f64 = value
        .parse()
        .map_err(|_| Error::parse_error_with_context(field, value, "finite number"))?;
    if !parsed.is_finite() {
        return Err(Error::parse_error_with_context(
            field,
            value,
            "finite number",
        ));
    }
    Ok(parsed)
}

pub(crate) fn parse_u64(field: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::parse_error_with_context(field, value, "unsigned integer"))
}

pub(crate) fn parse_bool(field: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(Error::parse_error_with_context(field, value, "boolean")),
    }
}

pub(crate) fn parse_triple_attr(field: &str, value: &str) -> Result<[f64; 3]> {
    let mut out = [0.0; 3];
    let mut count = 0;
    for part in value.split_whitespace() {
        if count == 3 {
            count += 1;
            break;
        }
        out[count] = parse_f64_finite(field, part)?;
        count += 1;
    }
    if count != 3 {
        return Err(Error::ParseError(format!(
            "'{}' must have exactly 3 components (got '{}')",
            field, value
        )));
    }
    Ok(out)
}

/// Parse a 12-value wire-format affine transform
pub(crate) fn parse_affine_attr(value: &str) -> Result<Matrix4<f64>> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != AFFINE_SIZE {
        return Err(Error::InvalidXml(format!(
            "Transform must have exactly {} values (got {})",
            AFFINE_SIZE,
            parts.len()
        )));
    }
    let mut values = [0.0; AFFINE_SIZE];
    for (i, part) in parts.iter().enumerate() {
        values[i] = parse_f64_finite("transform value", part)?;
    }
    Ok(matrix_from_affine(&values))
}

/// Parse a `bbox` attribute: `minx miny minz maxx maxy maxz`
pub(crate) fn parse_bbox_attr(value: &str) -> Result<BoundingBox> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 6 {
        return Err(Error::InvalidXml(format!(
            "bbox must have exactly 6 values (got {})",
            parts.len()
        )));
    }
    let mut values = [0.0; 6];
    for (i, part) in parts.iter().enumerate() {
        values[i] = parse_f64_finite("bbox value", part)?;
    }
    for axis in 0..3 {
        if values[axis] > values[axis + 3] {
            return Err(Error::InvalidModel(format!(
                "bbox min {} exceeds max {}",
                values[axis],
                values[axis + 3]
            )));
        }
    }
    let mut bbox = BoundingBox::new();
    bbox.update(&nalgebra::Point3::new(values[0], values[1], values[2]), None);
    bbox.update(&nalgebra::Point3::new(values[3], values[4], values[5]), None);
    Ok(bbox)
}

pub(crate) fn id_list(value: &str) -> impl Iterator<Item = &str> {
    value.split_whitespace()
}

/// Typed model builder over a scanned document
///
/// Owns the registry and store being populated; each `build_*` method
/// memoizes through the registry, so the same document ID always yields
/// the same arena slot however many references reach it.
pub(crate) struct Builder<'doc> {
    pub doc: &'doc Document,
    pub registry: Registry,
    pub store: ModelStore,
}

/// Parse a complete project document
pub(crate) fn parse_project(xml: &str) -> Result<Project> {
    let doc = parse_document(xml)?;
    let root = doc.element(doc.root_index());
    expect_tag(root, "project")
        .map_err(|_| Error::InvalidDocument("root element must be <project>".to_string()))?;
    validate_attributes(&root.attrs, &["name", "wplan", "as_is", "to_be"], "project")?;

    let mut builder = Builder {
        doc: &doc,
        registry: Registry::new(),
        store: ModelStore::new(),
    };

    let as_is = match root.attrs.get("as_is") {
        Some(id) => Some(builder.build_shape_by_id(id, "project")?),
        None => None,
    };
    let to_be = match root.attrs.get("to_be") {
        Some(id) => Some(builder.build_shape_by_id(id, "project")?),
        None => None,
    };

    let wplan_ref = require_attr(root, "wplan")?;
    let main_workplan = builder.build_executable_by_id(wplan_ref, "project")?;
    if !matches!(
        builder.store.executable(main_workplan),
        Executable::Workplan(_)
    ) {
        return Err(Error::InvalidDocument(format!(
            "'wplan' must reference a workplan, '{}' is a {}",
            wplan_ref,
            builder.store.executable(main_workplan).tag()
        )));
    }

    Ok(Project {
        name: root.attrs.get("name").cloned(),
        store: builder.store,
        registry: builder.registry,
        main_workplan,
        as_is,
        to_be,
    })
}

/// Parse the payload document of a deferred shell fetch
pub(crate) fn parse_shell_payload(xml: &str, doc_id: &str) -> Result<ShellData> {
    let doc = parse_document(xml)?;
    let root = doc.element(doc.root_index());
    expect_tag(root, "shell")?;
    if let Some(id) = root.attrs.get("id") {
        if id != doc_id {
            return Err(Error::InvalidDocument(format!(
                "shell payload id '{}' does not match requested '{}'",
                id, doc_id
            )));
        }
    }
    extract_shell_data(&doc, doc.root_index())
}

/// Parse the payload document of a deferred toolpath fetch
pub(crate) fn parse_toolpath_payload(xml: &str, doc_id: &str) -> Result<ToolpathData> {
    let doc = parse_document(xml)?;
    let root = doc.element(doc.root_index());
    expect_tag(root, "toolpath")?;
    if let Some(id) = root.attrs.get("id") {
        if id != doc_id {
            return Err(Error::InvalidDocument(format!(
                "toolpath payload id '{}' does not match requested '{}'",
                id, doc_id
            )));
        }
    }
    extract_toolpath_data(&doc, doc.root_index())
}
