//! Error types for project-document parsing and scene operations
//!
//! This module provides error handling for all STEP-NC project operations.
//! All errors include error codes for categorization and enough context to
//! identify the offending element in the source document.
//!
//! # Error Codes
//!
//! Error codes follow the pattern: `E<category><number>`
//!
//! Categories:
//! - **E1xxx**: I/O and deferred-fetch errors
//! - **E2xxx**: XML parsing and structure errors
//! - **E3xxx**: Model validation and state errors
//! - **E4xxx**: Unsupported features
//!
//! ## Common Error Codes
//!
//! - `E1001`: I/O error reading a document
//! - `E1002`: Deferred data fetch failed
//! - `E2001`: XML parsing error
//! - `E2002`: XML attribute error
//! - `E2003`: Invalid XML structure
//! - `E2004`: Invalid project document
//! - `E3001`: Invalid model structure
//! - `E3002`: Numeric parse error
//! - `E3003`: Geometry queried before its data was loaded
//! - `E4001`: Unsupported feature

use std::io;
use thiserror::Error;

/// Result type for project operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when parsing or operating on a project document
#[derive(Error, Debug)]
pub enum Error {
    /// IO error occurred while reading a document
    ///
    /// **Error Code**: E1001
    #[error("[E1001] I/O error: {0}")]
    Io(#[from] io::Error),

    /// A deferred shell or toolpath fetch failed
    ///
    /// **Error Code**: E1002
    ///
    /// **Common Causes**:
    /// - Unreachable or missing `href` target
    /// - Data source rejected the request
    ///
    /// The target of a failed fetch is left unloaded; the request is not
    /// retried.
    #[error("[E1002] fetch of '{href}' failed: {reason}")]
    Fetch {
        /// The `href` whose fetch failed
        href: String,
        /// Reason reported by the data source
        reason: String,
    },

    /// XML parsing error
    ///
    /// **Error Code**: E2001
    #[error("[E2001] XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// XML attribute error
    ///
    /// **Error Code**: E2002
    ///
    /// **Common Causes**:
    /// - Missing required attribute
    /// - Duplicate or malformed attribute
    #[error("[E2002] XML attribute error: {0}")]
    XmlAttr(String),

    /// Invalid XML structure
    ///
    /// **Error Code**: E2003
    ///
    /// **Common Causes**:
    /// - Missing required XML elements
    /// - Wrong element tag behind a cross-reference
    /// - Invalid element nesting
    #[error("[E2003] Invalid XML structure: {0}")]
    InvalidXml(String),

    /// Invalid project document
    ///
    /// **Error Code**: E2004
    ///
    /// **Common Causes**:
    /// - Missing `<project>` root element
    /// - Dangling ID reference
    #[error("[E2004] Invalid project document: {0}")]
    InvalidDocument(String),

    /// Invalid model structure or validation failure
    ///
    /// **Error Code**: E3001
    ///
    /// **Common Causes**:
    /// - Facet vertex indices out of bounds
    /// - Toolpath sample arrays of mismatched length
    /// - Non-monotonic toolpath distance samples
    /// - Duplicate document IDs
    #[error("[E3001] Invalid model: {0}")]
    InvalidModel(String),

    /// Parse error for numeric values
    ///
    /// **Error Code**: E3002
    ///
    /// **Common Causes**:
    /// - Invalid number format
    /// - Non-finite values where finite numbers are required
    #[error("[E3002] Parse error: {0}")]
    ParseError(String),

    /// Geometry was queried before its data was loaded
    ///
    /// **Error Code**: E3003
    ///
    /// Deferred shells and toolpaths must be loaded through the load queue
    /// before positional queries are made against them.
    #[error("[E3003] '{0}' is not loaded")]
    NotLoaded(String),

    /// Unsupported feature
    ///
    /// **Error Code**: E4001
    ///
    /// **Common Causes**:
    /// - A workingstep subtype this engine does not implement
    ///   (`frame_definition_workingstep`, `compensation_workingstep`)
    #[error("[E4001] Unsupported feature: {0}")]
    Unsupported(String),
}

impl From<std::num::ParseFloatError> for Error {
    fn from(err: std::num::ParseFloatError) -> Self {
        Error::ParseError(format!("Failed to parse floating-point number: {}", err))
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::ParseError(format!("Failed to parse integer: {}", err))
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::XmlAttr(format!("Attribute parsing failed: {}", err))
    }
}

impl Error {
    /// Create an InvalidXml error with element context
    ///
    /// # Example
    /// ```ignore
    /// Error::invalid_element("v", "expected 3 coordinates")
    /// ```
    pub fn invalid_element(element: &str, message: &str) -> Self {
        Error::InvalidXml(format!("Element '<{}>': {}", element, message))
    }

    /// Create an InvalidXml error for a missing required attribute
    pub fn missing_attribute(element: &str, attribute: &str) -> Self {
        Error::InvalidXml(format!(
            "Element '<{}>' is missing required attribute '{}'",
            element, attribute
        ))
    }

    /// Create a ParseError with context about what was being parsed
    ///
    /// # Arguments
    /// * `field_name` - The name of the field being parsed (e.g., "vertex coordinate")
    /// * `value` - The value that failed to parse
    /// * `expected_type` - The expected type (e.g., "finite number")
    pub fn parse_error_with_context(field_name: &str, value: &str, expected_type: &str) -> Self {
        Error::ParseError(format!(
            "Failed to parse '{}': expected {}, got '{}'",
            field_name, expected_type, value
        ))
    }

    /// Create an InvalidDocument error for an ID reference with no target
    pub fn dangling_reference(from_element: &str, id: &str) -> Self {
        Error::InvalidDocument(format!(
            "Element '<{}>' references unknown id '{}'",
            from_element, id
        ))
    }
}
