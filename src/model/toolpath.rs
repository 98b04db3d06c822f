//! Toolpaths and machining operations
//!
//! A [`Toolpath`] is a lazily loaded polyline parameterized by cumulative
//! arc length and time. An [`Operation`] sequences toolpaths and carries
//! an optional reference to the cutting-tool shape; it answers
//! position-by-distance queries across the whole sequence.

use nalgebra::{Point3, Vector3};

use crate::error::{Error, Result};
use crate::geom::BoundingBox;
use crate::model::{ModelStore, ShapeId, ToolpathId};

/// Fallback tool axis when a sample set carries none
const DEFAULT_AXIS: Vector3<f64> = Vector3::new(0.0, 0.0, 1.0);

/// Fully loaded toolpath samples
///
/// All four arrays have equal length, and `dsamples` is non-decreasing
/// cumulative arc length; the position query's linear scan depends on
/// that ordering. Both properties are enforced when the data is parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolpathData {
    /// Tool location samples
    pub points: Vec<Point3<f64>>,
    /// Tool axis per sample
    pub axes: Vec<Vector3<f64>>,
    /// Cumulative arc length per sample
    pub dsamples: Vec<f64>,
    /// Timestamp per sample
    pub tsamples: Vec<f64>,
}

impl ToolpathData {
    /// Bounding box of the sample locations
    pub fn bounding_box(&self) -> BoundingBox {
        let mut bbox = BoundingBox::new();
        for p in &self.points {
            bbox.update(p, None);
        }
        bbox
    }

    /// Arc length covered by the samples
    pub fn length(&self) -> f64 {
        match (self.dsamples.first(), self.dsamples.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// Interpolated tool location and axis at arc length `d`
    ///
    /// `d` outside the sampled range clamps to the nearest endpoint
    /// sample; a distance exactly on a sample returns that sample
    /// exactly. The returned axis is unit length.
    pub fn position_at(&self, d: f64) -> Result<(Point3<f64>, Vector3<f64>)> {
        if self.points.is_empty() {
            return Err(Error::InvalidModel(
                "toolpath has no samples".to_string(),
            ));
        }
        let first = self.dsamples[0];
        let last = self.dsamples[self.dsamples.len() - 1];
        let d = d.clamp(first.min(last), last);

        // Linear scan for the bracketing segment
        let mut seg = self.dsamples.len() - 1;
        for i in 1..self.dsamples.len() {
            if d <= self.dsamples[i] {
                seg = i;
                break;
            }
        }
        if self.dsamples.len() == 1 {
            return Ok((self.points[0], normalize_axis(&self.axes[0])));
        }

        let d0 = self.dsamples[seg - 1];
        let d1 = self.dsamples[seg];
        let span = d1 - d0;
        let t = if span > 0.0 { (d - d0) / span } else { 0.0 };

        let p0 = &self.points[seg - 1];
        let p1 = &self.points[seg];
        let location = Point3::new(
            p0.x + (p1.x - p0.x) * t,
            p0.y + (p1.y - p0.y) * t,
            p0.z + (p1.z - p0.z) * t,
        );
        let a0 = &self.axes[seg - 1];
        let a1 = &self.axes[seg];
        let axis = a0 + (a1 - a0) * t;
        Ok((location, normalize_axis(&axis)))
    }
}

fn normalize_axis(axis: &Vector3<f64>) -> Vector3<f64> {
    let len = axis.norm();
    if len > 0.0 { axis / len } else { DEFAULT_AXIS }
}

/// Load state of a toolpath
#[derive(Debug)]
pub enum ToolpathState {
    /// No sample data in memory
    Unloaded,
    /// Sample data is resident
    Loaded(ToolpathData),
}

/// A lazily loaded tool-motion polyline
///
/// Deferred toolpaths are small compared to shells and load in a single
/// step; there is no chunked variant.
#[derive(Debug)]
pub struct Toolpath {
    /// Document ID of this toolpath
    pub doc_id: String,
    /// Fetch location for deferred data, `None` for inline toolpaths
    pub href: Option<String>,
    /// Declared sample count
    pub size: Option<u64>,
    /// Number of operations referencing this toolpath
    pub use_count: u32,
    bbox: BoundingBox,
    state: ToolpathState,
}

impl Toolpath {
    /// Create a toolpath in the unloaded state
    pub fn new(doc_id: &str, href: Option<String>, size: Option<u64>, bbox: BoundingBox) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            href,
            size,
            use_count: 0,
            bbox,
            state: ToolpathState::Unloaded,
        }
    }

    /// True when sample data is resident
    pub fn is_loaded(&self) -> bool {
        matches!(self.state, ToolpathState::Loaded(_))
    }

    /// The sample data, present iff loaded
    pub fn data(&self) -> Option<&ToolpathData> {
        match &self.state {
            ToolpathState::Loaded(data) => Some(data),
            ToolpathState::Unloaded => None,
        }
    }

    /// Best-known bounding box (declared until loaded)
    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Record another operation referencing this toolpath
    pub(crate) fn mark_use(&mut self) {
        self.use_count += 1;
    }

    /// Install loaded sample data
    pub fn load(&mut self, data: ToolpathData) {
        self.bbox.update_from(&data.bounding_box(), None);
        self.state = ToolpathState::Loaded(data);
    }

    /// Evict sample data
    pub fn unload(&mut self) {
        self.state = ToolpathState::Unloaded;
    }

    /// Arc length of the loaded samples
    pub fn length(&self) -> Result<f64> {
        self.data()
            .map(ToolpathData::length)
            .ok_or_else(|| Error::NotLoaded(format!("toolpath '{}'", self.doc_id)))
    }

    /// Interpolated tool location and axis at arc length `d`
    ///
    /// Fatal if the toolpath has not been loaded.
    pub fn tool_position_by_d(&self, d: f64) -> Result<(Point3<f64>, Vector3<f64>)> {
        self.data()
            .ok_or_else(|| Error::NotLoaded(format!("toolpath '{}'", self.doc_id)))?
            .position_at(d)
    }

    /// Load-priority score, same formula as shells
    pub fn rank(&self) -> f64 {
        let size = self.size.unwrap_or(1).max(1) as f64;
        f64::from(self.use_count) * self.bbox.volume() / size
    }

    /// Estimated sample cost of loading, 0 when already loaded
    pub fn unloaded_cost(&self) -> u64 {
        if self.is_loaded() {
            0
        } else {
            self.size.unwrap_or(0)
        }
    }
}

/// A machining operation: an ordered toolpath sequence plus the tool
#[derive(Debug)]
pub struct Operation {
    /// Document ID of this operation
    pub doc_id: String,
    /// Display name
    pub name: Option<String>,
    /// Toolpaths in execution order
    pub toolpaths: Vec<ToolpathId>,
    /// Geometry of the cutting tool, drawn at the queried position
    pub tool: Option<ShapeId>,
}

impl Operation {
    /// Combined arc length of all toolpaths
    ///
    /// Fatal if any toolpath in the sequence is unloaded.
    pub fn total_length(&self, store: &ModelStore) -> Result<f64> {
        let mut total = 0.0;
        for &tp in &self.toolpaths {
            total += store.toolpath(tp).length()?;
        }
        Ok(total)
    }

    /// Tool location and axis at cumulative arc length `d` across the
    /// whole sequence
    ///
    /// Scans the cumulative-length index linearly and delegates to the
    /// bracketing toolpath; `d` outside `[0, total]` clamps to the
    /// nearest end.
    pub fn tool_position_by_d(
        &self,
        store: &ModelStore,
        d: f64,
    ) -> Result<(Point3<f64>, Vector3<f64>)> {
        if self.toolpaths.is_empty() {
            return Err(Error::InvalidModel(format!(
                "operation '{}' has no toolpaths",
                self.doc_id
            )));
        }
        let total = self.total_length(store)?;
        let d = d.clamp(0.0, total);

        let mut base = 0.0;
        for (i, &tp) in self.toolpaths.iter().enumerate() {
            let toolpath = store.toolpath(tp);
            let len = toolpath.length()?;
            let last = i == self.toolpaths.len() - 1;
            if d <= base + len || last {
                let data = toolpath
                    .data()
                    .ok_or_else(|| Error::NotLoaded(format!("toolpath '{}'", toolpath.doc_id)))?;
                let local = data.dsamples.first().copied().unwrap_or(0.0) + (d - base);
                return data.position_at(local);
            }
            base += len;
        }
        unreachable!("scan always returns on the last toolpath")
    }

    /// Union of the toolpath bounding boxes
    pub fn bounding_box(&self, store: &ModelStore) -> BoundingBox {
        let mut bbox = BoundingBox::new();
        for &tp in &self.toolpaths {
            bbox.update_from(store.toolpath(tp).bounding_box(), None);
        }
        bbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_path() -> ToolpathData {
        ToolpathData {
            points: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(10.0, 0.0, 0.0),
                Point3::new(10.0, 5.0, 0.0),
            ],
            axes: vec![
                Vector3::new(0.0, 0.0, 1.0),
                Vector3::new(0.0, 0.0, 1.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            dsamples: vec![0.0, 10.0, 15.0],
            tsamples: vec![0.0, 1.0, 1.5],
        }
    }

    #[test]
    fn test_position_at_sample_boundary_is_exact() {
        let data = straight_path();
        let (loc, _) = data.position_at(10.0).unwrap();
        assert_eq!(loc, Point3::new(10.0, 0.0, 0.0));
        let (loc, _) = data.position_at(0.0).unwrap();
        assert_eq!(loc, Point3::new(0.0, 0.0, 0.0));
        let (loc, _) = data.position_at(15.0).unwrap();
        assert_eq!(loc, Point3::new(10.0, 5.0, 0.0));
    }

    #[test]
    fn test_position_at_interpolates() {
        let data = straight_path();
        let (loc, axis) = data.position_at(5.0).unwrap();
        assert_eq!(loc, Point3::new(5.0, 0.0, 0.0));
        assert!((axis - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-12);

        // Midway through the second segment the axis blends and is
        // re-normalized to unit length
        let (loc, axis) = data.position_at(12.5).unwrap();
        assert_eq!(loc, Point3::new(10.0, 2.5, 0.0));
        assert!((axis.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_position_clamps_out_of_range() {
        let data = straight_path();
        let (below, _) = data.position_at(-5.0).unwrap();
        assert_eq!(below, Point3::new(0.0, 0.0, 0.0));
        let (above, _) = data.position_at(99.0).unwrap();
        assert_eq!(above, Point3::new(10.0, 5.0, 0.0));
    }

    #[test]
    fn test_unloaded_toolpath_query_is_fatal() {
        let tp = Toolpath::new("tp1", Some("tp1.xml".to_string()), Some(3), BoundingBox::new());
        let err = tp.tool_position_by_d(1.0).unwrap_err();
        assert!(err.to_string().contains("[E3003]"));
    }

    #[test]
    fn test_operation_spans_toolpaths() {
        let mut store = ModelStore::new();
        let mut tp0 = Toolpath::new("tp0", None, None, BoundingBox::new());
        tp0.load(ToolpathData {
            points: vec![Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 0.0, 0.0)],
            axes: vec![Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 0.0, 1.0)],
            dsamples: vec![0.0, 10.0],
            tsamples: vec![0.0, 1.0],
        });
        let mut tp1 = Toolpath::new("tp1", None, None, BoundingBox::new());
        tp1.load(ToolpathData {
            points: vec![Point3::new(10.0, 0.0, 0.0), Point3::new(10.0, 0.0, 8.0)],
            axes: vec![Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 0.0, 1.0)],
            dsamples: vec![0.0, 8.0],
            tsamples: vec![0.0, 1.0],
        });
        store.toolpaths.push(tp0);
        store.toolpaths.push(tp1);

        let op = Operation {
            doc_id: "op1".to_string(),
            name: None,
            toolpaths: vec![ToolpathId(0), ToolpathId(1)],
            tool: None,
        };

        assert_eq!(op.total_length(&store).unwrap(), 18.0);
        let (loc, _) = op.tool_position_by_d(&store, 14.0).unwrap();
        assert_eq!(loc, Point3::new(10.0, 0.0, 4.0));
        // Clamped past the end lands on the final sample
        let (loc, _) = op.tool_position_by_d(&store, 100.0).unwrap();
        assert_eq!(loc, Point3::new(10.0, 0.0, 8.0));
    }
}
