//! Camera and projection management
//!
//! [`ViewVolume`] owns the interactive camera state: a rotation basis, a
//! view center, a zoom ratio, and the bounding radius that normalizes
//! the model into a unit sphere. Incremental rotation is applied to the
//! basis vectors directly and re-orthonormalized through cross products
//! rather than accumulated by matrix multiplication, which keeps the
//! basis orthonormal over arbitrarily long interactive sessions.

use std::io::Cursor;

use nalgebra::{Matrix4, Point3, Rotation3, Unit, Vector3};
use quick_xml::Writer;
use quick_xml::events::{BytesStart, Event};

use crate::error::{Error, Result};
use crate::geom::BoundingBox;

/// Distance from the camera to the view center, in normalized
/// (unit-sphere) model units
const CAMERA_DISTANCE: f64 = 3.0;

/// Half-extent of the visible region at the view center when
/// `zoom_ratio` is 1, sized to show the whole unit sphere with margin
const BASE_HALF_EXTENT: f64 = 1.25;

/// Near/far margin around the normalized model sphere
const DEPTH_MARGIN: f64 = 1.5;

/// Smallest usable bounding radius; protects the normalization scale
const MIN_BOUND_RADIUS: f64 = 1e-9;

/// Projection kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Perspective frustum
    Perspective,
    /// Orthographic box
    Orthographic,
}

/// Interactive camera state
#[derive(Debug, Clone)]
pub struct ViewVolume {
    center: Point3<f64>,
    /// Rotation basis; camera axes are the rows of the upper 3x3
    rot: Matrix4<f64>,
    zoom_ratio: f64,
    bound_radius: f64,
    projection: Projection,
}

impl ViewVolume {
    /// Create a camera with identity rotation looking at the origin
    pub fn new() -> Self {
        Self {
            center: Point3::origin(),
            rot: Matrix4::identity(),
            zoom_ratio: 1.0,
            bound_radius: 1.0,
            projection: Projection::Perspective,
        }
    }

    /// Current view center in model coordinates
    pub fn center(&self) -> Point3<f64> {
        self.center
    }

    /// Current zoom ratio
    pub fn zoom_ratio(&self) -> f64 {
        self.zoom_ratio
    }

    /// Current bounding radius
    pub fn bound_radius(&self) -> f64 {
        self.bound_radius
    }

    /// Current rotation basis
    pub fn rotation(&self) -> &Matrix4<f64> {
        &self.rot
    }

    /// Current projection kind
    pub fn projection(&self) -> Projection {
        self.projection
    }

    /// Switch between perspective and orthographic projection
    pub fn set_projection(&mut self, projection: Projection) {
        self.projection = projection;
    }

    /// Center the view on a bounding box and reset the zoom
    pub fn fit(&mut self, bbox: &BoundingBox) {
        if bbox.is_empty() {
            self.center = Point3::origin();
            self.bound_radius = 1.0;
        } else {
            self.center = bbox.center();
            self.bound_radius = (bbox.diagonal() / 2.0).max(MIN_BOUND_RADIUS);
        }
        self.zoom_ratio = 1.0;
    }

    /// Projection matrix for a viewport of `width` x `height` pixels
    ///
    /// The larger viewport dimension carries the full view extent (as
    /// scaled by the zoom ratio); the smaller dimension is reduced by
    /// the aspect ratio, so resizing never stretches the model.
    pub fn projection_matrix(&self, width: f64, height: f64) -> Matrix4<f64> {
        let extent = BASE_HALF_EXTENT / self.zoom_ratio;
        let (half_w, half_h) = if width >= height {
            (extent, extent * height / width.max(1.0))
        } else {
            (extent * width / height.max(1.0), extent)
        };
        let near = CAMERA_DISTANCE - DEPTH_MARGIN;
        let far = CAMERA_DISTANCE + DEPTH_MARGIN;

        match self.projection {
            Projection::Perspective => {
                // Half-extents are specified at the view center; scale
                // them back to the near plane for the frustum
                let scale = near / CAMERA_DISTANCE;
                frustum(half_w * scale, half_h * scale, near, far)
            }
            Projection::Orthographic => {
                Matrix4::new_orthographic(-half_w, half_w, -half_h, half_h, near, far)
            }
        }
    }

    /// Model-view matrix
    ///
    /// Composes translate-by-camera-distance, uniform scale by
    /// `1 / bound_radius`, the rotation basis, and translate-to-center,
    /// in that order. The order is load-bearing: it makes rotation pivot
    /// around the view center of the normalized model.
    pub fn model_view_matrix(&self) -> Matrix4<f64> {
        let radius = self.bound_radius.max(MIN_BOUND_RADIUS);
        Matrix4::new_translation(&Vector3::new(0.0, 0.0, -CAMERA_DISTANCE))
            * Matrix4::new_scaling(1.0 / radius)
            * self.rot
            * Matrix4::new_translation(&(-self.center.coords))
    }

    /// Apply an incremental rotation about `axis` by `angle` radians
    ///
    /// Rotates the X and Y basis rows, re-derives Z as their cross
    /// product, and re-orthonormalizes Y. The matrix is rewritten from
    /// the corrected vectors instead of multiplied, bounding numeric
    /// drift. A zero axis leaves the rotation unchanged.
    pub fn rotate(&mut self, axis: Vector3<f64>, angle: f64) {
        let Some(axis) = Unit::try_new(axis, MIN_BOUND_RADIUS) else {
            return;
        };
        let r = Rotation3::from_axis_angle(&axis, angle);

        let x = r * self.basis_row(0);
        let y = r * self.basis_row(1);
        let z = x.cross(&y);
        let Some(z) = z.try_normalize(0.0) else {
            return;
        };
        let x = match x.try_normalize(0.0) {
            Some(x) => x,
            None => return,
        };
        let y = z.cross(&x);
        self.set_basis_row(0, &x);
        self.set_basis_row(1, &y);
        self.set_basis_row(2, &z);
    }

    /// Scale the zoom ratio
    pub fn zoom(&mut self, factor: f64) {
        if factor.is_finite() && factor > 0.0 {
            self.zoom_ratio = (self.zoom_ratio * factor).clamp(0.01, 100.0);
        }
    }

    /// Pan the view center by a viewport-space delta
    ///
    /// `dx`/`dy` are in normalized view units (one unit is the visible
    /// half-extent). The center moves against the drag so the scene
    /// follows the pointer.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        let scale = self.bound_radius.max(MIN_BOUND_RADIUS) / self.zoom_ratio;
        let delta = (self.basis_row(0) * dx + self.basis_row(1) * dy) * scale;
        self.center -= delta;
    }

    /// Serialize the camera state to a `<view>` XML element
    pub fn save_state(&self) -> Result<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        let mut elem = BytesStart::new("view");
        let projection = match self.projection {
            Projection::Perspective => "perspective",
            Projection::Orthographic => "orthographic",
        };
        elem.push_attribute(("projection", projection));
        elem.push_attribute(("zoom", self.zoom_ratio.to_string().as_str()));
        elem.push_attribute(("radius", self.bound_radius.to_string().as_str()));
        elem.push_attribute((
            "center",
            format_triple(self.center.x, self.center.y, self.center.z).as_str(),
        ));
        let x = self.basis_row(0);
        let y = self.basis_row(1);
        elem.push_attribute(("xaxis", format_triple(x.x, x.y, x.z).as_str()));
        elem.push_attribute(("yaxis", format_triple(y.x, y.y, y.z).as_str()));
        writer
            .write_event(Event::Empty(elem))
            .map_err(|e| Error::InvalidXml(format!("Failed to write view state: {}", e)))?;
        String::from_utf8(writer.into_inner().into_inner())
            .map_err(|e| Error::InvalidXml(format!("View state is not UTF-8: {}", e)))
    }

    /// Restore camera state from a `<view>` XML element
    ///
    /// Only the X and Y axes are stored; Z is re-derived by cross
    /// product and the basis re-orthonormalized, so a hand-edited or
    /// slightly degraded state still restores to a valid rotation.
    pub fn restore_state(&mut self, xml: &str) -> Result<()> {
        let doc = crate::parser::parse_document(xml)?;
        let root = doc.element(doc.root_index());
        crate::parser::expect_tag(root, "view")?;

        let projection = match crate::parser::require_attr(root, "projection")? {
            "perspective" => Projection::Perspective,
            "orthographic" => Projection::Orthographic,
            other => {
                return Err(Error::parse_error_with_context(
                    "view projection",
                    other,
                    "'perspective' or 'orthographic'",
                ));
            }
        };
        let zoom =
            crate::parser::parse_f64_finite("view zoom", crate::parser::require_attr(root, "zoom")?)?;
        if zoom <= 0.0 {
            return Err(Error::parse_error_with_context(
                "view zoom",
                &zoom.to_string(),
                "positive number",
            ));
        }
        let radius = crate::parser::parse_f64_finite(
            "view radius",
            crate::parser::require_attr(root, "radius")?,
        )?;
        let [cx, cy, cz] = crate::parser::parse_triple_attr(
            "view center",
            crate::parser::require_attr(root, "center")?,
        )?;
        let [xx, xy, xz] = crate::parser::parse_triple_attr(
            "view xaxis",
            crate::parser::require_attr(root, "xaxis")?,
        )?;
        let [yx, yy, yz] = crate::parser::parse_triple_attr(
            "view yaxis",
            crate::parser::require_attr(root, "yaxis")?,
        )?;

        let x = Vector3::new(xx, xy, xz)
            .try_normalize(MIN_BOUND_RADIUS)
            .ok_or_else(|| {
                Error::parse_error_with_context("view xaxis", "degenerate", "unit vector")
            })?;
        let y0 = Vector3::new(yx, yy, yz);
        let z = x.cross(&y0).try_normalize(MIN_BOUND_RADIUS).ok_or_else(|| {
            Error::parse_error_with_context("view yaxis", "degenerate", "vector independent of xaxis")
        })?;
        let y = z.cross(&x);

        self.projection = projection;
        self.zoom_ratio = zoom;
        self.bound_radius = radius.max(MIN_BOUND_RADIUS);
        self.center = Point3::new(cx, cy, cz);
        self.rot = Matrix4::identity();
        self.set_basis_row(0, &x);
        self.set_basis_row(1, &y);
        self.set_basis_row(2, &z);
        Ok(())
    }

    fn basis_row(&self, row: usize) -> Vector3<f64> {
        Vector3::new(self.rot[(row, 0)], self.rot[(row, 1)], self.rot[(row, 2)])
    }

    fn set_basis_row(&mut self, row: usize, v: &Vector3<f64>) {
        self.rot[(row, 0)] = v.x;
        self.rot[(row, 1)] = v.y;
        self.rot[(row, 2)] = v.z;
    }
}

impl Default for ViewVolume {
    fn default() -> Self {
        Self::new()
    }
}

fn frustum(half_w: f64, half_h: f64, near: f64, far: f64) -> Matrix4<f64> {
    Matrix4::new(
        near / half_w,
        0.0,
        0.0,
        0.0,
        0.0,
        near / half_h,
        0.0,
        0.0,
        0.0,
        0.0,
        -(far + near) / (far - near),
        -2.0 * far * near / (far - near),
        0.0,
        0.0,
        -1.0,
        0.0,
    )
}

fn format_triple(a: f64, b: f64, c: f64) -> String {
    format!("{} {} {}", a, b, c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_orthonormal(view: &ViewVolume) {
        let x = view.basis_row(0);
        let y = view.basis_row(1);
        let z = view.basis_row(2);
        assert!((x.norm() - 1.0).abs() < 1e-12);
        assert!((y.norm() - 1.0).abs() < 1e-12);
        assert!((z.norm() - 1.0).abs() < 1e-12);
        assert!(x.dot(&y).abs() < 1e-12);
        assert!(y.dot(&z).abs() < 1e-12);
        assert!(z.dot(&x).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_axis_is_noop() {
        let mut view = ViewVolume::new();
        view.rotate(Vector3::new(0.5, 0.5, 0.0), 0.7);
        let before = *view.rotation();
        view.rotate(Vector3::zeros(), 1.0);
        assert_eq!(*view.rotation(), before);
    }

    #[test]
    fn test_basis_stays_orthonormal_over_many_rotations() {
        let mut view = ViewVolume::new();
        for i in 0..10_000 {
            let axis = Vector3::new(
                ((i * 7) % 13) as f64 - 6.0,
                ((i * 5) % 11) as f64 - 5.0,
                ((i * 3) % 7) as f64 - 3.0,
            );
            view.rotate(axis, 0.013);
        }
        assert_orthonormal(&view);
    }

    #[test]
    fn test_quarter_turn_about_z() {
        let mut view = ViewVolume::new();
        view.rotate(Vector3::new(0.0, 0.0, 1.0), std::f64::consts::FRAC_PI_2);
        let x = view.basis_row(0);
        // The x basis vector lands on +y
        assert!((x - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-12);
        assert_orthonormal(&view);
    }

    #[test]
    fn test_model_view_order_pivots_on_center() {
        let mut view = ViewVolume::new();
        view.fit(&BoundingBox::from_extents(
            Point3::new(8.0, 8.0, 8.0),
            Point3::new(12.0, 12.0, 12.0),
        ));
        // The fitted center maps to the fixed camera point regardless of
        // rotation
        let mv = view.model_view_matrix();
        let mapped = mv.transform_point(&view.center());
        assert!((mapped - Point3::new(0.0, 0.0, -CAMERA_DISTANCE)).norm() < 1e-9);

        view.rotate(Vector3::new(0.3, 1.0, 0.0), 1.1);
        let mv = view.model_view_matrix();
        let mapped = mv.transform_point(&view.center());
        assert!((mapped - Point3::new(0.0, 0.0, -CAMERA_DISTANCE)).norm() < 1e-9);
    }

    #[test]
    fn test_projection_preserves_aspect_on_smaller_dimension() {
        let view = ViewVolume::new();
        let wide = view.projection_matrix(200.0, 100.0);
        let tall = view.projection_matrix(100.0, 200.0);
        // Wide viewport: vertical scale is twice the horizontal
        assert!((wide[(1, 1)] / wide[(0, 0)] - 2.0).abs() < 1e-12);
        // Tall viewport: horizontal scale is twice the vertical
        assert!((tall[(0, 0)] / tall[(1, 1)] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_zoom_clamps() {
        let mut view = ViewVolume::new();
        view.zoom(1e9);
        assert_eq!(view.zoom_ratio(), 100.0);
        view.zoom(1e-12);
        assert_eq!(view.zoom_ratio(), 0.01);
        view.zoom(-1.0);
        assert_eq!(view.zoom_ratio(), 0.01);
    }

    #[test]
    fn test_save_restore_round_trip() {
        let mut view = ViewVolume::new();
        view.set_projection(Projection::Orthographic);
        view.fit(&BoundingBox::from_extents(
            Point3::new(-2.0, -2.0, -2.0),
            Point3::new(4.0, 4.0, 4.0),
        ));
        view.rotate(Vector3::new(1.0, 2.0, 3.0), 0.8);
        view.zoom(2.5);
        view.pan(0.1, -0.2);

        let state = view.save_state().unwrap();
        let mut restored = ViewVolume::new();
        restored.restore_state(&state).unwrap();

        assert_eq!(restored.projection(), view.projection());
        assert!((restored.zoom_ratio() - view.zoom_ratio()).abs() < 1e-12);
        assert!((restored.bound_radius() - view.bound_radius()).abs() < 1e-12);
        assert!((restored.center() - view.center()).norm() < 1e-12);
        assert!((restored.rotation() - view.rotation()).norm() < 1e-9);
        assert_orthonormal(&restored);
    }

    #[test]
    fn test_restore_rejects_bad_state() {
        let mut view = ViewVolume::new();
        assert!(view.restore_state("<camera/>").is_err());
        assert!(
            view.restore_state(
                r#"<view projection="perspective" zoom="0" radius="1" center="0 0 0" xaxis="1 0 0" yaxis="0 1 0"/>"#
            )
            .is_err()
        );
        assert!(
            view.restore_state(
                r#"<view projection="perspective" zoom="1" radius="1" center="0 0 0" xaxis="1 0 0" yaxis="2 0 0"/>"#
            )
            .is_err()
        );
    }

    #[test]
    fn test_fit_empty_box_resets() {
        let mut view = ViewVolume::new();
        view.fit(&BoundingBox::new());
        assert_eq!(view.center(), Point3::origin());
        assert_eq!(view.bound_radius(), 1.0);
    }
}
