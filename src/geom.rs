//! Bounding boxes and affine transforms
//!
//! Project documents carry transforms as 12 whitespace-separated values:
//! a row-major 3x3 linear part followed by the translation column. This
//! module converts that wire convention into `nalgebra` matrices and
//! provides the axis-aligned bounding box accumulator used by every
//! geometry node in the model tree.

use nalgebra::{Matrix4, Point3, Vector3};

/// Size of a wire-format transform (3x3 linear part + translation)
pub const AFFINE_SIZE: usize = 12;

/// Build a homogeneous `Matrix4` from a 12-value wire-format affine
/// transform.
///
/// Layout: `[m00 m01 m02 m10 m11 m12 m20 m21 m22 tx ty tz]`.
pub fn matrix_from_affine(values: &[f64; AFFINE_SIZE]) -> Matrix4<f64> {
    Matrix4::new(
        values[0], values[1], values[2], values[9], //
        values[3], values[4], values[5], values[10], //
        values[6], values[7], values[8], values[11], //
        0.0, 0.0, 0.0, 1.0,
    )
}

/// An axis-aligned bounding box accumulator
///
/// All six coordinates are `NaN` while the box is empty. Once any point
/// has been accumulated, `min <= max` holds on every axis. A box never
/// shrinks; it is mutated only through the `update*` methods.
///
/// Non-finite inputs are skipped rather than accumulated, so a `NaN`
/// produced downstream of a transform cannot corrupt the invariant.
/// Document-level numbers are separately rejected as fatal parse errors
/// before they ever reach an accumulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Minimum x coordinate (`NaN` when empty)
    pub minx: f64,
    /// Maximum x coordinate (`NaN` when empty)
    pub maxx: f64,
    /// Minimum y coordinate (`NaN` when empty)
    pub miny: f64,
    /// Maximum y coordinate (`NaN` when empty)
    pub maxy: f64,
    /// Minimum z coordinate (`NaN` when empty)
    pub minz: f64,
    /// Maximum z coordinate (`NaN` when empty)
    pub maxz: f64,
}

impl BoundingBox {
    /// Create a new, empty bounding box
    pub fn new() -> Self {
        Self {
            minx: f64::NAN,
            maxx: f64::NAN,
            miny: f64::NAN,
            maxy: f64::NAN,
            minz: f64::NAN,
            maxz: f64::NAN,
        }
    }

    /// Create a bounding box from explicit extents
    ///
    /// Returns an empty box if any extent is non-finite.
    pub fn from_extents(min: Point3<f64>, max: Point3<f64>) -> Self {
        let mut b = Self::new();
        b.update(&min, None);
        b.update(&max, None);
        b
    }

    /// True if no point has been accumulated yet
    pub fn is_empty(&self) -> bool {
        self.minx.is_nan()
    }

    /// Extend the x extent to include `v`
    ///
    /// The first finite value establishes both min and max.
    pub fn update_x(&mut self, v: f64) {
        if !v.is_finite() {
            return;
        }
        if self.minx.is_nan() {
            self.minx = v;
            self.maxx = v;
        } else {
            self.minx = self.minx.min(v);
            self.maxx = self.maxx.max(v);
        }
    }

    /// Extend the y extent to include `v`
    pub fn update_y(&mut self, v: f64) {
        if !v.is_finite() {
            return;
        }
        if self.miny.is_nan() {
            self.miny = v;
            self.maxy = v;
        } else {
            self.miny = self.miny.min(v);
            self.maxy = self.maxy.max(v);
        }
    }

    /// Extend the z extent to include `v`
    pub fn update_z(&mut self, v: f64) {
        if !v.is_finite() {
            return;
        }
        if self.minz.is_nan() {
            self.minz = v;
            self.maxz = v;
        } else {
            self.minz = self.minz.min(v);
            self.maxz = self.maxz.max(v);
        }
    }

    /// Extend the box to include a point
    ///
    /// When `xform` is given, the point is mapped through it before
    /// accumulating. Callers aggregating child geometry pass the matrix
    /// that maps child coordinates into the space this box is expressed
    /// in.
    pub fn update(&mut self, p: &Point3<f64>, xform: Option<&Matrix4<f64>>) {
        let p = match xform {
            Some(m) => m.transform_point(p),
            None => *p,
        };
        self.update_x(p.x);
        self.update_y(p.y);
        self.update_z(p.z);
    }

    /// Merge another box into this one
    ///
    /// Without a transform this is a per-axis min/max union. With a
    /// transform, all 8 corners of `other` are mapped through it and each
    /// accumulated, which is the tightest axis-aligned bound obtainable
    /// from the corner set alone. Merging an empty box is a no-op.
    pub fn update_from(&mut self, other: &BoundingBox, xform: Option<&Matrix4<f64>>) {
        if other.is_empty() {
            return;
        }
        match xform {
            None => {
                self.update_x(other.minx);
                self.update_x(other.maxx);
                self.update_y(other.miny);
                self.update_y(other.maxy);
                self.update_z(other.minz);
                self.update_z(other.maxz);
            }
            Some(m) => {
                for corner in other.corners() {
                    self.update(&corner, Some(m));
                }
            }
        }
    }

    /// The 8 corners of the box
    ///
    /// Unspecified content when the box is empty; callers check
    /// `is_empty` first.
    pub fn corners(&self) -> [Point3<f64>; 8] {
        [
            Point3::new(self.minx, self.miny, self.minz),
            Point3::new(self.minx, self.miny, self.maxz),
            Point3::new(self.minx, self.maxy, self.minz),
            Point3::new(self.minx, self.maxy, self.maxz),
            Point3::new(self.maxx, self.miny, self.minz),
            Point3::new(self.maxx, self.miny, self.maxz),
            Point3::new(self.maxx, self.maxy, self.minz),
            Point3::new(self.maxx, self.maxy, self.maxz),
        ]
    }

    /// Length of the box diagonal, 0.0 for an empty box
    pub fn diagonal(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let dx = self.maxx - self.minx;
        let dy = self.maxy - self.miny;
        let dz = self.maxz - self.minz;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Center of the box, the origin for an empty box
    pub fn center(&self) -> Point3<f64> {
        if self.is_empty() {
            return Point3::origin();
        }
        Point3::new(
            (self.minx + self.maxx) / 2.0,
            (self.miny + self.maxy) / 2.0,
            (self.minz + self.maxz) / 2.0,
        )
    }

    /// Enclosed volume, 0.0 for an empty box
    ///
    /// Used by the load-priority heuristic: voluminous shells rank higher.
    pub fn volume(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        (self.maxx - self.minx) * (self.maxy - self.miny) * (self.maxz - self.minz)
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::new()
    }
}

/// Normal of a triangle from its winding order
///
/// Returns a zero vector for degenerate triangles; callers treat that as
/// "no usable normal".
pub fn facet_normal(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Vector3<f64> {
    let n = (b - a).cross(&(c - a));
    let len = n.norm();
    if len > 0.0 { n / len } else { Vector3::zeros() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_box() {
        let b = BoundingBox::new();
        assert!(b.is_empty());
        assert_eq!(b.diagonal(), 0.0);
        assert_eq!(b.volume(), 0.0);
        assert_eq!(b.center(), Point3::origin());
    }

    #[test]
    fn test_first_update_establishes_both_extents() {
        let mut b = BoundingBox::new();
        b.update_x(2.0);
        assert_eq!(b.minx, 2.0);
        assert_eq!(b.maxx, 2.0);
        b.update_x(-1.0);
        assert_eq!(b.minx, -1.0);
        assert_eq!(b.maxx, 2.0);
    }

    #[test]
    fn test_update_from_is_union() {
        let mut a = BoundingBox::from_extents(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        let b = BoundingBox::from_extents(Point3::new(-1.0, 0.5, 0.5), Point3::new(0.5, 2.0, 0.5));
        a.update_from(&b, None);
        assert_eq!(a.minx, -1.0);
        assert_eq!(a.maxx, 1.0);
        assert_eq!(a.miny, 0.0);
        assert_eq!(a.maxy, 2.0);
        assert_eq!(a.minz, 0.0);
        assert_eq!(a.maxz, 1.0);

        // Applying the same merge again must not change anything
        let snapshot = a;
        a.update_from(&b, None);
        assert_eq!(a, snapshot);
    }

    #[test]
    fn test_update_from_empty_is_noop() {
        let mut a = BoundingBox::from_extents(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        let snapshot = a;
        a.update_from(&BoundingBox::new(), None);
        assert_eq!(a, snapshot);
    }

    #[test]
    fn test_update_skips_non_finite() {
        let mut b = BoundingBox::new();
        b.update_x(f64::NAN);
        b.update_x(f64::INFINITY);
        assert!(b.is_empty());
        b.update(&Point3::new(1.0, 2.0, 3.0), None);
        b.update(&Point3::new(f64::NAN, 0.0, 0.0), None);
        assert_eq!(b.minx, 1.0);
        // The finite coordinates of a partially bad point still accumulate
        assert_eq!(b.miny, 0.0);
    }

    #[test]
    fn test_update_from_with_translation() {
        let child = BoundingBox::from_extents(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        let xform = Matrix4::new_translation(&Vector3::new(10.0, 0.0, 0.0));
        let mut parent = BoundingBox::new();
        parent.update_from(&child, Some(&xform));
        assert_eq!(parent.minx, 10.0);
        assert_eq!(parent.maxx, 11.0);
    }

    #[test]
    fn test_update_from_with_rotation_expands_corners() {
        // 45 degree rotation about z turns a unit square's x extent into sqrt(2)
        let child = BoundingBox::from_extents(
            Point3::new(-0.5, -0.5, 0.0),
            Point3::new(0.5, 0.5, 0.0),
        );
        let rot = Matrix4::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_4);
        let mut parent = BoundingBox::new();
        parent.update_from(&child, Some(&rot));
        let expected = (2.0_f64).sqrt() / 2.0;
        assert!((parent.maxx - expected).abs() < 1e-12);
        assert!((parent.minx + expected).abs() < 1e-12);
    }

    #[test]
    fn test_matrix_from_affine_identity() {
        let m = matrix_from_affine(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(m, Matrix4::identity());
    }

    #[test]
    fn test_matrix_from_affine_translation() {
        let m = matrix_from_affine(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 5.0, 6.0, 7.0]);
        let p = m.transform_point(&Point3::new(1.0, 1.0, 1.0));
        assert_eq!(p, Point3::new(6.0, 7.0, 8.0));
    }

    #[test]
    fn test_facet_normal() {
        let n = facet_normal(
            &Point3::new(0.0, 0.0, 0.0),
            &Point3::new(1.0, 0.0, 0.0),
            &Point3::new(0.0, 1.0, 0.0),
        );
        assert!((n - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-12);

        let degenerate = facet_normal(
            &Point3::new(0.0, 0.0, 0.0),
            &Point3::new(1.0, 0.0, 0.0),
            &Point3::new(2.0, 0.0, 0.0),
        );
        assert_eq!(degenerate, Vector3::zeros());
    }
}
