use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tolerance used when comparing transform coefficients.
pub const TRANSFORM_EPSILON: f64 = 1e-9;

/// Affine mapping from pixel (col, row) to world (x, y).
///
/// Coefficients follow the `(a, b, c, d, e, f)` convention:
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
///
/// `(c, f)` is the world position of the top-left corner of pixel `(0, 0)`.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq)]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl GeoTransform {
    pub const fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// Pixel space: one unit per pixel, rows growing downwards.
    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// North-up transform anchored at the upper-left corner `(x, y)`.
    /// Both resolutions are positive; the row axis points south.
    pub fn north_up(x: f64, y: f64, res_x: f64, res_y: f64) -> Self {
        Self::new(res_x, 0.0, x, 0.0, -res_y, y)
    }

    /// World coordinate of the pixel-grid point `(col, row)`.
    /// Integer inputs address pixel corners, `+0.5` addresses centers.
    #[inline]
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// World → pixel mapping, `None` for a degenerate transform.
    pub fn inverse(&self) -> Option<GeoTransform> {
        let det = self.determinant();
        if det.abs() < f64::EPSILON {
            return None;
        }
        let ia = self.e / det;
        let ib = -self.b / det;
        let id = -self.d / det;
        let ie = self.a / det;
        Some(GeoTransform::new(
            ia,
            ib,
            -(ia * self.c + ib * self.f),
            id,
            ie,
            -(id * self.c + ie * self.f),
        ))
    }

    /// Transform of a window whose pixel `(0, 0)` sits at `(col, row)` of this grid.
    pub fn translate_pixels(&self, col: i64, row: i64) -> GeoTransform {
        let (c, f) = self.apply(col as f64, row as f64);
        GeoTransform { c, f, ..*self }
    }

    /// Ground size of one pixel along the column and row axes.
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.a.hypot(self.d), self.b.hypot(self.e))
    }

    pub fn is_north_up(&self) -> bool {
        self.b.abs() < TRANSFORM_EPSILON && self.d.abs() < TRANSFORM_EPSILON
    }

    /// True when both transforms share pixel size and rotation, which is the
    /// requirement for placing their rasters on one grid.
    pub fn same_linear_part(&self, other: &GeoTransform) -> bool {
        let scale = self
            .a
            .abs()
            .max(self.b.abs())
            .max(self.d.abs())
            .max(self.e.abs())
            .max(1.0);
        let tol = TRANSFORM_EPSILON * scale;
        (self.a - other.a).abs() <= tol
            && (self.b - other.b).abs() <= tol
            && (self.d - other.d).abs() <= tol
            && (self.e - other.e).abs() <= tol
    }

    /// Approximate equality of all six coefficients.
    pub fn approx_eq(&self, other: &GeoTransform) -> bool {
        let origin_tol = TRANSFORM_EPSILON * self.c.abs().max(self.f.abs()).max(1.0);
        self.same_linear_part(other)
            && (self.c - other.c).abs() <= origin_tol
            && (self.f - other.f).abs() <= origin_tol
    }
}
