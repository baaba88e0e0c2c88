//! Georeferencing: affine geotransform or ground control points

use serde::{Deserialize, Serialize};

/// Affine transformation coefficients for georeferencing rasters.
///
/// Converts between pixel coordinates (col, row) and geographic coordinates (x, y):
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// For north-up images, `row_rotation` and `col_rotation` are typically 0,
/// and `pixel_height` is negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    /// Pixel width (cell size in X direction)
    pub pixel_width: f64,
    /// Pixel height (cell size in Y direction, usually negative)
    pub pixel_height: f64,
    /// Rotation about X axis (usually 0)
    pub row_rotation: f64,
    /// Rotation about Y axis (usually 0)
    pub col_rotation: f64,
}

impl GeoTransform {
    /// Create a new GeoTransform with no rotation (north-up image)
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
            row_rotation: 0.0,
            col_rotation: 0.0,
        }
    }

    /// Create from GDAL-style array [origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]
    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            origin_x: coeffs[0],
            pixel_width: coeffs[1],
            row_rotation: coeffs[2],
            origin_y: coeffs[3],
            col_rotation: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    /// Convert to GDAL-style array
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.col_rotation,
            self.pixel_height,
        ]
    }

    /// Geographic coordinates of the top-left corner of a pixel
    fn pixel_to_geo_corner(&self, col: usize, row: usize) -> (f64, f64) {
        let col_f = col as f64;
        let row_f = row as f64;

        let x = self.origin_x + col_f * self.pixel_width + row_f * self.row_rotation;
        let y = self.origin_y + col_f * self.col_rotation + row_f * self.pixel_height;

        (x, y)
    }

    /// Get the cell size (assumes square pixels and no rotation)
    pub fn cell_size(&self) -> f64 {
        self.pixel_width.abs()
    }

    /// Calculate the bounding box for a raster of given dimensions
    pub fn bounds(&self, width: usize, height: usize) -> (f64, f64, f64, f64) {
        let (x0, y0) = self.pixel_to_geo_corner(0, 0);
        let (x1, y1) = self.pixel_to_geo_corner(width, 0);
        let (x2, y2) = self.pixel_to_geo_corner(0, height);
        let (x3, y3) = self.pixel_to_geo_corner(width, height);

        let min_x = x0.min(x1).min(x2).min(x3);
        let max_x = x0.max(x1).max(x2).max(x3);
        let min_y = y0.min(y1).min(y2).min(y3);
        let max_y = y0.max(y1).max(y2).max(y3);

        (min_x, min_y, max_x, max_y)
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}

/// A ground control point tying a pixel/line position to map coordinates.
///
/// Radar products in slant geometry carry GCPs instead of an affine transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gcp {
    pub pixel: f64,
    pub line: f64,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Gcp {
    pub fn new(pixel: f64, line: f64, x: f64, y: f64, z: f64) -> Self {
        Self { pixel, line, x, y, z }
    }
}

/// How a raster is tied to the ground
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Georef {
    Transform(GeoTransform),
    Gcps(Vec<Gcp>),
}

impl Georef {
    /// The affine transform, if the raster has one
    pub fn transform(&self) -> Option<&GeoTransform> {
        match self {
            Georef::Transform(gt) => Some(gt),
            Georef::Gcps(_) => None,
        }
    }

    /// The ground control points, if the raster uses them
    pub fn gcps(&self) -> Option<&[Gcp]> {
        match self {
            Georef::Transform(_) => None,
            Georef::Gcps(gcps) => Some(gcps),
        }
    }
}

impl Default for Georef {
    fn default() -> Self {
        Georef::Transform(GeoTransform::default())
    }
}

impl From<GeoTransform> for Georef {
    fn from(gt: GeoTransform) -> Self {
        Georef::Transform(gt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gdal_coefficients_order() {
        let coeffs = [600000.0, 20.0, 0.0, 5100000.0, 0.0, -20.0];
        let gt = GeoTransform::from_gdal(coeffs);
        assert_eq!(gt.to_gdal(), coeffs);
        assert_relative_eq!(gt.cell_size(), 20.0);
    }

    #[test]
    fn test_georef_accessors() {
        let georef = Georef::from(GeoTransform::new(0.0, 10.0, 1.0, -1.0));
        assert!(georef.transform().is_some());
        assert!(georef.gcps().is_none());

        let gcps = Georef::Gcps(vec![Gcp::new(0.0, 0.0, 7.1, 46.2, 0.0)]);
        assert!(gcps.transform().is_none());
        assert_eq!(gcps.gcps().map(|g| g.len()), Some(1));
    }

    #[test]
    fn test_bounds() {
        let gt = GeoTransform::new(0.0, 100.0, 1.0, -1.0);
        let (min_x, min_y, max_x, max_y) = gt.bounds(100, 100);

        assert_relative_eq!(min_x, 0.0, epsilon = 1e-10);
        assert_relative_eq!(min_y, 0.0, epsilon = 1e-10);
        assert_relative_eq!(max_x, 100.0, epsilon = 1e-10);
        assert_relative_eq!(max_y, 100.0, epsilon = 1e-10);
    }
}
