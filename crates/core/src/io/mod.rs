//! I/O operations for reading and writing GeoTIFF rasters

#[cfg(feature = "gdal")]
mod gdal_io;
mod geokeys;
mod native;

use crate::crs::CRS;
use crate::raster::{DataType, Georef};
use std::fmt;

#[cfg(feature = "gdal")]
pub use gdal_io::{read_geotiff, read_geotiff_info, write_geotiff, write_multiband_geotiff};

#[cfg(not(feature = "gdal"))]
pub use native::{read_geotiff, read_geotiff_info, write_geotiff, write_multiband_geotiff};

// Buffer-based I/O (always available, no filesystem dependency)
pub use native::{multiband_unsupported, read_geotiff_from_buffer, write_geotiff_to_buffer};

/// Whether the active backend writes more than one band per file
pub const WRITES_MULTIBAND: bool = cfg!(feature = "gdal");

/// Overview decimation factors built when `GeoTiffOptions::overviews` is set
pub const OVERVIEW_LEVELS: [i32; 5] = [2, 4, 8, 16, 32];

/// Block edge of delivered product files and of their overviews
pub const PRODUCT_BLOCK_SIZE: usize = 1024;

/// DEFLATE level of delivered product files
pub const PRODUCT_ZLEVEL: u8 = 4;

/// Compression codec for written GeoTIFFs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Deflate,
    Lzw,
    PackBits,
}

impl Compression {
    /// Name understood by the GDAL GTiff driver
    pub fn gdal_name(self) -> &'static str {
        match self {
            Compression::None => "NONE",
            Compression::Deflate => "DEFLATE",
            Compression::Lzw => "LZW",
            Compression::PackBits => "PACKBITS",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.gdal_name())
    }
}

/// Options for writing GeoTIFF files
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTiffOptions {
    pub compression: Compression,
    /// Tile size for tiled TIFFs (0 for strips)
    pub tile_size: usize,
    /// Build internal overviews (nearest neighbour)
    pub overviews: bool,
    /// BigTIFF for files > 4GB
    pub bigtiff: bool,
}

impl GeoTiffOptions {
    /// DEFLATE, 1024x1024 tiles and overviews, as used for delivered products
    pub fn compressed() -> Self {
        Self {
            compression: Compression::Deflate,
            tile_size: PRODUCT_BLOCK_SIZE,
            overviews: true,
            ..Self::default()
        }
    }
}

impl Default for GeoTiffOptions {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            tile_size: 0,
            overviews: false,
            bigtiff: false,
        }
    }
}

/// Raster metadata read without choosing a cell type
#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    pub rows: usize,
    pub cols: usize,
    pub bands: usize,
    pub data_type: DataType,
    pub georef: Georef,
    pub crs: Option<CRS>,
    pub nodata: Option<f64>,
}

impl RasterInfo {
    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_options() {
        let opts = GeoTiffOptions::compressed();
        assert_eq!(opts.compression, Compression::Deflate);
        assert_eq!(opts.tile_size, PRODUCT_BLOCK_SIZE);
        assert!(opts.overviews);
        assert_eq!(opts.compression.to_string(), "DEFLATE");
        assert_eq!(GeoTiffOptions::default().compression, Compression::None);
    }

    #[test]
    fn test_multiband_follows_backend() {
        assert_eq!(WRITES_MULTIBAND, cfg!(feature = "gdal"));
    }
}
