//! Raster data structures and operations

mod bitplane;
mod element;
mod geotransform;
mod grid;

pub use bitplane::{bit_of, with_bit, BitPlanes, BITS_PER_BYTE};
pub use element::{DataType, RasterElement};
pub use geotransform::{Gcp, GeoTransform, Georef};
pub use grid::{Raster, RasterStatistics};
