//! # hrwsi core
//!
//! Core types and I/O shared by the hrwsi crates:
//! - `Raster<T>`: georeferenced raster band
//! - `BitPlanes`: the 8 bit-planes of a byte band
//! - `GeoTransform`, `Gcp`, `Georef`: georeferencing
//! - `CRS`: coordinate reference system
//! - `Error` and the numbered `ExitCode` convention
//! - GeoTIFF reading and writing

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;

pub use crs::CRS;
pub use error::{Error, ExitCode, Result};
pub use raster::{BitPlanes, DataType, Gcp, GeoTransform, Georef, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::CRS;
    pub use crate::error::{Error, ExitCode, Result};
    pub use crate::raster::{BitPlanes, GeoTransform, Georef, Raster, RasterElement};
    pub use crate::Algorithm;
}

/// Core trait for raster algorithms.
///
/// Algorithms are pure functions that transform input data according to parameters.
pub trait Algorithm {
    /// Input type for the algorithm
    type Input;
    /// Output type for the algorithm
    type Output;
    /// Parameters controlling algorithm behavior
    type Params: Default;
    /// Error type for algorithm execution
    type Error: std::error::Error;

    /// Returns the algorithm name
    fn name(&self) -> &'static str;

    /// Returns a description of what the algorithm does
    fn description(&self) -> &'static str;

    /// Execute the algorithm
    fn execute(&self, input: Self::Input, params: Self::Params) -> std::result::Result<Self::Output, Self::Error>;

    /// Execute with default parameters
    fn execute_default(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error> {
        self.execute(input, Self::Params::default())
    }
}
