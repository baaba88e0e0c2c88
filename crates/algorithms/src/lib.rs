//! # hrwsi algorithms
//!
//! Raster algebra for the snow, ice and water product layers.
//!
//! ## Modules
//!
//! - **bandmath**: expression language and the bit-plane band math engine
//! - **products**: quality flag and cloud classification jobs built on it

pub mod bandmath;
pub mod products;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::bandmath::{
        bit_bandmath, parse, BandMathJob, BandMathParams, BandSpec, BitBandMath, CompiledJob,
        Expr, JobReport, Operation, SourceSpec, StepSpec, WriteSpec,
    };
    pub use crate::products::{FscInputs, QcWeights};
    pub use hrwsi_core::prelude::*;
    pub use hrwsi_parallel::ProcessingMode;
}
