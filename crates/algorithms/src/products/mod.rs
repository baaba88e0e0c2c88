//! Ready-made band math jobs for the snow and cloud products
//!
//! Each recipe returns a [`BandMathJob`](crate::bandmath::BandMathJob) that
//! can be run as is, saved as a job file or edited first.

pub mod cc;
pub mod fsc;
pub mod nrt;

pub use fsc::{FscInputs, QcWeights};
pub use nrt::NrtInputs;

/// Nodata value of the byte product layers
pub const NODATA: u8 = 255;

/// Cloud code of the snow layers
pub const CLOUD_VALUE: u8 = 205;

/// Water code of the masked snow layers
pub const WATER_VALUE: u8 = 210;
