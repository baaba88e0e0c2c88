//! Bit-plane band math
//!
//! Byte layers such as quality flags are assembled from several input
//! rasters with small expressions. A job describes the output bands; each
//! band is built by steps that either compute the whole byte or set single
//! bits of it.
//!
//! ```ignore
//! use hrwsi_algorithms::bandmath::{BandMathJob, BandSpec, CompiledJob, SourceSpec, StepSpec};
//!
//! let job = BandMathJob::new(
//!     "qc_flags.tif",
//!     vec![BandSpec::new(vec![StepSpec::bits(
//!         vec![SourceSpec::new("geophysical.tif").unpacked(), SourceSpec::new("water.tif")],
//!         [(0, "A0[6]"), (1, "A0[7]"), (2, "A1 == 1")],
//!     )])],
//! );
//! CompiledJob::compile(&job)?.run(ProcessingMode::Parallel)?;
//! ```

mod engine;
mod eval;
mod expr;
mod job;

pub use engine::{
    bit_bandmath, BandMathParams, BitBandMath, CompiledJob, Geometry, Inputs, JobReport, Plane,
    SourceKey,
};
pub use eval::{apply_binary, apply_call, apply_unary, evaluate, to_byte, truthy, Operands, Value};
pub use expr::{parse, BinaryOp, Expr, Function, UnaryOp};
pub use job::{BandMathJob, BandSpec, Operation, SourceSpec, StepSpec, WriteSpec};
