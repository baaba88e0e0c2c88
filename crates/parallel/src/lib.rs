//! # hrwsi parallel
//!
//! Parallel processing strategies for raster algorithms.
//!
//! This crate provides:
//! - Processing modes (sequential, all cores, fixed thread count)
//! - Tiled processing of large rasters using Rayon
//!
//! Without the `parallel` feature every mode runs on the calling thread.

pub mod strategy;
pub mod tiled;

pub use strategy::{ParallelStrategy, ProcessingMode};
pub use tiled::{Tile, TileIterator, TiledProcessor, DEFAULT_TILE_SIZE};
