//! Tiled processing for large rasters

use crate::strategy::{ParallelStrategy, ProcessingMode};
use hrwsi_core::error::{Error, Result};
use ndarray::{s, Array2, ArrayBase, ArrayView2, Data, Ix2};
use std::ops::Range;

/// Default tile edge in cells
pub const DEFAULT_TILE_SIZE: usize = 512;

/// A rectangular window of a raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// Row offset in the source raster
    pub row_offset: usize,
    /// Column offset in the source raster
    pub col_offset: usize,
    /// Number of rows in this tile
    pub rows: usize,
    /// Number of columns in this tile
    pub cols: usize,
}

impl Tile {
    /// Create a new tile
    pub fn new(row_offset: usize, col_offset: usize, rows: usize, cols: usize) -> Self {
        Self {
            row_offset,
            col_offset,
            rows,
            cols,
        }
    }

    /// Number of cells in the tile
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Source rows covered by the tile
    pub fn row_range(&self) -> Range<usize> {
        self.row_offset..self.row_offset + self.rows
    }

    /// Source columns covered by the tile
    pub fn col_range(&self) -> Range<usize> {
        self.col_offset..self.col_offset + self.cols
    }

    /// View of the part of `array` under this tile
    pub fn view<'a, S, T>(&self, array: &'a ArrayBase<S, Ix2>) -> ArrayView2<'a, T>
    where
        S: Data<Elem = T>,
    {
        array.slice(s![self.row_range(), self.col_range()])
    }
}

/// Iterator over tiles covering a raster in row-major order.
///
/// Tiles do not overlap; the last row and column of tiles are clipped to
/// the raster edge.
#[derive(Debug, Clone)]
pub struct TileIterator {
    total_rows: usize,
    total_cols: usize,
    tile_rows: usize,
    tile_cols: usize,
    current_row: usize,
    current_col: usize,
}

impl TileIterator {
    /// Square tiles of `tile_size` cells. A size of 0 yields a single tile.
    pub fn new(total_rows: usize, total_cols: usize, tile_size: usize) -> Self {
        Self::with_shape(total_rows, total_cols, tile_size, tile_size)
    }

    /// Tiles of `tile_rows` x `tile_cols` cells
    pub fn with_shape(
        total_rows: usize,
        total_cols: usize,
        tile_rows: usize,
        tile_cols: usize,
    ) -> Self {
        let edge = |size: usize, total: usize| if size == 0 { total.max(1) } else { size };
        Self {
            total_rows,
            total_cols,
            tile_rows: edge(tile_rows, total_rows),
            tile_cols: edge(tile_cols, total_cols),
            current_row: 0,
            current_col: 0,
        }
    }
}

impl Iterator for TileIterator {
    type Item = Tile;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_row >= self.total_rows || self.total_cols == 0 {
            return None;
        }

        let rows = self.tile_rows.min(self.total_rows - self.current_row);
        let cols = self.tile_cols.min(self.total_cols - self.current_col);
        let tile = Tile::new(self.current_row, self.current_col, rows, cols);

        self.current_col += self.tile_cols;
        if self.current_col >= self.total_cols {
            self.current_col = 0;
            self.current_row += self.tile_rows;
        }

        Some(tile)
    }
}

/// Processor for tiled raster operations
#[derive(Debug, Clone, Copy)]
pub struct TiledProcessor {
    tile_size: usize,
}

impl Default for TiledProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE)
    }
}

impl TiledProcessor {
    /// Create a new tiled processor
    pub fn new(tile_size: usize) -> Self {
        Self { tile_size }
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    /// Tiles covering a `rows` x `cols` grid
    pub fn tiles(&self, rows: usize, cols: usize) -> Vec<Tile> {
        TileIterator::new(rows, cols, self.tile_size).collect()
    }

    /// Compute every tile of a `rows` x `cols` grid with `f` and stitch the
    /// results.
    ///
    /// `f` returns the tile's cells in row-major order. Tiles run according
    /// to `mode`; the first error aborts the whole operation.
    pub fn map_tiles<U, F>(
        &self,
        rows: usize,
        cols: usize,
        mode: ProcessingMode,
        f: F,
    ) -> Result<Array2<U>>
    where
        U: Default + Clone + Send,
        F: Fn(&Tile) -> Result<Vec<U>> + Sync + Send,
    {
        let tiles = self.tiles(rows, cols);
        tracing::debug!(
            "processing {}x{} grid in {} tiles of {} cells",
            rows,
            cols,
            tiles.len(),
            self.tile_size
        );

        let buffers = mode.try_par_map(0..tiles.len(), |i| f(&tiles[i]))?;

        let mut output = Array2::<U>::default((rows, cols));
        for (tile, buffer) in tiles.iter().zip(buffers) {
            let len = buffer.len();
            let block = ArrayView2::from_shape((tile.rows, tile.cols), &buffer).map_err(|_| {
                Error::SizeMismatch {
                    er: tile.rows,
                    ec: tile.cols,
                    ar: len / tile.cols.max(1),
                    ac: tile.cols,
                }
            })?;
            output
                .slice_mut(s![tile.row_range(), tile.col_range()])
                .assign(&block);
        }

        Ok(output)
    }
}
