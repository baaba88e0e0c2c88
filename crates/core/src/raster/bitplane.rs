//! Bit-planes of byte rasters
//!
//! A byte raster is split into 8 boolean planes, plane `k` holding bit `k`
//! of every cell (bit 0 is the least significant). Quality flag layers pack
//! up to 8 independent conditions into one byte this way.

use crate::error::{Error, Result};
use ndarray::{Array2, Array3, ArrayView2, Axis};

/// Number of planes in a byte
pub const BITS_PER_BYTE: usize = 8;

/// The 8 bit-planes of a byte raster.
///
/// All planes live in a single `(8, rows, cols)` arena and are addressed by
/// bit index. Cells hold 0 or 1.
#[derive(Debug, Clone, PartialEq)]
pub struct BitPlanes {
    planes: Array3<u8>,
}

impl BitPlanes {
    /// All bits cleared
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            planes: Array3::zeros((BITS_PER_BYTE, rows, cols)),
        }
    }

    /// Split a byte raster into its planes
    pub fn unpack(values: ArrayView2<'_, u8>) -> Self {
        let (rows, cols) = values.dim();
        let mut planes = Array3::zeros((BITS_PER_BYTE, rows, cols));
        for (bit, mut plane) in planes.axis_iter_mut(Axis(0)).enumerate() {
            plane.zip_mut_with(&values, |p, &v| *p = (v >> bit) & 1);
        }
        Self { planes }
    }

    /// Recombine the planes into bytes
    pub fn pack(&self) -> Array2<u8> {
        let (_, rows, cols) = self.planes.dim();
        let mut out = Array2::zeros((rows, cols));
        for (bit, plane) in self.planes.axis_iter(Axis(0)).enumerate() {
            out.zip_mut_with(&plane, |o, &p| *o |= (p & 1) << bit);
        }
        out
    }

    /// Dimensions of one plane as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.planes.dim();
        (rows, cols)
    }

    /// View of plane `bit`
    pub fn plane(&self, bit: usize) -> Result<ArrayView2<'_, u8>> {
        self.check_bit(bit)?;
        Ok(self.planes.index_axis(Axis(0), bit))
    }

    /// Bit `bit` of cell (row, col)
    pub fn get(&self, bit: usize, row: usize, col: usize) -> Result<bool> {
        self.check_bit(bit)?;
        self.planes
            .get((bit, row, col))
            .map(|&v| v != 0)
            .ok_or_else(|| self.out_of_bounds(row, col))
    }

    /// Set bit `bit` of cell (row, col)
    pub fn set(&mut self, bit: usize, row: usize, col: usize, value: bool) -> Result<()> {
        self.check_bit(bit)?;
        let err = self.out_of_bounds(row, col);
        let cell = self.planes.get_mut((bit, row, col)).ok_or(err)?;
        *cell = u8::from(value);
        Ok(())
    }

    fn check_bit(&self, bit: usize) -> Result<()> {
        if bit >= BITS_PER_BYTE {
            return Err(Error::InvalidParameter {
                name: "bit",
                value: bit.to_string(),
                reason: format!("bit index must be below {}", BITS_PER_BYTE),
            });
        }
        Ok(())
    }

    fn out_of_bounds(&self, row: usize, col: usize) -> Error {
        let (rows, cols) = self.shape();
        Error::IndexOutOfBounds { row, col, rows, cols }
    }
}

/// Read bit `bit` of a byte value
#[inline]
pub fn bit_of(value: u8, bit: usize) -> bool {
    (value >> bit) & 1 == 1
}

/// Return `value` with bit `bit` set to `on`
#[inline]
pub fn with_bit(value: u8, bit: usize, on: bool) -> u8 {
    if on {
        value | (1 << bit)
    } else {
        value & !(1 << bit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_unpack_is_little_endian() {
        let values = array![[0b0000_0001u8, 0b1000_0000], [0b0100_0010, 255]];
        let planes = BitPlanes::unpack(values.view());

        assert!(planes.get(0, 0, 0).unwrap());
        assert!(!planes.get(7, 0, 0).unwrap());
        assert!(planes.get(7, 0, 1).unwrap());
        assert!(planes.get(1, 1, 0).unwrap());
        assert!(planes.get(6, 1, 0).unwrap());
        assert_eq!(planes.plane(3).unwrap(), array![[0u8, 0], [0, 1]]);
    }

    #[test]
    fn test_pack_restores_every_byte() {
        let values = Array2::from_shape_fn((16, 16), |(r, c)| (r * 16 + c) as u8);
        let planes = BitPlanes::unpack(values.view());
        assert_eq!(planes.pack(), values);
    }

    #[test]
    fn test_set_bits_then_pack() {
        let mut planes = BitPlanes::zeros(1, 2);
        planes.set(2, 0, 0, true).unwrap();
        planes.set(5, 0, 0, true).unwrap();
        planes.set(0, 0, 1, true).unwrap();
        planes.set(0, 0, 1, false).unwrap();
        assert_eq!(planes.pack(), array![[0b0010_0100u8, 0]]);
    }

    #[test]
    fn test_invalid_bit_or_cell() {
        let mut planes = BitPlanes::zeros(2, 2);
        assert!(planes.plane(8).is_err());
        assert!(planes.set(8, 0, 0, true).is_err());
        assert!(matches!(
            planes.get(0, 2, 0),
            Err(Error::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_scalar_bit_helpers() {
        assert!(bit_of(0b100, 2));
        assert!(!bit_of(0b100, 1));
        assert_eq!(with_bit(0, 7, true), 128);
        assert_eq!(with_bit(255, 0, false), 254);
    }
}
