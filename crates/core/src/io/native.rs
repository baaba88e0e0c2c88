//! Native GeoTIFF reading/writing (without GDAL dependency)
//!
//! Uses the `tiff` crate. Every sample format is written with its own type,
//! georeferencing and nodata travel in the GeoTIFF tags. Tiling, overviews
//! and multi-band output need the `gdal` feature.

use super::geokeys::{self, tiff_error, GeoTags};
use super::{Compression, GeoTiffOptions, RasterInfo};
use crate::error::{Error, Result};
use crate::raster::{DataType, Raster, RasterElement};
use num_traits::NumCast;
use std::fmt::Debug;
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{
    ColorType, Gray16, Gray32, Gray32Float, Gray64, Gray64Float, Gray8, GrayI16, GrayI32,
    GrayI64, GrayI8,
};
use tiff::encoder::compression::{self as codec, Deflate, Lzw, Packbits, Uncompressed};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;

/// Read one band of a GeoTIFF file into a Raster
///
/// `band` is 1-based and defaults to 1. Bands of pixel-interleaved
/// multi-sample files are supported.
pub fn read_geotiff<T, P>(path: P, band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = open(path.as_ref())?;
    decode_geotiff(file, band)
}

/// Read a GeoTIFF from an in-memory buffer into a Raster
///
/// Same as `read_geotiff` but operates on a byte slice instead of a file path.
pub fn read_geotiff_from_buffer<T>(data: &[u8], band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
{
    decode_geotiff(Cursor::new(data), band)
}

/// Read size, band count, sample type and georeferencing of a GeoTIFF
pub fn read_geotiff_info<P: AsRef<Path>>(path: P) -> Result<RasterInfo> {
    let mut decoder = open_decoder(open(path.as_ref())?)?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| tiff_error("Cannot read dimensions", e))?;
    let bands = samples_per_pixel(&mut decoder);
    let data_type = sample_type(&mut decoder)?;

    Ok(RasterInfo {
        rows: height as usize,
        cols: width as usize,
        bands,
        data_type,
        georef: geokeys::read_georef(&mut decoder),
        crs: geokeys::read_crs(&mut decoder),
        nodata: geokeys::read_nodata(&mut decoder),
    })
}

fn open(path: &Path) -> Result<File> {
    if !path.exists() {
        return Err(Error::MissingInput(path.to_path_buf()));
    }
    Ok(File::open(path)?)
}

fn open_decoder<R: Read + Seek>(reader: R) -> Result<Decoder<R>> {
    Decoder::new(reader)
        .map(|d| d.with_limits(Limits::unlimited()))
        .map_err(|e| tiff_error("TIFF decode error", e))
}

fn samples_per_pixel<R: Read + Seek>(decoder: &mut Decoder<R>) -> usize {
    decoder
        .get_tag_u32(Tag::SamplesPerPixel)
        .map(|n| n.max(1) as usize)
        .unwrap_or(1)
}

fn first_tag_value<R: Read + Seek>(decoder: &mut Decoder<R>, tag: Tag, default: u32) -> u32 {
    decoder
        .get_tag_u32_vec(tag)
        .ok()
        .and_then(|v| v.first().copied())
        .unwrap_or(default)
}

/// On-disk sample type from SampleFormat and BitsPerSample
fn sample_type<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<DataType> {
    let format = first_tag_value(decoder, Tag::SampleFormat, 1);
    let bits = first_tag_value(decoder, Tag::BitsPerSample, 1);

    let data_type = match (format, bits) {
        (1, 8) => DataType::U8,
        (1, 16) => DataType::U16,
        (1, 32) => DataType::U32,
        (1, 64) => DataType::U64,
        (2, 8) => DataType::I8,
        (2, 16) => DataType::I16,
        (2, 32) => DataType::I32,
        (2, 64) => DataType::I64,
        (3, 32) => DataType::F32,
        (3, 64) => DataType::F64,
        _ => {
            return Err(Error::UnsupportedDataType(format!(
                "sample format {} with {} bits",
                format, bits
            )))
        }
    };
    Ok(data_type)
}

fn cast_sample<S, T>(value: S) -> Result<T>
where
    S: NumCast + Copy + Debug,
    T: RasterElement,
{
    num_traits::cast(value).ok_or_else(|| {
        Error::UnsupportedDataType(format!(
            "sample {:?} does not fit {}",
            value,
            T::data_type()
        ))
    })
}

/// Internal: decode one band from any `Read + Seek` source
fn decode_geotiff<T, R>(reader: R, band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
    R: Read + Seek,
{
    let mut decoder = open_decoder(reader)?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| tiff_error("Cannot read dimensions", e))?;
    let rows = height as usize;
    let cols = width as usize;

    let samples = samples_per_pixel(&mut decoder);
    let band = band.unwrap_or(1);
    if band == 0 || band > samples {
        return Err(Error::InvalidParameter {
            name: "band",
            value: band.to_string(),
            reason: format!("file has {} band(s)", samples),
        });
    }
    if samples > 1 && first_tag_value(&mut decoder, Tag::PlanarConfiguration, 1) == 2 {
        return Err(Error::UnsupportedDataType(
            "band-interleaved (planar) TIFF".to_string(),
        ));
    }

    let result = decoder
        .read_image()
        .map_err(|e| tiff_error("Cannot read image data", e))?;

    macro_rules! select_band {
        ($buf:expr) => {
            $buf.iter()
                .skip(band - 1)
                .step_by(samples)
                .map(|&v| cast_sample::<_, T>(v))
                .collect::<Result<Vec<T>>>()?
        };
    }

    #[allow(unreachable_patterns)]
    let data: Vec<T> = match result {
        DecodingResult::U8(buf) => select_band!(buf),
        DecodingResult::U16(buf) => select_band!(buf),
        DecodingResult::U32(buf) => select_band!(buf),
        DecodingResult::U64(buf) => select_band!(buf),
        DecodingResult::I8(buf) => select_band!(buf),
        DecodingResult::I16(buf) => select_band!(buf),
        DecodingResult::I32(buf) => select_band!(buf),
        DecodingResult::I64(buf) => select_band!(buf),
        DecodingResult::F32(buf) => select_band!(buf),
        DecodingResult::F64(buf) => select_band!(buf),
        _ => {
            return Err(Error::UnsupportedDataType(
                "Unsupported TIFF pixel format".to_string(),
            ))
        }
    };

    if data.len() != rows * cols {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let mut raster = Raster::from_vec(data, rows, cols)?;
    raster.set_georef(geokeys::read_georef(&mut decoder));
    raster.set_crs(geokeys::read_crs(&mut decoder));
    if let Some(nodata) = geokeys::read_nodata(&mut decoder) {
        // A nodata value outside the cell type cannot occur in the data
        raster.set_nodata(num_traits::cast(nodata));
    }

    Ok(raster)
}

/// Write a Raster to a GeoTIFF file
///
/// The sample format follows `T`. Tiling and overviews are skipped with a
/// warning, build with the `gdal` feature to get them.
pub fn write_geotiff<T, P>(
    raster: &Raster<T>,
    path: P,
    options: Option<GeoTiffOptions>,
) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let opts = options.unwrap_or_default();
    warn_unsupported(&opts);
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    encode_geotiff(raster, &mut writer, &opts)?;
    writer.flush()?;
    Ok(())
}

/// Write byte bands to one GeoTIFF file.
///
/// The native writer only handles a single band.
pub fn write_multiband_geotiff<P: AsRef<Path>>(
    bands: &[Raster<u8>],
    path: P,
    options: Option<GeoTiffOptions>,
) -> Result<()> {
    match bands {
        [band] => write_geotiff(band, path, options),
        [] => Err(Error::InvalidParameter {
            name: "bands",
            value: "0".to_string(),
            reason: "nothing to write".to_string(),
        }),
        _ => Err(multiband_unsupported(bands.len())),
    }
}

/// Error for a file of `bands` bands on a single-band backend
pub fn multiband_unsupported(bands: usize) -> Error {
    Error::UnsupportedDataType(format!(
        "writing {} bands to one file requires the gdal feature",
        bands
    ))
}

/// Write a Raster to an in-memory GeoTIFF buffer
pub fn write_geotiff_to_buffer<T>(
    raster: &Raster<T>,
    options: Option<GeoTiffOptions>,
) -> Result<Vec<u8>>
where
    T: RasterElement,
{
    let opts = options.unwrap_or_default();
    let mut buf = Vec::new();
    encode_geotiff(raster, Cursor::new(&mut buf), &opts)?;
    Ok(buf)
}

fn warn_unsupported(opts: &GeoTiffOptions) {
    if opts.tile_size > 0 {
        tracing::warn!("native GeoTIFF writer ignores tiling, writing strips");
    }
    if opts.overviews {
        tracing::warn!("native GeoTIFF writer cannot build overviews, skipping them");
    }
    if opts.bigtiff {
        tracing::warn!("native GeoTIFF writer ignores the BigTIFF option");
    }
}

/// Internal: encode a Raster as GeoTIFF into any `Write + Seek` sink
fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W, opts: &GeoTiffOptions) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
{
    let nodata = raster.nodata().and_then(num_traits::cast::<T, f64>);
    let tags = GeoTags::new(raster.georef(), raster.crs(), nodata);

    macro_rules! encode_as {
        ($color:ty) => {
            encode_typed::<T, W, $color>(raster, writer, opts.compression, &tags)
        };
    }

    match T::data_type() {
        DataType::U8 => encode_as!(Gray8),
        DataType::I8 => encode_as!(GrayI8),
        DataType::U16 => encode_as!(Gray16),
        DataType::I16 => encode_as!(GrayI16),
        DataType::U32 => encode_as!(Gray32),
        DataType::I32 => encode_as!(GrayI32),
        DataType::U64 => encode_as!(Gray64),
        DataType::I64 => encode_as!(GrayI64),
        DataType::F32 => encode_as!(Gray32Float),
        DataType::F64 => encode_as!(Gray64Float),
    }
}

fn encode_typed<T, W, C>(
    raster: &Raster<T>,
    writer: W,
    compression: Compression,
    tags: &GeoTags,
) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
    C: ColorType,
    C::Inner: NumCast + Copy,
    [C::Inner]: TiffValue,
{
    let data: Vec<C::Inner> = raster
        .data()
        .iter()
        .map(|&v| {
            num_traits::cast(v).ok_or_else(|| {
                Error::UnsupportedDataType(format!("cannot encode {:?}", v))
            })
        })
        .collect::<Result<_>>()?;

    let mut encoder =
        TiffEncoder::new(writer).map_err(|e| tiff_error("TIFF encoder error", e))?;
    let (rows, cols) = raster.shape();

    match compression {
        Compression::None => write_image::<W, C, _>(&mut encoder, rows, cols, &data, Uncompressed, tags),
        Compression::Deflate => {
            write_image::<W, C, _>(&mut encoder, rows, cols, &data, Deflate::default(), tags)
        }
        Compression::Lzw => {
            write_image::<W, C, _>(&mut encoder, rows, cols, &data, Lzw::default(), tags)
        }
        Compression::PackBits => {
            write_image::<W, C, _>(&mut encoder, rows, cols, &data, Packbits::default(), tags)
        }
    }
}

fn write_image<W, C, D>(
    encoder: &mut TiffEncoder<W>,
    rows: usize,
    cols: usize,
    data: &[C::Inner],
    compression: D,
    tags: &GeoTags,
) -> Result<()>
where
    W: Write + Seek,
    C: ColorType,
    D: codec::Compression,
    [C::Inner]: TiffValue,
{
    let mut image = encoder
        .new_image_with_compression::<C, D>(cols as u32, rows as u32, compression)
        .map_err(|e| tiff_error("Cannot create TIFF image", e))?;

    tags.write(image.encoder())?;

    image
        .write_data(data)
        .map_err(|e| tiff_error("Cannot write image data", e))
}
