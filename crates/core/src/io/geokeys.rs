//! GeoTIFF georeferencing tags.
//!
//! Reads and writes tags 33550 (ModelPixelScale), 33922 (ModelTiepoint),
//! 34264 (ModelTransformation), 34735 (GeoKeyDirectory) and 42113
//! (GDAL_NODATA). Several tiepoints without a pixel scale are ground
//! control points.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{Gcp, GeoTransform, Georef};
use std::io::{Read, Seek, Write};
use tiff::decoder::Decoder;
use tiff::encoder::{DirectoryEncoder, TiffKind};
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const USER_DEFINED: u16 = 32767;

/// Resolve a numeric tag the way the decoder stores it, whether the
/// `tiff` crate knows its name or not
fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Map a `tiff` error onto the crate error, keeping I/O failures apart
pub(crate) fn tiff_error(context: &str, err: tiff::TiffError) -> Error {
    match err {
        tiff::TiffError::IoError(e) => Error::Io(e),
        other => Error::Other(format!("{}: {}", context, other)),
    }
}

/// Read the georeferencing of the current image.
///
/// Falls back to the default north-up unit transform when no tag is present.
pub(crate) fn read_georef<R: Read + Seek>(decoder: &mut Decoder<R>) -> Georef {
    let scale = decoder.get_tag_f64_vec(tag(MODEL_PIXEL_SCALE)).ok();
    let tiepoints = decoder.get_tag_f64_vec(tag(MODEL_TIEPOINT)).ok();

    if let (Some(scale), Some(tp)) = (&scale, &tiepoints) {
        if scale.len() >= 2 && tp.len() >= 6 {
            let origin_x = tp[3] - tp[0] * scale[0];
            let origin_y = tp[4] + tp[1] * scale[1];
            return Georef::Transform(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]));
        }
    }

    if let Ok(m) = decoder.get_tag_f64_vec(tag(MODEL_TRANSFORMATION)) {
        if m.len() >= 16 {
            // Row-major 4x4: x = m[3] + col*m[0] + row*m[1], y = m[7] + col*m[4] + row*m[5]
            return Georef::Transform(GeoTransform::from_gdal([m[3], m[0], m[1], m[7], m[4], m[5]]));
        }
    }

    if let Some(tp) = tiepoints {
        let gcps: Vec<Gcp> = tp
            .chunks_exact(6)
            .map(|t| Gcp::new(t[0], t[1], t[3], t[4], t[5]))
            .collect();
        if !gcps.is_empty() {
            return Georef::Gcps(gcps);
        }
    }

    Georef::default()
}

/// Read the CRS from the GeoKey directory, EPSG codes only
pub(crate) fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<CRS> {
    let keys = decoder.get_tag_u16_vec(tag(GEO_KEY_DIRECTORY)).ok()?;
    parse_epsg(&keys).map(CRS::from_epsg)
}

/// Read the GDAL_NODATA ascii tag
pub(crate) fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    let text = decoder.get_tag_ascii_string(tag(GDAL_NODATA)).ok()?;
    parse_nodata(&text)
}

fn parse_nodata(text: &str) -> Option<f64> {
    text.trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .parse()
        .ok()
}

/// Find the projected or geographic EPSG code in a GeoKey directory.
///
/// Layout: `[version, revision, minor, count]` followed by `count` entries of
/// `[key_id, tag_location, value_count, value]`.
fn parse_epsg(keys: &[u16]) -> Option<u32> {
    let count = *keys.get(3)? as usize;
    let mut projected = None;
    let mut geographic = None;

    for entry in keys[4..].chunks_exact(4).take(count) {
        let (key_id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 || value == USER_DEFINED || value == 0 {
            continue;
        }
        match key_id {
            PROJECTED_CS_TYPE => projected = Some(u32::from(value)),
            GEOGRAPHIC_TYPE => geographic = Some(u32::from(value)),
            _ => {}
        }
    }

    projected.or(geographic)
}

/// GeoTIFF tags to attach to a written image
#[derive(Debug, Clone, Default)]
pub(crate) struct GeoTags {
    pixel_scale: Option<Vec<f64>>,
    tiepoints: Option<Vec<f64>>,
    transformation: Option<Vec<f64>>,
    geokeys: Vec<u16>,
    nodata: Option<String>,
}

impl GeoTags {
    pub(crate) fn new(georef: &Georef, crs: Option<&CRS>, nodata: Option<f64>) -> Self {
        let mut tags = GeoTags {
            nodata: nodata.map(|v| v.to_string()),
            geokeys: geokey_directory(crs),
            ..Default::default()
        };

        match georef {
            Georef::Transform(gt) if gt.row_rotation == 0.0 && gt.col_rotation == 0.0 => {
                tags.pixel_scale = Some(vec![gt.pixel_width, -gt.pixel_height, 0.0]);
                tags.tiepoints = Some(vec![0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0]);
            }
            Georef::Transform(gt) => {
                tags.transformation = Some(vec![
                    gt.pixel_width,
                    gt.row_rotation,
                    0.0,
                    gt.origin_x,
                    gt.col_rotation,
                    gt.pixel_height,
                    0.0,
                    gt.origin_y,
                    0.0,
                    0.0,
                    0.0,
                    0.0,
                    0.0,
                    0.0,
                    0.0,
                    1.0,
                ]);
            }
            Georef::Gcps(gcps) => {
                tags.tiepoints = Some(
                    gcps.iter()
                        .flat_map(|g| [g.pixel, g.line, 0.0, g.x, g.y, g.z])
                        .collect(),
                );
            }
        }

        tags
    }

    pub(crate) fn write<W, K>(&self, dir: &mut DirectoryEncoder<'_, W, K>) -> Result<()>
    where
        W: Write + Seek,
        K: TiffKind,
    {
        let err = |e| tiff_error("Cannot write GeoTIFF tag", e);

        if let Some(scale) = &self.pixel_scale {
            dir.write_tag(tag(MODEL_PIXEL_SCALE), scale.as_slice()).map_err(err)?;
        }
        if let Some(tiepoints) = &self.tiepoints {
            dir.write_tag(tag(MODEL_TIEPOINT), tiepoints.as_slice()).map_err(err)?;
        }
        if let Some(matrix) = &self.transformation {
            dir.write_tag(tag(MODEL_TRANSFORMATION), matrix.as_slice()).map_err(err)?;
        }
        dir.write_tag(tag(GEO_KEY_DIRECTORY), self.geokeys.as_slice())
            .map_err(err)?;
        if let Some(nodata) = &self.nodata {
            dir.write_tag(tag(GDAL_NODATA), nodata.as_str()).map_err(err)?;
        }
        Ok(())
    }
}

/// Minimal GeoKey directory: model type, pixel-is-area and the EPSG code
fn geokey_directory(crs: Option<&CRS>) -> Vec<u16> {
    let geographic = crs.is_some_and(|c| c.is_geographic());
    let model = if geographic {
        MODEL_TYPE_GEOGRAPHIC
    } else {
        MODEL_TYPE_PROJECTED
    };

    let mut entries: Vec<[u16; 4]> = vec![
        [GT_MODEL_TYPE, 0, 1, model],
        [GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA],
    ];
    if let Some(code) = crs.and_then(|c| c.epsg()).and_then(|c| u16::try_from(c).ok()) {
        let key = if geographic {
            GEOGRAPHIC_TYPE
        } else {
            PROJECTED_CS_TYPE
        };
        entries.push([key, 0, 1, code]);
    }

    let mut keys = vec![1, 1, 0, entries.len() as u16];
    keys.extend(entries.into_iter().flatten());
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geokey_directory_roundtrips_epsg() {
        let utm = geokey_directory(Some(&CRS::from_epsg(32632)));
        assert_eq!(&utm[..4], &[1, 1, 0, 3]);
        assert_eq!(parse_epsg(&utm), Some(32632));

        let wgs84 = geokey_directory(Some(&CRS::from_epsg(4326)));
        assert_eq!(wgs84[7], MODEL_TYPE_GEOGRAPHIC);
        assert_eq!(parse_epsg(&wgs84), Some(4326));

        assert_eq!(parse_epsg(&geokey_directory(None)), None);
    }

    #[test]
    fn test_projected_key_wins_over_geographic() {
        let keys = [1, 1, 0, 2, 2048, 0, 1, 4258, 3072, 0, 1, 3035];
        assert_eq!(parse_epsg(&keys), Some(3035));
        let user_defined = [1, 1, 0, 1, 3072, 0, 1, USER_DEFINED];
        assert_eq!(parse_epsg(&user_defined), None);
    }

    #[test]
    fn test_nodata_text() {
        assert_eq!(parse_nodata("255\0"), Some(255.0));
        assert_eq!(parse_nodata(" -10000 "), Some(-10000.0));
        assert!(parse_nodata("nan").is_some_and(f64::is_nan));
        assert_eq!(parse_nodata("none"), None);
        assert_eq!(255.0f64.to_string(), "255");
    }

    #[test]
    fn test_rotated_transform_uses_matrix() {
        let gt = GeoTransform::from_gdal([10.0, 2.0, 0.5, 20.0, 0.25, -2.0]);
        let tags = GeoTags::new(&Georef::Transform(gt), None, None);
        assert!(tags.pixel_scale.is_none());
        let m = tags.transformation.unwrap();
        assert_eq!((m[0], m[1], m[3]), (2.0, 0.5, 10.0));
        assert_eq!((m[4], m[5], m[7]), (0.25, -2.0, 20.0));
    }

    #[test]
    fn test_gcps_become_tiepoints() {
        let gcps = vec![
            Gcp::new(0.0, 0.0, 7.0, 46.0, 0.0),
            Gcp::new(100.0, 50.0, 7.5, 45.5, 12.0),
        ];
        let tags = GeoTags::new(&Georef::Gcps(gcps), None, Some(0.0));
        let tp = tags.tiepoints.unwrap();
        assert_eq!(tp.len(), 12);
        assert_eq!(&tp[6..], &[100.0, 50.0, 0.0, 7.5, 45.5, 12.0]);
        assert_eq!(tags.nodata.as_deref(), Some("0"));
    }
}
