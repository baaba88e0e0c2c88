//! GeoTIFF reading and writing using GDAL

use super::{Compression, GeoTiffOptions, RasterInfo, OVERVIEW_LEVELS, PRODUCT_ZLEVEL};
use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{DataType, Gcp, GeoTransform, Georef, Raster, RasterElement};
use gdal::gcp::Gcp as GdalGcp;
use gdal::raster::{Buffer, GdalDataType, GdalType, RasterCreationOptions};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use std::path::Path;

fn open(path: &Path) -> Result<Dataset> {
    if !path.exists() {
        return Err(Error::MissingInput(path.to_path_buf()));
    }
    Ok(Dataset::open(path)?)
}

fn read_crs(dataset: &Dataset) -> Option<CRS> {
    // GCP datasets carry their CRS with the GCPs
    let srs = dataset
        .spatial_ref()
        .ok()
        .or_else(|| dataset.gcp_spatial_ref())?;
    let wkt = srs.to_wkt().ok()?;
    let crs = CRS::from_wkt(wkt);
    Some(match srs.auth_code() {
        Ok(code) => crs.with_epsg(code as u32),
        Err(_) => crs,
    })
}

fn read_georef(dataset: &Dataset) -> Georef {
    let gcps = dataset.gcps();
    if !gcps.is_empty() {
        return Georef::Gcps(
            gcps.iter()
                .map(|g| Gcp::new(g.pixel(), g.line(), g.x(), g.y(), g.z()))
                .collect(),
        );
    }
    match dataset.geo_transform() {
        Ok(gt) => Georef::Transform(GeoTransform::from_gdal(gt)),
        Err(_) => Georef::default(),
    }
}

/// Read a GeoTIFF band into a Raster
///
/// # Arguments
/// * `path` - Path to the GeoTIFF file
/// * `band` - Band number (1-indexed), defaults to 1
///
/// # Example
/// ```ignore
/// let cloud: Raster<u8> = read_geotiff("CLOUD.tif", None)?;
/// ```
pub fn read_geotiff<T, P>(path: P, band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement + GdalType,
    P: AsRef<Path>,
{
    let dataset = open(path.as_ref())?;
    let rasterband = dataset.rasterband(band.unwrap_or(1))?;

    let (cols, rows) = dataset.raster_size();
    let buffer = rasterband.read_as::<T>((0, 0), (cols, rows), (cols, rows), None)?;

    let mut raster = Raster::from_vec(buffer.data().to_vec(), rows, cols)?;
    raster.set_georef(read_georef(&dataset));
    raster.set_crs(read_crs(&dataset));

    if let Some(nodata) = rasterband.no_data_value() {
        raster.set_nodata(num_traits::cast(nodata));
    }

    Ok(raster)
}

/// Read size, band count, sample type and georeferencing
pub fn read_geotiff_info<P: AsRef<Path>>(path: P) -> Result<RasterInfo> {
    let dataset = open(path.as_ref())?;
    let (cols, rows) = dataset.raster_size();
    let band = dataset.rasterband(1)?;

    let data_type = match band.band_type() {
        GdalDataType::UInt8 => DataType::U8,
        GdalDataType::Int8 => DataType::I8,
        GdalDataType::UInt16 => DataType::U16,
        GdalDataType::Int16 => DataType::I16,
        GdalDataType::UInt32 => DataType::U32,
        GdalDataType::Int32 => DataType::I32,
        GdalDataType::UInt64 => DataType::U64,
        GdalDataType::Int64 => DataType::I64,
        GdalDataType::Float32 => DataType::F32,
        GdalDataType::Float64 => DataType::F64,
        other => return Err(Error::UnsupportedDataType(format!("{:?}", other))),
    };

    Ok(RasterInfo {
        rows,
        cols,
        bands: dataset.raster_count(),
        data_type,
        georef: read_georef(&dataset),
        crs: read_crs(&dataset),
        nodata: band.no_data_value(),
    })
}

fn creation_options(opts: &GeoTiffOptions) -> Result<RasterCreationOptions> {
    let mut create_options = RasterCreationOptions::new();
    create_options.set_name_value("COMPRESS", opts.compression.gdal_name())?;
    if opts.compression == Compression::Deflate {
        create_options.set_name_value("ZLEVEL", &PRODUCT_ZLEVEL.to_string())?;
    }

    if opts.tile_size > 0 {
        create_options.set_name_value("TILED", "YES")?;
        create_options.set_name_value("BLOCKXSIZE", &opts.tile_size.to_string())?;
        create_options.set_name_value("BLOCKYSIZE", &opts.tile_size.to_string())?;
    }

    if opts.bigtiff {
        create_options.set_name_value("BIGTIFF", "YES")?;
    }

    Ok(create_options)
}

fn spatial_ref(crs: &CRS) -> Result<Option<SpatialRef>> {
    Ok(match (crs.epsg(), crs.wkt()) {
        (Some(epsg), _) => Some(SpatialRef::from_epsg(epsg)?),
        (None, Some(wkt)) => Some(SpatialRef::from_wkt(wkt)?),
        (None, None) => None,
    })
}

/// Create an empty dataset carrying the georeferencing and CRS of `template`
fn create_dataset<T, P>(
    template: &Raster<T>,
    band_count: usize,
    path: P,
    opts: &GeoTiffOptions,
) -> Result<Dataset>
where
    T: RasterElement + GdalType,
    P: AsRef<Path>,
{
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (rows, cols) = template.shape();

    let mut dataset = driver.create_with_band_type_with_options::<T, _>(
        path.as_ref(),
        cols,
        rows,
        band_count,
        &creation_options(opts)?,
    )?;

    let srs = match template.crs() {
        Some(crs) => spatial_ref(crs)?,
        None => None,
    };

    match template.georef() {
        Georef::Transform(gt) => {
            dataset.set_geo_transform(&gt.to_gdal())?;
            if let Some(srs) = &srs {
                dataset.set_spatial_ref(srs)?;
            }
        }
        Georef::Gcps(gcps) => {
            let srs = match srs {
                Some(srs) => srs,
                None => SpatialRef::new()?,
            };
            let gcps = gcps
                .iter()
                .enumerate()
                .map(|(i, g)| GdalGcp {
                    id: (i + 1).to_string(),
                    info: String::new(),
                    pixel: g.pixel,
                    line: g.line,
                    x: g.x,
                    y: g.y,
                    z: g.z,
                })
                .collect();
            dataset.set_gcps(gcps, &srs)?;
        }
    }

    Ok(dataset)
}

fn write_band<T>(dataset: &Dataset, index: usize, raster: &Raster<T>) -> Result<()>
where
    T: RasterElement + GdalType,
{
    let (rows, cols) = raster.shape();
    let mut band = dataset.rasterband(index)?;

    if let Some(nodata) = raster.nodata() {
        band.set_no_data_value(num_traits::cast(nodata))?;
    }

    let mut buffer = Buffer::new((cols, rows), raster.data().iter().copied().collect());
    band.write((0, 0), (cols, rows), &mut buffer)?;
    Ok(())
}

fn finish(mut dataset: Dataset, opts: &GeoTiffOptions) -> Result<()> {
    if opts.overviews {
        // Overviews follow the main image codec and block size
        gdal::config::set_config_option("COMPRESS_OVERVIEW", opts.compression.gdal_name())?;
        if opts.tile_size > 0 {
            gdal::config::set_config_option("GDAL_TIFF_OVR_BLOCKSIZE", &opts.tile_size.to_string())?;
        }
        dataset.build_overviews("NEAREST", &OVERVIEW_LEVELS, &[])?;
    }
    dataset.flush_cache()?;
    Ok(())
}

/// Write a Raster to a GeoTIFF file
///
/// # Arguments
/// * `raster` - The raster to write
/// * `path` - Output file path
/// * `options` - Optional GeoTIFF options
pub fn write_geotiff<T, P>(
    raster: &Raster<T>,
    path: P,
    options: Option<GeoTiffOptions>,
) -> Result<()>
where
    T: RasterElement + GdalType,
    P: AsRef<Path>,
{
    let opts = options.unwrap_or_default();
    let dataset = create_dataset(raster, 1, path, &opts)?;
    write_band(&dataset, 1, raster)?;
    finish(dataset, &opts)
}

/// Write byte bands of identical shape to one GeoTIFF file.
///
/// Georeferencing and CRS come from the first band.
pub fn write_multiband_geotiff<P: AsRef<Path>>(
    bands: &[Raster<u8>],
    path: P,
    options: Option<GeoTiffOptions>,
) -> Result<()> {
    let first = bands.first().ok_or_else(|| Error::InvalidParameter {
        name: "bands",
        value: "0".to_string(),
        reason: "nothing to write".to_string(),
    })?;
    let (er, ec) = first.shape();
    if let Some(other) = bands.iter().find(|b| b.shape() != (er, ec)) {
        let (ar, ac) = other.shape();
        return Err(Error::SizeMismatch { er, ec, ar, ac });
    }

    let opts = options.unwrap_or_default();
    let dataset = create_dataset(first, bands.len(), path, &opts)?;
    for (i, band) in bands.iter().enumerate() {
        write_band(&dataset, i + 1, band)?;
    }
    finish(dataset, &opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_write_read_roundtrip() {
        let mut raster: Raster<u8> = Raster::new(100, 100);
        raster.set_transform(GeoTransform::new(0.0, 100.0, 1.0, -1.0));
        raster.set_crs(Some(CRS::from_epsg(4326)));
        raster.set_nodata(Some(255));

        for i in 0..100 {
            for j in 0..100 {
                raster.set(i, j, ((i * 100 + j) % 250) as u8).unwrap();
            }
        }

        let tmp = NamedTempFile::with_suffix(".tif").unwrap();
        write_geotiff(&raster, tmp.path(), Some(GeoTiffOptions::compressed())).unwrap();

        let loaded: Raster<u8> = read_geotiff(tmp.path(), None).unwrap();

        assert_eq!(loaded.shape(), raster.shape());
        assert_eq!(loaded.data(), raster.data());
        assert_eq!(loaded.nodata(), Some(255));
    }

    #[test]
    fn test_gcps_roundtrip() {
        let mut raster: Raster<u8> = Raster::filled(20, 30, 7);
        let gcps = vec![
            Gcp::new(0.0, 0.0, 7.0, 46.0, 0.0),
            Gcp::new(29.0, 0.0, 7.3, 46.0, 0.0),
            Gcp::new(0.0, 19.0, 7.0, 45.8, 0.0),
        ];
        raster.set_georef(Georef::Gcps(gcps.clone()));
        raster.set_crs(Some(CRS::from_epsg(4326)));

        let tmp = NamedTempFile::with_suffix(".tif").unwrap();
        write_geotiff(&raster, tmp.path(), None).unwrap();

        let loaded: Raster<u8> = read_geotiff(tmp.path(), None).unwrap();
        assert_eq!(loaded.georef().gcps(), Some(gcps.as_slice()));
        assert_eq!(loaded.crs().and_then(|c| c.epsg()), Some(4326));

        let info = read_geotiff_info(tmp.path()).unwrap();
        assert!(info.georef.transform().is_none());
    }

    #[test]
    fn test_multiband_with_overviews() {
        let a: Raster<u8> = Raster::filled(64, 64, 1);
        let b: Raster<u8> = Raster::filled(64, 64, 2);

        let tmp = NamedTempFile::with_suffix(".tif").unwrap();
        write_multiband_geotiff(&[a, b], tmp.path(), Some(GeoTiffOptions::compressed())).unwrap();

        let info = read_geotiff_info(tmp.path()).unwrap();
        assert_eq!(info.bands, 2);
        assert_eq!(info.data_type, DataType::U8);
        let second: Raster<u8> = read_geotiff(tmp.path(), Some(2)).unwrap();
        assert_eq!(second.get(10, 10).unwrap(), 2);
    }
}
