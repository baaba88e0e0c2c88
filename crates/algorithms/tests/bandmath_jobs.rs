//! End-to-end band math jobs over GeoTIFF files written to a temp directory.

use hrwsi_algorithms::bandmath::{
    bit_bandmath, BandMathJob, BandMathParams, BandSpec, CompiledJob, SourceSpec, StepSpec,
};
use hrwsi_algorithms::products::{cc, fsc, nrt, FscInputs, NrtInputs, QcWeights};
use hrwsi_core::io::{read_geotiff, write_geotiff};
use hrwsi_core::{Error, GeoTransform, Raster, CRS};
use hrwsi_parallel::ProcessingMode;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ROWS: usize = 2;
const COLS: usize = 3;

fn transform() -> GeoTransform {
    GeoTransform::new(600000.0, 5100000.0, 20.0, -20.0)
}

fn georeferenced<T: hrwsi_core::RasterElement>(values: &[T]) -> Raster<T> {
    let mut raster = Raster::from_vec(values.to_vec(), ROWS, COLS).unwrap();
    raster.set_transform(transform());
    raster.set_crs(Some(CRS::from_epsg(32631)));
    raster
}

fn write_u8(dir: &Path, name: &str, values: &[u8]) -> PathBuf {
    let path = dir.join(name);
    write_geotiff(&georeferenced(values), &path, None).unwrap();
    path
}

fn write_i16(dir: &Path, name: &str, values: &[i16]) -> PathBuf {
    let path = dir.join(name);
    write_geotiff(&georeferenced(values), &path, None).unwrap();
    path
}

fn read_values(path: &Path) -> Vec<u8> {
    let raster: Raster<u8> = read_geotiff(path, None).unwrap();
    raster.data().iter().copied().collect()
}

fn run_all(jobs: &[BandMathJob]) {
    for job in jobs {
        bit_bandmath(job, BandMathParams::default()).unwrap();
    }
}

#[test]
fn test_fsc_quality_layers() {
    let dir = TempDir::new().unwrap();
    let d = dir.path();

    let fsc_toc = write_u8(d, "FSCTOC.tif", &[100, 50, 0, 205, 40, 255]);
    let inputs = FscInputs {
        fsc_og: Some(fsc_toc.clone()),
        geophysical: write_u8(d, "MG2.tif", &[64, 128, 0, 192, 0, 0]),
        water: write_u8(d, "WATER.tif", &[0, 0, 1, 0, 0, 0]),
        tcd: write_u8(d, "TCD.tif", &[95, 10, 0, 255, 50, 0]),
        cloud: write_u8(d, "CLM.tif", &[0, 0, 0, 0, 1, 0]),
        shaded_snow: None,
        fsc_toc,
    };

    let out = d.join("product");
    run_all(&fsc::quality_jobs(&inputs, &out, &QcWeights::default()));

    assert_eq!(read_values(&out.join(fsc::CLOUD_FILE)), vec![0, 0, 0, 0, 1, 0]);
    assert_eq!(read_values(&out.join(fsc::QCFLAGS_FILE)), vec![9, 2, 4, 35, 16, 0]);
    assert_eq!(read_values(&out.join(fsc::QCTOC_FILE)), vec![2, 1, 1, 205, 1, 255]);
    assert_eq!(read_values(&out.join(fsc::QCOG_FILE)), vec![3, 3, 1, 205, 3, 255]);

    let qc: Raster<u8> = read_geotiff(out.join(fsc::QCTOC_FILE), None).unwrap();
    assert_eq!(qc.nodata(), Some(255));
    assert_eq!(qc.transform().map(|t| t.to_gdal()), Some(transform().to_gdal()));
    assert_eq!(qc.crs().and_then(|c| c.epsg()), Some(32631));

    let flags: Raster<u8> = read_geotiff(out.join(fsc::QCFLAGS_FILE), None).unwrap();
    assert_eq!(flags.nodata(), None);
}

#[test]
fn test_masked_snow_layer() {
    let dir = TempDir::new().unwrap();
    let d = dir.path();

    let layer = write_u8(d, "FSC.tif", &[80, 205, 30, 40, 205, 10]);
    let l2a = write_i16(d, "B12.tif", &[120, 300, -10000, 50, 50, 50]);
    let water = write_u8(d, "WATER.tif", &[0, 0, 0, 1, 2, 253]);
    let output = d.join("FSC_masked.tif");

    run_all(&[fsc::masked_layer(&layer, &l2a, &water, &output)]);
    // Cloud over water stays cloud, L2A nodata and 253 become nodata
    assert_eq!(read_values(&output), vec![80, 205, 255, 210, 205, 255]);
}

#[test]
fn test_nrt_layers_keep_water() {
    let dir = TempDir::new().unwrap();
    let d = dir.path();

    let inputs = NrtInputs {
        fsc_toc: write_u8(d, "LIS_FSCTOCHS.TIF", &[100, 50, 0, 205, 40, 30]),
        fsc_og: write_u8(d, "LIS_FSCOG.tif", &[90, 50, 0, 205, 40, 30]),
        ndsi: write_u8(d, "LIS_NDSI.TIF", &[80, 60, 10, 205, 40, 20]),
        cloud: write_u8(d, "LIS_CLD.tif", &[0, 1, 0, 1, 0, 0]),
        l2a: write_i16(d, "FRE_B12.tif", &[100, 100, 100, 100, 100, -10000]),
        geophysical: write_u8(d, "MG2_R2.tif", &[64, 0, 0, 0, 128, 0]),
        water: write_u8(d, "WATER.tif", &[0, 0, 1, 0, 0, 0]),
        tcd: write_u8(d, "TCD.tif", &[95, 10, 0, 0, 255, 0]),
        hillshade: write_u8(d, "HILLSHADE.tif", &[0, 1, 0, 0, 0, 0]),
        shaded_snow: write_u8(d, "U_SHADED_SNOW.tif", &[0, 0, 0, 0, 0, 1]),
    };

    let out = d.join("nrt");
    run_all(&nrt::jobs(&inputs, &out, &QcWeights::default()));

    assert_eq!(read_values(&out.join(nrt::CLOUD_FILE)), vec![0, 1, 0, 1, 0, 0]);
    assert_eq!(read_values(&out.join(nrt::GV_FILE)), vec![1, 1, 0, 1, 1, 1]);
    assert_eq!(read_values(&out.join(nrt::NDSI_FILE)), vec![80, 60, 210, 205, 40, 255]);
    assert_eq!(read_values(&out.join(nrt::FSCTOC_FILE)), vec![100, 50, 210, 205, 40, 255]);
    assert_eq!(read_values(&out.join(nrt::FSCOG_FILE)), vec![90, 50, 210, 205, 40, 255]);
    // Shaded snow on the last pixel is dropped with the L2A nodata
    assert_eq!(read_values(&out.join(nrt::QCFLAGS_FILE)), vec![5, 40, 0, 0, 18, 0]);
    assert_eq!(read_values(&out.join(nrt::QCTOC_FILE)), vec![3, 1, 210, 205, 1, 255]);
    assert_eq!(read_values(&out.join(nrt::QCOG_FILE)), vec![3, 3, 210, 205, 3, 255]);

    let ndsi: Raster<u8> = read_geotiff(out.join(nrt::NDSI_FILE), None).unwrap();
    assert_eq!(ndsi.nodata(), None);
    let qc: Raster<u8> = read_geotiff(out.join(nrt::QCTOC_FILE), None).unwrap();
    assert_eq!(qc.nodata(), Some(255));
}

#[test]
fn test_cloud_copy_keeps_nodata_tag() {
    let dir = TempDir::new().unwrap();
    let d = dir.path();
    let mut cloud = georeferenced(&[0u8, 2, 0, 255, 4, 0]);
    cloud.set_nodata(Some(255));
    let cloud_path = d.join("CLM.tif");
    write_geotiff(&cloud, &cloud_path, None).unwrap();

    let output = d.join(fsc::CLOUD_FILE);
    run_all(&[fsc::cloud_layer(&cloud_path, None, &output)]);

    let copy: Raster<u8> = read_geotiff(&output, None).unwrap();
    assert_eq!(copy.data(), cloud.data());
    assert_eq!(copy.nodata(), Some(255));
}

#[test]
fn test_cloud_classification() {
    let dir = TempDir::new().unwrap();
    let d = dir.path();

    let inputs = cc::CcInputs {
        cloud: write_u8(d, "CLM_R2.tif", &[0b1000_0000, 0b0000_0010, 0b0010_0000, 0, 0b0100_0000, 0]),
        nodata: write_u8(d, "EDG_R2.tif", &[0, 0, 0, 0, 0, 1]),
        geophysical: write_u8(d, "MG2_R2.tif", &[1, 0, 0, 1, 0, 0]),
    };

    let out = d.join("cc");
    run_all(&cc::jobs(&inputs, &out));

    assert_eq!(read_values(&out.join(cc::CC_FILE)), vec![1, 2, 3, 0, 3, 255]);
    assert_eq!(read_values(&out.join(cc::QCFLAGS_FILE)), vec![32, 0, 8, 32, 16, 0]);
    assert_eq!(read_values(&out.join(cc::QC_FILE)), vec![0, 0, 0, 0, 1, 255]);
}

#[test]
fn test_yaml_job_with_relative_paths() {
    let dir = TempDir::new().unwrap();
    let d = dir.path();
    write_u8(d, "a.tif", &[1, 2, 3, 4, 5, 6]);
    write_u8(d, "flags.tif", &[0b1, 0b10, 0b11, 0, 0b1, 0b10]);

    let job_path = d.join("job.yaml");
    std::fs::write(
        &job_path,
        r#"
output: out/result.tif
tile_size: 1
bands:
  - nodata: 0
    steps:
      - sources: [{ path: a.tif }]
        value: A0 * 10
      - sources: [{ path: flags.tif, unpack_bits: true }]
        bits:
          7: A0[0] and A0[1]
"#,
    )
    .unwrap();

    let job = CompiledJob::load(&job_path).unwrap();
    let report = job.run(ProcessingMode::ParallelWith(2)).unwrap();
    assert_eq!(report.output, d.join("out/result.tif"));
    assert_eq!((report.rows, report.cols, report.bands, report.inputs), (ROWS, COLS, 1, 2));

    // Bit 7 overwrites the top bit of the value computed by the first step
    assert_eq!(read_values(&report.output), vec![10, 20, 158, 40, 50, 60]);
}

#[test]
fn test_job_errors_map_to_exit_codes() {
    let dir = TempDir::new().unwrap();
    let d = dir.path();
    let small = write_u8(d, "small.tif", &[1, 2, 3, 4, 5, 6]);

    let mut big = Raster::<u8>::new(4, 4);
    big.set_transform(transform());
    let big_path = d.join("big.tif");
    write_geotiff(&big, &big_path, None).unwrap();

    let mismatch = BandMathJob::new(
        d.join("o.tif"),
        vec![BandSpec::new(vec![StepSpec::value(
            vec![SourceSpec::new(&small), SourceSpec::new(&big_path)],
            "A0 + A1",
        )])],
    );
    let err = bit_bandmath(&mismatch, BandMathParams::default()).unwrap_err();
    assert!(matches!(err, Error::SizeMismatch { .. }));
    assert_eq!(err.exit_code().code(), 12);

    let missing = BandMathJob::new(
        d.join("o.tif"),
        vec![BandSpec::new(vec![StepSpec::value(
            vec![SourceSpec::new(&small), SourceSpec::new(d.join("nope.tif"))],
            "A0 + A1",
        )])],
    )
    .with_reference(&small);
    let err = bit_bandmath(&missing, BandMathParams::default()).unwrap_err();
    assert!(matches!(err, Error::MissingInput(_)));
    assert_eq!(err.exit_code().code(), 11);

    let bad_expr = BandMathJob::new(
        d.join("o.tif"),
        vec![BandSpec::new(vec![StepSpec::value(vec![SourceSpec::new(&small)], "A0 +* 1")])],
    );
    let err = bit_bandmath(&bad_expr, BandMathParams::default()).unwrap_err();
    assert!(matches!(err, Error::Expression { position: 5, .. }));
    assert_eq!(err.exit_code().code(), 10);
    assert!(!d.join("o.tif").exists());
}
