//! Near real time snow product layers
//!
//! The near real time flow masks the LIS layers with the water mask and the
//! L2A nodata, then derives the expert flags and QC layers from the masked
//! snow layers. Every flag bit is cleared where the water mask is nodata
//! (253, 255) or L2A is nodata, and both QC layers are 255 where L2A is
//! nodata. Water (210) set by the masking survives into the QC layers.
//!
//! Expert flags byte (`QCFLAGS`):
//!
//! | bit | meaning |
//! |-----|---------|
//! | 0 | sun too low for an accurate slope correction (geophysical bit 6) |
//! | 1 | sun tangent (geophysical bit 7) |
//! | 2 | tree cover density above 90% |
//! | 3 | snow detected under thin clouds |
//! | 4 | tree cover density undefined |
//! | 5 | hillshade coverage |
//! | 6 | shaded snow found with the uncalibrated hillshade thresholds |
//!
//! All layers are written uncompressed, without overviews.

use super::fsc::{cloud_layer, keep_snow_codes, masked_layer, QcWeights, L2A_NODATA};
use super::{CLOUD_VALUE, NODATA, WATER_VALUE};
use crate::bandmath::{BandMathJob, BandSpec, SourceSpec, StepSpec, WriteSpec};
use std::path::{Path, PathBuf};

pub const CLOUD_FILE: &str = "CLD.tif";
pub const NDSI_FILE: &str = "NDSI.tif";
pub const GV_FILE: &str = "GV_mask.tif";
pub const FSCTOC_FILE: &str = "FSCTOC.tif";
pub const FSCOG_FILE: &str = "FSCOG.tif";
pub const QCFLAGS_FILE: &str = "QCFLAGS.tif";
pub const QCTOC_FILE: &str = "QCTOC.tif";
pub const QCOG_FILE: &str = "QCOG.tif";

/// Codes of the masked snow layers kept through the QC layers
const SNOW_CODES: [u8; 3] = [CLOUD_VALUE, WATER_VALUE, NODATA];

/// Input files of the near real time snow product
#[derive(Debug, Clone, PartialEq)]
pub struct NrtInputs {
    /// LIS top of canopy snow cover, before masking
    pub fsc_toc: PathBuf,
    /// LIS on ground snow cover, before masking
    pub fsc_og: PathBuf,
    /// LIS NDSI
    pub ndsi: PathBuf,
    /// LIS cloud mask
    pub cloud: PathBuf,
    /// An L2A reflectance band, -10000 where the scene has no data
    pub l2a: PathBuf,
    /// MAJA geophysical mask
    pub geophysical: PathBuf,
    /// Water mask: 1 and 2 water, 253 and 255 nodata
    pub water: PathBuf,
    /// Tree cover density, 0..100 or above 100 when undefined
    pub tcd: PathBuf,
    /// 1 where the hillshade mask applies
    pub hillshade: PathBuf,
    /// 1 where shaded snow was found with the uncalibrated thresholds
    pub shaded_snow: PathBuf,
}

/// `cond` where the water mask `water` and the L2A band `l2a` have data
fn gated(cond: &str, water: usize, l2a: usize) -> String {
    format!("(A{w} < 253) * ({cond} and A{l} != {nd})", w = water, l = l2a, nd = L2A_NODATA)
}

/// 255 where L2A `A<l2a>` is nodata, else `expr`
fn l2a_or_nodata(expr: &str, l2a: usize) -> String {
    format!(
        "(A{l} == {nd}) * {n} + (A{l} != {nd}) * ({expr})",
        l = l2a,
        nd = L2A_NODATA,
        n = NODATA
    )
}

/// One flag bit from a single input, gated on water and L2A
fn flag_step(input: &Path, water: &Path, l2a: &Path, bit: u8, cond: &str) -> StepSpec {
    StepSpec::bits(
        vec![SourceSpec::new(input), SourceSpec::new(water), SourceSpec::new(l2a)],
        [(bit, gated(cond, 1, 2))],
    )
}

/// 1 where MAJA found a cloud, LIS found snow or L2A is nodata.
///
/// Snow is read from the LIS top of canopy layer before masking and is
/// ignored where the water mask is nodata.
pub fn geoville_mask(inputs: &NrtInputs, output: impl Into<PathBuf>) -> BandMathJob {
    let expr = format!(
        "(A3 != 255) * (A3 != 253) * (A1 != {nd}) * (A0 > 0 or (A2 > 0) * (A2 <= 100)) + (A1 == {nd})",
        nd = L2A_NODATA
    );
    let step = StepSpec::value(
        vec![
            SourceSpec::new(&inputs.cloud),
            SourceSpec::new(&inputs.l2a),
            SourceSpec::new(&inputs.fsc_toc),
            SourceSpec::new(&inputs.water),
        ],
        expr,
    );
    BandMathJob::new(output, vec![BandSpec::new(vec![step])])
        .with_reference(&inputs.cloud)
        .with_write(WriteSpec::plain())
}

/// Expert flags over the masked top of canopy layer `fsc_toc`
pub fn qc_flags(inputs: &NrtInputs, fsc_toc: &Path, output: impl Into<PathBuf>) -> BandMathJob {
    let (water, l2a) = (inputs.water.as_path(), inputs.l2a.as_path());
    let geophysical = vec![
        SourceSpec::new(&inputs.geophysical).unpacked(),
        SourceSpec::new(water),
        SourceSpec::new(l2a),
    ];
    let steps = vec![
        StepSpec::bits(geophysical, [(0u8, gated("A0[6]", 1, 2)), (1, gated("A0[7]", 1, 2))]),
        flag_step(&inputs.tcd, water, l2a, 2, "(A0 < 101) * (A0 > 90)"),
        StepSpec::bits(
            vec![
                SourceSpec::new(&inputs.cloud),
                SourceSpec::new(fsc_toc),
                SourceSpec::new(water),
                SourceSpec::new(l2a),
            ],
            [(3u8, gated("(A0 > 0) * (A1 > 0) * (A1 < 101)", 2, 3))],
        ),
        flag_step(&inputs.tcd, water, l2a, 4, "A0 > 100"),
        flag_step(&inputs.hillshade, water, l2a, 5, "A0 == 1"),
        flag_step(&inputs.shaded_snow, water, l2a, 6, "A0 == 1"),
    ];
    BandMathJob::new(output, vec![BandSpec::new(steps)])
        .with_reference(fsc_toc)
        .with_write(WriteSpec::plain())
}

/// Grade then snow codes, both 255 where L2A is nodata
fn qc_layer(
    mut grade_sources: Vec<SourceSpec>,
    grade: &str,
    snow: &Path,
    l2a: &Path,
    output: PathBuf,
) -> BandMathJob {
    let l2a_slot = grade_sources.len();
    grade_sources.push(SourceSpec::new(l2a));

    let steps = vec![
        StepSpec::value(grade_sources, l2a_or_nodata(grade, l2a_slot)),
        StepSpec::value(
            vec![SourceSpec::new(snow), SourceSpec::new(l2a)],
            l2a_or_nodata(&keep_snow_codes(&SNOW_CODES), 1),
        ),
    ];
    BandMathJob::new(output, vec![BandSpec::new(steps).with_nodata(NODATA)])
        .with_reference(snow)
        .with_write(WriteSpec::plain())
}

/// Top of canopy quality from the flags and the masked TOC layer
pub fn qc_top_of_canopy(
    qc_flags: &Path,
    fsc_toc: &Path,
    l2a: &Path,
    weights: &QcWeights,
    output: impl Into<PathBuf>,
) -> BandMathJob {
    qc_layer(
        vec![SourceSpec::new(qc_flags).unpacked()],
        &weights.nrt_top_of_canopy(),
        fsc_toc,
        l2a,
        output.into(),
    )
}

/// On ground quality from the flags, tree cover and the masked OG layer
pub fn qc_on_ground(
    qc_flags: &Path,
    tcd: &Path,
    fsc_og: &Path,
    l2a: &Path,
    weights: &QcWeights,
    output: impl Into<PathBuf>,
) -> BandMathJob {
    qc_layer(
        vec![SourceSpec::new(qc_flags).unpacked(), SourceSpec::new(tcd)],
        &weights.nrt_on_ground(),
        fsc_og,
        l2a,
        output.into(),
    )
}

/// Every near real time job, in dependency order.
///
/// Cloud, NDSI and GV mask come from the LIS outputs, then the masked snow
/// layers, the flags read from the masked TOC layer, and the QC layers.
pub fn jobs(inputs: &NrtInputs, output_dir: &Path, weights: &QcWeights) -> Vec<BandMathJob> {
    let toc = output_dir.join(FSCTOC_FILE);
    let og = output_dir.join(FSCOG_FILE);
    let flags = output_dir.join(QCFLAGS_FILE);

    let mut ndsi = masked_layer(&inputs.ndsi, &inputs.l2a, &inputs.water, output_dir.join(NDSI_FILE));
    // NDSI is delivered without a nodata tag
    ndsi.bands[0].nodata = None;

    vec![
        cloud_layer(&inputs.cloud, Some(&inputs.l2a), output_dir.join(CLOUD_FILE)),
        ndsi,
        geoville_mask(inputs, output_dir.join(GV_FILE)),
        masked_layer(&inputs.fsc_toc, &inputs.l2a, &inputs.water, &toc),
        masked_layer(&inputs.fsc_og, &inputs.l2a, &inputs.water, &og),
        qc_flags(inputs, &toc, &flags),
        qc_top_of_canopy(&flags, &toc, &inputs.l2a, weights, output_dir.join(QCTOC_FILE)),
        qc_on_ground(&flags, &inputs.tcd, &og, &inputs.l2a, weights, output_dir.join(QCOG_FILE)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandmath::{CompiledJob, Operation};

    fn inputs() -> NrtInputs {
        NrtInputs {
            fsc_toc: "LIS_FSCTOCHS.TIF".into(),
            fsc_og: "LIS_FSCOG.tif".into(),
            ndsi: "LIS_NDSI.TIF".into(),
            cloud: "LIS_CLD.tif".into(),
            l2a: "FRE_B12.tif".into(),
            geophysical: "MG2_R2.tif".into(),
            water: "WATER.tif".into(),
            tcd: "TCD.tif".into(),
            hillshade: "HILLSHADE.tif".into(),
            shaded_snow: "U_SHADED_SNOW.tif".into(),
        }
    }

    #[test]
    fn test_jobs_compile_in_order() {
        let dir = Path::new("out");
        let jobs = jobs(&inputs(), dir, &QcWeights::default());
        assert_eq!(jobs.len(), 8);
        for job in &jobs {
            CompiledJob::compile(job).unwrap();
            assert_eq!(job.write, WriteSpec::plain(), "{}", job.output.display());
        }

        // Flags and QC layers read the masked layers, not the LIS ones
        let toc = dir.join(FSCTOC_FILE);
        assert_eq!(jobs[5].reference.as_deref(), Some(toc.as_path()));
        assert_eq!(jobs[6].bands[0].steps[1].sources[0].path, toc);
        assert_eq!(jobs[7].bands[0].steps[1].sources[0].path, dir.join(FSCOG_FILE));

        assert_eq!(jobs[1].bands[0].nodata, None);
        assert_eq!(jobs[2].bands[0].nodata, None);
        assert_eq!(jobs[3].bands[0].nodata, Some(NODATA));
        assert_eq!(jobs[6].bands[0].nodata, Some(NODATA));
    }

    #[test]
    fn test_flags_are_gated() {
        let job = qc_flags(&inputs(), Path::new("FSCTOC.tif"), "QCFLAGS.tif");
        let mut keys = Vec::new();
        for step in &job.bands[0].steps {
            if let Operation::Bits(bits) = &step.operation {
                for (k, expr) in bits {
                    keys.push(*k);
                    assert!(expr.contains("< 253") && expr.contains("!= -10000"), "{}", expr);
                }
            }
        }
        assert_eq!(keys, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_qc_keeps_water() {
        let job = qc_top_of_canopy(
            Path::new("QCFLAGS.tif"),
            Path::new("FSCTOC.tif"),
            Path::new("B12.tif"),
            &QcWeights::default(),
            "QCTOC.tif",
        );
        match &job.bands[0].steps[1].operation {
            Operation::Value(expr) => assert_eq!(
                expr,
                "(A1 == -10000) * 255 + (A1 != -10000) * (B * (A0 != 205) * (A0 != 210) * (A0 != 255) \
                 + 205 * (A0 == 205) + 210 * (A0 == 210) + 255 * (A0 == 255))"
            ),
            other => panic!("expected a value step, got {:?}", other),
        }
        match &job.bands[0].steps[0].operation {
            Operation::Value(expr) => assert!(expr.starts_with("(A1 == -10000) * 255")),
            other => panic!("expected a value step, got {:?}", other),
        }
    }
}
