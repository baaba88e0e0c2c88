//! Fractional snow cover quality layers
//!
//! The expert flags byte (`QCFLAGS`):
//!
//! | bit | meaning |
//! |-----|---------|
//! | 0 | sun too low for an accurate slope correction (geophysical bit 6) |
//! | 1 | sun tangent (geophysical bit 7) |
//! | 2 | water |
//! | 3 | tree cover density above 90% |
//! | 4 | snow detected under thin clouds |
//! | 5 | tree cover density undefined |
//! | 6 | snow set to 100 by shaded snow detection |
//!
//! The QC layers grade every snow pixel from 0 (highest quality) to 3
//! (lowest) and keep 205 (cloud) and 255 (nodata) from the snow layer.
//!
//! These layers are written with [`WriteSpec::product`]. The near real time
//! flow lives in [`super::nrt`].

use super::{CLOUD_VALUE, NODATA, WATER_VALUE};
use crate::bandmath::{BandMathJob, BandSpec, SourceSpec, StepSpec, WriteSpec};
use std::path::{Path, PathBuf};

pub const CLOUD_FILE: &str = "LIS_CLD.tif";
pub const QCFLAGS_FILE: &str = "LIS_FSC_QCFLAGS.tif";
pub const QCTOC_FILE: &str = "LIS_FSC_QCTOC.tif";
pub const QCOG_FILE: &str = "LIS_FSC_QCOG.tif";

/// L2A reflectance nodata
pub const L2A_NODATA: i32 = -10000;

/// Quality penalties, in percent, for each expert flag
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QcWeights {
    pub sun_tangent: f64,
    pub sun_too_low: f64,
    pub thin_cloud_snow: f64,
    pub water: f64,
    /// Top of canopy only
    pub shaded_snow: f64,
    /// On ground only, applied to the raw tree cover density value
    pub tree_cover: f64,
    /// Tree cover density above 90%, near real time flags only
    pub dense_canopy: f64,
}

impl Default for QcWeights {
    fn default() -> Self {
        Self {
            sun_tangent: 30.0,
            sun_too_low: 50.0,
            thin_cloud_snow: 25.0,
            water: 25.0,
            shaded_snow: 100.0,
            tree_cover: 80.0,
            dense_canopy: 25.0,
        }
    }
}

impl QcWeights {
    /// Quality 0..=3 from the penalty sum `penalties`
    fn grade(penalties: &str) -> String {
        format!("uint8(min(3, 4 - max(0, (100 - {}) / 25)))", penalties)
    }

    /// Top of canopy grade over unpacked flags `A0`
    pub fn top_of_canopy(&self) -> String {
        Self::grade(&format!(
            "{} * A0[6] - {} * A0[1] - {} * A0[0] - {} * A0[4] - {} * A0[2]",
            self.shaded_snow, self.sun_tangent, self.sun_too_low, self.thin_cloud_snow, self.water
        ))
    }

    /// On ground grade over unpacked flags `A0` and tree cover density `A1`
    pub fn on_ground(&self) -> String {
        Self::grade(&format!(
            "{} * A0[1] - {} * A0[0] - {} * A0[4] - {} * A0[2] - {} * A1",
            self.sun_tangent, self.sun_too_low, self.thin_cloud_snow, self.water, self.tree_cover
        ))
    }

    /// Top of canopy grade over near real time flags `A0`
    pub fn nrt_top_of_canopy(&self) -> String {
        Self::grade(&self.nrt_penalties())
    }

    /// On ground grade over near real time flags `A0` and tree cover density `A1`
    pub fn nrt_on_ground(&self) -> String {
        Self::grade(&format!("{} - {} * A1", self.nrt_penalties(), self.tree_cover))
    }

    fn nrt_penalties(&self) -> String {
        format!(
            "{} * A0[1] - {} * A0[0] - {} * A0[3] - {} * A0[2]",
            self.sun_tangent, self.sun_too_low, self.thin_cloud_snow, self.dense_canopy
        )
    }
}

/// Keep the grade `B` except where the snow layer `A0` holds one of `codes`
pub(crate) fn keep_snow_codes(codes: &[u8]) -> String {
    let mut expr = String::from("B");
    for code in codes {
        expr.push_str(&format!(" * (A0 != {})", code));
    }
    for code in codes {
        expr.push_str(&format!(" + {c} * (A0 == {c})", c = code));
    }
    expr
}

/// Codes of the yearly snow layers kept through the QC layers
const SNOW_CODES: [u8; 2] = [CLOUD_VALUE, NODATA];

/// Input files of the snow quality layers
#[derive(Debug, Clone, PartialEq)]
pub struct FscInputs {
    /// Top of canopy snow cover
    pub fsc_toc: PathBuf,
    /// On ground snow cover
    pub fsc_og: Option<PathBuf>,
    /// MAJA cloud mask
    pub cloud: PathBuf,
    /// MAJA geophysical mask
    pub geophysical: PathBuf,
    pub water: PathBuf,
    /// Tree cover density, 0..100 or above 100 when undefined
    pub tcd: PathBuf,
    /// Snow forced to 100 by shaded snow detection (1 where set)
    pub shaded_snow: Option<PathBuf>,
}

/// Expert flags of a snow product
pub fn qc_flags(inputs: &FscInputs, output: impl Into<PathBuf>) -> BandMathJob {
    let mut steps = vec![
        StepSpec::bits(
            vec![SourceSpec::new(&inputs.geophysical).unpacked()],
            [(0u8, "A0[6]"), (1, "A0[7]")],
        ),
        StepSpec::bits(vec![SourceSpec::new(&inputs.water)], [(2u8, "A0 == 1")]),
        StepSpec::bits(vec![SourceSpec::new(&inputs.tcd)], [(3u8, "A0 < 101 and A0 > 90")]),
        StepSpec::bits(
            vec![SourceSpec::new(&inputs.cloud), SourceSpec::new(&inputs.fsc_toc)],
            [(4u8, "(A0 > 0) * (A1 > 0) * (A1 < 101)")],
        ),
        StepSpec::bits(vec![SourceSpec::new(&inputs.tcd)], [(5u8, "A0 > 100")]),
    ];
    if let Some(shaded) = &inputs.shaded_snow {
        steps.push(StepSpec::bits(vec![SourceSpec::new(shaded)], [(6u8, "A0 == 1")]));
    }

    BandMathJob::new(output, vec![BandSpec::new(steps)])
        .with_reference(&inputs.fsc_toc)
        .with_write(WriteSpec::product())
}

/// Top of canopy quality from the expert flags and the TOC snow layer
pub fn qc_top_of_canopy(
    qc_flags: &Path,
    fsc_toc: &Path,
    weights: &QcWeights,
    output: impl Into<PathBuf>,
) -> BandMathJob {
    let steps = vec![
        StepSpec::value(vec![SourceSpec::new(qc_flags).unpacked()], weights.top_of_canopy()),
        StepSpec::value(vec![SourceSpec::new(fsc_toc)], keep_snow_codes(&SNOW_CODES)),
    ];
    BandMathJob::new(output, vec![BandSpec::new(steps).with_nodata(NODATA)])
        .with_reference(fsc_toc)
        .with_write(WriteSpec::product())
}

/// On ground quality from the expert flags, tree cover and the OG snow layer
pub fn qc_on_ground(
    qc_flags: &Path,
    tcd: &Path,
    fsc_og: &Path,
    weights: &QcWeights,
    output: impl Into<PathBuf>,
) -> BandMathJob {
    let steps = vec![
        StepSpec::value(
            vec![SourceSpec::new(qc_flags).unpacked(), SourceSpec::new(tcd)],
            weights.on_ground(),
        ),
        StepSpec::value(vec![SourceSpec::new(fsc_og)], keep_snow_codes(&SNOW_CODES)),
    ];
    BandMathJob::new(output, vec![BandSpec::new(steps).with_nodata(NODATA)])
        .with_reference(fsc_og)
        .with_write(WriteSpec::product())
}

/// Cloud layer delivered with the snow product.
///
/// With an L2A band the layer is blanked where L2A is nodata and written as
/// a near real time layer. Without one the cloud mask is copied, nodata tag
/// included, as a delivered product.
pub fn cloud_layer(cloud: &Path, l2a: Option<&Path>, output: impl Into<PathBuf>) -> BandMathJob {
    let (band, write) = match l2a {
        Some(l2a) => (
            BandSpec::new(vec![StepSpec::value(
                vec![SourceSpec::new(cloud), SourceSpec::new(l2a)],
                format!("(A1 != {}) * A0", L2A_NODATA),
            )]),
            WriteSpec::plain(),
        ),
        None => (
            BandSpec::new(vec![StepSpec::value(vec![SourceSpec::new(cloud)], "A0")]).with_reference_nodata(),
            WriteSpec::product(),
        ),
    };
    BandMathJob::new(output, vec![band]).with_reference(cloud).with_write(write)
}

/// Apply L2A nodata and the water mask to a snow cover or NDSI layer.
///
/// Water mask values 1 and 2 become 210 on snow-free and snow pixels, 253
/// and 255 become nodata, as does L2A nodata. Clouds (205) are kept. Part of
/// the near real time flow, so written uncompressed.
pub fn masked_layer(
    layer: &Path,
    l2a: &Path,
    water: &Path,
    output: impl Into<PathBuf>,
) -> BandMathJob {
    let valid = format!("(A1 != {}) * (A2 != 253) * (A2 != 255)", L2A_NODATA);
    let expr = format!(
        "A0 * {valid} * (A0 != {c}) * (A2 != 1) * (A2 != 2) \
         + {c} * {valid} * (A0 == {c}) \
         + {n} * ((A1 == {l2a}) + (A2 == 255) + (A2 == 253)) \
         + {w} * ((A2 == 1) + (A2 == 2)) * (A0 < {c})",
        valid = valid,
        c = CLOUD_VALUE,
        n = NODATA,
        w = WATER_VALUE,
        l2a = L2A_NODATA,
    );
    let step = StepSpec::value(
        vec![SourceSpec::new(layer), SourceSpec::new(l2a), SourceSpec::new(water)],
        expr,
    );
    BandMathJob::new(output, vec![BandSpec::new(vec![step]).with_nodata(NODATA)])
        .with_reference(layer)
        .with_write(WriteSpec::plain())
}

/// The flag and quality jobs of one snow product, in dependency order.
///
/// The QC layers read the flags file written by the flags job. The on
/// ground layer is skipped when the OG snow layer is missing.
pub fn quality_jobs(inputs: &FscInputs, output_dir: &Path, weights: &QcWeights) -> Vec<BandMathJob> {
    let flags = output_dir.join(QCFLAGS_FILE);
    let mut jobs = vec![
        cloud_layer(&inputs.cloud, None, output_dir.join(CLOUD_FILE)),
        qc_flags(inputs, &flags),
        qc_top_of_canopy(&flags, &inputs.fsc_toc, weights, output_dir.join(QCTOC_FILE)),
    ];
    match &inputs.fsc_og {
        Some(og) => jobs.push(qc_on_ground(&flags, &inputs.tcd, og, weights, output_dir.join(QCOG_FILE))),
        None => tracing::warn!("no on ground snow layer, skipping {}", QCOG_FILE),
    }
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandmath::{parse, CompiledJob, Operation};

    fn inputs() -> FscInputs {
        FscInputs {
            fsc_toc: "FSCTOC.tif".into(),
            fsc_og: Some("FSCOG.tif".into()),
            cloud: "CLM.tif".into(),
            geophysical: "MG2.tif".into(),
            water: "WATER.tif".into(),
            tcd: "TCD.tif".into(),
            shaded_snow: None,
        }
    }

    #[test]
    fn test_default_grades() {
        let weights = QcWeights::default();
        assert_eq!(
            weights.top_of_canopy(),
            "uint8(min(3, 4 - max(0, (100 - 100 * A0[6] - 30 * A0[1] - 50 * A0[0] - 25 * A0[4] - 25 * A0[2]) / 25)))"
        );
        assert!(weights.on_ground().contains("- 80 * A1) / 25"));
        assert!(parse(&weights.top_of_canopy()).is_ok());
        assert!(parse(&weights.on_ground()).is_ok());
        assert_eq!(
            keep_snow_codes(&SNOW_CODES),
            "B * (A0 != 205) * (A0 != 255) + 205 * (A0 == 205) + 255 * (A0 == 255)"
        );
        assert_eq!(
            weights.nrt_on_ground(),
            "uint8(min(3, 4 - max(0, (100 - 30 * A0[1] - 50 * A0[0] - 25 * A0[3] - 25 * A0[2] - 80 * A1) / 25)))"
        );
        assert!(parse(&weights.nrt_top_of_canopy()).is_ok());
    }

    #[test]
    fn test_flag_job_layout() {
        let job = qc_flags(&inputs(), "out/QCFLAGS.tif");
        assert_eq!(job.reference, Some(PathBuf::from("FSCTOC.tif")));
        let steps = &job.bands[0].steps;
        assert_eq!(steps.len(), 5);

        let keys: Vec<u8> = steps
            .iter()
            .flat_map(|s| match &s.operation {
                Operation::Bits(bits) => bits.keys().copied().collect::<Vec<_>>(),
                Operation::Value(_) => vec![],
            })
            .collect();
        assert_eq!(keys, vec![0, 1, 2, 3, 4, 5]);

        let shaded = FscInputs {
            shaded_snow: Some("SHADED.tif".into()),
            ..inputs()
        };
        assert_eq!(qc_flags(&shaded, "q.tif").bands[0].steps.len(), 6);
    }

    #[test]
    fn test_every_recipe_compiles() {
        let dir = Path::new("/tmp/fsc");
        let jobs = quality_jobs(&inputs(), dir, &QcWeights::default());
        assert_eq!(jobs.len(), 4);
        assert_eq!(jobs[1].output, dir.join(QCFLAGS_FILE));
        for job in &jobs {
            CompiledJob::compile(job).unwrap();
        }

        let no_og = FscInputs {
            fsc_og: None,
            ..inputs()
        };
        assert_eq!(quality_jobs(&no_og, dir, &QcWeights::default()).len(), 3);

        let masked = masked_layer(Path::new("FSC.tif"), Path::new("B12.tif"), Path::new("W.tif"), "m.tif");
        CompiledJob::compile(&masked).unwrap();
        assert_eq!(masked.bands[0].nodata, Some(NODATA));
        CompiledJob::compile(&cloud_layer(Path::new("c.tif"), Some(Path::new("l.tif")), "o.tif")).unwrap();
    }

    #[test]
    fn test_write_options() {
        let jobs = quality_jobs(&inputs(), Path::new("out"), &QcWeights::default());
        for job in &jobs {
            assert_eq!(job.write, WriteSpec::product(), "{}", job.output.display());
            assert_eq!(job.write.options(), hrwsi_core::io::GeoTiffOptions::compressed());
        }
        assert_eq!(jobs[0].write.block_size, 1024);

        let masked = masked_layer(Path::new("FSC.tif"), Path::new("B12.tif"), Path::new("W.tif"), "m.tif");
        assert_eq!(masked.write, WriteSpec::plain());
        let nrt_cloud = cloud_layer(Path::new("c.tif"), Some(Path::new("l.tif")), "o.tif");
        assert_eq!(nrt_cloud.write, WriteSpec::plain());
    }

    #[test]
    fn test_cloud_copy_keeps_source_nodata() {
        let copy = cloud_layer(Path::new("CLM.tif"), None, "LIS_CLD.tif");
        assert!(copy.bands[0].reference_nodata);
        assert_eq!(copy.bands[0].nodata, None);
        assert_eq!(copy.reference, Some(PathBuf::from("CLM.tif")));

        let blanked = cloud_layer(Path::new("CLM.tif"), Some(Path::new("B12.tif")), "CLD.tif");
        assert!(!blanked.bands[0].reference_nodata);
    }
}
