//! Cloud classification layers from MAJA masks
//!
//! MAJA cloud mask (`CLM`) bits:
//! 0 clouds and shadows, 1 clouds, 2 mono-temporal detection, 3 multi-temporal
//! detection, 4 thinnest clouds, 5 shadows of detected clouds, 6 shadows of
//! clouds outside the image, 7 high clouds.
//!
//! The classification is 1 for high clouds, 2 for other clouds, 3 for cloud
//! shadows, 0 for clear sky and 255 for nodata. Layers are written
//! uncompressed, without overviews.

use super::NODATA;
use crate::bandmath::{BandMathJob, BandSpec, SourceSpec, StepSpec, WriteSpec};
use std::path::{Path, PathBuf};

pub const CC_FILE: &str = "CC.tif";
pub const QCFLAGS_FILE: &str = "QCFLAGS.tif";
pub const QC_FILE: &str = "QC.tif";

/// Input files of the cloud classification
#[derive(Debug, Clone, PartialEq)]
pub struct CcInputs {
    /// MAJA cloud mask
    pub cloud: PathBuf,
    /// MAJA edge mask, 1 where the image has no data
    pub nodata: PathBuf,
    /// MAJA geophysical mask
    pub geophysical: PathBuf,
}

/// Cloud classification layer
pub fn cloud_cover(cloud: &Path, nodata: &Path, output: impl Into<PathBuf>) -> BandMathJob {
    let expr = format!(
        "A1 * {n} + (1 - A1) * (3 * (A0[5] or A0[6]) * (1 - A0[7]) * (1 - A0[1]) \
         + A0[7] + 2 * A0[1] * (1 - A0[7]))",
        n = NODATA
    );
    let step = StepSpec::value(
        vec![SourceSpec::new(cloud).unpacked(), SourceSpec::new(nodata)],
        expr,
    );
    BandMathJob::new(output, vec![BandSpec::new(vec![step]).with_nodata(NODATA)])
        .with_reference(cloud)
        .with_write(WriteSpec::plain())
}

/// Expert flags: cloud mask bits 2..=6 as bits 0..=4, water as bit 5
pub fn qc_flags(
    cloud: &Path,
    geophysical: &Path,
    reference: &Path,
    output: impl Into<PathBuf>,
) -> BandMathJob {
    let steps = vec![
        StepSpec::bits(
            vec![SourceSpec::new(cloud).unpacked()],
            (0u8..5).map(|k| (k, format!("A0[{}]", k + 2))),
        ),
        StepSpec::bits(vec![SourceSpec::new(geophysical).unpacked()], [(5u8, "A0[0]")]),
    ];
    BandMathJob::new(output, vec![BandSpec::new(steps)])
        .with_reference(reference)
        .with_write(WriteSpec::plain())
}

/// Quality layer: 1 where shadows may come from clouds outside the image
/// (flag bit 4), 255 where the image has no data
pub fn qc(qc_flags: &Path, nodata: &Path, output: impl Into<PathBuf>) -> BandMathJob {
    let step = StepSpec::value(
        vec![SourceSpec::new(qc_flags).unpacked(), SourceSpec::new(nodata)],
        format!("A1 * {} + (1 - A1) * A0[4]", NODATA),
    );
    BandMathJob::new(output, vec![BandSpec::new(vec![step]).with_nodata(NODATA)])
        .with_reference(qc_flags)
        .with_write(WriteSpec::plain())
}

/// The three cloud classification jobs, in dependency order
pub fn jobs(inputs: &CcInputs, output_dir: &Path) -> Vec<BandMathJob> {
    let cc = output_dir.join(CC_FILE);
    let flags = output_dir.join(QCFLAGS_FILE);
    vec![
        cloud_cover(&inputs.cloud, &inputs.nodata, &cc),
        qc_flags(&inputs.cloud, &inputs.geophysical, &cc, &flags),
        qc(&flags, &inputs.nodata, output_dir.join(QC_FILE)),
    ]
}
