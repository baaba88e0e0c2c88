//! Band math job description
//!
//! A job lists the output bands of one byte GeoTIFF. Every band is built by
//! a sequence of steps, each reading its own sources and either replacing
//! the band value or setting individual bits of it.
//!
//! Jobs are plain data and can be written as YAML or JSON:
//!
//! ```yaml
//! output: LIS_FSC_QCFLAGS.tif
//! reference: LIS_FSC.tif
//! bands:
//!   - steps:
//!       - sources:
//!           - { path: geophysical.tif, unpack_bits: true }
//!           - { path: water.tif }
//!         bits:
//!           0: A0[6]
//!           1: A0[7]
//!           2: A1 == 1
//! ```

use hrwsi_core::io::{Compression, GeoTiffOptions};
use hrwsi_core::{Error, Result};
use hrwsi_parallel::DEFAULT_TILE_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn default_band() -> usize {
    1
}

fn default_tile_size() -> usize {
    DEFAULT_TILE_SIZE
}

fn default_true() -> bool {
    true
}

/// One input band of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub path: PathBuf,
    /// 1-based band number
    #[serde(default = "default_band")]
    pub band: usize,
    /// Expose the band as 8 bit-planes (`A<i>[k]`) instead of values
    #[serde(default)]
    pub unpack_bits: bool,
}

impl SourceSpec {
    /// First band of `path`, read as values
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            band: 1,
            unpack_bits: false,
        }
    }

    pub fn band(mut self, band: usize) -> Self {
        self.band = band;
        self
    }

    /// Read the source as bit-planes
    pub fn unpacked(mut self) -> Self {
        self.unpack_bits = true;
        self
    }
}

/// What a step does to the output band
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Replace the band value
    Value(String),
    /// Set bit `k` from each expression, in ascending key order
    Bits(BTreeMap<u8, String>),
}

/// One step of an output band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub struct StepSpec {
    pub sources: Vec<SourceSpec>,
    pub operation: Operation,
}

impl StepSpec {
    /// Step replacing the band value
    pub fn value(sources: Vec<SourceSpec>, expr: impl Into<String>) -> Self {
        Self {
            sources,
            operation: Operation::Value(expr.into()),
        }
    }

    /// Step setting individual bits
    pub fn bits<I, S>(sources: Vec<SourceSpec>, bits: I) -> Self
    where
        I: IntoIterator<Item = (u8, S)>,
        S: Into<String>,
    {
        Self {
            sources,
            operation: Operation::Bits(bits.into_iter().map(|(k, e)| (k, e.into())).collect()),
        }
    }
}

/// On-disk form of a step: exactly one of `value` and `bits`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawStep {
    sources: Vec<SourceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bits: Option<BTreeMap<u8, String>>,
}

impl TryFrom<RawStep> for StepSpec {
    type Error = String;

    fn try_from(raw: RawStep) -> std::result::Result<Self, String> {
        let operation = match (raw.value, raw.bits) {
            (Some(expr), None) => Operation::Value(expr),
            (None, Some(bits)) => Operation::Bits(bits),
            (Some(_), Some(_)) => return Err("a step has either `value` or `bits`, not both".into()),
            (None, None) => return Err("a step needs a `value` or `bits` operation".into()),
        };
        Ok(StepSpec {
            sources: raw.sources,
            operation,
        })
    }
}

impl From<StepSpec> for RawStep {
    fn from(step: StepSpec) -> Self {
        let (value, bits) = match step.operation {
            Operation::Value(expr) => (Some(expr), None),
            Operation::Bits(bits) => (None, Some(bits)),
        };
        RawStep {
            sources: step.sources,
            value,
            bits,
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One output band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodata: Option<u8>,
    /// Without `nodata`, tag the band with the reference raster's nodata
    #[serde(default, skip_serializing_if = "is_false")]
    pub reference_nodata: bool,
    pub steps: Vec<StepSpec>,
}

impl BandSpec {
    pub fn new(steps: Vec<StepSpec>) -> Self {
        Self {
            nodata: None,
            reference_nodata: false,
            steps,
        }
    }

    pub fn with_nodata(mut self, nodata: u8) -> Self {
        self.nodata = Some(nodata);
        self
    }

    pub fn with_reference_nodata(mut self) -> Self {
        self.reference_nodata = true;
        self
    }
}

/// How the output file is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSpec {
    /// DEFLATE compression
    #[serde(default = "default_true")]
    pub compress: bool,
    /// Internal NEAREST overviews
    #[serde(default)]
    pub overviews: bool,
    /// Edge of the square TIFF blocks, 0 writes strips
    #[serde(default)]
    pub block_size: usize,
}

impl Default for WriteSpec {
    fn default() -> Self {
        Self {
            compress: true,
            overviews: false,
            block_size: 0,
        }
    }
}

impl WriteSpec {
    /// Uncompressed strips without overviews
    pub fn plain() -> Self {
        Self {
            compress: false,
            ..Self::default()
        }
    }

    /// Delivered product layout, see [`GeoTiffOptions::compressed`]
    pub fn product() -> Self {
        let options = GeoTiffOptions::compressed();
        Self {
            compress: options.compression != Compression::None,
            overviews: options.overviews,
            block_size: options.tile_size,
        }
    }

    pub fn options(&self) -> GeoTiffOptions {
        GeoTiffOptions {
            compression: if self.compress {
                Compression::Deflate
            } else {
                Compression::None
            },
            tile_size: self.block_size,
            overviews: self.overviews,
            bigtiff: false,
        }
    }
}

/// A complete band math job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandMathJob {
    pub output: PathBuf,
    /// Raster giving the output size and georeferencing.
    ///
    /// Defaults to the first source of the first step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<PathBuf>,
    pub bands: Vec<BandSpec>,
    #[serde(default)]
    pub write: WriteSpec,
    /// Edge of the square tiles evaluated in parallel, 0 for one tile
    #[serde(default = "default_tile_size")]
    pub tile_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

fn format_of(path: &Path) -> Result<Format> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("yaml") | Some("yml") => Ok(Format::Yaml),
        Some("json") => Ok(Format::Json),
        _ => Err(Error::Config(format!(
            "{}: job files are .yaml, .yml or .json",
            path.display()
        ))),
    }
}

fn resolve(dir: &Path, path: &mut PathBuf) {
    if path.is_relative() {
        *path = dir.join(&*path);
    }
}

impl BandMathJob {
    pub fn new(output: impl Into<PathBuf>, bands: Vec<BandSpec>) -> Self {
        Self {
            output: output.into(),
            reference: None,
            bands,
            write: WriteSpec::default(),
            tile_size: DEFAULT_TILE_SIZE,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<PathBuf>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_write(mut self, write: WriteSpec) -> Self {
        self.write = write;
        self
    }

    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// Load a YAML or JSON job file.
    ///
    /// Relative paths in the job are taken relative to the job file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = format_of(path)?;
        if !path.exists() {
            return Err(Error::MissingInput(path.to_path_buf()));
        }

        let text = std::fs::read_to_string(path)?;
        let parsed = match format {
            Format::Yaml => serde_yaml::from_str::<BandMathJob>(&text).map_err(|e| e.to_string()),
            Format::Json => serde_json::from_str::<BandMathJob>(&text).map_err(|e| e.to_string()),
        };
        let mut job = parsed.map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        if let Some(dir) = path.parent() {
            job.resolve_paths(dir);
        }
        tracing::debug!("loaded job {} with {} band(s)", path.display(), job.bands.len());
        Ok(job)
    }

    /// Write the job as YAML or JSON, by extension.
    ///
    /// Relative paths are written absolute, taken from the current directory,
    /// so loading the file back reads the same rasters wherever it is saved.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let format = format_of(path)?;
        let mut job = self.clone();
        job.resolve_paths(&std::env::current_dir()?);

        let text = match format {
            Format::Yaml => serde_yaml::to_string(&job).map_err(|e| e.to_string()),
            Format::Json => serde_json::to_string_pretty(&job).map_err(|e| e.to_string()),
        }
        .map_err(Error::Other)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Make every relative path of the job relative to `dir`
    pub fn resolve_paths(&mut self, dir: &Path) {
        resolve(dir, &mut self.output);
        if let Some(reference) = self.reference.as_mut() {
            resolve(dir, reference);
        }
        for source in self
            .bands
            .iter_mut()
            .flat_map(|b| b.steps.iter_mut())
            .flat_map(|s| s.sources.iter_mut())
        {
            resolve(dir, &mut source.path);
        }
    }

    /// Every source of the job, in order of appearance
    pub fn sources(&self) -> impl Iterator<Item = &SourceSpec> {
        self.bands
            .iter()
            .flat_map(|b| b.steps.iter())
            .flat_map(|s| s.sources.iter())
    }
}
