//! Compiled band math jobs
//!
//! Compilation parses and checks every expression and assigns each distinct
//! input `(path, band, unpack_bits)` a slot in a shared arena, so an input
//! used by several steps or bands is read once. Expressions are rewritten to
//! address slots instead of step-local `A<i>` indices.
//!
//! Evaluation runs band by band over tiles. Within a tile, every output band
//! starts at 0 and its steps run in order, a value step replacing the band
//! and a bits step setting bits one key at a time.

use super::eval::{evaluate, to_byte, truthy, Operands, Value};
use super::expr::{parse, Expr};
use super::job::{BandMathJob, Operation, SourceSpec};
use hrwsi_core::io::{
    multiband_unsupported, read_geotiff, read_geotiff_info, write_multiband_geotiff, GeoTiffOptions,
    WRITES_MULTIBAND,
};
use hrwsi_core::raster::{with_bit, BITS_PER_BYTE};
use hrwsi_core::{Algorithm, BitPlanes, DataType, Error, Georef, Raster, Result, CRS};
use hrwsi_parallel::{ParallelStrategy, ProcessingMode, Tile, TiledProcessor};
use ndarray::Array2;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Identity of an input band in the arena
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub path: PathBuf,
    pub band: usize,
    pub unpack_bits: bool,
}

impl From<&SourceSpec> for SourceKey {
    fn from(spec: &SourceSpec) -> Self {
        Self {
            path: spec.path.clone(),
            band: spec.band,
            unpack_bits: spec.unpack_bits,
        }
    }
}

/// Cells of a value input, kept at the sample type of its file
#[derive(Debug, Clone)]
pub enum Values {
    U8(Array2<u8>),
    U16(Array2<u16>),
    I16(Array2<i16>),
    U32(Array2<u32>),
    I32(Array2<i32>),
    F32(Array2<f32>),
    /// Also holds 64-bit integer inputs
    F64(Array2<f64>),
}

macro_rules! with_cells {
    ($values:expr, $cells:ident => $body:expr) => {
        match $values {
            Values::U8($cells) => $body,
            Values::U16($cells) => $body,
            Values::I16($cells) => $body,
            Values::U32($cells) => $body,
            Values::I32($cells) => $body,
            Values::F32($cells) => $body,
            Values::F64($cells) => $body,
        }
    };
}

macro_rules! values_from {
    ($($t:ty => $variant:ident),*) => {
        $(impl From<Array2<$t>> for Values {
            fn from(cells: Array2<$t>) -> Self {
                Values::$variant(cells)
            }
        })*
    };
}

values_from!(u8 => U8, u16 => U16, i16 => I16, u32 => U32, i32 => I32, f32 => F32, f64 => F64);

impl Values {
    /// Read band `band` of `path` at the file's sample type
    pub fn read(path: &Path, band: usize) -> Result<Self> {
        let band = Some(band);
        Ok(match read_geotiff_info(path)?.data_type {
            DataType::U8 => read_geotiff::<u8, _>(path, band)?.into_array().into(),
            DataType::U16 => read_geotiff::<u16, _>(path, band)?.into_array().into(),
            DataType::I8 | DataType::I16 => read_geotiff::<i16, _>(path, band)?.into_array().into(),
            DataType::U32 => read_geotiff::<u32, _>(path, band)?.into_array().into(),
            DataType::I32 => read_geotiff::<i32, _>(path, band)?.into_array().into(),
            DataType::F32 => read_geotiff::<f32, _>(path, band)?.into_array().into(),
            DataType::U64 | DataType::I64 | DataType::F64 => {
                read_geotiff::<f64, _>(path, band)?.into_array().into()
            }
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        with_cells!(self, cells => cells.dim())
    }

    /// Cells under `tile` as `f64`, row-major
    pub fn tile_cells(&self, tile: &Tile) -> Vec<f64> {
        with_cells!(self, cells => tile.view(cells).iter().map(|&v| v as f64).collect())
    }
}

/// A loaded input band
#[derive(Debug, Clone)]
pub enum Plane {
    Values(Values),
    Bits(BitPlanes),
}

impl Plane {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Plane::Values(values) => values.shape(),
            Plane::Bits(bits) => bits.shape(),
        }
    }

    /// Read the input described by `key`
    pub fn load(key: &SourceKey) -> Result<Self> {
        tracing::debug!(
            "reading {} band {}{}",
            key.path.display(),
            key.band,
            if key.unpack_bits { " as bits" } else { "" }
        );
        if key.unpack_bits {
            let raster: Raster<u8> = read_geotiff(&key.path, Some(key.band))?;
            Ok(Plane::Bits(BitPlanes::unpack(raster.view())))
        } else {
            Ok(Plane::Values(Values::read(&key.path, key.band)?))
        }
    }
}

/// The input arena, one plane per slot
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    planes: Vec<Plane>,
}

impl Inputs {
    pub fn new(planes: Vec<Plane>) -> Self {
        Self { planes }
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }
}

/// Size and georeferencing of the output
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub rows: usize,
    pub cols: usize,
    pub georef: Georef,
    pub crs: Option<CRS>,
    /// Nodata tag of the reference raster
    pub nodata: Option<f64>,
}

impl Geometry {
    /// Plain grid without georeferencing
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            georef: Georef::default(),
            crs: None,
            nodata: None,
        }
    }

    /// Geometry of the first band of a raster file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let info = read_geotiff_info(path)?;
        Ok(Self {
            rows: info.rows,
            cols: info.cols,
            georef: info.georef,
            crs: info.crs,
            nodata: info.nodata,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

/// An expression checked against its step and rewritten to arena slots
#[derive(Debug, Clone)]
struct CompiledExpr {
    /// Normalized text with step-local source names
    text: String,
    expr: Expr,
}

#[derive(Debug, Clone)]
enum CompiledOp {
    Value(CompiledExpr),
    Bits(Vec<(u8, CompiledExpr)>),
}

#[derive(Debug, Clone)]
struct CompiledStep {
    /// Arena slot of each step-local source
    slots: Vec<usize>,
    op: CompiledOp,
}

#[derive(Debug, Clone)]
struct CompiledBand {
    nodata: Option<u8>,
    reference_nodata: bool,
    steps: Vec<CompiledStep>,
}

impl CompiledBand {
    /// Nodata tag of the band written on `geometry`
    fn nodata_on(&self, geometry: &Geometry) -> Option<u8> {
        match self.nodata {
            Some(nodata) => Some(nodata),
            None if self.reference_nodata => geometry.nodata.and_then(num_traits::cast),
            None => None,
        }
    }
}

/// Summary of a finished job
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub output: PathBuf,
    pub rows: usize,
    pub cols: usize,
    pub bands: usize,
    /// Distinct input bands read
    pub inputs: usize,
}

/// A validated band math job, ready to run
#[derive(Debug, Clone)]
pub struct CompiledJob {
    output: PathBuf,
    reference: Option<PathBuf>,
    sources: Vec<SourceKey>,
    bands: Vec<CompiledBand>,
    write: GeoTiffOptions,
    tile_size: usize,
}

fn invalid(name: &'static str, value: impl ToString, reason: impl Into<String>) -> Error {
    Error::InvalidParameter {
        name,
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Check that `expr` only uses operands its step provides
fn check_operands(expr: &Expr, sources: &[SourceSpec]) -> Result<()> {
    let mut problem = None;
    expr.walk(&mut |node| {
        if problem.is_some() {
            return;
        }
        if let Expr::Source { index, bit } = node {
            let name = match bit {
                Some(k) => format!("A{}[{}]", index, k),
                None => format!("A{}", index),
            };
            problem = match (sources.get(*index), bit) {
                (None, _) => Some(invalid(
                    "source",
                    name,
                    format!("the step has {} source(s)", sources.len()),
                )),
                (Some(src), Some(_)) if !src.unpack_bits => Some(invalid(
                    "source",
                    name,
                    format!("{} is not read with unpack_bits", src.path.display()),
                )),
                (Some(src), None) if src.unpack_bits => Some(invalid(
                    "source",
                    name,
                    format!("{} is unpacked, select a bit such as A{}[0]", src.path.display(), index),
                )),
                _ => None,
            };
        }
    });
    problem.map_or(Ok(()), Err)
}

fn compile_expr(text: &str, sources: &[SourceSpec], slots: &[usize]) -> Result<CompiledExpr> {
    let local = parse(text)?;
    check_operands(&local, sources)?;
    let local = local.fold_constants();
    let expr = local.map_sources(&|i| slots[i]);
    Ok(CompiledExpr {
        text: local.to_string(),
        expr,
    })
}

impl CompiledJob {
    /// Parse and check every expression of `job`
    pub fn compile(job: &BandMathJob) -> Result<Self> {
        if job.bands.is_empty() {
            return Err(Error::Config("job has no output bands".into()));
        }

        let mut sources: Vec<SourceKey> = Vec::new();
        let mut index: HashMap<SourceKey, usize> = HashMap::new();
        let mut bands = Vec::with_capacity(job.bands.len());

        for (b, band) in job.bands.iter().enumerate() {
            if band.steps.is_empty() {
                return Err(Error::Config(format!("band {} has no steps", b + 1)));
            }

            let mut steps = Vec::with_capacity(band.steps.len());
            for step in &band.steps {
                let mut slots = Vec::with_capacity(step.sources.len());
                for spec in &step.sources {
                    if spec.band == 0 {
                        return Err(invalid(
                            "band",
                            format!("{}:0", spec.path.display()),
                            "band numbers start at 1",
                        ));
                    }
                    let key = SourceKey::from(spec);
                    let slot = *index.entry(key.clone()).or_insert_with(|| {
                        sources.push(key);
                        sources.len() - 1
                    });
                    slots.push(slot);
                }

                let op = match &step.operation {
                    Operation::Value(text) => {
                        CompiledOp::Value(compile_expr(text, &step.sources, &slots)?)
                    }
                    Operation::Bits(bits) => {
                        let mut compiled = Vec::with_capacity(bits.len());
                        for (&k, text) in bits {
                            if usize::from(k) >= BITS_PER_BYTE {
                                return Err(invalid(
                                    "bit",
                                    k,
                                    format!("bit keys must be below {}", BITS_PER_BYTE),
                                ));
                            }
                            compiled.push((k, compile_expr(text, &step.sources, &slots)?));
                        }
                        CompiledOp::Bits(compiled)
                    }
                };
                steps.push(CompiledStep { slots, op });
            }

            bands.push(CompiledBand {
                nodata: band.nodata,
                reference_nodata: band.reference_nodata,
                steps,
            });
        }

        tracing::debug!(
            "compiled {} band(s) over {} distinct input(s)",
            bands.len(),
            sources.len()
        );

        Ok(Self {
            output: job.output.clone(),
            reference: job.reference.clone(),
            sources,
            bands,
            write: job.write.options(),
            tile_size: job.tile_size,
        })
    }

    /// Load and compile a job file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::compile(&BandMathJob::from_path(path)?)
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Distinct inputs, indexed by arena slot
    pub fn sources(&self) -> &[SourceKey] {
        &self.sources
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Override the evaluation tile size
    pub fn set_tile_size(&mut self, tile_size: usize) {
        self.tile_size = tile_size;
    }

    /// Output geometry: the reference raster, else the first input
    pub fn geometry(&self) -> Result<Geometry> {
        let path = self
            .reference
            .as_deref()
            .or_else(|| self.sources.first().map(|s| s.path.as_path()))
            .ok_or_else(|| {
                Error::Config("no reference raster and no input to take the output grid from".into())
            })?;
        Geometry::from_path(path)
    }

    /// Read every input into the arena
    pub fn load_inputs(&self, mode: ProcessingMode) -> Result<Inputs> {
        let planes = mode.try_par_map(0..self.sources.len(), |i| Plane::load(&self.sources[i]))?;
        Ok(Inputs::new(planes))
    }

    /// Compute every output band on `geometry`'s grid
    pub fn evaluate(
        &self,
        inputs: &Inputs,
        geometry: &Geometry,
        mode: ProcessingMode,
    ) -> Result<Vec<Raster<u8>>> {
        if inputs.len() != self.sources.len() {
            return Err(Error::Algorithm(format!(
                "job reads {} input(s), {} provided",
                self.sources.len(),
                inputs.len()
            )));
        }

        let (er, ec) = geometry.shape();
        for (key, plane) in self.sources.iter().zip(inputs.planes()) {
            let (ar, ac) = plane.shape();
            if (ar, ac) != (er, ec) {
                tracing::error!("{} does not match the output grid", key.path.display());
                return Err(Error::SizeMismatch { er, ec, ar, ac });
            }
        }

        let processor = TiledProcessor::new(self.tile_size);
        let mut rasters = Vec::with_capacity(self.bands.len());
        for (b, band) in self.bands.iter().enumerate() {
            tracing::debug!("evaluating band {} ({} step(s))", b + 1, band.steps.len());
            let data = processor.map_tiles(er, ec, mode, |tile| {
                evaluate_band(band, inputs.planes(), tile)
            })?;

            let mut raster = Raster::from_array(data);
            raster.set_georef(geometry.georef.clone());
            raster.set_crs(geometry.crs.clone());
            raster.set_nodata(band.nodata_on(geometry));
            rasters.push(raster);
        }
        Ok(rasters)
    }

    /// Read the inputs, compute the bands and write the output file
    pub fn run(&self, mode: ProcessingMode) -> Result<JobReport> {
        if self.bands.len() > 1 && !WRITES_MULTIBAND {
            return Err(multiband_unsupported(self.bands.len()));
        }
        let geometry = self.geometry()?;
        tracing::info!(
            "band math: {} band(s) from {} input(s) on a {}x{} grid",
            self.bands.len(),
            self.sources.len(),
            geometry.rows,
            geometry.cols
        );

        let inputs = self.load_inputs(mode)?;
        let bands = self.evaluate(&inputs, &geometry, mode)?;

        if let Some(parent) = self.output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        write_multiband_geotiff(&bands, &self.output, Some(self.write.clone()))?;
        tracing::info!("wrote {}", self.output.display());

        Ok(JobReport {
            output: self.output.clone(),
            rows: geometry.rows,
            cols: geometry.cols,
            bands: bands.len(),
            inputs: self.sources.len(),
        })
    }

    /// Human readable listing of the normalized job
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "output: {}", self.output.display());
        if let Some(reference) = &self.reference {
            let _ = writeln!(out, "reference: {}", reference.display());
        }

        for (b, band) in self.bands.iter().enumerate() {
            let _ = match (band.nodata, band.reference_nodata) {
                (Some(nodata), _) => writeln!(out, "band {} (nodata {})", b + 1, nodata),
                (None, true) => writeln!(out, "band {} (nodata of the reference)", b + 1),
                (None, false) => writeln!(out, "band {}", b + 1),
            };
            for (s, step) in band.steps.iter().enumerate() {
                let _ = writeln!(out, "  step {}", s + 1);
                for (i, &slot) in step.slots.iter().enumerate() {
                    let key = &self.sources[slot];
                    let _ = writeln!(
                        out,
                        "    A{} = {} band {}{}",
                        i,
                        key.path.display(),
                        key.band,
                        if key.unpack_bits { " (bits)" } else { "" }
                    );
                }
                match &step.op {
                    CompiledOp::Value(e) => {
                        let _ = writeln!(out, "    B = {}", e.text);
                    }
                    CompiledOp::Bits(bits) => {
                        for (k, e) in bits {
                            let _ = writeln!(out, "    B[{}] = {}", k, e.text);
                        }
                    }
                }
            }
        }
        out
    }
}

/// Operands of one tile: slices of the arena and the band built so far
struct TileOperands<'a> {
    planes: &'a [Plane],
    tile: &'a Tile,
    output: &'a [u8],
}

impl Operands for TileOperands<'_> {
    fn cell_count(&self) -> usize {
        self.tile.len()
    }

    fn source(&self, slot: usize, bit: Option<u8>) -> Result<Value> {
        let plane = self
            .planes
            .get(slot)
            .ok_or_else(|| Error::Algorithm(format!("no input in slot {}", slot)))?;

        let cells = match (plane, bit) {
            (Plane::Values(values), None) => values.tile_cells(self.tile),
            (Plane::Bits(bits), Some(k)) => self
                .tile
                .view(&bits.plane(usize::from(k))?)
                .iter()
                .map(|&v| f64::from(v))
                .collect(),
            (Plane::Values(_), Some(k)) => {
                return Err(Error::Algorithm(format!("bit {} of value input in slot {}", k, slot)))
            }
            (Plane::Bits(_), None) => {
                return Err(Error::Algorithm(format!("value of unpacked input in slot {}", slot)))
            }
        };
        Ok(Value::Cells(cells))
    }

    fn output(&self, bit: Option<u8>) -> Value {
        let cells = match bit {
            Some(k) => self.output.iter().map(|&v| f64::from((v >> k) & 1)).collect(),
            None => self.output.iter().map(|&v| f64::from(v)).collect(),
        };
        Value::Cells(cells)
    }
}

/// Cells of one output band over one tile, row-major
fn evaluate_band(band: &CompiledBand, planes: &[Plane], tile: &Tile) -> Result<Vec<u8>> {
    let mut out = vec![0u8; tile.len()];

    for step in &band.steps {
        match &step.op {
            CompiledOp::Value(e) => {
                let value = evaluate(&e.expr, &TileOperands { planes, tile, output: &out })?;
                for (i, o) in out.iter_mut().enumerate() {
                    *o = to_byte(value.get(i));
                }
            }
            CompiledOp::Bits(bits) => {
                for (k, e) in bits {
                    let value = evaluate(&e.expr, &TileOperands { planes, tile, output: &out })?;
                    for (i, o) in out.iter_mut().enumerate() {
                        *o = with_bit(*o, usize::from(*k), truthy(value.get(i)));
                    }
                }
            }
        }
    }

    Ok(out)
}

/// Parameters for [`BitBandMath`]
#[derive(Debug, Clone, Copy, Default)]
pub struct BandMathParams {
    pub mode: ProcessingMode,
    /// Evaluation tile size, overriding the job's
    pub tile_size: Option<usize>,
}

/// Bit-plane band math over GeoTIFF inputs
#[derive(Debug, Clone, Copy, Default)]
pub struct BitBandMath;

impl Algorithm for BitBandMath {
    type Input = BandMathJob;
    type Output = JobReport;
    type Params = BandMathParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Bit Band Math"
    }

    fn description(&self) -> &'static str {
        "Build byte bands value by value or bit by bit from expressions over input bands"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        bit_bandmath(&input, params)
    }
}

/// Compile and run a job
pub fn bit_bandmath(job: &BandMathJob, params: BandMathParams) -> Result<JobReport> {
    let mut compiled = CompiledJob::compile(job)?;
    if let Some(tile_size) = params.tile_size {
        compiled.set_tile_size(tile_size);
    }
    compiled.run(params.mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandmath::job::{BandSpec, StepSpec};
    use ndarray::array;

    fn src(name: &str) -> SourceSpec {
        SourceSpec::new(name)
    }

    fn one_band(steps: Vec<StepSpec>) -> BandMathJob {
        BandMathJob::new("out.tif", vec![BandSpec::new(steps)])
    }

    fn compile_err(job: &BandMathJob) -> Error {
        match CompiledJob::compile(job) {
            Err(e) => e,
            Ok(_) => panic!("job should not compile"),
        }
    }

    #[test]
    fn test_sources_are_interned() {
        let job = BandMathJob::new(
            "out.tif",
            vec![
                BandSpec::new(vec![
                    StepSpec::value(vec![src("a.tif"), src("b.tif")], "A0 + A1"),
                    StepSpec::value(vec![src("b.tif"), src("a.tif").unpacked()], "A0 * A1[3]"),
                ]),
                BandSpec::new(vec![StepSpec::value(vec![src("a.tif")], "A0")]),
            ],
        );
        let compiled = CompiledJob::compile(&job).unwrap();
        assert_eq!(compiled.sources().len(), 3);
        assert_eq!(compiled.sources()[0].path, PathBuf::from("a.tif"));
        assert!(compiled.sources()[2].unpack_bits);
        assert_eq!(compiled.band_count(), 2);

        let text = compiled.describe();
        assert!(text.contains("B = A0 * A1[3]"), "{}", text);
        assert!(text.contains("A1 = a.tif band 1 (bits)"), "{}", text);
    }

    #[test]
    fn test_compile_rejects_bad_operands() {
        let out_of_range = one_band(vec![StepSpec::value(vec![src("a.tif")], "A1")]);
        assert!(matches!(compile_err(&out_of_range), Error::InvalidParameter { name: "source", .. }));

        let bit_of_values = one_band(vec![StepSpec::value(vec![src("a.tif")], "A0[2]")]);
        assert!(matches!(compile_err(&bit_of_values), Error::InvalidParameter { .. }));

        let bare_unpacked = one_band(vec![StepSpec::value(vec![src("a.tif").unpacked()], "A0 + 1")]);
        assert!(matches!(compile_err(&bare_unpacked), Error::InvalidParameter { .. }));

        let big_key = one_band(vec![StepSpec::bits(vec![src("a.tif")], [(8u8, "A0")])]);
        assert!(matches!(compile_err(&big_key), Error::InvalidParameter { name: "bit", .. }));

        let band_zero = one_band(vec![StepSpec::value(vec![src("a.tif").band(0)], "A0")]);
        assert!(matches!(compile_err(&band_zero), Error::InvalidParameter { name: "band", .. }));

        let syntax = one_band(vec![StepSpec::value(vec![src("a.tif")], "A0 +")]);
        assert_eq!(compile_err(&syntax).exit_code().code(), 10);
    }

    #[test]
    fn test_compile_rejects_empty_jobs() {
        assert!(matches!(
            compile_err(&BandMathJob::new("out.tif", vec![])),
            Error::Config(_)
        ));
        assert!(matches!(compile_err(&one_band(vec![])), Error::Config(_)));
    }

    fn bits_and_values_job() -> CompiledJob {
        // Slot 0: flags (bits), slot 1: values
        let job = BandMathJob::new(
            "out.tif",
            vec![
                BandSpec::new(vec![
                    StepSpec::bits(
                        vec![src("flags.tif").unpacked(), src("fsc.tif")],
                        [(0u8, "A0[7]"), (1, "A1 > 50"), (2, "B[0] and B[1]")],
                    ),
                    StepSpec::value(vec![src("fsc.tif")], "B * (A0 != 205) + 205 * (A0 == 205)"),
                ])
                .with_nodata(255),
                BandSpec::new(vec![StepSpec::value(vec![src("fsc.tif")], "A0 / 2")]),
            ],
        );
        CompiledJob::compile(&job).unwrap()
    }

    fn sample_inputs() -> Inputs {
        let flags = array![[0b1000_0000u8, 0], [0b1000_0000, 0b1000_0000]];
        let fsc = array![[80.0, 80.0], [20.0, 205.0]];
        Inputs::new(vec![
            Plane::Bits(BitPlanes::unpack(flags.view())),
            Plane::Values(fsc.into()),
        ])
    }

    #[test]
    fn test_evaluate_bits_then_value() {
        let compiled = bits_and_values_job();
        let geometry = Geometry::new(2, 2);

        let bands = compiled
            .evaluate(&sample_inputs(), &geometry, ProcessingMode::Sequential)
            .unwrap();
        assert_eq!(bands.len(), 2);

        // bit0 flag, bit1 fsc > 50, bit2 both; 205 copied through
        assert_eq!(bands[0].data(), &array![[0b111u8, 0b010], [0b001, 205]]);
        assert_eq!(bands[0].nodata(), Some(255));
        assert_eq!(bands[1].data(), &array![[40u8, 40], [10, 103]]);
        assert_eq!(bands[1].nodata(), None);
    }

    #[test]
    fn test_reference_nodata_is_copied() {
        let job = BandMathJob::new(
            "out.tif",
            vec![
                BandSpec::new(vec![StepSpec::value(vec![src("fsc.tif")], "A0")]).with_reference_nodata(),
                BandSpec::new(vec![StepSpec::value(vec![src("fsc.tif")], "A0")])
                    .with_nodata(0)
                    .with_reference_nodata(),
                BandSpec::new(vec![StepSpec::value(vec![src("fsc.tif")], "A0")]),
            ],
        );
        let compiled = CompiledJob::compile(&job).unwrap();
        let inputs = Inputs::new(vec![Plane::Values(array![[1u8, 2], [3, 255]].into())]);
        let geometry = Geometry {
            nodata: Some(255.0),
            ..Geometry::new(2, 2)
        };

        let bands = compiled.evaluate(&inputs, &geometry, ProcessingMode::Sequential).unwrap();
        assert_eq!(bands[0].nodata(), Some(255));
        assert_eq!(bands[1].nodata(), Some(0));
        assert_eq!(bands[2].nodata(), None);

        // A tag that is not a byte is dropped
        let negative = Geometry {
            nodata: Some(-10000.0),
            ..Geometry::new(2, 2)
        };
        let bands = compiled.evaluate(&inputs, &negative, ProcessingMode::Sequential).unwrap();
        assert_eq!(bands[0].nodata(), None);
    }

    #[test]
    fn test_result_independent_of_tiling() {
        let job = one_band(vec![
            StepSpec::bits(
                vec![src("a.tif").unpacked(), src("b.tif")],
                [(0u8, "A0[0] or A0[3]"), (4, "A1 % 7 == 0"), (7, "not B[0]")],
            ),
            StepSpec::value(vec![src("b.tif")], "where(B[7], B, A0 * 0.5)"),
        ]);
        let mut compiled = CompiledJob::compile(&job).unwrap();

        let (rows, cols) = (37, 23);
        let a = Array2::from_shape_fn((rows, cols), |(r, c)| ((r * 31 + c * 7) % 256) as u8);
        let b = Array2::from_shape_fn((rows, cols), |(r, c)| (r * cols + c) as i16);
        let inputs = Inputs::new(vec![Plane::Bits(BitPlanes::unpack(a.view())), Plane::Values(b.into())]);
        let geometry = Geometry::new(rows, cols);

        compiled.set_tile_size(0);
        let whole = compiled.evaluate(&inputs, &geometry, ProcessingMode::Sequential).unwrap();
        for (tile_size, mode) in [
            (5, ProcessingMode::Parallel),
            (16, ProcessingMode::ParallelWith(2)),
            (1, ProcessingMode::Sequential),
        ] {
            compiled.set_tile_size(tile_size);
            let tiled = compiled.evaluate(&inputs, &geometry, mode).unwrap();
            assert_eq!(tiled[0].data(), whole[0].data(), "tile size {}", tile_size);
        }
    }

    #[test]
    fn test_evaluate_checks_inputs() {
        let compiled = bits_and_values_job();

        let wrong_shape = compiled.evaluate(&sample_inputs(), &Geometry::new(3, 2), ProcessingMode::Sequential);
        assert!(matches!(wrong_shape, Err(Error::SizeMismatch { .. })));

        let missing = compiled.evaluate(&Inputs::default(), &Geometry::new(2, 2), ProcessingMode::Sequential);
        assert!(matches!(missing, Err(Error::Algorithm(_))));
    }

    #[test]
    fn test_values_keep_file_type() {
        use hrwsi_core::io::write_geotiff;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("b12.tif");
        let l2a = Raster::from_array(array![[-10000i16, 120], [300, 4000]]);
        write_geotiff(&l2a, &path, None).unwrap();

        let values = Values::read(&path, 1).unwrap();
        assert!(matches!(values, Values::I16(_)));
        assert_eq!(values.shape(), (2, 2));
        assert_eq!(values.tile_cells(&Tile::new(0, 0, 2, 2)), vec![-10000.0, 120.0, 300.0, 4000.0]);
        assert_eq!(values.tile_cells(&Tile::new(1, 1, 1, 1)), vec![4000.0]);
    }

    #[test]
    fn test_multiband_checked_before_reading() {
        let compiled = bits_and_values_job();
        let result = compiled.run(ProcessingMode::Sequential);
        if WRITES_MULTIBAND {
            assert!(matches!(result, Err(Error::MissingInput(_))));
        } else {
            assert!(matches!(result, Err(Error::UnsupportedDataType(_))));
        }
    }

    #[test]
    fn test_geometry_needs_a_grid() {
        let job = one_band(vec![StepSpec::value(vec![], "7")]);
        let compiled = CompiledJob::compile(&job).unwrap();
        assert!(matches!(compiled.geometry(), Err(Error::Config(_))));

        let constant = compiled
            .evaluate(&Inputs::default(), &Geometry::new(2, 3), ProcessingMode::Sequential)
            .unwrap();
        assert_eq!(constant[0].data(), &Array2::from_elem((2, 3), 7u8));
    }
}
