//! hrwsi CLI - bit-plane band math for snow, ice and water product layers

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use hrwsi_algorithms::bandmath::{
    parse, BandMathJob, BandSpec, CompiledJob, JobReport, SourceSpec, StepSpec, WriteSpec,
};
use hrwsi_algorithms::products::{cc, fsc, nrt, FscInputs, NrtInputs, QcWeights};
use hrwsi_core::io::{read_geotiff, read_geotiff_info};
use hrwsi_core::{Error, ExitCode, Georef, Raster};
use hrwsi_parallel::ProcessingMode;

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "hrwsi")]
#[command(author, version, about = "Bit-plane band math for snow, ice and water products", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Execution settings shared by the commands that evaluate jobs
#[derive(Args, Debug, Clone, Copy)]
struct Exec {
    /// Worker threads (0 or unset: all cores)
    #[arg(short = 'j', long)]
    threads: Option<usize>,
    /// Evaluate tiles one after the other
    #[arg(long)]
    sequential: bool,
}

impl Exec {
    fn mode(self) -> ProcessingMode {
        ProcessingMode::from_threads(self.threads, self.sequential)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Run a YAML or JSON band math job
    Run {
        /// Job file
        job: PathBuf,
        #[command(flatten)]
        exec: Exec,
    },
    /// Compute a one-band byte raster from an expression
    Calc {
        /// Source as path[:band][:bits], referenced as A0, A1, ... in order
        #[arg(short, long = "source", value_parser = parse_source, required = true)]
        sources: Vec<SourceSpec>,
        /// Expression for the whole output byte
        #[arg(short, long)]
        expr: Option<String>,
        /// Expression for one output bit, as k=EXPR (applied after --expr)
        #[arg(short, long = "bits", value_parser = parse_bit_expr)]
        bits: Vec<(u8, String)>,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
        /// Nodata value of the output band
        #[arg(long)]
        nodata: Option<u8>,
        /// DEFLATE compression
        #[arg(long)]
        compress: bool,
        /// Save the job to this YAML or JSON file instead of running it
        #[arg(long)]
        save: Option<PathBuf>,
        #[command(flatten)]
        exec: Exec,
    },
    /// Validate a job file or a single expression
    Check {
        /// Job file
        #[arg(required_unless_present = "expr", conflicts_with = "expr")]
        job: Option<PathBuf>,
        /// Expression to parse
        #[arg(short, long)]
        expr: Option<String>,
    },
    /// Snow cover expert flags and quality layers
    FscQc {
        /// Top of canopy snow cover
        #[arg(long)]
        fsc_toc: PathBuf,
        /// On ground snow cover (the OG quality layer is skipped without it)
        #[arg(long)]
        fsc_og: Option<PathBuf>,
        /// MAJA cloud mask
        #[arg(long)]
        cloud: PathBuf,
        /// MAJA geophysical mask
        #[arg(long)]
        geophysical: PathBuf,
        /// Water mask
        #[arg(long)]
        water: PathBuf,
        /// Tree cover density
        #[arg(long)]
        tcd: PathBuf,
        /// Shaded snow mask
        #[arg(long)]
        shaded_snow: Option<PathBuf>,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        weights: WeightArgs,
        #[command(flatten)]
        exec: Exec,
    },
    /// Near real time snow layers, expert flags and quality layers
    FscNrt {
        /// Top of canopy snow cover, before masking
        #[arg(long)]
        fsc_toc: PathBuf,
        /// On ground snow cover, before masking
        #[arg(long)]
        fsc_og: PathBuf,
        /// NDSI
        #[arg(long)]
        ndsi: PathBuf,
        /// Snow cloud mask
        #[arg(long)]
        cloud: PathBuf,
        /// L2A reflectance band
        #[arg(long)]
        l2a: PathBuf,
        /// MAJA geophysical mask
        #[arg(long)]
        geophysical: PathBuf,
        /// Water mask
        #[arg(long)]
        water: PathBuf,
        /// Tree cover density
        #[arg(long)]
        tcd: PathBuf,
        /// Hillshade mask
        #[arg(long)]
        hillshade: PathBuf,
        /// Shaded snow mask
        #[arg(long)]
        shaded_snow: PathBuf,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        weights: WeightArgs,
        #[command(flatten)]
        exec: Exec,
    },
    /// Mask a snow cover or NDSI layer with L2A nodata and water
    FscMask {
        /// Snow cover or NDSI layer
        input: PathBuf,
        /// L2A reflectance band
        #[arg(long)]
        l2a: PathBuf,
        /// Water mask
        #[arg(long)]
        water: PathBuf,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        exec: Exec,
    },
    /// Cloud classification from MAJA masks
    Cc {
        /// MAJA cloud mask
        #[arg(long)]
        cloud: PathBuf,
        /// MAJA edge mask
        #[arg(long)]
        edge: PathBuf,
        /// MAJA geophysical mask
        #[arg(long)]
        geophysical: PathBuf,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        exec: Exec,
    },
}

/// Quality penalties of the snow QC layers, in percent
#[derive(Args, Debug, Clone, Copy)]
struct WeightArgs {
    #[arg(long, default_value = "30")]
    w_sun_tangent: f64,
    #[arg(long, default_value = "50")]
    w_sun_too_low: f64,
    #[arg(long, default_value = "25")]
    w_thin_cloud: f64,
    #[arg(long, default_value = "25")]
    w_water: f64,
    #[arg(long, default_value = "100")]
    w_shaded_snow: f64,
    #[arg(long, default_value = "80")]
    w_tree_cover: f64,
    #[arg(long, default_value = "25")]
    w_dense_canopy: f64,
}

impl From<WeightArgs> for QcWeights {
    fn from(w: WeightArgs) -> Self {
        QcWeights {
            sun_tangent: w.w_sun_tangent,
            sun_too_low: w.w_sun_too_low,
            thin_cloud_snow: w.w_thin_cloud,
            water: w.w_water,
            shaded_snow: w.w_shaded_snow,
            tree_cover: w.w_tree_cover,
            dense_canopy: w.w_dense_canopy,
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("logging already initialised");
    }
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// `path[:band][:bits]`, suffixes in any order
fn parse_source(s: &str) -> std::result::Result<SourceSpec, String> {
    let mut rest = s;
    let mut band = None;
    let mut bits = false;
    while let Some((head, tail)) = rest.rsplit_once(':') {
        if tail.eq_ignore_ascii_case("bits") && !bits {
            bits = true;
        } else if let (Ok(n), None) = (tail.parse::<usize>(), band) {
            band = Some(n);
        } else {
            break;
        }
        rest = head;
    }
    if rest.is_empty() {
        return Err(format!("no path in source '{}'", s));
    }
    if band == Some(0) {
        return Err(format!("bands are numbered from 1 in source '{}'", s));
    }

    let mut spec = SourceSpec::new(rest).band(band.unwrap_or(1));
    if bits {
        spec = spec.unpacked();
    }
    Ok(spec)
}

/// `k=EXPR` with `k` in 0..8
fn parse_bit_expr(s: &str) -> std::result::Result<(u8, String), String> {
    let (bit, expr) = s
        .split_once('=')
        .ok_or_else(|| format!("expected k=EXPR, got '{}'", s))?;
    let bit: u8 = bit
        .trim()
        .parse()
        .map_err(|_| format!("invalid bit index '{}'", bit.trim()))?;
    if bit >= 8 {
        return Err(format!("bit index {} out of range 0..8", bit));
    }
    Ok((bit, expr.trim().to_string()))
}

fn calc_job(
    sources: Vec<SourceSpec>,
    expr: Option<String>,
    bits: Vec<(u8, String)>,
    output: PathBuf,
    nodata: Option<u8>,
    compress: bool,
) -> Result<BandMathJob> {
    let mut steps = Vec::new();
    if let Some(expr) = expr {
        steps.push(StepSpec::value(sources.clone(), expr));
    }
    if !bits.is_empty() {
        steps.push(StepSpec::bits(sources, bits));
    }
    if steps.is_empty() {
        anyhow::bail!(Error::Config("give an expression with --expr or --bits".into()));
    }

    let band = match nodata {
        Some(v) => BandSpec::new(steps).with_nodata(v),
        None => BandSpec::new(steps),
    };
    let write = WriteSpec {
        compress,
        ..WriteSpec::default()
    };
    Ok(BandMathJob::new(output, vec![band]).with_write(write))
}

fn run_job(job: &CompiledJob, mode: ProcessingMode) -> Result<JobReport> {
    let pb = spinner(&format!("Computing {}...", job.output().display()));
    let report = job
        .run(mode)
        .with_context(|| format!("Failed to compute {}", job.output().display()));
    pb.finish_and_clear();
    report
}

fn run_jobs(jobs: &[BandMathJob], mode: ProcessingMode) -> Result<()> {
    let start = Instant::now();
    // Compile everything first so a bad recipe fails before any file is written
    let compiled = jobs
        .iter()
        .map(CompiledJob::compile)
        .collect::<hrwsi_core::Result<Vec<_>>>()
        .context("Invalid job")?;
    for job in &compiled {
        let report = run_job(job, mode)?;
        println!(
            "{} x {} saved to: {}",
            report.cols,
            report.rows,
            report.output.display()
        );
    }
    println!("  Processing time: {:.2?}", start.elapsed());
    Ok(())
}

fn done(report: &JobReport, elapsed: std::time::Duration) {
    println!("Output saved to: {}", report.output.display());
    println!(
        "  {} x {}, {} band(s) from {} input(s)",
        report.cols, report.rows, report.bands, report.inputs
    );
    println!("  Processing time: {:.2?}", elapsed);
}

fn show_info(input: &Path) -> Result<()> {
    let pb = spinner("Reading raster...");
    let meta = read_geotiff_info(input).context("Failed to read raster")?;
    let raster: Raster<f64> = read_geotiff(input, None).context("Failed to read raster")?;
    pb.finish_and_clear();
    let stats = raster.statistics();

    println!("File: {}", input.display());
    println!(
        "Dimensions: {} x {} ({} cells), {} band(s) of {}",
        meta.cols,
        meta.rows,
        raster.len(),
        meta.bands,
        meta.data_type
    );
    match &meta.georef {
        Georef::Transform(gt) => {
            let (min_x, min_y, max_x, max_y) = gt.bounds(meta.cols, meta.rows);
            println!("Cell size: {}", gt.cell_size());
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                min_x, min_y, max_x, max_y
            );
        }
        Georef::Gcps(gcps) => println!("GCPs: {}", gcps.len()),
    }
    if let Some(crs) = &meta.crs {
        println!("CRS: {}", crs);
    }
    if let Some(nodata) = meta.nodata {
        println!("NoData: {}", nodata);
    }
    println!("\nStatistics (band 1):");
    if let Some(min) = stats.min {
        println!("  Min: {:.4}", min);
    }
    if let Some(max) = stats.max {
        println!("  Max: {:.4}", max);
    }
    if let Some(mean) = stats.mean {
        println!("  Mean: {:.4}", mean);
    }
    println!(
        "  Valid cells: {} ({:.1}%)",
        stats.valid_count,
        100.0 * stats.valid_count as f64 / raster.len().max(1) as f64
    );
    Ok(())
}

/// Process status for a failed command, from the first library error in the chain
fn exit_code(err: &anyhow::Error) -> ExitCode {
    err.chain()
        .find_map(|e| e.downcast_ref::<Error>())
        .map(Error::exit_code)
        .unwrap_or(ExitCode::Default)
}

// ─── Main ───────────────────────────────────────────────────────────────

fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::Info { input } => show_info(&input)?,

        Commands::Run { job, exec } => {
            let compiled = CompiledJob::load(&job)
                .with_context(|| format!("Invalid job file {}", job.display()))?;
            let start = Instant::now();
            let report = run_job(&compiled, exec.mode())?;
            done(&report, start.elapsed());
        }

        Commands::Calc {
            sources,
            expr,
            bits,
            output,
            nodata,
            compress,
            save,
            exec,
        } => {
            let job = calc_job(sources, expr, bits, output, nodata, compress)?;
            let compiled = CompiledJob::compile(&job).context("Invalid expression")?;
            match save {
                Some(path) => {
                    job.save(&path)
                        .with_context(|| format!("Failed to save {}", path.display()))?;
                    println!("Job saved to: {}", path.display());
                }
                None => {
                    let start = Instant::now();
                    let report = run_job(&compiled, exec.mode())?;
                    done(&report, start.elapsed());
                }
            }
        }

        Commands::Check { job, expr } => match (job, expr) {
            (_, Some(expr)) => {
                let parsed = parse(&expr)?;
                println!("{}", parsed);
                let folded = parsed.clone().fold_constants();
                if folded != parsed {
                    println!("folded: {}", folded);
                }
            }
            (Some(job), None) => {
                let compiled = CompiledJob::load(&job)
                    .with_context(|| format!("Invalid job file {}", job.display()))?;
                print!("{}", compiled.describe());
                println!("{}: OK", job.display());
            }
            (None, None) => anyhow::bail!(Error::Config("nothing to check".into())),
        },

        Commands::FscQc {
            fsc_toc,
            fsc_og,
            cloud,
            geophysical,
            water,
            tcd,
            shaded_snow,
            output,
            weights,
            exec,
        } => {
            let inputs = FscInputs {
                fsc_toc,
                fsc_og,
                cloud,
                geophysical,
                water,
                tcd,
                shaded_snow,
            };
            info!("snow quality layers into {}", output.display());
            run_jobs(&fsc::quality_jobs(&inputs, &output, &weights.into()), exec.mode())?;
        }

        Commands::FscNrt {
            fsc_toc,
            fsc_og,
            ndsi,
            cloud,
            l2a,
            geophysical,
            water,
            tcd,
            hillshade,
            shaded_snow,
            output,
            weights,
            exec,
        } => {
            let inputs = NrtInputs {
                fsc_toc,
                fsc_og,
                ndsi,
                cloud,
                l2a,
                geophysical,
                water,
                tcd,
                hillshade,
                shaded_snow,
            };
            info!("near real time snow layers into {}", output.display());
            run_jobs(&nrt::jobs(&inputs, &output, &weights.into()), exec.mode())?;
        }

        Commands::FscMask {
            input,
            l2a,
            water,
            output,
            exec,
        } => {
            run_jobs(&[fsc::masked_layer(&input, &l2a, &water, &output)], exec.mode())?;
        }

        Commands::Cc {
            cloud,
            edge,
            geophysical,
            output,
            exec,
        } => {
            let inputs = cc::CcInputs {
                cloud,
                nodata: edge,
                geophysical,
            };
            info!("cloud classification into {}", output.display());
            run_jobs(&cc::jobs(&inputs, &output), exec.mode())?;
        }
    }
    Ok(())
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match execute(cli.command) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code(&err);
            eprintln!("Error: {:#}", err);
            tracing::debug!("exit status {}", code);
            std::process::ExitCode::from(code.code())
        }
    }
}
