use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use quiltweave::{
    CalibrationProfile, CodecProfile, ConversionEvent, ConversionJob, ConversionOptions,
    Converter, FfmpegLogLevel, FrameSource, JobStatus, QuiltError, VideoSource,
    parse_quilt_filename,
};

const CLI_AFTER_HELP: &str = "Examples:\n  quiltweave convert clip_qs5x9a1.87.mp4 --calibration visual.json --progress\n  quiltweave convert clip_qs8x6a0.75.mp4 --calibration visual.json --codec prores4444 --out display.mov\n  quiltweave inspect clip_qs5x9a1.87.mp4 --calibration visual.json --json\n  quiltweave codecs\n  quiltweave completions zsh > _quiltweave";

#[derive(Debug, Parser)]
#[command(
    name = "quiltweave",
    version,
    about = "Convert quilt videos for lenticular light-field displays",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional logging output.
    #[arg(long)]
    verbose: bool,

    /// Show a progress bar.
    #[arg(long)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long)]
    overwrite: bool,

    /// FFmpeg log level (quiet, fatal, error, warning, info, debug).
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert a quilt video into a display-ready video.
    #[command(
        about = "Convert a quilt video",
        after_help = "Codecs: h264, h265, prores422, h264-444, h265-444, prores4444\nThe quilt layout is read from the filename (qs<cols>x<rows>a<aspect>)."
    )]
    Convert {
        /// Input quilt video.
        input: PathBuf,
        /// Display calibration record (JSON).
        #[arg(long)]
        calibration: PathBuf,
        /// Output file. Defaults to <name>_LookingGlassReady next to the input.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Output codec profile.
        #[arg(long, default_value = "h264", value_parser = parse_codec)]
        codec: CodecProfile,
        /// Frames between progress updates.
        #[arg(long, default_value_t = quiltweave::configuration::DEFAULT_PROGRESS_STRIDE)]
        progress_stride: u64,
        /// Time limit for the external encoder, in seconds.
        #[arg(long, default_value_t = quiltweave::configuration::DEFAULT_ENCODER_TIMEOUT.as_secs())]
        timeout_secs: u64,
        /// External encoder program for staged codecs.
        #[arg(long)]
        encoder: Option<PathBuf>,
        /// Parent directory for scratch frame sequences.
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
        /// Worker threads for the pixel transform (0 = all cores).
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Show what a conversion would do.
    #[command(about = "Print quilt layout, calibration, and source properties")]
    Inspect {
        /// Input quilt video.
        input: PathBuf,
        /// Display calibration record (JSON).
        #[arg(long)]
        calibration: PathBuf,
        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the available output codec profiles.
    #[command(about = "List output codec profiles")]
    Codecs,

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    let filter = if global.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    if let Some(level) = &global.log_level {
        let parsed: FfmpegLogLevel = level.parse()?;
        quiltweave::set_ffmpeg_log_level(parsed);
    }
    Ok(())
}

fn progress_bar() -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template(
        "{spinner:.green} {bar:40.cyan/blue} {pos:>3}% {msg}",
    )?;
    bar.set_style(style.progress_chars("##-"));
    Ok(bar)
}

/// Unknown selectors are usage errors, which exit with the input-error code.
fn parse_codec(value: &str) -> Result<CodecProfile, String> {
    value.parse()
}

#[allow(clippy::too_many_arguments)]
fn convert(
    global: &GlobalOptions,
    input: PathBuf,
    calibration: PathBuf,
    out: Option<PathBuf>,
    codec: CodecProfile,
    progress_stride: u64,
    timeout_secs: u64,
    encoder: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
    threads: Option<usize>,
) -> Result<JobStatus, Box<dyn std::error::Error>> {
    let job = match out {
        Some(out) => ConversionJob::new(input, calibration, out, codec),
        None => ConversionJob::with_suggested_output(input, calibration, codec),
    };
    ensure_writable_path(&job.output_path, global.overwrite)?;

    let mut options = ConversionOptions::new()
        .with_progress_stride(progress_stride)
        .with_encoder_timeout(Duration::from_secs(timeout_secs))
        .with_threads(threads);
    if let Some(encoder) = encoder {
        options = options.with_encoder_program(encoder);
    }
    if let Some(scratch_dir) = scratch_dir {
        options = options.with_scratch_root(scratch_dir);
    }

    let output_path = job.output_path.clone();
    if global.verbose {
        eprintln!(
            "{} {} -> {} ({}x{} views, {codec})",
            "converting".cyan().bold(),
            job.input_name(),
            output_path.display(),
            job.geometry.columns,
            job.geometry.rows,
        );
    }

    let mut handle = Converter::new().start(job, options)?;
    let bar = if global.progress {
        Some(progress_bar()?)
    } else {
        None
    };

    while let Some(event) = handle.blocking_next_event() {
        match event {
            ConversionEvent::Progress(progress) => {
                if let Some(bar) = &bar {
                    bar.set_position(progress.percentage.round() as u64);
                    bar.set_message(progress.message);
                }
            }
            ConversionEvent::Warning(message) => {
                let line = format!("{} {}", "warning:".yellow().bold(), message.yellow());
                match &bar {
                    Some(bar) => bar.println(line),
                    None => eprintln!("{line}"),
                }
            }
            ConversionEvent::StateChanged(state) => {
                if let Some(bar) = &bar {
                    bar.set_message(format!("{state:?}"));
                }
            }
            ConversionEvent::Finished(_) => break,
        }
    }

    let result = handle.blocking_wait();
    if let Some(bar) = bar {
        if result.success {
            bar.finish_with_message("done");
        } else {
            bar.abandon();
        }
    }

    if result.success {
        println!(
            "{} {}",
            "saved".green().bold(),
            output_path.display()
        );
    } else {
        eprintln!(
            "{} {}",
            "error:".red().bold(),
            result.error_detail.unwrap_or_else(|| "conversion failed".to_string())
        );
    }
    Ok(result.status)
}

fn inspect(input: &Path, calibration: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (geometry, warning) = parse_quilt_filename(input);
    let profile = CalibrationProfile::load(calibration)?;
    let source = VideoSource::open(input)?;
    let properties = source.properties();

    if json {
        let payload = json!({
            "quilt": {
                "columns": geometry.columns,
                "rows": geometry.rows,
                "aspect_ratio": geometry.aspect_ratio,
                "views": geometry.view_count(),
                "defaulted": warning.is_some(),
            },
            "calibration": {
                "screen_width": profile.screen_width,
                "screen_height": profile.screen_height,
                "pitch": profile.pitch,
                "slope": profile.slope,
                "center": profile.center,
                "dpi": profile.dpi,
                "fringe": profile.fringe,
            },
            "source": {
                "width": properties.width,
                "height": properties.height,
                "fps": properties.frames_per_second,
                "frame_count": properties.frame_count,
                "codec": properties.codec,
                "tile_width": properties.width / geometry.columns,
                "tile_height": properties.height / geometry.rows,
            },
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        if let Some(warning) = &warning {
            eprintln!("{} {}", "warning:".yellow().bold(), warning.to_string().yellow());
        }
        println!(
            "Quilt: {}x{} views, aspect {}",
            geometry.columns, geometry.rows, geometry.aspect_ratio
        );
        println!(
            "Display: {}x{} @ {} DPI (pitch {}, slope {}, center {})",
            profile.screen_width,
            profile.screen_height,
            profile.dpi,
            profile.pitch,
            profile.slope,
            profile.center,
        );
        println!(
            "Source: {}x{} @ {:.3} fps, {} frames [{}]",
            properties.width,
            properties.height,
            properties.frames_per_second,
            properties
                .frame_count
                .map_or_else(|| "unknown".to_string(), |count| count.to_string()),
            properties.codec,
        );
        println!(
            "Tile: {}x{}",
            properties.width / geometry.columns,
            properties.height / geometry.rows
        );
    }
    Ok(())
}

fn list_codecs() {
    for codec in CodecProfile::ALL {
        let backend = if codec.direct_muxer_capable() {
            "direct"
        } else {
            "staged"
        };
        println!(
            "{} {:<5} {:<10} {:<13} {:<7} {}",
            format!("{:<11}", codec.selector()).bold(),
            codec.container_extension(),
            codec.encoder_id(),
            codec.pixel_format(),
            backend,
            codec.description(),
        );
    }
}

fn run() -> Result<JobStatus, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Convert {
            input,
            calibration,
            out,
            codec,
            progress_stride,
            timeout_secs,
            encoder,
            scratch_dir,
            threads,
        } => {
            return convert(
                &cli.global,
                input,
                calibration,
                out,
                codec,
                progress_stride,
                timeout_secs,
                encoder,
                scratch_dir,
                threads,
            );
        }
        Commands::Inspect {
            input,
            calibration,
            json,
        } => inspect(&input, &calibration, json)?,
        Commands::Codecs => list_codecs(),
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "quiltweave", &mut std::io::stdout());
        }
    }

    Ok(JobStatus::Success)
}

fn main() {
    match run() {
        Ok(status) => std::process::exit(status.exit_code()),
        Err(error) => {
            eprintln!("{} {error}", "error:".red().bold());
            let status = error
                .downcast_ref::<QuiltError>()
                .map_or(JobStatus::InternalError, QuiltError::status);
            std::process::exit(status.exit_code());
        }
    }
}
