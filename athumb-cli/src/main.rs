//! athumb CLI Tool
//!
//! Command-line interface for generating byte-budget-constrained animated
//! thumbnails and measuring their fidelity.

use anyhow::{bail, Context, Result};
use athumb_codec::AvifCodec;
use athumb_core::{Animation, TimedPicture};
use athumb_encoder::{AnimationOptions, Thumbnailer, VideoReader};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "athumb")]
#[command(about = "athumb - byte-budget-constrained animated thumbnails")]
#[command(version)]
struct Cli {
    /// Enable per-pass diagnostic output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Frame sources shared by the generate/psnr/compare commands
#[derive(Args)]
struct FrameInput {
    /// Input image files in presentation order
    images: Vec<PathBuf>,

    /// Read frames from a video file instead of images
    #[arg(long, conflicts_with = "images")]
    video: Option<PathBuf>,

    /// Frame rate used to timestamp images, or to subsample a video
    #[arg(long, default_value = "10.0")]
    fps: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an animated thumbnail that fits a byte budget
    Generate {
        #[command(flatten)]
        input: FrameInput,

        /// Output animation file path
        #[arg(short, long)]
        output: PathBuf,

        /// Byte budget for the assembled animation
        #[arg(long, default_value = "153600")]
        budget: usize,

        /// Lowest lossy quality the search may assign (0-100)
        #[arg(long, default_value = "0")]
        min_quality: u8,

        /// Number of times the animation repeats (0 = forever)
        #[arg(long, default_value = "0")]
        loop_count: u16,

        /// Allocate qualities so all frames land near one PSNR value
        #[arg(long)]
        equal_psnr: bool,

        /// Try upgrading frames to near-lossless after the lossy passes
        #[arg(long)]
        near_lossless: bool,

        /// Skip the budget search and encode at default settings
        #[arg(long, conflicts_with_all = ["equal_psnr", "near_lossless"])]
        unbudgeted: bool,
    },

    /// Show information about a generated animation
    Info {
        /// Animation file path
        input: PathBuf,
    },

    /// Measure per-frame PSNR of an animation against its source frames
    Psnr {
        #[command(flatten)]
        input: FrameInput,

        /// Animation file path
        #[arg(short, long)]
        animation: PathBuf,
    },

    /// Compare the fidelity of two animations over the same source frames
    Compare {
        #[command(flatten)]
        input: FrameInput,

        /// First animation file path
        #[arg(short = 'a', long)]
        first: PathBuf,

        /// Second animation file path
        #[arg(short = 'b', long)]
        second: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Generate {
            input,
            output,
            budget,
            min_quality,
            loop_count,
            equal_psnr,
            near_lossless,
            unbudgeted,
        } => generate(
            input,
            output,
            budget,
            min_quality,
            loop_count,
            equal_psnr,
            near_lossless,
            unbudgeted,
        )?,

        Commands::Info { input } => info(input)?,

        Commands::Psnr { input, animation } => psnr(input, animation)?,

        Commands::Compare {
            input,
            first,
            second,
        } => compare(input, first, second)?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Loads timestamped frames from image files or a video
fn load_frames(input: &FrameInput) -> Result<Vec<TimedPicture>> {
    if let Some(video) = &input.video {
        let mut reader = VideoReader::open(video)
            .with_context(|| format!("Failed to open video {}", video.display()))?;
        println!(
            "Video info: {}x{}, {} ms",
            reader.width(),
            reader.height(),
            reader.duration_ms()
        );
        let frames = reader
            .read_timed_frames(Some(input.fps))
            .context("Failed to extract video frames")?;
        return Ok(frames);
    }

    if input.images.is_empty() {
        bail!("No input frames: pass image files or --video");
    }
    if input.fps <= 0.0 {
        bail!("--fps must be positive");
    }

    let frame_interval_ms = 1000.0 / input.fps;
    let mut frames = Vec::with_capacity(input.images.len());
    for (index, path) in input.images.iter().enumerate() {
        let picture = image::open(path)
            .with_context(|| format!("Failed to open image {}", path.display()))?
            .to_rgba8();
        let timestamp_ms = (index as f64 * frame_interval_ms).round() as i32;
        frames.push(TimedPicture::new(picture, timestamp_ms));
    }
    Ok(frames)
}

#[allow(clippy::too_many_arguments)]
fn generate(
    input: FrameInput,
    output: PathBuf,
    budget: usize,
    min_quality: u8,
    loop_count: u16,
    equal_psnr: bool,
    near_lossless: bool,
    unbudgeted: bool,
) -> Result<()> {
    let frames = load_frames(&input)?;
    println!("Loaded {} frames", frames.len());

    let options = AnimationOptions {
        loop_count,
        byte_budget: budget,
        minimum_lossy_quality: min_quality,
        ..AnimationOptions::default()
    };

    let mut thumbnailer = Thumbnailer::new(options);
    for frame in frames {
        thumbnailer
            .add_frame(frame.picture, frame.timestamp_ms)
            .context("Failed to add frame")?;
    }

    let data = if unbudgeted {
        thumbnailer
            .generate_unbudgeted()
            .context("Failed to generate animation")?
    } else {
        let mut data = if equal_psnr {
            thumbnailer.generate_equal_psnr()
        } else {
            thumbnailer.generate()
        }
        .context("Failed to generate animation")?;

        if near_lossless {
            data = thumbnailer
                .try_near_lossless(data)
                .context("Near-lossless upgrade failed")?;
        }
        data
    };

    println!(
        "Generated {} bytes ({} budget)",
        data.len(),
        if unbudgeted {
            "no".to_string()
        } else {
            format!("{budget} byte")
        }
    );
    print_qualities(&thumbnailer);

    fs::write(&output, &data)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote {}", output.display());

    Ok(())
}

fn print_qualities<C: athumb_core::PixelCodec>(thumbnailer: &Thumbnailer<C>) {
    let qualities: Vec<String> = thumbnailer
        .final_qualities()
        .iter()
        .map(|quality| match quality {
            Some(value) => value.to_string(),
            None => "-".to_string(),
        })
        .collect();
    if qualities.iter().any(|q| q != "-") {
        println!("Final qualities: {}", qualities.join(" "));
    }
}

fn info(input: PathBuf) -> Result<()> {
    let data = fs::read(&input).with_context(|| format!("Failed to read {}", input.display()))?;
    let animation = Animation::from_bytes(&data).context("Failed to parse animation")?;

    println!("\n=== Animation Information ===");
    println!("Version: {}", animation.header.version);
    println!(
        "Canvas: {}x{}",
        animation.header.width, animation.header.height
    );
    println!("Loop count: {}", animation.header.loop_count);
    println!(
        "Dispose to background: {}",
        animation.header.dispose_to_background
    );
    println!("Blend frames: {}", animation.header.blend_frames);
    println!("Frames: {}", animation.frames.len());
    println!(
        "Total size: {} bytes ({:.2} KB), {} bytes of payload",
        data.len(),
        data.len() as f64 / 1024.0,
        animation.payload_size()
    );

    println!("\n=== Frames (first 10) ===");
    for (index, frame) in animation.frames.iter().take(10).enumerate() {
        println!(
            "  [{}] {} ms, {} bytes",
            index,
            frame.timestamp_ms,
            frame.payload_size()
        );
    }
    if animation.frames.len() > 10 {
        println!("  ... and {} more frames", animation.frames.len() - 10);
    }

    Ok(())
}

fn psnr(input: FrameInput, animation: PathBuf) -> Result<()> {
    let frames = load_frames(&input)?;
    let data = fs::read(&animation)
        .with_context(|| format!("Failed to read {}", animation.display()))?;

    let stats = athumb_decoder::compute_psnr(&frames, &data, &AvifCodec::new())
        .context("Failed to measure PSNR")?;
    print!("{stats}");

    Ok(())
}

fn compare(input: FrameInput, first: PathBuf, second: PathBuf) -> Result<()> {
    let frames = load_frames(&input)?;
    let data_a =
        fs::read(&first).with_context(|| format!("Failed to read {}", first.display()))?;
    let data_b =
        fs::read(&second).with_context(|| format!("Failed to read {}", second.display()))?;

    let diff = athumb_decoder::compare(&frames, &data_a, &data_b, &AvifCodec::new())
        .context("Failed to compare animations")?;
    if diff.psnr_diff.is_empty() {
        println!("Nothing to compare: no source frames.");
    } else {
        print!("{diff}");
    }

    Ok(())
}
