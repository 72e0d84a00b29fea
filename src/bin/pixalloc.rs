//! pixalloc CLI - decode and resize images through pluggable allocators.
//!
//! Every command can run its allocations through the instrumented
//! allocator (`--stats`) to show exactly what the library asked for.
//! The binary installs the routing adapter, so the codecs' own buffers
//! show up in those statistics too.

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

use pixalloc_rs::{
    AllocationStats, ColorSpace, CountingAllocator, DecodeOptions, Decoder, DecoderAllocator, Edge, Filter,
    ImageFormat, ResizeOptions, Resizer, ResizerAllocator, RoutingAllocator, SourceImage, SystemAllocator,
    routing_stats,
};

#[global_allocator]
static GLOBAL: RoutingAllocator = RoutingAllocator::system();

/// Image decoding and resizing with caller-supplied allocators
#[derive(Parser)]
#[command(name = "pixalloc")]
#[command(author = "pixalloc-rs contributors")]
#[command(version)]
#[command(about = "Decode and resize images through pluggable allocators", long_about = None)]
#[command(after_help = "EXAMPLES:
    pixalloc info -i photo.jpg
    pixalloc decode -i photo.jpg -o photo.ppm -f ppm
    pixalloc decode -i icon.png -o icon.raw -c 4 --stats
    pixalloc resize -i photo.jpg -o thumb.ppm -f ppm -W 128 -H 96 --srgb

ENVIRONMENT:
    PIXALLOC_LOG    log filter (e.g. debug, pixalloc_rs=trace); default warn")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode an image to raw pixels or PPM/PGM
    ///
    /// The input format is detected from its leading bytes.
    #[command(visible_alias = "d")]
    Decode {
        /// Input file path (JPEG, PNG, GIF, BMP or TGA)
        #[arg(short, long, help = "Path to the input image file")]
        input: PathBuf,

        /// Output file path for decoded pixels
        #[arg(short, long, help = "Path for the output file")]
        output: PathBuf,

        /// Output format: raw (binary pixels) or ppm (Portable PixMap)
        #[arg(short, long, default_value = "raw", value_enum)]
        format: OutputFormat,

        /// Channels to decode to (0 keeps the file's layout)
        #[arg(short, long, default_value = "0")]
        channels: usize,

        /// Store rows bottom-up
        #[arg(long)]
        flip: bool,

        /// Print allocator statistics
        #[arg(long)]
        stats: bool,
    },

    /// Decode an image and resample it to a new size
    #[command(visible_alias = "r")]
    Resize {
        #[arg(short, long, help = "Path to the input image file")]
        input: PathBuf,

        #[arg(short, long, help = "Path for the output file")]
        output: PathBuf,

        /// Output width in pixels
        #[arg(short = 'W', long)]
        width: usize,

        /// Output height in pixels
        #[arg(short = 'H', long)]
        height: usize,

        #[arg(long, default_value = "default", value_enum)]
        filter: FilterArg,

        #[arg(long, default_value = "clamp", value_enum)]
        edge: EdgeArg,

        /// Treat samples as sRGB and filter in linear light
        #[arg(long)]
        srgb: bool,

        /// Channels to decode to before resizing (0 keeps the file's layout)
        #[arg(short, long, default_value = "0")]
        channels: usize,

        #[arg(short, long, default_value = "raw", value_enum)]
        format: OutputFormat,

        /// Print allocator statistics
        #[arg(long)]
        stats: bool,
    },

    /// Display image dimensions and format without decoding pixels
    #[command(visible_alias = "i")]
    Info {
        /// Input file path
        #[arg(short, long, help = "Path to the image file to inspect")]
        input: PathBuf,
    },

    /// List supported formats and resampling filters
    #[command(visible_alias = "l")]
    List,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Raw binary pixel data
    Raw,
    /// Portable PixMap (PPM/PGM) format
    Ppm,
}

#[derive(Clone, Copy, ValueEnum)]
enum FilterArg {
    Default,
    Box,
    Triangle,
    CubicBspline,
    CatmullRom,
    Mitchell,
    Lanczos3,
}

impl From<FilterArg> for Filter {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::Default => Filter::Default,
            FilterArg::Box => Filter::Box,
            FilterArg::Triangle => Filter::Triangle,
            FilterArg::CubicBspline => Filter::CubicBSpline,
            FilterArg::CatmullRom => Filter::CatmullRom,
            FilterArg::Mitchell => Filter::Mitchell,
            FilterArg::Lanczos3 => Filter::Lanczos3,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum EdgeArg {
    Clamp,
    Reflect,
    Wrap,
    Zero,
}

impl From<EdgeArg> for Edge {
    fn from(arg: EdgeArg) -> Self {
        match arg {
            EdgeArg::Clamp => Edge::Clamp,
            EdgeArg::Reflect => Edge::Reflect,
            EdgeArg::Wrap => Edge::Wrap,
            EdgeArg::Zero => Edge::Zero,
        }
    }
}

struct ResizeJob<'p> {
    input: &'p Path,
    output: &'p Path,
    width: usize,
    height: usize,
    channels: usize,
    options: ResizeOptions,
    format: &'p OutputFormat,
}

fn main() {
    register_console_tracer();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Decode {
            input,
            output,
            format,
            channels,
            flip,
            stats,
        } => {
            let options = DecodeOptions::default().set_flip_vertically(flip);
            if stats {
                let counting = CountingAllocator::new();
                decode_image(&counting, &input, &output, &format, channels, options)
                    .map(|()| print_stats(&counting.stats()))
            } else {
                decode_image(&SystemAllocator, &input, &output, &format, channels, options)
            }
        }
        Commands::Resize {
            input,
            output,
            width,
            height,
            filter,
            edge,
            srgb,
            channels,
            format,
            stats,
        } => {
            let colorspace = if srgb { ColorSpace::Srgb } else { ColorSpace::Linear };
            let job = ResizeJob {
                input: &input,
                output: &output,
                width,
                height,
                channels,
                options: ResizeOptions::new(1)
                    .set_filter(filter.into())
                    .set_edge(edge.into())
                    .set_colorspace(colorspace),
                format: &format,
            };
            if stats {
                let counting = CountingAllocator::new();
                resize_image(&counting, &job).map(|()| print_stats(&counting.stats()))
            } else {
                resize_image(&SystemAllocator, &job)
            }
        }
        Commands::Info { input } => show_info(&input),
        Commands::List => list_formats(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn register_console_tracer() {
    let format = tracing_subscriber::fmt::format()
        .compact()
        .with_target(false)
        .with_thread_ids(false);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .event_format(format)
        .with_writer(std::io::stderr);

    let filter_layer = EnvFilter::try_from_env("PIXALLOC_LOG").unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .parse_lossy("")
    });

    let tracer = tracing_subscriber::registry().with(filter_layer).with(fmt_layer);

    if tracing::subscriber::set_global_default(tracer).is_err() {
        eprintln!("Warning: a global tracing subscriber is already installed");
    }
}

fn decode_image<A: DecoderAllocator + ?Sized>(
    allocator: &A,
    input: &Path,
    output: &Path,
    format: &OutputFormat,
    channels: usize,
    options: DecodeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    let image = Decoder::with_options(allocator, options).decode(&data, channels)?;
    let (width, height, channels) = (image.width(), image.height(), image.channels());

    match format {
        OutputFormat::Raw => {
            fs::write(output, image.pixels())?;
        }
        OutputFormat::Ppm => {
            write_ppm(output, image.pixels(), width, height, channels)?;
        }
    }

    println!(
        "✓ Decoded {}x{} {} image ({} channels, {} in file) to {:?}",
        width,
        height,
        image.format(),
        channels,
        image.channels_in_file(),
        output
    );
    Ok(())
}

fn resize_image<A>(allocator: &A, job: &ResizeJob<'_>) -> Result<(), Box<dyn std::error::Error>>
where
    A: DecoderAllocator + ResizerAllocator + ?Sized,
{
    let data = fs::read(job.input)?;
    let image = Decoder::new(allocator).decode(&data, job.channels)?;
    let channels = image.channels();
    let alpha = match channels {
        2 => Some(1),
        4 => Some(3),
        _ => None,
    };
    let options = ResizeOptions::new(channels)
        .set_filters(job.options.filters().0, job.options.filters().1)
        .set_edges(job.options.edges().0, job.options.edges().1)
        .set_colorspace(job.options.colorspace())
        .set_alpha_channel(alpha);

    let source = SourceImage::packed(image.pixels(), image.width(), image.height(), channels);
    let resized = Resizer::new(allocator, &()).resize(&source, job.width, job.height, &options)?;

    match job.format {
        OutputFormat::Raw => {
            fs::write(job.output, resized.pixels())?;
        }
        OutputFormat::Ppm => {
            write_ppm(job.output, resized.pixels(), job.width, job.height, channels)?;
        }
    }

    println!(
        "✓ Resized {}x{} to {}x{} ({} channels) to {:?}",
        image.width(),
        image.height(),
        job.width,
        job.height,
        channels,
        job.output
    );
    Ok(())
}

fn show_info(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;

    println!("File: {:?}", input);
    println!("Size: {} bytes", data.len());
    println!();

    let Some(format) = ImageFormat::detect(&data) else {
        println!("Format: unknown");
        return Ok(());
    };
    println!("Format: {}", format);
    if !format.is_decodable() {
        println!("  (recognised, not decodable)");
        return Ok(());
    }

    let info = Decoder::new(&SystemAllocator).info(&data)?;
    println!("  Dimensions: {}x{}", info.width, info.height);
    println!("  Channels:   {}", info.channels_in_file);
    println!("  Bits:       {}", info.bits_per_channel);
    Ok(())
}

fn list_formats() -> Result<(), Box<dyn std::error::Error>> {
    println!("Decoders:");
    println!();
    println!("  JPEG     baseline and progressive, grey or colour");
    println!("  PNG      all colour types and depths, 16-bit kept or reduced to 8-bit");
    println!("  GIF      first frame, RGBA");
    println!("  BMP      uncompressed and RLE");
    println!("  TGA      true-colour, grey and colour-mapped");
    println!();
    println!("  Recognised only: PSD, HDR, PNM");
    println!();
    println!("Resampling filters:");
    for filter in Filter::ALL {
        println!("  {:<14} support {}", filter.name(), filter.support());
    }
    println!();
    println!("Edge modes: clamp, reflect, wrap, zero");
    Ok(())
}

fn print_stats(stats: &AllocationStats) {
    println!();
    println!("Allocator:");
    println!("  Allocations:   {}", stats.allocations);
    println!("  Reallocations: {}", stats.reallocations);
    println!("  Frees:         {}", stats.frees);
    println!("  Failed:        {}", stats.failed_allocations);
    println!("  Invalid frees: {}", stats.invalid_frees);
    println!("  Peak bytes:    {}", stats.peak_bytes);
    println!("  Outstanding:   {} blocks", stats.outstanding_blocks);
    let routing = routing_stats();
    println!("  Codec blocks:  {} routed, {} fell back", routing.routed, routing.fallbacks);
}

// Internal helpers

fn write_ppm(
    path: &Path,
    pixels: &[u8],
    width: usize,
    height: usize,
    channels: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    use std::io::Write;

    let magic = match channels {
        1 => "P5",
        3 => "P6",
        n => return Err(format!("PPM output needs 1 or 3 channels, image has {n}; use -c").into()),
    };
    let mut file = fs::File::create(path)?;
    writeln!(file, "{}", magic)?;
    writeln!(file, "{} {}", width, height)?;
    writeln!(file, "255")?;
    file.write_all(pixels)?;
    Ok(())
}
