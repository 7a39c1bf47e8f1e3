use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use splitrender::{
    determine_optimal_cut_positions, RasterSurface, SnapOptions, SplitRenderer,
};

/// Render a vertical section of a PDF page and report clean cut positions.
#[derive(Parser)]
#[command(name = "splitrender", version)]
struct Cli {
    /// PDF document to open
    document: PathBuf,

    /// Page number (0-indexed)
    #[arg(short, long, default_value_t = 0)]
    page: usize,

    /// Render scale
    #[arg(short, long, default_value_t = 2.0)]
    scale: f32,

    /// Section start as a fraction of page height
    #[arg(long, default_value_t = 0.0)]
    start: f32,

    /// Section end as a fraction of page height
    #[arg(long, default_value_t = 1.0)]
    end: f32,

    /// Write the rendered section to this PNG file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    TermLogger::init(
        if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )?;

    let renderer = SplitRenderer::open(&cli.document)
        .with_context(|| format!("opening {}", cli.document.display()))?;
    info!("document has {} pages", renderer.page_count());

    let render = renderer.render_section(cli.page, cli.scale, cli.start, cli.end)?;
    let pixels = render.surface.pixels();
    println!(
        "rendered {}x{} ({})",
        pixels.width(),
        pixels.height(),
        if render.is_main {
            "main surface"
        } else {
            "secondary copy"
        }
    );

    let regions = determine_optimal_cut_positions(
        &pixels,
        cli.start,
        cli.end,
        render.is_main,
        &SnapOptions::default(),
    );
    if regions.is_empty() {
        println!("no clean bands found");
    }
    for region in &regions {
        println!(
            "clean band [{:.4}, {:.4}] snap points {:?}",
            region.start, region.end, region.snap_points
        );
    }

    if let Some(path) = &cli.output {
        write_png(path, &pixels)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("wrote {}", path.display());
    }

    drop(pixels);
    render.reference.release()?;
    Ok(())
}

fn write_png(path: &Path, surface: &RasterSurface) -> Result<()> {
    let file = File::create(path)?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), surface.width(), surface.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(surface.as_bytes())?;
    Ok(())
}
