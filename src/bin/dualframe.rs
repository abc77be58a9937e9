use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use dualframe::{
    AlphaLayout, AlphaSide, CompositeService, EffectKind, Extractor, ExtractOpts, FrameGeometry,
    FrameInput, Sampling, ServiceOpts, Size, detect_alpha_side,
};

#[derive(Parser, Debug)]
#[command(name = "dualframe", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effect metadata embedded in a container.
    Inspect(InspectArgs),
    /// Merge color and alpha images into one RGBA PNG.
    Composite(CompositeArgs),
    /// Report which half of a side-by-side frame carries alpha.
    Detect(DetectArgs),
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Input container (usually MP4).
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Print the whole document as JSON instead of a summary.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LayoutArg {
    Separate,
    Left,
    Right,
}

impl From<LayoutArg> for AlphaLayout {
    fn from(v: LayoutArg) -> Self {
        match v {
            LayoutArg::Separate => AlphaLayout::Separate,
            LayoutArg::Left => AlphaLayout::Left,
            LayoutArg::Right => AlphaLayout::Right,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SamplingArg {
    Nearest,
    Bilinear,
}

impl From<SamplingArg> for Sampling {
    fn from(v: SamplingArg) -> Self {
        match v {
            SamplingArg::Nearest => Sampling::Nearest,
            SamplingArg::Bilinear => Sampling::Bilinear,
        }
    }
}

#[derive(Parser, Debug)]
struct CompositeArgs {
    /// Color PNG, or the packed PNG for `left`/`right`.
    #[arg(long)]
    color: PathBuf,

    /// Alpha PNG (`separate` layout only).
    #[arg(long)]
    alpha: Option<PathBuf>,

    /// Where alpha lives.
    #[arg(long, value_enum, default_value_t = LayoutArg::Separate)]
    layout: LayoutArg,

    /// Output width.
    #[arg(long)]
    width: u32,

    /// Output height.
    #[arg(long)]
    height: u32,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Resampling policy (overrides the config file).
    #[arg(long, value_enum)]
    sampling: Option<SamplingArg>,

    /// Service options JSON.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct DetectArgs {
    /// Side-by-side frame PNG.
    #[arg(long = "in")]
    in_path: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Inspect(args) => cmd_inspect(args),
        Command::Composite(args) => cmd_composite(args),
        Command::Detect(args) => cmd_detect(args),
    }
}

fn cmd_inspect(args: InspectArgs) -> anyhow::Result<()> {
    let bytes = std::fs::read(&args.in_path)
        .with_context(|| format!("read container '{}'", args.in_path.display()))?;
    let Some(doc) = Extractor::new(ExtractOpts::default()).extract(&bytes) else {
        println!("no metadata");
        return Ok(());
    };

    if args.json {
        let json = serde_json::to_string_pretty(&doc.to_json()?)?;
        println!("{json}");
        return Ok(());
    }

    let d = &doc.descriptor;
    println!("size:    {}x{}", d.width(), d.height());
    println!("fps:     {}", d.fps());
    println!("frames:  {}", doc.total_frames());
    if let Some(layout) = d.alpha_layout() {
        println!("layout:  {}", serde_json::to_string(&layout)?);
    }
    println!("effects: {}", doc.effects.len());
    for e in &doc.effects {
        let kind = match e.def.kind() {
            EffectKind::Text => "txt".to_string(),
            EffectKind::Image => "img".to_string(),
            EffectKind::Other(s) => s,
        };
        println!(
            "  {} tag={} type={kind}",
            e.key,
            e.def.effect_tag().unwrap_or("-")
        );
    }
    Ok(())
}

fn load_rgba(path: &Path) -> anyhow::Result<image::RgbaImage> {
    let img = image::open(path).with_context(|| format!("read png '{}'", path.display()))?;
    Ok(img.to_rgba8())
}

fn cmd_composite(args: CompositeArgs) -> anyhow::Result<()> {
    let mut opts = match &args.config {
        Some(p) => ServiceOpts::from_path(p)?,
        None => ServiceOpts::default(),
    };
    if let Some(s) = args.sampling {
        opts.compositor.sampling = s.into();
    }

    let layout = AlphaLayout::from(args.layout);
    let color = load_rgba(&args.color)?;
    let source = Size::new(color.width(), color.height())?;
    let input = if layout.needs_alpha_buffer() {
        let path = args
            .alpha
            .as_deref()
            .context("--alpha is required for the separate layout")?;
        let alpha = load_rgba(path)?;
        if alpha.dimensions() != color.dimensions() {
            anyhow::bail!(
                "alpha is {}x{} but color is {}x{}",
                alpha.width(),
                alpha.height(),
                color.width(),
                color.height()
            );
        }
        FrameInput::separate(color.into_raw(), alpha.into_raw())
    } else {
        FrameInput::packed(color.into_raw())
    };

    let geometry = FrameGeometry {
        source,
        target: Size::new(args.width, args.height)?,
        layout,
    };
    let service = CompositeService::open(opts)?;
    let frame = service.process_frame(geometry, input).wait()?;
    service.dispose();

    if let Some(parent) = args.out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image::save_buffer_with_format(
        &args.out,
        &frame.data,
        frame.width,
        frame.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_detect(args: DetectArgs) -> anyhow::Result<()> {
    let img = load_rgba(&args.in_path)?;
    let size = Size::new(img.width(), img.height())?;
    let side = match detect_alpha_side(img.as_raw(), size) {
        Some(AlphaSide::Left) => "left",
        Some(AlphaSide::Right) => "right",
        None => "none",
    };
    println!("{side}");
    Ok(())
}
