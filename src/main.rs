//! `stylemix` CLI - Arbitrary style transfer and style mixing.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stylemix::bench::bench_all;
use stylemix::controller::{JobController, JobOutcome, PanelSettings, StyleSizing, StyleSlot};
use stylemix::image::{Gallery, ImageSource, PixelBuffer, Selection};
use stylemix::model::{ModelCache, OnnxLoader, StyleModel, TransformerModel};
use stylemix::{BlendRatio, Config};

/// Stylize images with a style encoder and transformer network.
///
/// Images are given as file paths, gallery names, http(s) URLs or `random`.
#[derive(Parser, Debug)]
#[command(name = "stylemix")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the ONNX models [default: user cache dir].
    #[arg(long, global = true, value_name = "DIR")]
    model_dir: Option<PathBuf>,

    /// Base URL to download missing models from.
    #[arg(long, global = true, value_name = "URL")]
    model_url: Option<String>,

    /// Style encoder: mobilenet or inception.
    #[arg(long, global = true, default_value = "mobilenet")]
    style_model: StyleModel,

    /// Transformer: original or separable.
    #[arg(long, global = true, default_value = "separable")]
    transformer_model: TransformerModel,

    /// Directory with the named gallery images.
    #[arg(long, global = true, default_value = "images", value_name = "DIR")]
    gallery_dir: PathBuf,

    /// File of image links, one per line, used by `random`.
    #[arg(long, global = true, value_name = "FILE")]
    links: Option<PathBuf>,

    /// Resize the content image to this height.
    #[arg(long, global = true, value_name = "PX")]
    content_size: Option<u32>,

    /// Resize the (first) style image to this height.
    #[arg(long, global = true, value_name = "PX")]
    style_size: Option<u32>,

    /// Make the (first) style image square.
    #[arg(long, global = true)]
    square: bool,

    /// Resize the second style image of `combine` [default: --style-size].
    #[arg(long, global = true, value_name = "PX")]
    style_size_b: Option<u32>,

    /// Make the second style image of `combine` square.
    #[arg(long, global = true)]
    square_b: bool,

    /// Randomize ratio, sizes and squareness.
    #[arg(long, global = true)]
    randomize: bool,

    /// Random seed for reproducibility.
    #[arg(long, global = true, value_name = "INT")]
    seed: Option<u64>,

    /// Output JPEG quality (1-100).
    #[arg(short, long, global = true, default_value = "95", value_name = "INT")]
    quality: u8,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply one style, blended with the content's own style.
    Stylize {
        content: Selection,
        style: Selection,

        /// Output image path.
        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,

        /// Style strength (0.0-1.0); 1.0 uses the style image alone.
        #[arg(long, default_value = "1.0", value_name = "FLOAT")]
        ratio: f32,
    },

    /// Mix two styles and apply the result.
    Combine {
        content: Selection,
        style_a: Selection,
        style_b: Selection,

        /// Output image path.
        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,

        /// Weight of the second style (0.0-1.0).
        #[arg(long, default_value = "0.5", value_name = "FLOAT")]
        ratio: f32,
    },

    /// Time every model on random input.
    Bench {
        /// Runs per model.
        #[arg(long, default_value = "10", value_name = "INT")]
        runs: usize,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("stylemix={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(err) = run(&args) {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(args: &Args) -> Result<()> {
    let config = Config {
        model_dir: args
            .model_dir
            .clone()
            .unwrap_or_else(OnnxLoader::default_dir),
        model_url: args.model_url.clone(),
        style_model: args.style_model,
        transformer_model: args.transformer_model,
        output_quality: args.quality,
    };
    config.validate().context("Invalid configuration")?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let cache = Arc::new(ModelCache::from_config(&config).context("Failed to open model cache")?);

    match &args.command {
        Command::Stylize {
            content,
            style,
            output,
            ratio,
        } => {
            let settings = panel_settings(args, PanelSettings::single(), *ratio, &mut rng)?;
            let gallery = build_gallery(args)?;
            let content = prepare(&gallery, content, &mut rng, |i| settings.prepare_content(i))?;
            let style = prepare(&gallery, style, &mut rng, |i| {
                settings.prepare_style(StyleSlot::First, i)
            })?;

            let controller = start(cache, &config)?;
            let outcome = block_on(controller.stylize(&content, &style, settings.ratio))?;
            save(outcome, output, config.output_quality)
        }
        Command::Combine {
            content,
            style_a,
            style_b,
            output,
            ratio,
        } => {
            let settings = panel_settings(args, PanelSettings::combine(), *ratio, &mut rng)?;
            let gallery = build_gallery(args)?;
            let content = prepare(&gallery, content, &mut rng, |i| settings.prepare_content(i))?;
            let style_a = prepare(&gallery, style_a, &mut rng, |i| {
                settings.prepare_style(StyleSlot::First, i)
            })?;
            let style_b = prepare(&gallery, style_b, &mut rng, |i| {
                settings.prepare_style(StyleSlot::Second, i)
            })?;

            let controller = start(cache, &config)?;
            let outcome =
                block_on(controller.combine(&content, &style_a, &style_b, settings.ratio))?;
            save(outcome, output, config.output_quality)
        }
        Command::Bench { runs } => {
            bench_all(&cache, *runs, &mut rng).context("Benchmark failed")?;
            Ok(())
        }
    }
}

fn panel_settings(
    args: &Args,
    mut settings: PanelSettings,
    ratio: f32,
    rng: &mut StdRng,
) -> Result<PanelSettings> {
    settings.ratio = BlendRatio::new(ratio)?;
    settings.content_size = args.content_size;
    *settings.style_mut(StyleSlot::First) = StyleSizing {
        size: args.style_size,
        square: args.square,
    };
    *settings.style_mut(StyleSlot::Second) = StyleSizing {
        size: args.style_size_b.or(args.style_size),
        square: args.square_b,
    };

    if args.randomize {
        settings.randomize(rng);
        tracing::info!(
            "Randomized: ratio {:.2}, content {:?}px, styles {:?}",
            settings.ratio.value(),
            settings.content_size,
            settings.styles
        );
    }
    Ok(settings)
}

fn build_gallery(args: &Args) -> Result<Gallery> {
    let mut gallery = Gallery::new(&args.gallery_dir);
    if let Some(path) = &args.links {
        let links = Gallery::read_links(path)
            .with_context(|| format!("Failed to read links from {}", path.display()))?;
        gallery = gallery.with_links(links);
    }
    Ok(gallery)
}

fn prepare(
    gallery: &Gallery,
    selection: &Selection,
    rng: &mut StdRng,
    resize: impl Fn(&ImageSource) -> stylemix::Result<ImageSource>,
) -> Result<ImageSource> {
    let image = gallery
        .resolve(selection, rng)
        .with_context(|| format!("Failed to load {selection:?}"))?;
    Ok(resize(&image)?)
}

fn start(cache: Arc<ModelCache>, config: &Config) -> Result<JobController> {
    let controller = JobController::new(cache);
    controller
        .initialize(config.style_model, config.transformer_model)
        .context("Failed to load models")?;
    Ok(controller)
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .context("Failed to start runtime")?;
    Ok(runtime.block_on(future))
}

fn save(
    outcome: stylemix::Result<JobOutcome<PixelBuffer>>,
    output: &Path,
    quality: u8,
) -> Result<()> {
    let Some(pixels) = outcome.context("Stylization failed")?.completed() else {
        anyhow::bail!("Controls were busy; nothing ran");
    };
    pixels.save(output, quality)?;

    println!(
        "Successfully stylized {}x{} -> {}",
        pixels.width(),
        pixels.height(),
        output.display()
    );
    Ok(())
}
