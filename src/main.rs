use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use glam::Vec2;
use log::info;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use spriggan::config::{RuntimeConfig, CONFIG_FILE};
use spriggan::core::Disposable;
use spriggan::engine::assets::{ContentKind, ContentManager, ManagerHooks};
use spriggan::engine::event_loop::{EventLoop, RunOutcome};
use spriggan::engine::scene::{ElementBox, Sprite, Viewport};
use spriggan::pipeline::{pairs_from_sources, AsepriteCli, ConvertTask};

/// Longest a preview may take to load or play
const PREVIEW_LIMIT: Duration = Duration::from_secs(120);

#[derive(Parser, Debug)]
#[command(name = "spriggan", version, about)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert Aseprite files into sprite sheet PNG/JSON pairs
    Convert(ConvertArgs),
    /// Load a sprite sheet and play its animations
    Preview(PreviewArgs),
}

#[derive(Parser, Debug)]
struct ConvertArgs {
    /// Source .ase/.aseprite files
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Directory the sheets are written to
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Aseprite executable
    #[arg(long, default_value = "aseprite")]
    aseprite: PathBuf,
}

#[derive(Parser, Debug)]
struct PreviewArgs {
    /// Sheet URL without extension, relative to the asset root or http(s)
    sheet: String,

    /// Animation to play; every animation is played when omitted
    #[arg(long)]
    animation: Option<String>,

    /// Write each shown frame as a PNG into this directory
    #[arg(long)]
    frames_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let config = RuntimeConfig::load_from(&cli.config)?;
    match cli.cmd {
        Command::Convert(args) => cmd_convert(args),
        Command::Preview(args) => cmd_preview(&config, args),
    }
}

fn cmd_convert(args: ConvertArgs) -> Result<()> {
    let pairs = pairs_from_sources(&args.sources, &args.out_dir);
    let task = ConvertTask::new(pairs, AsepriteCli::new(args.aseprite));
    let written = task.run().context("Sprite sheet conversion failed")?;
    for json in written {
        info!("Wrote {}", json.display());
    }
    Ok(())
}

fn cmd_preview(config: &RuntimeConfig, args: PreviewArgs) -> Result<()> {
    let mut event_loop = EventLoop::new(config)?;

    let loaded = Rc::new(Cell::new(false));
    let manager = {
        let loaded = loaded.clone();
        ContentManager::new(
            event_loop.io(),
            ManagerHooks::new()
                .on_progress(|done, total| info!("Loading... {}/{}", done, total))
                .on_loaded(move || loaded.set(true)),
        )
    };
    manager.add(ContentKind::SpriteSheet, &args.sheet)?;

    match event_loop.run_until(|| loaded.get(), PREVIEW_LIMIT) {
        RunOutcome::Done => {}
        outcome => bail!("Sprite sheet \"{}\" did not load ({:?})", args.sheet, outcome),
    }

    let window = Vec2::new(config.window_width, config.window_height);
    let viewport = Viewport::new(config.viewport_width, config.viewport_height, window);
    let sprite = Sprite::new(&viewport, &manager, &args.sheet)?;
    sprite.set_position(viewport.size() / 2.0);
    info!(
        "Viewport {}x{} scaled by {}",
        config.viewport_width,
        config.viewport_height,
        viewport.element().scale
    );

    let animations: Vec<String> = match args.animation {
        Some(name) => vec![name],
        None => sprite.sheet().animation_names().map(str::to_string).collect(),
    };
    if let Some(dir) = &args.frames_out {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    for animation in &animations {
        let finished = Rc::new(Cell::new(false));
        let flag = finished.clone();
        sprite.play(animation, event_loop.scheduler(), move || flag.set(true))?;

        let mut shown = 0;
        let mut last: Option<ElementBox> = None;
        let mut write_error = None;
        let outcome = event_loop.run_until(
            || {
                let element = sprite.element();
                if last != Some(element) {
                    last = Some(element);
                    info!(
                        "{} frame {}: offset {:?} size {:?} margin {:?}",
                        animation, shown, element.image_offset, element.size, element.margin
                    );
                    if let Some(dir) = &args.frames_out {
                        let path = dir.join(format!("{}-{}.png", animation, shown));
                        if let Err(err) = save_frame(&sprite, &element, &path) {
                            write_error.get_or_insert(err);
                        }
                    }
                    shown += 1;
                }
                finished.get() || write_error.is_some()
            },
            PREVIEW_LIMIT,
        );
        if let Some(err) = write_error {
            return Err(err);
        }
        if outcome != RunOutcome::Done {
            bail!("Animation \"{}\" did not finish ({:?})", animation, outcome);
        }
    }

    viewport.dispose();
    manager.dispose();
    info!("Preview finished after {} turns", event_loop.turn_count());
    Ok(())
}

/// Crop the frame shown by `element` out of the sprite's image
fn save_frame(sprite: &Sprite, element: &ElementBox, path: &Path) -> Result<()> {
    let image = &sprite.image().pixels;
    let origin = -element.image_offset;
    let frame = image::imageops::crop_imm(
        image,
        origin.x.max(0.0) as u32,
        origin.y.max(0.0) as u32,
        element.size.x.max(0.0) as u32,
        element.size.y.max(0.0) as u32,
    )
    .to_image();
    frame
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
