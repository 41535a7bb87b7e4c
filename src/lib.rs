//! labelkit: the annotation dataset engine behind a YOLO labelling tool.
//!
//! The engine keeps images, boxes and classes for a labelling session,
//! generates augmented training samples, letterboxes images to a fixed
//! resolution and exports datasets in YOLO, COCO or Pascal VOC layout. The
//! session survives restarts through a recovery file.
//!
//! # Modules
//!
//! - [`model`]: data model and coordinate geometry
//! - [`handler`]: mutation facade over the session data
//! - [`augment`]: probabilistic augmentation pipelines
//! - [`resize`]: letterbox resize with box remapping
//! - [`export`]: dataset export pipeline and format writers
//! - [`state`]: recovery file persistence
//! - [`worker`]: bounded background pool for detection and augmentation
//! - [`session`]: owner of a session's data, state and augmenter
//! - [`detect`]: detector interface and detection normalization
//! - [`config`]: YAML engine configuration
//! - [`error`]: error types

pub mod augment;
pub mod config;
pub mod detect;
pub mod error;
pub mod export;
pub mod handler;
pub mod model;
pub mod resize;
pub mod session;
pub mod state;
pub mod worker;

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::warn;

pub use error::LabelkitError;
pub use session::Session;

use config::EngineConfig;
use export::{ExportFormat, ExportRequest};
use handler::collect_image_files;
use model::{Category, ClassId, PixelBox};
use state::StateManager;
use worker::WorkerPool;

/// The labelkit CLI application.
#[derive(Parser)]
#[command(name = "labelkit")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    /// YAML engine configuration file.
    #[arg(long, global = true, env = "LABELKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the session recovery file.
    #[arg(long, global = true, env = "LABELKIT_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Register image files, or every image under a directory.
    AddImages(AddImagesArgs),

    /// Remove images from the session.
    RemoveImages(RemoveImagesArgs),

    /// Manage the class list.
    #[command(subcommand)]
    Classes(ClassesCommand),

    /// Draw or delete boxes.
    #[command(subcommand)]
    Boxes(BoxesCommand),

    /// Change session settings.
    Settings(SettingsArgs),

    /// Print a summary of the session.
    Inspect(InspectArgs),

    /// Write augmented copies of the annotated images to a directory.
    Augment(AugmentArgs),

    /// Export the annotated images as a training dataset.
    Export(ExportArgs),

    /// Delete the recovery file and start an empty session.
    Clear,
}

#[derive(clap::Args)]
struct AddImagesArgs {
    /// Image files or directories to scan.
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

#[derive(clap::Args)]
struct RemoveImagesArgs {
    /// Image paths as registered.
    #[arg(required = true)]
    paths: Vec<String>,
}

#[derive(Subcommand)]
enum ClassesCommand {
    /// Append classes.
    Add {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Remove a class; its boxes become unassigned.
    Remove { name: String },
    /// Append classes from a file with one name per line.
    Import { file: PathBuf },
    /// List classes with their ids.
    List,
}

#[derive(Subcommand)]
enum BoxesCommand {
    /// Add a box given in pixel corners.
    Add {
        image: String,
        x_min: i32,
        y_min: i32,
        x_max: i32,
        y_max: i32,
        /// Class name; the box stays unassigned if omitted.
        #[arg(long)]
        class: Option<String>,
    },
    /// Delete a box by index.
    Delete { image: String, index: usize },
}

#[derive(clap::Args)]
struct SettingsArgs {
    /// Minimum detector confidence to keep a detection.
    #[arg(long)]
    confidence_threshold: Option<f32>,

    /// Letterbox exported images to WxH.
    #[arg(long, conflicts_with = "no_resize")]
    resize: Option<String>,

    /// Export images at their original size.
    #[arg(long)]
    no_resize: bool,

    /// Detector model path.
    #[arg(long)]
    model: Option<String>,

    /// Enable an augmentation category (repeatable).
    #[arg(long, value_parser = parse_category)]
    enable: Vec<Category>,

    /// Disable an augmentation category (repeatable).
    #[arg(long, value_parser = parse_category)]
    disable: Vec<Category>,
}

#[derive(clap::Args)]
struct InspectArgs {
    /// Output format ('text' or 'json').
    #[arg(long, default_value = "text")]
    output: String,
}

#[derive(clap::Args)]
struct AugmentArgs {
    /// Directory receiving the augmented images.
    #[arg(short, long)]
    output: PathBuf,

    /// Variants per annotated image [default: config num_augmentations, or 1].
    #[arg(short = 'n', long)]
    count: Option<usize>,

    /// Seed for reproducible output.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(clap::Args)]
struct ExportArgs {
    /// Output format ('yolo', 'coco' or 'voc').
    #[arg(short, long, value_parser = parse_format)]
    format: ExportFormat,

    /// Output directory.
    #[arg(short, long)]
    output: PathBuf,

    /// Augmented variants per annotated image.
    #[arg(long)]
    augmentations: Option<usize>,

    /// Seed for augmentation and the train/val split.
    #[arg(long)]
    seed: Option<u64>,

    /// Letterbox to WxH before writing.
    #[arg(long)]
    resize: Option<String>,

    /// Share of images in the train split.
    #[arg(long)]
    train_fraction: Option<f64>,

    /// Also write the augmented images to this directory.
    #[arg(long)]
    keep_augmented: Option<PathBuf>,
}

fn parse_format(raw: &str) -> Result<ExportFormat, String> {
    raw.parse().map_err(|e: LabelkitError| e.to_string())
}

fn parse_category(raw: &str) -> Result<Category, String> {
    Category::ALL
        .into_iter()
        .find(|c| c.key().eq_ignore_ascii_case(raw.trim()))
        .ok_or_else(|| {
            format!("unknown category '{raw}' (expected geometric, color, weather, noise or blur)")
        })
}

/// Run the labelkit CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), LabelkitError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let Some(command) = cli.command else {
        println!("labelkit {}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Annotation dataset engine for YOLO-style labelling.");
        println!();
        println!("Run 'labelkit --help' for usage information.");
        return Ok(());
    };

    let config = EngineConfig::load(cli.config.as_deref())?;
    let state_dir = cli.state_dir.unwrap_or_else(|| config.state_dir.clone());
    let state = StateManager::new(state_dir).with_interval(config.autosave_interval());

    // Clearing must work even when the recovery file no longer parses.
    if let Commands::Clear = command {
        Session::new(state).reset()?;
        println!("Session cleared.");
        return Ok(());
    }

    let (mut session, purge) = Session::restore(state)?;

    // An explicit config file wins over persisted settings; otherwise it
    // only seeds a fresh session.
    if cli.config.is_some() || purge.is_none() {
        apply_config(&mut session, &config)?;
    }
    session.set_seed(config.seed);

    match command {
        Commands::AddImages(args) => run_add_images(&mut session, args)?,
        Commands::RemoveImages(args) => run_remove_images(&mut session, args),
        Commands::Classes(cmd) => run_classes(&mut session, cmd)?,
        Commands::Boxes(cmd) => run_boxes(&mut session, cmd)?,
        Commands::Settings(args) => run_settings(&mut session, args)?,
        Commands::Inspect(args) => return run_inspect(&session, args),
        Commands::Augment(args) => run_augment(&mut session, &config, args)?,
        Commands::Export(args) => run_export(&mut session, &config, args)?,
        // Handled before restore.
        Commands::Clear => return Ok(()),
    }

    session.save()
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let env = env_logger::Env::default().default_filter_or(default_level);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}

fn apply_config(session: &mut Session, config: &EngineConfig) -> Result<(), LabelkitError> {
    session.edit(|h| {
        h.set_confidence_threshold(config.confidence_threshold);
        h.set_resize_output(config.resize_output_enabled, &config.resize_output_resolution)
    })?;
    session.set_augmentation_settings(config.augmentation.clone())
}

fn run_add_images(session: &mut Session, args: AddImagesArgs) -> Result<(), LabelkitError> {
    let files = collect_image_files(&args.paths)?;
    let found = files.len();
    let added = session.edit(|h| {
        h.add_image_paths(files.iter().map(|p| p.to_string_lossy().into_owned()))
    });
    println!(
        "Added {} images ({} already registered).",
        added.len(),
        found - added.len()
    );
    Ok(())
}

fn run_remove_images(session: &mut Session, args: RemoveImagesArgs) {
    let removed = session.edit(|h| {
        args.paths
            .iter()
            .filter(|path| h.delete_image(path))
            .count()
    });
    println!("Removed {} images.", removed);
}

fn run_classes(session: &mut Session, cmd: ClassesCommand) -> Result<(), LabelkitError> {
    match cmd {
        ClassesCommand::Add { names } => {
            for name in names {
                let id = session.edit_classes(|h| h.add_class(&name))??;
                println!("{}  {}", id, name.trim());
            }
        }
        ClassesCommand::Remove { name } => {
            match session.edit_classes(|h| h.remove_class(&name))? {
                Some(id) => println!("Removed class '{}' (id {}).", name, id),
                None => warn!("no class named '{}'", name),
            }
        }
        ClassesCommand::Import { file } => {
            let text = fs::read_to_string(&file).map_err(LabelkitError::Io)?;
            let report = session.edit_classes(|h| h.import_classes(text.lines()))?;
            print!("{}", report);
        }
        ClassesCommand::List => {
            for (id, name) in session.data().classes.iter().enumerate() {
                println!("{:>3}  {}", id, name);
            }
        }
    }
    Ok(())
}

fn run_boxes(session: &mut Session, cmd: BoxesCommand) -> Result<(), LabelkitError> {
    match cmd {
        BoxesCommand::Add {
            image,
            x_min,
            y_min,
            x_max,
            y_max,
            class,
        } => {
            let class_id = match &class {
                Some(name) => Some(
                    session
                        .data()
                        .classes
                        .iter()
                        .position(|c| c == name)
                        .map(ClassId::from_index)
                        .ok_or_else(|| LabelkitError::InvalidClassName(name.clone()))?,
                ),
                None => None,
            };

            let index = session.edit(|h| -> Result<usize, LabelkitError> {
                h.ensure_dimensions(&image)?;
                let index = h
                    .add_drawn_box(&image, PixelBox::new(x_min, y_min, x_max, y_max))
                    .ok_or_else(|| LabelkitError::UnknownImage {
                        path: image.clone().into(),
                    })?;
                if let Some(class_id) = class_id {
                    h.assign_class(&image, index, class_id);
                }
                Ok(index)
            })?;
            println!("Added box {} to {}.", index, image);
        }
        BoxesCommand::Delete { image, index } => {
            if session.edit(|h| h.delete_box(&image, index)) {
                println!("Deleted box {} from {}.", index, image);
            } else {
                warn!("{} has no box {}", image, index);
            }
        }
    }
    Ok(())
}

fn run_settings(session: &mut Session, args: SettingsArgs) -> Result<(), LabelkitError> {
    session.edit(|h| -> Result<(), LabelkitError> {
        if let Some(threshold) = args.confidence_threshold {
            h.set_confidence_threshold(threshold);
        }
        if let Some(resolution) = &args.resize {
            h.set_resize_output(true, resolution)?;
        } else if args.no_resize {
            let current = h.data().resize_output_resolution.clone();
            h.set_resize_output(false, &current)?;
        }
        if let Some(model) = args.model.clone() {
            h.set_model_path(Some(model));
        }
        Ok(())
    })?;

    if !args.enable.is_empty() || !args.disable.is_empty() {
        let mut settings = session.data().augmentation_settings.clone();
        for category in &args.enable {
            settings.set_enabled(*category, true);
        }
        for category in &args.disable {
            settings.set_enabled(*category, false);
        }
        session.set_augmentation_settings(settings)?;
    }

    print!("{}", session.summary());
    Ok(())
}

fn run_inspect(session: &Session, args: InspectArgs) -> Result<(), LabelkitError> {
    let summary = session.summary();
    match args.output.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(&summary).map_err(|source| {
                LabelkitError::ExportJson {
                    path: PathBuf::from("<stdout>"),
                    source,
                }
            })?;
            println!("{}", json);
        }
        "text" => print!("{}", summary),
        other => {
            return Err(LabelkitError::UnsupportedFormat(format!(
                "'{}' (supported: text, json)",
                other
            )));
        }
    }
    Ok(())
}

fn run_augment(
    session: &mut Session,
    config: &EngineConfig,
    args: AugmentArgs,
) -> Result<(), LabelkitError> {
    if args.seed.is_some() {
        session.set_seed(args.seed);
    }
    let count = args
        .count
        .unwrap_or(if config.num_augmentations > 0 {
            config.num_augmentations
        } else {
            1
        });

    let pool = WorkerPool::new(config.workers)?;
    let handle = session.submit_augmentation(&pool, count);
    let mut summary = None;
    for event in handle.events().iter() {
        if let Some(done) = session.apply_augmentation_event(event) {
            summary = Some(done);
            break;
        }
        session.auto_save()?;
    }

    let flushed = session.edit(|h| h.flush_synthetic_images(&args.output))?;
    if let Some(summary) = summary {
        println!(
            "Generated {} augmented images ({} skipped, {} failed); wrote {} to {}.",
            summary.completed,
            summary.skipped,
            summary.failed,
            flushed.written,
            args.output.display()
        );
    }
    Ok(())
}

fn run_export(
    session: &mut Session,
    config: &EngineConfig,
    args: ExportArgs,
) -> Result<(), LabelkitError> {
    if let Some(resolution) = &args.resize {
        session.edit(|h| h.set_resize_output(true, resolution))?;
    }

    let request = ExportRequest::new(args.format, &args.output)
        .with_augmentations(args.augmentations.unwrap_or(config.num_augmentations))
        .with_seed(args.seed.or(config.seed))
        .with_train_fraction(args.train_fraction.unwrap_or(config.train_fraction));
    let report = session.export(&request)?;
    print!("{}", report);

    if let Some(dir) = &args.keep_augmented {
        let flushed = session.edit(|h| h.flush_synthetic_images(dir))?;
        println!(
            "Wrote {} augmented images to {}.",
            flushed.written,
            dir.display()
        );
    }
    Ok(())
}
