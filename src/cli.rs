// ============================================================================
// pixel-overlay CLI: drive the overlay pipeline headlessly
// ============================================================================
//
// Usage examples:
//   pixel-overlay palette --tier paid
//   pixel-overlay quantize shots/*.png --output-dir quantized/
//   pixel-overlay capture "https://backend.wplace.live/s0/pixel/12/67?x=345&y=6"
//   pixel-overlay coords --set 12345,67006
//   pixel-overlay upload castle.png --project castle --export-dir tiles/
//   pixel-overlay tile https://backend.wplace.live/files/s0/tiles/12/67.png --tiles cache/
//   pixel-overlay export --project castle --output castle.json
//   pixel-overlay import castle.json
//
// Records live in the configured data directory (see `Settings`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};

use crate::capture::{CaptureFlag, CoordinateCapture, PixelTap};
use crate::config::Settings;
use crate::intercept::{Passthrough, TileInterceptor, TileMatcher, spawn_compositor};
use crate::io;
use crate::net::{Fetch, OfflineFetch, Request};
use crate::ops;
use crate::palette::{self, SelectedColorSet, Tier};
use crate::project::ProjectRecord;
use crate::session::UploadSession;
use crate::store::{self, FileStore, Store};
use crate::tiles::GlobalCoordinate;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Palette overlay pipeline for tiled pixel canvases.
#[derive(Parser, Debug)]
#[command(
    name = "pixel-overlay",
    version,
    about = "Quantize images to the canvas palette, capture anchor coordinates and cut overlays into tiles"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Settings file (default: per-OS config directory).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Record store directory, overriding the settings file.
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Mirror the session log to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List palette colors.
    Palette {
        /// Only this tier.
        #[arg(long, value_enum)]
        tier: Option<TierArg>,
    },
    /// Snap image colors to the palette.
    Quantize {
        /// Input file(s). Glob patterns accepted (e.g. "*.png").
        #[arg(required = true, num_args = 1..)]
        input: Vec<String>,
        /// Output file. Only valid for a single input.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Output directory for batch processing.
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
        /// Use this project's color selection instead of the session default.
        #[arg(long, value_name = "ID")]
        project: Option<String>,
        /// Allow every free and paid color.
        #[arg(long, conflicts_with = "project")]
        all_colors: bool,
    },
    /// Replay request URLs through the armed capture tap.
    Capture {
        #[arg(required = true, num_args = 1..)]
        url: Vec<String>,
    },
    /// Show or set the anchor coordinate.
    Coords {
        /// Manual coordinate as "x,y".
        #[arg(long, value_name = "X,Y")]
        set: Option<GlobalCoordinate>,
        /// Forget the stored coordinate.
        #[arg(long, conflicts_with = "set")]
        clear: bool,
    },
    /// Quantize, chunk and store an image as a project's overlay.
    Upload {
        image: PathBuf,
        #[arg(long, value_name = "ID")]
        project: String,
        /// Anchor as "x,y" (default: the captured coordinate).
        #[arg(long, value_name = "X,Y")]
        anchor: Option<GlobalCoordinate>,
        /// Also write every chunk as a PNG here.
        #[arg(long, value_name = "DIR")]
        export_dir: Option<PathBuf>,
    },
    /// Fetch one tile through the interceptor from a local tile directory.
    Tile {
        url: String,
        /// Directory laid out as <x>/<y>.png.
        #[arg(long, value_name = "DIR")]
        tiles: PathBuf,
        /// Write the served body here.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Write a project as a shareable JSON document.
    Export {
        #[arg(long, value_name = "ID")]
        project: String,
        /// Destination (default: stdout).
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Read a shared project JSON document.
    Import {
        file: PathBuf,
        /// Replace this project instead of importing a renamed copy.
        #[arg(long, value_name = "ID")]
        project: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum TierArg {
    Free,
    Paid,
}

impl From<TierArg> for Tier {
    fn from(t: TierArg) -> Self {
        match t {
            TierArg::Free => Tier::Free,
            TierArg::Paid => Tier::Paid,
        }
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run one subcommand and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let mut settings = match &args.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    if let Some(dir) = &args.data_dir {
        settings.data_dir = Some(dir.clone());
    }

    let result = match args.command {
        Command::Palette { tier } => run_palette(tier.map(Tier::from)),
        Command::Quantize {
            input,
            output,
            output_dir,
            project,
            all_colors,
        } => run_quantize(
            &settings,
            &input,
            output.as_deref(),
            output_dir.as_deref(),
            project.as_deref(),
            all_colors,
            args.verbose,
        ),
        Command::Capture { url } => run_capture(&settings, &url),
        Command::Coords { set, clear } => run_coords(&settings, set, clear),
        Command::Upload {
            image,
            project,
            anchor,
            export_dir,
        } => run_upload(&settings, &image, &project, anchor, export_dir.as_deref()),
        Command::Tile { url, tiles, output } => run_tile(&settings, &url, &tiles, output.as_deref()),
        Command::Export { project, output } => run_export(&settings, &project, output.as_deref()),
        Command::Import { file, project } => run_import(&settings, &file, project.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_err!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn open_store(settings: &Settings) -> Result<FileStore, String> {
    let dir = settings.data_dir();
    FileStore::open(&dir).map_err(|e| format!("could not open store '{}': {}", dir.display(), e))
}

// ============================================================================
// Subcommands
// ============================================================================

fn run_palette(tier: Option<Tier>) -> Result<(), String> {
    let tiers: Vec<Tier> = match tier {
        Some(t) => vec![t],
        None => Tier::all().to_vec(),
    };
    for tier in tiers {
        for color in palette::colors(tier) {
            println!("{:<5} {:<12} {}  {}", tier.to_string(), color.key(), color.hex(), color.name);
        }
    }
    Ok(())
}

fn run_quantize(
    settings:   &Settings,
    patterns:   &[String],
    output:     Option<&Path>,
    output_dir: Option<&Path>,
    project:    Option<&str>,
    all_colors: bool,
    verbose:    bool,
) -> Result<(), String> {
    let inputs = resolve_inputs(patterns);
    if inputs.is_empty() {
        return Err("no input files matched the given pattern(s)".into());
    }
    if inputs.len() > 1 && output.is_some() {
        return Err(format!(
            "{} input files given but --output only accepts a single file path; use --output-dir",
            inputs.len()
        ));
    }

    let selection = if all_colors {
        SelectedColorSet::all()
    } else if let Some(id) = project {
        let store = open_store(settings)?;
        let record: Option<ProjectRecord> = store::load_typed(&store, &ProjectRecord::store_key(id))
            .map_err(|e| e.to_string())?;
        record
            .ok_or_else(|| format!("project '{}' not found", id))?
            .selection
    } else {
        SelectedColorSet::new_session()
    };

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("could not create output directory '{}': {}", dir.display(), e))?;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut failures = 0usize;

    for (idx, input) in inputs.iter().enumerate() {
        if multi || verbose {
            println!("[{}/{}] {}", idx + 1, total, input.display());
        }
        let start = Instant::now();
        let Some(out) = build_output_path(input, output, output_dir) else {
            eprintln!("  error: cannot determine output path for '{}'.", input.display());
            failures += 1;
            continue;
        };

        let result = io::load_image(input)
            .map(|img| ops::quantize(&img, &selection))
            .and_then(|img| io::save_png(&img, &out));
        match result {
            Ok(()) => {
                log_info!("Quantized {} -> {}", input.display(), out.display());
                if multi || verbose {
                    println!(
                        "  → {} ({:.0}ms)",
                        out.display(),
                        start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                failures += 1;
            }
        }
    }

    if failures == 0 {
        Ok(())
    } else {
        Err(format!("{} of {} file(s) failed", failures, total))
    }
}

fn run_capture(settings: &Settings, urls: &[String]) -> Result<(), String> {
    let store = open_store(settings)?;
    let flag = CaptureFlag::new();
    let capture = CoordinateCapture::new(store, flag.clone());
    capture.load().map_err(|e| e.to_string())?;
    capture.toggle(Some(true));

    let (tx, rx) = mpsc::channel();
    let listener = capture
        .spawn_listener(rx)
        .map_err(|e| format!("could not start capture listener: {}", e))?;

    let offline = OfflineFetch::new(settings.data_dir().join("tiles"));
    let tap = PixelTap::new(offline, flag, settings.backend_host.as_str(), tx).with_base_url(settings.base_url.as_str());
    for url in urls {
        if let Err(e) = tap.fetch(&Request::post(url.as_str())) {
            eprintln!("  warning: {}: {}", url, e);
        }
    }

    // Dropping the tap closes the channel; the listener drains and exits
    drop(tap);
    listener
        .join()
        .map_err(|_| "capture listener panicked".to_string())?;
    capture.shutdown();

    match capture.current() {
        Some(coord) => {
            println!("{}", coord);
            Ok(())
        }
        None => Err("no pixel-placement URL was recognised".into()),
    }
}

fn run_coords(settings: &Settings, set: Option<GlobalCoordinate>, clear: bool) -> Result<(), String> {
    let store = open_store(settings)?;
    if clear {
        store
            .remove(crate::capture::COORDINATES_KEY)
            .map_err(|e| e.to_string())?;
        println!("cleared");
        return Ok(());
    }

    let capture = CoordinateCapture::new(store, CaptureFlag::new());
    capture.load().map_err(|e| e.to_string())?;
    if let Some(coord) = set {
        capture.set_manual(coord);
    }
    match capture.current() {
        Some(coord) => println!("{}", coord),
        None => println!("no coordinate set"),
    }
    Ok(())
}

fn run_upload(
    settings:   &Settings,
    image:      &Path,
    project:    &str,
    anchor:     Option<GlobalCoordinate>,
    export_dir: Option<&Path>,
) -> Result<(), String> {
    let store = std::sync::Arc::new(open_store(settings)?);
    let bytes = std::fs::read(image).map_err(|e| format!("could not read '{}': {}", image.display(), e))?;

    // No capture listener runs here, so only a stored coordinate can stand in.
    let anchor = match anchor {
        Some(a) => Some(a),
        None => CoordinateCapture::new(std::sync::Arc::clone(&store), CaptureFlag::new())
            .load()
            .map_err(|e| e.to_string())?,
    };

    let name = image
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let mut session = UploadSession::open(store, project)
        .map_err(|e| e.to_string())?
        .with_default_opacity(settings.default_opacity);
    let chunks = session
        .upload(&name, &bytes, anchor)
        .map_err(|e| e.to_string())?;

    for key in chunks.keys() {
        println!("{}", key);
    }
    if let Some(dir) = export_dir {
        let written = io::export_chunks(&chunks, dir).map_err(|e| e.to_string())?;
        println!("wrote {} chunk(s) to {}", written.len(), dir.display());
    }
    Ok(())
}

fn run_tile(settings: &Settings, url: &str, tiles: &Path, output: Option<&Path>) -> Result<(), String> {
    let (interceptor, link) = TileInterceptor::new(
        OfflineFetch::new(tiles),
        TileMatcher::from_settings(settings),
        settings.reply_timeout(),
    );
    let compositor =
        spawn_compositor(link, Passthrough).map_err(|e| format!("could not start compositor: {}", e))?;

    let response = interceptor
        .fetch(&Request::get(url))
        .map_err(|e| e.to_string())?;
    drop(interceptor);
    compositor
        .join()
        .map_err(|_| "compositor panicked".to_string())?;

    println!("{} {} ({} bytes)", response.status, response.status_text, response.body.len());
    if let Some(path) = output {
        std::fs::write(path, &response.body)
            .map_err(|e| format!("could not write '{}': {}", path.display(), e))?;
    }
    if response.is_success() {
        Ok(())
    } else {
        Err(format!("tile request failed with status {}", response.status))
    }
}

fn run_export(settings: &Settings, project: &str, output: Option<&Path>) -> Result<(), String> {
    let store = open_store(settings)?;
    let record: ProjectRecord = store::load_typed(&store, &ProjectRecord::store_key(project))
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("project '{}' not found", project))?;
    let json = record.export_json().map_err(|e| e.to_string())?;
    match output {
        Some(path) => std::fs::write(path, json)
            .map_err(|e| format!("could not write '{}': {}", path.display(), e)),
        None => {
            println!("{}", json);
            Ok(())
        }
    }
}

fn run_import(settings: &Settings, file: &Path, project: Option<&str>) -> Result<(), String> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| format!("could not read '{}': {}", file.display(), e))?;
    let store = open_store(settings)?;

    let id = match project {
        Some(id) => {
            let mut session = UploadSession::open(store, id).map_err(|e| e.to_string())?;
            session.import(&text).map_err(|e| e.to_string())?;
            session.project().id.clone()
        }
        None => {
            let record = ProjectRecord::import_json(&text).map_err(|e| e.to_string())?;
            store::save_typed(&store, &record.key(), &record).map_err(|e| e.to_string())?;
            record.id
        }
    };
    println!("{}", id);
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Output path for one quantized input.
///
/// Priority:
/// 1. `--output`
/// 2. `--output-dir` (input stem + `.png`)
/// 3. next to the input as `<stem>_quantized.png`
fn build_output_path(input: &Path, output: Option<&Path>, output_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let stem = input.file_stem()?.to_string_lossy().into_owned();
    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.png", stem)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    Some(parent.join(format!("{}_quantized.png", stem)))
}
