use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use retouch_contracts::codec::ImageResource;
use retouch_contracts::commands::{parse_command, SessionCommand, EDIT_HELP_COMMANDS};
use retouch_contracts::events::EventWriter;
use retouch_contracts::presets::PresetCatalog;
use retouch_contracts::session::SessionSnapshot;
use retouch_engine::{
    resolve_engine, ControllerOptions, EngineConfig, Outcome, SessionController, SessionEvent,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "retouch", version, about = "Preset and prompt driven image retouching")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
struct CommonArgs {
    /// Engine name (dryrun, gemini, openai, remote). Overrides RETOUCH_ENGINE.
    #[arg(long, global = true)]
    engine: Option<String>,
    /// Model for the selected engine. Overrides RETOUCH_MODEL.
    #[arg(long, global = true)]
    model: Option<String>,
    /// Append session events as JSONL to this path.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the preset filters.
    Presets(PresetsArgs),
    /// Apply presets and prompts to one image and write the result.
    Apply(ApplyArgs),
    /// Interactive editing session.
    Edit(EditArgs),
}

#[derive(Debug, Parser)]
struct PresetsArgs {
    /// Print the catalog as a JSON array.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct ApplyArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long = "preset")]
    presets: Vec<String>,
    #[arg(long = "prompt")]
    prompts: Vec<String>,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[arg(long)]
    image: Option<PathBuf>,
}

const PROGRESS_BAR_WIDTH: usize = 24;

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("retouch error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Presets(args) => {
            run_presets(&args)?;
            Ok(0)
        }
        Command::Apply(args) => run_apply(&cli.common, args),
        Command::Edit(args) => {
            run_edit(&cli.common, args)?;
            Ok(0)
        }
    }
}

fn run_presets(args: &PresetsArgs) -> Result<()> {
    let catalog = PresetCatalog::default();
    if args.json {
        println!("{}", serde_json::to_string_pretty(catalog.filters())?);
        return Ok(());
    }
    for preset in catalog.filters() {
        println!(
            "{:<12} {:<16} {}",
            preset.id, preset.display_name, preset.instruction_text
        );
    }
    Ok(())
}

fn build_controller(common: &CommonArgs) -> Result<(SessionController, Duration)> {
    let config = EngineConfig::from_env()
        .with_engine(common.engine.clone())
        .with_model(common.model.clone());
    debug!(config = ?config, "resolved engine config");
    let engine = resolve_engine(&config)?;
    let events = common
        .events
        .as_ref()
        .map(|path| EventWriter::new(path, session_id()));
    // Worst case for one request is the transport timeout plus decoding.
    let wait_limit = config.request_timeout + Duration::from_secs(30);
    let controller =
        SessionController::new(engine, ControllerOptions::from_config(&config).with_events(events));
    info!(engine = controller.engine_name(), "session ready");
    Ok((controller, wait_limit))
}

fn run_apply(common: &CommonArgs, args: ApplyArgs) -> Result<i32> {
    if args.presets.is_empty() && args.prompts.is_empty() {
        bail!("apply needs at least one --preset or --prompt");
    }
    let (mut controller, wait_limit) = build_controller(common)?;

    controller.handle(SessionEvent::UploadRequested(ImageResource::from_path(
        &args.image,
    )?))?;
    match settle(&mut controller, wait_limit, false)? {
        Outcome::LoadFailed(error) => bail!("{error}"),
        _ => println!("Loaded {}", args.image.display()),
    }

    let steps = args
        .presets
        .into_iter()
        .map(SessionEvent::PresetSelected)
        .chain(
            args.prompts
                .into_iter()
                .map(SessionEvent::CustomInstructionSubmitted),
        );
    for step in steps {
        let label = match &step {
            SessionEvent::PresetSelected(id) => format!("preset {id}"),
            SessionEvent::CustomInstructionSubmitted(text) => format!("prompt \"{text}\""),
            _ => String::new(),
        };
        controller.handle(step)?;
        match settle(&mut controller, wait_limit, false)? {
            Outcome::TransformFailed(error) => {
                eprintln!("{error}");
                return Ok(2);
            }
            _ => println!("Applied {label}"),
        }
    }

    save_displayed(&controller.snapshot(), &args.out)?;
    println!("Wrote {}", args.out.display());
    Ok(0)
}

fn run_edit(common: &CommonArgs, args: EditArgs) -> Result<()> {
    let (mut controller, wait_limit) = build_controller(common)?;
    let catalog = controller.catalog();

    println!(
        "Retouch edit session ({}). Type /help for commands.",
        controller.engine_name()
    );
    if let Some(path) = args.image.as_deref() {
        load_path(&mut controller, path, wait_limit);
    }

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let event = match parse_command(line.trim_end_matches(['\n', '\r']), &catalog) {
            SessionCommand::Noop => continue,
            SessionCommand::Quit => break,
            SessionCommand::Help => {
                println!("Commands: {}", EDIT_HELP_COMMANDS.join(" "));
                println!("Any other text is sent as a custom instruction.");
                continue;
            }
            SessionCommand::ListPresets => {
                for preset in catalog.filters() {
                    println!("/{:<12} {}", preset.id, preset.display_name);
                }
                continue;
            }
            SessionCommand::Status => {
                println!("{}", describe_snapshot(&controller.snapshot()));
                continue;
            }
            SessionCommand::Save { path } => {
                if path.is_empty() {
                    println!("/save requires a path");
                } else if let Err(err) = save_displayed(&controller.snapshot(), Path::new(&path)) {
                    println!("Save failed: {err:#}");
                } else {
                    println!("Saved {path}");
                }
                continue;
            }
            SessionCommand::Load { path } => {
                if path.is_empty() {
                    println!("/load requires a path");
                } else {
                    load_path(&mut controller, Path::new(&path), wait_limit);
                }
                continue;
            }
            SessionCommand::Unknown { command, .. } => {
                println!("Unknown command /{command}. Type /help for commands.");
                continue;
            }
            SessionCommand::Preset { id } => SessionEvent::PresetSelected(id),
            SessionCommand::Instruction { text } => SessionEvent::CustomInstructionSubmitted(text),
            SessionCommand::Revert => SessionEvent::RevertRequested,
            SessionCommand::Reset => SessionEvent::ResetRequested,
        };

        match controller.handle(event) {
            Ok(retouch_engine::Accepted::Dispatched(_)) => {
                match settle_or_abandon(&mut controller, wait_limit, true) {
                    Some(Outcome::Transformed) => {
                        println!("{}", describe_snapshot(&controller.snapshot()))
                    }
                    Some(Outcome::TransformFailed(error)) | Some(Outcome::LoadFailed(error)) => {
                        println!("{error}")
                    }
                    _ => {}
                }
            }
            Ok(retouch_engine::Accepted::Reverted { changed: true }) => {
                println!("Reverted to the original image.")
            }
            Ok(retouch_engine::Accepted::Reverted { changed: false }) => {
                println!("Nothing to revert.")
            }
            Ok(retouch_engine::Accepted::Reset { .. }) => println!("Session cleared."),
            Err(err) => println!("{err}"),
        }
    }
    Ok(())
}

fn load_path(controller: &mut SessionController, path: &Path, wait_limit: Duration) {
    let resource = match ImageResource::from_path(path) {
        Ok(resource) => resource,
        Err(err) => {
            println!("Image load failed: {err}");
            return;
        }
    };
    if let Err(err) = controller.handle(SessionEvent::UploadRequested(resource)) {
        println!("{err}");
        return;
    }
    match settle_or_abandon(controller, wait_limit, false) {
        Some(Outcome::LoadFailed(error)) => println!("{error}"),
        Some(_) => println!("Loaded {}", path.display()),
        None => {}
    }
}

/// Interactive variant of [`settle`]. A request that does not settle in time
/// is abandoned with a reset and `None` is returned.
fn settle_or_abandon(
    controller: &mut SessionController,
    limit: Duration,
    show_progress: bool,
) -> Option<Outcome> {
    match settle(controller, limit, show_progress) {
        Ok(outcome) => Some(outcome),
        Err(err) => {
            if show_progress {
                println!();
            }
            println!("{err:#}; request abandoned and session cleared.");
            controller.handle(SessionEvent::ResetRequested).ok();
            None
        }
    }
}

/// Blocks until the pending request settles, optionally drawing the
/// progress estimate on stdout while it waits.
fn settle(controller: &mut SessionController, limit: Duration, show_progress: bool) -> Result<Outcome> {
    let started = std::time::Instant::now();
    let step = Duration::from_millis(100);
    while controller.is_pending() {
        if started.elapsed() >= limit {
            bail!("no result after {}s", limit.as_secs());
        }
        match controller.next_outcome(step) {
            Some(Outcome::Stale(_)) | None => {
                if show_progress {
                    print!("\r{}", render_progress(controller.progress()));
                    io::stdout().flush()?;
                }
            }
            Some(outcome) => {
                if show_progress {
                    println!("\r{}", render_progress(controller.progress()));
                }
                return Ok(outcome);
            }
        }
    }
    bail!("no request was pending")
}

fn render_progress(value: f64) -> String {
    let clamped = value.clamp(0.0, 100.0);
    let filled = ((clamped / 100.0) * PROGRESS_BAR_WIDTH as f64).round() as usize;
    format!(
        "[{}{}] {:>3.0}%",
        "#".repeat(filled),
        "-".repeat(PROGRESS_BAR_WIDTH - filled),
        clamped
    )
}

fn describe_snapshot(snapshot: &SessionSnapshot) -> String {
    let mut parts = vec![format!("state: {}", snapshot.phase.as_str())];
    if let Some(image) = snapshot.displayed() {
        let size = image
            .dimensions()
            .map(|(width, height)| format!(" {width}x{height}"))
            .unwrap_or_default();
        parts.push(format!("showing {}{} ({})", image.mime(), size, image.digest()));
    }
    if let Some(preset) = snapshot.active_selection.as_deref() {
        parts.push(format!("preset: {preset}"));
    }
    if let Some(text) = snapshot.custom_instruction.as_deref() {
        parts.push(format!("instruction: \"{text}\""));
    }
    if let Some(error) = snapshot.last_error.as_ref() {
        parts.push(error.to_string());
    }
    parts.join(" | ")
}

fn save_displayed(snapshot: &SessionSnapshot, path: &Path) -> Result<()> {
    let Some(image) = snapshot.displayed() else {
        bail!("no image loaded");
    };
    let bytes = image.bytes()?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

fn session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("retouch-{millis}")
}
