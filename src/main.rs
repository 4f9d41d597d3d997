//! PlateGate - license plate access control
//!
//! Watches a camera or image source, reads plates on request, and checks
//! them against the registry of known vehicles.

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use plate_gate::app::{self, ConsoleSink, GateApp, GateUpdate, VerdictSink};
use plate_gate::capture::DefaultOpener;
use plate_gate::config::{self, AppConfig};
use plate_gate::storage::registry::PlateRegistry;

/// PlateGate - vehicle access control by license plate
#[derive(Parser, Debug)]
#[command(name = "plate-gate", version)]
#[command(about = "Reads license plates from a camera and checks them against a registry")]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Registry database file (overrides the configuration)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Increase log verbosity
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture frames and check a plate each time detection is requested
    Run {
        /// Source URI (stub://WxH, image file or directory, stream URL)
        #[arg(short, long)]
        source: Option<String>,
        /// Arm immediately and exit after the first verdict
        #[arg(long)]
        once: bool,
        /// Print updates as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Detect and verify the plate in a single image
    Detect {
        image: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Verify plate text against the registry
    Verify {
        text: String,
        #[arg(long)]
        json: bool,
    },
    /// Register a plate
    Add {
        plate: String,
        last_name: String,
        first_name: String,
        /// Optional patronymic (may span several words)
        patronymic: Vec<String>,
    },
    /// Remove a plate from the registry
    Delete { plate: String },
    /// List registered plates
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config {
        /// Write it to the configuration file
        #[arg(long)]
        write: bool,
    },
}

/// Operator input for the run loop
enum Control {
    Check,
    Quit,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => config::default_config_path()?,
    };
    let config = config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

    init_logging(&config, args.verbose);
    config.validate()?;
    info!("Using configuration {:?}", config_path);

    match args.command {
        Command::Run { source, once, json } => {
            let source = source.unwrap_or_else(|| config.capture.source.clone());
            run(&config, args.database.as_deref(), &source, once, json)
        }
        Command::Detect { image, json } => {
            let registry = app::open_registry(&config, args.database.as_deref())?;
            let mut pipeline = app::build_pipeline(&config, app::build_recognizer(&config));
            let engine = app::build_engine(&config)?;
            let verdict = app::check_image(&image, &mut pipeline, &engine, &registry)?;
            ConsoleSink::new(json).report(&GateUpdate::Verdict(verdict));
            Ok(())
        }
        Command::Verify { text, json } => {
            let registry = app::open_registry(&config, args.database.as_deref())?;
            let engine = app::build_engine(&config)?;
            let verdict = engine.verify(Some(&text), &registry)?;
            ConsoleSink::new(json).report(&GateUpdate::Verdict(verdict));
            Ok(())
        }
        Command::Add {
            plate,
            last_name,
            first_name,
            patronymic,
        } => {
            let registry = app::open_registry(&config, args.database.as_deref())?;
            let patronymic = patronymic.join(" ");
            let stored =
                registry.add(&plate, &first_name, &last_name, Some(patronymic.as_str()))?;
            println!("Plate {} registered", stored);
            Ok(())
        }
        Command::Delete { plate } => {
            let registry = app::open_registry(&config, args.database.as_deref())?;
            if registry.delete(&plate)? {
                println!("Plate {} deleted", plate);
            } else {
                println!("Plate {} is not registered", plate);
            }
            Ok(())
        }
        Command::List { json } => {
            let registry = app::open_registry(&config, args.database.as_deref())?;
            let entries = registry.list_all()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("Registry is empty");
            } else {
                for entry in &entries {
                    println!(
                        "{:<10} {:<40} {}",
                        entry.plate,
                        entry.owner_display(),
                        entry.created_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
            Ok(())
        }
        Command::Config { write } => {
            if write {
                config::save_config(&config, &config_path)?;
                println!("Configuration written to {}", config_path.display());
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
            Ok(())
        }
    }
}

/// RUST_LOG wins; otherwise the configured level, raised to debug by -v
fn init_logging(config: &AppConfig, verbose: u8) {
    let default_level = match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(
    config: &AppConfig,
    database: Option<&Path>,
    source: &str,
    once: bool,
    json: bool,
) -> Result<()> {
    let registry = app::open_registry(config, database)?;
    info!("{} plate(s) registered", registry.count()?);

    let mut gate = GateApp::start(
        config,
        source,
        Arc::new(DefaultOpener),
        app::build_recognizer(config),
        registry,
    )?;
    let mut sink = ConsoleSink::new(json);

    let (control_tx, control_rx) = unbounded();
    let ctrlc_tx = control_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Control::Quit);
    })
    .context("Failed to install Ctrl-C handler")?;

    if once {
        gate.arm();
    } else {
        spawn_stdin_reader(control_tx);
        eprintln!("Press Enter (or type 'check') to read a plate, 'quit' to exit");
    }

    let outcome = event_loop(&mut gate, &mut sink, &control_rx, once);
    gate.stop();
    outcome
}

fn event_loop(
    gate: &mut GateApp,
    sink: &mut ConsoleSink,
    control: &Receiver<Control>,
    once: bool,
) -> Result<()> {
    loop {
        for command in control.try_iter() {
            match command {
                Control::Check => {
                    info!("Detection requested");
                    gate.arm();
                }
                Control::Quit => return Ok(()),
            }
        }

        let Some(update) = gate.pump(Duration::from_millis(100)) else {
            continue;
        };
        sink.report(&update);

        match update {
            GateUpdate::Verdict(_) if once => return Ok(()),
            GateUpdate::CheckFailed { error, .. } if once => return Err(error.into()),
            GateUpdate::Halted(error) => bail!("Capture halted: {}", error),
            GateUpdate::Stopped => return Ok(()),
            _ => {}
        }
    }
}

fn spawn_stdin_reader(control: Sender<Control>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let command = match line {
                Ok(line) => match line.trim() {
                    "q" | "quit" | "exit" => Control::Quit,
                    "" | "check" | "c" => Control::Check,
                    other => {
                        warn!("Unknown command '{}'", other);
                        continue;
                    }
                },
                Err(_) => Control::Quit,
            };
            let quit = matches!(command, Control::Quit);
            if control.send(command).is_err() || quit {
                return;
            }
        }
        // EOF
        let _ = control.send(Control::Quit);
    });
}
