use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use rollcall_core::catalog::Catalog;
use rollcall_core::session::{enrollment_candidate, SessionController, SessionError};
use rollcall_core::vision::FaceVision;
use rollcall_hw::Camera;
use rollcall_vision::OnnxVision;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::Config;
use engine::{EngineCommand, EngineEvent};

#[derive(Parser)]
#[command(name = "rollcall", about = "Camera-based attendance tracking")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new person in the face catalog
    Enroll {
        /// Full name; the enrolled image is stored with underscores
        #[arg(short, long)]
        name: String,
    },
    /// Run an attendance session until quit
    Track,
    /// List enrolled identities
    List {
        #[arg(long)]
        json: bool,
    },
    /// List available capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = Config::from_env();

    match Cli::parse().command {
        Commands::Enroll { name } => enroll(&cfg, &name),
        Commands::Track => track(cfg).await,
        Commands::List { json } => list(&cfg, json),
        Commands::Devices => {
            devices();
            Ok(())
        }
    }
}

/// Standalone registration: capture one good face and save it as the
/// identity's reference image.
fn enroll(cfg: &Config, name: &str) -> Result<()> {
    let mut vision = OnnxVision::load(&cfg.model_dir).context("failed to load vision models")?;
    let camera =
        Camera::open_with_retry(&cfg.camera_device, cfg.camera_attempts, cfg.camera_retry_delay)?;
    let mut capture = camera.stream()?;
    capture.discard_warmup(cfg.warmup_frames);

    println!("Face the camera alone, close enough to fill the frame.");

    let mut last_reason = String::new();
    for _ in 0..cfg.enroll_attempts {
        let frame = match capture.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "frame read failed; retrying");
                continue;
            }
        };
        let faces = match vision.detect(engine::gray_view(&frame)) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "detection failed; retrying");
                continue;
            }
        };
        match enrollment_candidate(&faces) {
            Ok(face) => {
                let path = engine::save_enrollment_image(&cfg.faces_dir, name, &frame, face)?;
                println!("Registered {name} ({})", path.display());
                return Ok(());
            }
            Err(reason) => {
                let reason = reason.to_string();
                if reason != last_reason {
                    println!("{reason}");
                    last_reason = reason;
                }
            }
        }
    }

    bail!("no usable capture after {} frames", cfg.enroll_attempts)
}

/// Run an attendance session: engine loop on its own thread, interactive
/// commands from stdin.
async fn track(cfg: Config) -> Result<()> {
    let mut vision = OnnxVision::load(&cfg.model_dir).context("failed to load vision models")?;
    let catalog = Catalog::load(&cfg.faces_dir, &mut vision)?;

    let controller = match SessionController::start(
        catalog,
        &cfg.logs_dir,
        Local::now().date_naive(),
        cfg.match_threshold,
    ) {
        Ok(controller) => controller,
        Err(SessionError::NoEnrolledIdentities) => {
            bail!("no enrolled identities; run `rollcall enroll --name \"Your Name\"` first")
        }
        Err(e) => return Err(e.into()),
    };

    println!("Tracking attendance. Commands: r <name> = register, q = quit");
    let (commands, mut events) = engine::spawn(cfg, controller, vision);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(EngineEvent::Status(text)) => println!("{text}"),
                Some(EngineEvent::StatusCleared) => {}
                Some(EngineEvent::Recorded { .. }) => {} // the status line already announced it
                Some(EngineEvent::Enrolled { name, image }) => {
                    println!("{name} registered ({})", image.display());
                }
                Some(EngineEvent::EnrollAborted { name, reason }) => {
                    println!("enrollment of {name} abandoned: {reason}");
                }
                Some(EngineEvent::Error(message)) => eprintln!("{message}"),
                Some(EngineEvent::Fatal(message)) => bail!("{message}"),
                Some(EngineEvent::Ended { summary, log_path }) => {
                    println!("Attendance logged to: {}", log_path.display());
                    if summary.absent_names.is_empty() {
                        println!("All attended ({} present)", summary.present_count);
                    } else {
                        println!("Present: {}", summary.present_count);
                        println!("Absentees: {}", summary.absent_names.join(", "));
                    }
                    break;
                }
                None => break,
            },
            line = lines.next_line() => match line? {
                Some(text) => {
                    if let Some(cmd) = parse_command(&text) {
                        let _ = commands.send(cmd).await;
                    } else if !text.trim().is_empty() {
                        println!("commands: r <name> | c (cancel enrollment) | q (quit)");
                    }
                }
                None => {
                    let _ = commands.send(EngineCommand::Stop).await;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                let _ = commands.send(EngineCommand::Stop).await;
            }
        }
    }

    Ok(())
}

fn list(cfg: &Config, json: bool) -> Result<()> {
    let names = Catalog::scan_names(&cfg.faces_dir)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&names)?);
    } else if names.is_empty() {
        println!("No identities enrolled in {}", cfg.faces_dir.display());
    } else {
        for name in names {
            println!("{name}");
        }
    }
    Ok(())
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for device in devices {
        println!("{}  {} ({})", device.path, device.name, device.driver);
    }
}

fn parse_command(line: &str) -> Option<EngineCommand> {
    let trimmed = line.trim();
    let (head, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (trimmed, ""),
    };
    match head {
        "q" | "quit" => Some(EngineCommand::Stop),
        "c" | "cancel" => Some(EngineCommand::CancelEnroll),
        "r" | "register" if !rest.is_empty() => Some(EngineCommand::Enroll {
            name: rest.to_string(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_quit() {
        assert!(matches!(parse_command("q"), Some(EngineCommand::Stop)));
        assert!(matches!(parse_command("  quit  "), Some(EngineCommand::Stop)));
    }

    #[test]
    fn test_parse_command_register_keeps_full_name() {
        match parse_command("r Ada Lovelace") {
            Some(EngineCommand::Enroll { name }) => assert_eq!(name, "Ada Lovelace"),
            other => panic!("unexpected: {:?}", other.is_some()),
        }
    }

    #[test]
    fn test_parse_command_register_without_name_rejected() {
        assert!(parse_command("r").is_none());
        assert!(parse_command("register   ").is_none());
    }

    #[test]
    fn test_parse_command_unknown() {
        assert!(parse_command("frobnicate").is_none());
        assert!(parse_command("").is_none());
    }

    #[test]
    fn test_parse_command_cancel() {
        assert!(matches!(
            parse_command("c"),
            Some(EngineCommand::CancelEnroll)
        ));
    }
}
