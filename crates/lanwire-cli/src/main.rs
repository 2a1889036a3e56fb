// SPDX-License-Identifier: AGPL-3.0
// Lanwire CLI - command-line frontend for the transfer engine

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lanwire_core::{EngineEvent, TransferEngine, TransferStatus};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "lanwire", version, about = "Explicit, consent-based file transfer over LAN and VPN")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Receive transfers until interrupted
    Listen {
        /// Accept every incoming transfer without asking
        #[arg(long)]
        accept_all: bool,
        /// Listen on this port instead of the configured one
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Send files or a directory to a peer
    Send {
        /// Peer address (IP or hostname)
        #[arg(short, long)]
        to: String,
        /// Peer port
        #[arg(short, long)]
        port: Option<u16>,
        /// Files to send, or a single directory
        paths: Vec<PathBuf>,
    },
    /// Show a peer's device name and version
    Info {
        address: String,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Manage saved peers
    Favorites {
        #[command(subcommand)]
        command: FavoritesCommand,
    },
    /// Show or clear the transfer history
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
    /// Show or change engine settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    /// List local network interfaces
    Interfaces,
}

#[derive(Subcommand)]
enum FavoritesCommand {
    List,
    Add { name: String, address: String },
    Remove { id: String },
    /// Resolve a favorite's hostname and cache the IP
    Resolve { address: String },
}

#[derive(Subcommand)]
enum HistoryCommand {
    List,
    Clear,
}

#[derive(Subcommand)]
enum SettingsCommand {
    Show,
    Set {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        device_name: Option<String>,
        #[arg(long)]
        download_dir: Option<PathBuf>,
        #[arg(long)]
        receive_only: Option<bool>,
        /// Add an address to the trusted list
        #[arg(long)]
        trust: Option<String>,
        /// Remove an address from the trusted list
        #[arg(long)]
        untrust: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lanwire_cli=info".parse().unwrap())
                .add_directive("lanwire_core=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let engine = TransferEngine::new().context("Failed to initialize engine")?;

    match cli.command {
        Commands::Listen { accept_all, port } => listen(&engine, accept_all, port).await?,
        Commands::Send { to, port, paths } => send(&engine, &to, port, paths).await?,
        Commands::Info { address, port } => {
            let port = port.unwrap_or_else(|| engine.get_settings().port);
            let info = engine.peer_info(&address, port).await?;
            println!("{} (lanwire {})", info.device_name, info.version);
        }
        Commands::Favorites { command } => favorites(&engine, command)?,
        Commands::History { command } => history(&engine, command)?,
        Commands::Settings { command } => settings(&engine, command).await?,
        Commands::Interfaces => {
            for iface in engine.list_interfaces() {
                println!("{:<12} {}", iface.name, iface.ip);
            }
        }
    }

    Ok(())
}

async fn listen(engine: &TransferEngine, accept_all: bool, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        let mut s = engine.get_settings();
        s.port = port;
        engine.update_settings(s).await?;
    }

    let mut events = engine.subscribe();
    let bound = engine.start_server().await?;
    let settings = engine.get_settings();
    println!(
        "Listening on port {} as \"{}\", saving to {}",
        bound,
        settings.device_name,
        settings.download_dir.display()
    );

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Ok(event) = event else { continue };
                match event {
                    EngineEvent::TransferRequest { transfer } => {
                        let from = transfer
                            .sender_name
                            .as_deref()
                            .unwrap_or(&transfer.source_ip);
                        println!(
                            "Incoming: {} file(s), {} from {}",
                            transfer.files.len(),
                            format_size(transfer.total_size),
                            from
                        );
                        if accept_all {
                            engine.accept_transfer(&transfer.id).await?;
                        } else {
                            print!("Accept? [y/N] ");
                            use std::io::Write;
                            std::io::stdout().flush().ok();
                            let answer = stdin.next_line().await?.unwrap_or_default();
                            if answer.trim().eq_ignore_ascii_case("y") {
                                engine.accept_transfer(&transfer.id).await?;
                            } else {
                                engine.reject_transfer(&transfer.id).await?;
                            }
                        }
                    }
                    EngineEvent::TransferProgress { progress } => {
                        print_progress(
                            progress.bytes_transferred,
                            progress.total_bytes,
                            progress.speed_bps,
                        );
                    }
                    EngineEvent::TransferComplete { transfer_id } => {
                        println!("\nTransfer {} complete", transfer_id);
                    }
                    EngineEvent::TransferFailed { transfer_id, error } => {
                        println!("\nTransfer {} failed: {}", transfer_id, error);
                    }
                    _ => {}
                }
            }
        }
    }

    println!("\nShutting down");
    engine.stop_server().await?;
    Ok(())
}

async fn send(
    engine: &TransferEngine,
    to: &str,
    port: Option<u16>,
    paths: Vec<PathBuf>,
) -> Result<()> {
    if paths.is_empty() {
        bail!("Nothing to send");
    }
    let port = port.unwrap_or_else(|| engine.get_settings().port);

    // Saved peers can be addressed by name
    let address = engine
        .list_favorites()
        .iter()
        .find(|f| f.name == to)
        .map(|f| f.address.clone())
        .unwrap_or_else(|| to.to_string());

    let mut events = engine.subscribe();
    let progress_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::TransferProgress { progress } => {
                    print_progress(
                        progress.bytes_transferred,
                        progress.total_bytes,
                        progress.speed_bps,
                    );
                }
                EngineEvent::TransferRetry {
                    attempt,
                    max_attempts,
                    error,
                    ..
                } => {
                    println!("\nRetrying ({}/{}): {}", attempt, max_attempts, error);
                }
                EngineEvent::TransferComplete { .. } | EngineEvent::TransferFailed { .. } => break,
                _ => {}
            }
        }
    });

    let result = if paths.len() == 1 && paths[0].is_dir() {
        engine.send_directory(&address, port, &paths[0]).await
    } else {
        engine.send_files(&address, port, paths).await
    };
    progress_task.abort();

    match result {
        Ok(id) => {
            println!("\nTransfer {} complete", id);
            Ok(())
        }
        Err(e) => bail!("Transfer failed: {}", e),
    }
}

fn favorites(engine: &TransferEngine, command: FavoritesCommand) -> Result<()> {
    match command {
        FavoritesCommand::List => {
            for fav in engine.list_favorites() {
                let resolved = fav
                    .last_resolved_ip
                    .map(|ip| format!(" ({})", ip))
                    .unwrap_or_default();
                println!("{}  {:<20} {}{}", fav.id, fav.name, fav.address, resolved);
            }
        }
        FavoritesCommand::Add { name, address } => {
            let fav = engine.add_favorite(name, address)?;
            println!("Added {} ({})", fav.name, fav.id);
        }
        FavoritesCommand::Remove { id } => {
            engine.delete_favorite(&id)?;
            println!("Removed");
        }
        FavoritesCommand::Resolve { address } => {
            let result = engine.resolve_hostname(&address);
            if result.success {
                for ip in result.ips {
                    println!("{}", ip);
                }
            } else {
                bail!(
                    "Resolution failed: {}",
                    result.error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
        }
    }
    Ok(())
}

fn history(engine: &TransferEngine, command: HistoryCommand) -> Result<()> {
    match command {
        HistoryCommand::List => {
            for record in engine.transfer_history() {
                let marker = match record.status {
                    TransferStatus::Completed => "ok",
                    TransferStatus::Failed => "failed",
                    TransferStatus::Rejected => "rejected",
                    TransferStatus::Cancelled => "cancelled",
                    _ => "?",
                };
                println!(
                    "{}  {:<9} {:<9} {} file(s), {} <-> {}",
                    record.started_at.format("%Y-%m-%d %H:%M"),
                    format!("{:?}", record.direction).to_lowercase(),
                    marker,
                    record.files.len(),
                    format_size(record.total_size),
                    record.peer_address
                );
            }
        }
        HistoryCommand::Clear => {
            engine.clear_history()?;
            println!("History cleared");
        }
    }
    Ok(())
}

async fn settings(engine: &TransferEngine, command: SettingsCommand) -> Result<()> {
    match command {
        SettingsCommand::Show => {
            let settings = engine.get_settings();
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        SettingsCommand::Set {
            port,
            device_name,
            download_dir,
            receive_only,
            trust,
            untrust,
        } => {
            if let Some(host) = trust {
                engine.add_trusted_host(host)?;
            }
            if let Some(host) = untrust {
                engine.remove_trusted_host(&host)?;
            }
            let mut settings = engine.get_settings();
            if let Some(port) = port {
                settings.port = port;
            }
            if let Some(name) = device_name {
                settings.device_name = name;
            }
            if let Some(dir) = download_dir {
                settings.download_dir = dir;
            }
            if let Some(receive_only) = receive_only {
                settings.receive_only = receive_only;
            }
            engine.update_settings(settings).await?;
        }
    }
    Ok(())
}

fn print_progress(bytes: u64, total: u64, speed_bps: u64) {
    let percent = if total > 0 {
        bytes as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    print!(
        "\r{:>5.1}%  {} / {}  {}/s   ",
        percent,
        format_size(bytes),
        format_size(total),
        format_size(speed_bps)
    );
    use std::io::Write;
    std::io::stdout().flush().ok();
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_size_picks_sensible_units() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(1_048_576), "1.0 MiB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.0 GiB");
    }
}
