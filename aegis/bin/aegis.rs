//! Command-line entry point for the Aegis dispatcher
//!
//! - Running the delivery worker (`start`, `start --daemon`) and controlling
//!   it (`stop`, `status`)
//! - Queueing mail (`send`)
//! - Inspecting outcomes (`message-status`, `failures`, `health`)

#![allow(clippy::single_match_else)]

#[cfg(not(unix))]
compile_error!("Only unix platforms are currently supported");

use std::{
    io::Read,
    path::{Path, PathBuf},
    process::ExitCode,
};

use aegis::{
    Aegis, config,
    daemon::{self, StopOutcome},
    status::StatusQuery,
};
use aegis_common::{
    Attachment, Recipient, SendCommand, SendRequest, process::ProcessState,
};
use aegis_health::HealthStatus;
use aegis_ledger::parse_partition_date;
use aegis_queue::MessageQueue as _;
use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Queue-backed email dispatcher
#[derive(Parser, Debug)]
#[command(name = "aegis")]
#[command(about = "Queue and deliver email", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to $AEGIS_CONFIG, ./aegis.config.ron,
    /// then /etc/aegis/aegis.config.ron)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the delivery worker
    Start {
        /// Detach from the terminal and run in the background
        #[arg(long)]
        daemon: bool,
    },
    /// Stop a running worker
    Stop,
    /// Report whether the worker is running
    Status,
    /// Queue an email for delivery
    Send(SendArgs),
    /// Look up the delivery status of a queued message
    MessageStatus {
        /// Message ID returned by `send`
        message_id: String,

        /// Only consult this day's failures (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
    },
    /// Show recorded delivery failures
    Failures {
        /// Only this day (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Check the queue, ledger and worker
    Health,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Read a JSON send request from this file (`-` for stdin) instead of flags
    #[arg(long, conflicts_with_all = ["to", "subject", "body", "body_file"])]
    json: Option<PathBuf>,

    #[arg(long, required_unless_present = "json")]
    to: Option<String>,

    #[arg(long)]
    to_name: Option<String>,

    #[arg(long, required_unless_present = "json")]
    subject: Option<String>,

    #[arg(long, conflicts_with = "body_file")]
    body: Option<String>,

    /// Read the body from a file
    #[arg(long)]
    body_file: Option<PathBuf>,

    /// The body is HTML
    #[arg(long)]
    html: bool,

    #[arg(long)]
    cc: Vec<String>,

    #[arg(long)]
    bcc: Vec<String>,

    #[arg(long)]
    reply_to: Option<String>,

    /// Attach a file; may be repeated
    #[arg(long = "attach")]
    attachments: Vec<PathBuf>,

    /// Extra header as `Name: value`; may be repeated
    #[arg(long = "header")]
    headers: Vec<String>,

    /// 1 (high) to 5 (low)
    #[arg(long, default_value_t = 3)]
    priority: u8,
}

impl SendArgs {
    fn into_command(self) -> anyhow::Result<SendCommand> {
        if let Some(path) = self.json {
            let mut raw = String::new();
            if path == Path::new("-") {
                std::io::stdin().read_to_string(&mut raw)?;
            } else {
                raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
            }

            let request: SendRequest = serde_json::from_str(&raw)?;
            return Ok(SendCommand::validate(request)?);
        }

        let body = match (self.body, self.body_file) {
            (_, Some(path)) => std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            (Some(body), None) => body,
            (None, None) => String::new(),
        };

        let mut builder = SendCommand::builder(
            self.to.unwrap_or_default(),
            self.subject.unwrap_or_default(),
            body,
        )
        .html(self.html)
        .priority(self.priority);

        if let Some(name) = self.to_name {
            builder = builder.to_name(name);
        }
        if let Some(reply_to) = self.reply_to {
            builder = builder.reply_to(reply_to);
        }
        for cc in self.cc {
            builder = builder.cc(Recipient::new(cc));
        }
        for bcc in self.bcc {
            builder = builder.bcc(Recipient::new(bcc));
        }
        for header in self.headers {
            let Some((name, value)) = header.split_once(':') else {
                anyhow::bail!("Header must look like 'Name: value', got '{header}'");
            };
            builder = builder.header(name.trim(), value.trim());
        }
        for path in self.attachments {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .with_context(|| format!("Not a file: {}", path.display()))?;
            let content = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            builder = builder.attachment(Attachment::new(name, content));
        }

        Ok(builder.build()?)
    }
}

fn load(explicit: Option<&Path>) -> anyhow::Result<(PathBuf, Aegis)> {
    let path = config::find_config_file(explicit)?;
    let aegis = config::load(&path)?;
    Ok((path, aegis))
}

async fn cmd_start(config_path: &Path, aegis: Aegis, detach: bool) -> anyhow::Result<ExitCode> {
    if !detach {
        aegis.run().await?;
        return Ok(ExitCode::SUCCESS);
    }

    let config_path = std::fs::canonicalize(config_path)?;
    let daemon_config = aegis.daemon.clone();
    let pid = tokio::task::spawn_blocking(move || {
        daemon::spawn_detached(
            &daemon_config,
            [
                std::ffi::OsStr::new("--config"),
                config_path.as_os_str(),
                std::ffi::OsStr::new("start"),
            ],
        )
    })
    .await??;

    println!("Aegis started (pid {pid})");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_stop(aegis: &Aegis) -> anyhow::Result<ExitCode> {
    let daemon_config = aegis.daemon.clone();
    match tokio::task::spawn_blocking(move || daemon::stop(&daemon_config)).await? {
        Ok(StopOutcome::Terminated(pid)) => println!("Aegis stopped (pid {pid})"),
        Ok(StopOutcome::Killed(pid)) => {
            println!("Aegis did not stop in time and was killed (pid {pid})");
        }
        Ok(StopOutcome::StaleRemoved(pid)) => {
            println!("Aegis was not running, removed stale pid file (pid {pid})");
        }
        Err(daemon::DaemonError::NotRunning) => {
            println!("Aegis is not running");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(ExitCode::SUCCESS)
}

fn cmd_status(aegis: &Aegis) -> anyhow::Result<ExitCode> {
    let pid_file = aegis.daemon.pid_file.display();
    match daemon::status(&aegis.daemon)? {
        ProcessState::Running(pid) => {
            println!("Aegis is running (pid {pid})");
            Ok(ExitCode::SUCCESS)
        }
        ProcessState::Stale(pid) => {
            println!("Aegis is not running (stale pid file {pid_file} names pid {pid})");
            Ok(ExitCode::FAILURE)
        }
        ProcessState::NotRunning => {
            println!("Aegis is not running");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn cmd_send(aegis: &Aegis, args: SendArgs) -> anyhow::Result<ExitCode> {
    let command = args.into_command()?;
    let queue = aegis.open_queue()?;
    let id = queue.enqueue(command).await?;

    println!("{id}");
    Ok(ExitCode::SUCCESS)
}

fn cmd_message_status(
    aegis: &Aegis,
    message_id: &str,
    date: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let query = StatusQuery::new(aegis.open_ledger()?);
    let status = query.message_status(message_id, date)?;

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(ExitCode::SUCCESS)
}

fn cmd_failures(aegis: &Aegis, date: Option<&str>, format: Format) -> anyhow::Result<ExitCode> {
    let date = date.map(parse_partition_date).transpose()?;
    let stats = aegis.open_ledger()?.failure_stats(date)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        Format::Text => {
            if stats.is_empty() {
                println!("No failures recorded");
                return Ok(ExitCode::SUCCESS);
            }

            for partition in &stats {
                println!("{} ({} failure(s))", partition.date, partition.count);
                println!("  {:<28} {:<9} {:<26} ERROR", "MESSAGE ID", "ATTEMPTS", "FAILED AT");
                for failure in &partition.failures {
                    println!(
                        "  {:<28} {:<9} {:<26} {}",
                        failure.message_id,
                        failure.attempts,
                        failure.failed_at.to_rfc3339(),
                        failure.last_error
                    );
                }
                println!();
            }

            let total: usize = stats.iter().map(|p| p.count).sum();
            println!("Total: {total} failure(s)");
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn cmd_health(aegis: &Aegis) -> anyhow::Result<ExitCode> {
    let report = aegis.health_checker()?.report().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if report.status == HealthStatus::Healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let (config_path, aegis) = load(cli.config.as_deref())?;

    match cli.command {
        Commands::Start { daemon } => cmd_start(&config_path, aegis, daemon).await,
        Commands::Stop => cmd_stop(&aegis).await,
        Commands::Status => cmd_status(&aegis),
        Commands::Send(args) => cmd_send(&aegis, args).await,
        Commands::MessageStatus { message_id, date } => {
            cmd_message_status(&aegis, &message_id, date.as_deref())
        }
        Commands::Failures { date, format } => cmd_failures(&aegis, date.as_deref(), format),
        Commands::Health => cmd_health(&aegis).await,
    }
}
