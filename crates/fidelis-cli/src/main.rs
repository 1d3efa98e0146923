use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use fidelis_api::handlers::admit_config;
use fidelis_api::intake::ValidateConfig;
use fidelis_api::reports::{render, ReportFormat};
use fidelis_api::AppState;
use fidelis_core::{
    CodeFile, FidelisConfig, InputBundle, OverallStatus, PriorityBand, TechnologyContext,
    ValidationScope,
};

const EXIT_OK: u8 = 0;
const EXIT_INVALID_INPUT: u8 = 2;
const EXIT_REJECTED: u8 = 3;
const EXIT_INFRA: u8 = 4;
const EXIT_BUDGET: u8 = 5;

#[derive(Parser)]
#[command(name = "fidelis")]
#[command(about = "Validate that a software migration preserves meaning", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a static validation over local files
    Validate {
        #[arg(long)]
        source_tech: String,
        #[arg(long)]
        target_tech: String,
        /// File or directory with the source artifacts
        #[arg(long)]
        source_files: PathBuf,
        /// File or directory with the target artifacts
        #[arg(long)]
        target_files: PathBuf,
        #[arg(long, default_value = "full")]
        scope: String,
        /// Write the JSON report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run a behavioral validation through a running server
    Behavioral {
        #[arg(long)]
        source_url: String,
        #[arg(long)]
        target_url: String,
        /// Comma-separated scenario names
        #[arg(long)]
        scenarios: String,
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Start the HTTP server
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Probe a running server's health endpoint
    Health {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
    },
}

fn collect_files(root: &Path) -> anyhow::Result<Vec<CodeFile>> {
    let mut files = Vec::new();
    if root.is_file() {
        let content = std::fs::read_to_string(root)?;
        files.push(CodeFile::new(root.to_string_lossy(), content));
        return Ok(files);
    }
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            files.extend(collect_files(&path)?);
        } else if let Ok(content) = std::fs::read_to_string(&path) {
            files.push(CodeFile::new(path.to_string_lossy(), content));
        }
    }
    Ok(files)
}

fn exit_for_status(status: OverallStatus) -> u8 {
    match status {
        OverallStatus::Approved | OverallStatus::ApprovedWithWarnings => EXIT_OK,
        OverallStatus::Rejected | OverallStatus::Error => EXIT_REJECTED,
    }
}

async fn run_validate(
    source_tech: String,
    target_tech: String,
    source_files: PathBuf,
    target_files: PathBuf,
    scope: String,
    output: Option<PathBuf>,
) -> anyhow::Result<u8> {
    let scope: ValidationScope = match scope.parse() {
        Ok(scope) => scope,
        Err(err) => {
            eprintln!("{} {}", "invalid scope:".red(), err);
            return Ok(EXIT_INVALID_INPUT);
        }
    };
    if scope.requires_behavioral() {
        eprintln!(
            "{}",
            "behavioral scopes need live URLs; use the `behavioral` subcommand".red()
        );
        return Ok(EXIT_INVALID_INPUT);
    }

    let source = InputBundle {
        files: collect_files(&source_files)?,
        ..Default::default()
    };
    let target = InputBundle {
        files: collect_files(&target_files)?,
        ..Default::default()
    };
    if source.files.is_empty() || target.files.is_empty() {
        eprintln!("{}", "no readable files in input paths".red());
        return Ok(EXIT_INVALID_INPUT);
    }

    let config = FidelisConfig::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let state = AppState::build_ephemeral(config, None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let validate_config = ValidateConfig {
        source_technology: TechnologyContext::new(source_tech),
        target_technology: TechnologyContext::new(target_tech),
        scope,
        source_url: None,
        target_url: None,
        behavioral: None,
        tenant: None,
    };
    let request_id = match admit_config(&state, validate_config, source, target, PriorityBand::Batch)
        .await
    {
        Ok(request_id) => request_id,
        Err(err) => {
            eprintln!("{} {}", "request rejected:".red(), err);
            return Ok(EXIT_INVALID_INPUT);
        }
    };

    // Poll until terminal; the batch band still gets a worker promptly in
    // a one-shot process.
    let session = loop {
        let session = state
            .manager
            .store()
            .load(&request_id)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?
            .ok_or_else(|| anyhow::anyhow!("session vanished"))?;
        if session.status.is_terminal() {
            break session;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    let Some(result) = session.result.clone() else {
        eprintln!(
            "{} session ended {} with no result",
            "failed:".red(),
            session.status
        );
        return Ok(match session.status {
            fidelis_core::SessionStatus::TimedOut => EXIT_BUDGET,
            _ => EXIT_INFRA,
        });
    };

    let report =
        render(&session, &result, ReportFormat::Json).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    match output {
        Some(path) => {
            std::fs::write(&path, &report)?;
            println!("report written to {}", path.display());
        }
        None => println!("{}", report),
    }

    let banner = format!(
        "{} (fidelity {:.4})",
        result.overall_status, result.fidelity_score
    );
    match result.overall_status {
        OverallStatus::Approved => println!("{}", banner.green()),
        OverallStatus::ApprovedWithWarnings => println!("{}", banner.yellow()),
        _ => println!("{}", banner.red()),
    }
    Ok(exit_for_status(result.overall_status))
}

async fn run_behavioral(
    source_url: String,
    target_url: String,
    scenarios: String,
    server: String,
    output: Option<PathBuf>,
) -> anyhow::Result<u8> {
    let scenario_list: Vec<serde_json::Value> = scenarios
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| serde_json::json!({ "name": name }))
        .collect();
    if scenario_list.is_empty() {
        eprintln!("{}", "at least one scenario name is required".red());
        return Ok(EXIT_INVALID_INPUT);
    }

    let client = reqwest::Client::new();
    let submit = client
        .post(format!("{}/api/behavioral/validate", server))
        .json(&serde_json::json!({
            "source_url": source_url,
            "target_url": target_url,
            "scenarios": scenario_list,
        }))
        .send()
        .await;
    let response = match submit {
        Ok(response) => response,
        Err(err) => {
            eprintln!("{} {}", "server unreachable:".red(), err);
            return Ok(EXIT_INFRA);
        }
    };
    if !response.status().is_success() {
        eprintln!("{} {}", "submission failed:".red(), response.status());
        return Ok(EXIT_INVALID_INPUT);
    }
    let accepted: serde_json::Value = response.json().await?;
    let request_id = accepted["request_id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing request_id in response"))?
        .to_string();
    println!("accepted as {}", request_id.bold());

    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let status: serde_json::Value = client
            .get(format!("{}/api/validate/{}/status", server, request_id))
            .send()
            .await?
            .json()
            .await?;
        let current = status["status"].as_str().unwrap_or("unknown");
        if status["result_available"] == true
            || ["completed", "failed", "cancelled", "timed-out"].contains(&current)
        {
            let result = client
                .get(format!("{}/api/validate/{}/result", server, request_id))
                .send()
                .await?;
            let body = result.text().await?;
            match output {
                Some(path) => std::fs::write(&path, &body)?,
                None => println!("{}", body),
            }
            return Ok(match current {
                "completed" => EXIT_OK,
                "timed-out" => EXIT_BUDGET,
                _ => EXIT_REJECTED,
            });
        }
        println!("  status: {}", current.dimmed());
    }
}

async fn run_serve(host: Option<String>, port: Option<u16>) -> anyhow::Result<u8> {
    let mut config = FidelisConfig::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let host = config.server.host.clone();
    let port = config.server.port;
    let state = AppState::build(config, None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    fidelis_api::serve(state, &host, port)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(EXIT_OK)
}

async fn run_health(server: String) -> anyhow::Result<u8> {
    let response = reqwest::get(format!("{}/health", server)).await;
    match response {
        Ok(response) => {
            let body: serde_json::Value = response.json().await?;
            let status = body["status"].as_str().unwrap_or("unknown");
            if status == "healthy" {
                println!("{}", status.green());
                Ok(EXIT_OK)
            } else {
                println!("{}", status.yellow());
                println!("{}", serde_json::to_string_pretty(&body["subsystems"])?);
                Ok(EXIT_INFRA)
            }
        }
        Err(err) => {
            eprintln!("{} {}", "unreachable:".red(), err);
            Ok(EXIT_INFRA)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let outcome = match cli.command {
        Commands::Validate {
            source_tech,
            target_tech,
            source_files,
            target_files,
            scope,
            output,
        } => {
            run_validate(
                source_tech,
                target_tech,
                source_files,
                target_files,
                scope,
                output,
            )
            .await
        }
        Commands::Behavioral {
            source_url,
            target_url,
            scenarios,
            server,
            output,
        } => run_behavioral(source_url, target_url, scenarios, server, output).await,
        Commands::Serve { host, port } => run_serve(host, port).await,
        Commands::Health { server } => run_health(server).await,
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{} {:#}", "error:".red(), err);
            ExitCode::from(EXIT_INFRA)
        }
    }
}
