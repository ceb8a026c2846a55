use axum::{
    Router,
    extract::{Json, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{FilingStatus, Profile, SimulationError, SimulationResult, simulate};

#[derive(Parser, Debug)]
#[command(
    name = "drawdown",
    about = "Monte Carlo retirement drawdown simulator with US tax-aware withdrawals"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate a profile and print the result as JSON.
    Simulate(SimulateArgs),
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug, Clone)]
struct SimulateArgs {
    #[arg(long, help = "Profile JSON file, or - to read stdin")]
    profile: PathBuf,
    #[arg(long, help = "Number of paths; defaults to the profile's simulation count")]
    paths: Option<u32>,
    #[arg(long, help = "Base seed for a reproducible run")]
    seed: Option<u64>,
    #[arg(long, help = "Override the filing status: single, mfj, mfs or hoh")]
    filing_status: Option<String>,
    #[arg(long, help = "Override the two-letter state code")]
    state: Option<String>,
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read profile {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid profile JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error("server error: {0}")]
    Server(std::io::Error),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulatePayload {
    profile: Profile,
    #[serde(default)]
    paths: Option<u32>,
    #[serde(default)]
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn run_cli() -> Result<(), CliError> {
    match Cli::parse().command {
        Command::Simulate(args) => {
            let output = run_simulate(&args)?;
            println!("{output}");
            Ok(())
        }
        Command::Serve { port } => run_http_server(port).await.map_err(CliError::Server),
    }
}

fn run_simulate(args: &SimulateArgs) -> Result<String, CliError> {
    let raw = read_profile_source(&args.profile)?;
    let mut profile: Profile = serde_json::from_str(&raw)?;
    apply_overrides(&mut profile, args)?;

    let result = simulate(&profile, args.paths, args.seed)?;
    let output = if args.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    Ok(output)
}

fn read_profile_source(path: &Path) -> Result<String, CliError> {
    let read_err = |source| CliError::Read {
        path: path.display().to_string(),
        source,
    };
    if path.as_os_str() == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .map_err(read_err)?;
        return Ok(raw);
    }
    std::fs::read_to_string(path).map_err(read_err)
}

fn apply_overrides(profile: &mut Profile, args: &SimulateArgs) -> Result<(), SimulationError> {
    if let Some(code) = &args.filing_status {
        profile.filing_status = code.parse::<FilingStatus>()?;
    }
    if let Some(state) = &args.state {
        profile.state = state.clone();
    }
    Ok(())
}

pub fn router() -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/simulate", post(simulate_post_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "drawdown HTTP API listening");
    axum::serve(listener, router()).await
}

async fn health_handler() -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found", None)
}

async fn simulate_post_handler(payload: Result<Json<SimulatePayload>, JsonRejection>) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, &rejection.body_text(), None);
        }
    };

    let joined = tokio::task::spawn_blocking(move || {
        simulate(&payload.profile, payload.paths, payload.seed)
    })
    .await;

    match joined {
        Ok(Ok(result)) => simulate_response(result),
        Ok(Err(err)) => simulation_error_response(&err),
        Err(err) => {
            warn!(error = %err, "simulation task did not complete");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Simulation task failed",
                None,
            )
        }
    }
}

fn simulate_response(result: SimulationResult) -> Response {
    json_response(StatusCode::OK, result)
}

fn simulation_error_response(err: &SimulationError) -> Response {
    let status = match err {
        SimulationError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        SimulationError::InvalidProfile { .. } | SimulationError::Configuration(_) => {
            StatusCode::BAD_REQUEST
        }
    };
    error_response(status, &err.to_string(), err.field().map(str::to_string))
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str, field: Option<String>) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
            field,
        },
    )
}
