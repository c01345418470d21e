use anyhow::Context;
use clap::{Parser, ValueEnum};
use rbq_client::BrokerClient;
use rbq_core::{JobParams, JobSpec};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "rbq-publish")]
#[command(about = "Send an AI job to the broker", long_about = None)]
struct Args {
    /// The query to send
    #[arg(short, long)]
    query: String,

    /// The system prompt for the agent
    #[arg(short, long, default_value = "You are the best websearch and csv creator")]
    system_prompt: String,

    /// Job id the broker stores the job under
    #[arg(short, long, default_value = "user_job")]
    job_id: String,

    /// Maximum number of results the agent should return
    #[arg(short, long)]
    limit: Option<u64>,

    /// Broker host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Broker port
    #[arg(long, default_value = "4000")]
    port: u16,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let format = args.format;
    let job_id = args.job_id.clone();

    match publish(args).await {
        Ok(true) => {
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "job_id": job_id, "submitted": true }))
                }
                OutputFormat::Text => info!("Job '{}' submitted successfully", job_id),
            }
            ExitCode::SUCCESS
        }
        Ok(false) => {
            if let OutputFormat::Json = format {
                println!("{}", serde_json::json!({ "job_id": job_id, "submitted": false }));
            }
            error!("Failed to submit job '{}'", job_id);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Failed to submit job '{}': {:#}", job_id, e);
            ExitCode::FAILURE
        }
    }
}

/// Submit the job once; `Ok(false)` means the broker rejected it.
async fn publish(args: Args) -> anyhow::Result<bool> {
    let mut params = JobParams::new(args.query);
    params.limit = args.limit;
    let spec = JobSpec::new(args.system_prompt, params);
    spec.validate()?;
    let body = spec.to_json()?;

    info!("=== SENDING JOB ===");
    info!("Query: {}", spec.params.query);
    info!("System prompt: {}", spec.system_prompt);

    let address = format!("{}:{}", args.host, args.port);
    let mut client = BrokerClient::connect(address.as_str())
        .await
        .with_context(|| format!("cannot connect to broker at {address}"))?;

    let submitted = client.submit(&args.job_id, body).await;
    if let Err(e) = client.close().await {
        tracing::debug!(error = %e, "Error while closing broker session");
    }

    Ok(submitted?)
}
