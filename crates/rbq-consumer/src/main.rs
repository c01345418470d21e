use clap::Parser;
use rbq_consumer::agent::AgentHandler;
use rbq_consumer::logging::init_logging;
use rbq_consumer::shutdown::install_shutdown_handler;
use rbq_consumer::{Consumer, ConsumerConfig, LogFormat};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "rbq-consumer")]
#[command(about = "Pulls jobs from an RBQ broker and runs them through an LLM agent", long_about = None)]
struct Args {
    /// Broker host
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Broker port
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Number of concurrent AI workers
    #[arg(short, long, env = "MAX_AI_WORKERS")]
    workers: Option<usize>,

    /// Capacity of the in-process job queue
    #[arg(long, env = "MAX_QUEUE_SIZE")]
    queue_size: Option<usize>,

    /// Pause after an empty poll, in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    /// Ollama model name
    #[arg(long, env = "OLLAMA_MODEL")]
    model: Option<String>,

    /// Ollama base URL
    #[arg(long, env = "OLLAMA_HOST")]
    ollama_host: Option<String>,

    /// Directory agent output is written to
    #[arg(long, env = "OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    #[arg(long, env = "LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,

    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,
}

impl Args {
    fn apply(self, config: &mut ConsumerConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(workers) = self.workers {
            config.max_workers = workers;
        }
        if let Some(size) = self.queue_size {
            config.max_queue_size = size;
        }
        if let Some(interval) = self.poll_interval_ms {
            config.poll_interval_ms = interval;
        }
        if let Some(model) = self.model {
            config.agent.model = model;
        }
        if let Some(url) = self.ollama_host {
            config.agent.base_url = url;
        }
        if let Some(dir) = self.output_dir {
            config.agent.output_dir = dir;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ConsumerConfig::from_file(path)?,
        None => ConsumerConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    let _logging = init_logging(config.log_format);

    tracing::info!(
        model = %config.agent.model,
        ollama = %config.agent.base_url,
        output_dir = %config.agent.output_dir.display(),
        "Starting consumer"
    );

    let handler = Arc::new(AgentHandler::new(&config.agent)?);
    let consumer = Consumer::new(config, handler);

    let shutdown = install_shutdown_handler();
    consumer.run(shutdown).await?;

    Ok(())
}
