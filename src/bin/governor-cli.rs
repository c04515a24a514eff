use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "governor-cli")]
#[command(about = "Management CLI for the service governor", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Version and aggregate health
    Status,
    /// Admission queue depth and active counts
    Queue,
    /// Token bucket levels per service
    Limits,
    /// Circuit breaker state and health scores
    Health,
    /// Drop every queued request and restart the counters
    ResetQueue,
    /// Refill every token bucket
    ResetLimits,
    /// Forget failure history and breaker state
    ResetErrors,
    /// Force every circuit closed
    CloseCircuits,
}

impl Commands {
    fn endpoint(&self) -> (Method, &'static str) {
        match self {
            Commands::Status => (Method::GET, "/admin/status"),
            Commands::Queue => (Method::GET, "/admin/queue"),
            Commands::Limits => (Method::GET, "/admin/rate-limits"),
            Commands::Health => (Method::GET, "/admin/health"),
            Commands::ResetQueue => (Method::POST, "/admin/queue/reset"),
            Commands::ResetLimits => (Method::POST, "/admin/rate-limits/reset"),
            Commands::ResetErrors => (Method::POST, "/admin/errors/reset"),
            Commands::CloseCircuits => (Method::POST, "/admin/circuits/close"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let (method, path) = cli.command.endpoint();
    let res = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
