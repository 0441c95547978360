use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the ERP gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080", env = "GATEWAY_URL")]
    url: String,

    #[arg(short, long, env = "GATEWAY_ADMIN_KEY", default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the health report
    Health,
    /// Print the Prometheus exposition
    Metrics,
    /// Show gateway status
    Status,
    /// Show permission cache statistics
    Cache,
    /// Drop every cached permission set
    Flush,
    /// Drop one user's cached permissions
    Invalidate {
        user_id: i64,
    },
    /// Show the database circuit breaker
    Breaker,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    if !cli.key.is_empty() {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
        );
    }

    let (method, path) = match &cli.command {
        Commands::Health => (Method::GET, "/health".to_string()),
        Commands::Metrics => {
            let res = client.get(format!("{}/metrics", base)).send().await?;
            let status = res.status();
            let body = res.text().await?;
            if !status.is_success() {
                eprintln!("Error: /metrics returned status {}", status);
            }
            print!("{}", body);
            return Ok(());
        }
        Commands::Status => (Method::GET, "/admin/status".to_string()),
        Commands::Cache => (Method::GET, "/admin/cache".to_string()),
        Commands::Flush => (Method::DELETE, "/admin/cache".to_string()),
        Commands::Invalidate { user_id } => (Method::DELETE, format!("/admin/cache/{}", user_id)),
        Commands::Breaker => (Method::GET, "/admin/breaker".to_string()),
    };

    let res = client
        .request(method, format!("{}{}", base, path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    // Health answers 503 with a full report when degraded.
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }

    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        std::process::exit(1);
    }
    Ok(())
}
