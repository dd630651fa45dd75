use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use webhook_dispatch::delivery::signer;

#[derive(Parser)]
#[command(name = "dispatch-cli")]
#[command(about = "Management CLI for the webhook dispatcher", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081", env = "DISPATCH_ADMIN_URL")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION", env = "DISPATCH_ADMIN_API_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check dispatcher status
    Status,
    /// Component health
    Health,
    /// Job counts per bucket and retention windows
    Queue,
    /// Circuit breaker snapshots
    Breakers,
    /// Show one delivery and its attempts
    Delivery { id: String },
    /// Recent deliveries for a webhook
    History {
        webhook_id: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Enqueue a delivery
    Send {
        #[arg(long)]
        webhook_id: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        secret: String,
        #[arg(long)]
        event: String,
        /// JSON payload, or @path to read it from a file
        #[arg(long)]
        payload: String,
    },
    /// Print the signature header for a body (offline)
    Sign {
        #[arg(long)]
        secret: String,
        /// File holding the exact body bytes
        body: PathBuf,
    },
    /// Check a signature header against a body (offline)
    Verify {
        #[arg(long)]
        secret: String,
        #[arg(long)]
        signature: String,
        body: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Sign { secret, body } => {
            let bytes = std::fs::read(body)?;
            println!("{}", signer::sign(&secret, &bytes));
            Ok(())
        }
        Commands::Verify { secret, signature, body } => {
            let bytes = std::fs::read(body)?;
            if !signer::verify(&secret, &bytes, &signature) {
                eprintln!("invalid signature");
                std::process::exit(1);
            }
            println!("valid");
            Ok(())
        }
        command => call_admin(&cli.url, &cli.key, command).await,
    }
}

async fn call_admin(url: &str, key: &str, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    let client = reqwest::Client::new();
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {key}"))?);
    let base = url.trim_end_matches('/');

    let request = match command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Health => client.get(format!("{base}/admin/health")),
        Commands::Queue => client.get(format!("{base}/admin/queue")),
        Commands::Breakers => client.get(format!("{base}/admin/breakers")),
        Commands::Delivery { id } => client.get(format!("{base}/admin/deliveries/{id}")),
        Commands::History { webhook_id, offset, limit } => client
            .get(format!("{base}/admin/webhooks/{webhook_id}/deliveries"))
            .query(&[("offset", offset), ("limit", limit)]),
        Commands::Send { webhook_id, url, secret, event, payload } => {
            let payload: Value = match payload.strip_prefix('@') {
                Some(path) => serde_json::from_slice(&std::fs::read(path)?)?,
                None => serde_json::from_str(&payload)?,
            };
            client.post(format!("{base}/admin/deliveries")).json(&json!({
                "webhook_id": webhook_id,
                "url": url,
                "secret": secret,
                "event_type": event,
                "payload": payload,
            }))
        }
        Commands::Sign { .. } | Commands::Verify { .. } => {
            return Err("signing commands run offline".into());
        }
    };

    let res = request.headers(headers).send().await?;
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
