use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(about = "Operator CLI for the fleet capacity controller", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081", env = "FLEETCTL_URL")]
    url: String,

    #[arg(short, long, env = "FLEETCTL_API_KEY")]
    key: String,

    /// Recorded as the author of capacity changes
    #[arg(long, env = "USER", default_value = "fleetctl")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fleet summary and last reconcile cycle
    Status,
    /// Members with health, lifecycle and in-flight requests
    Members,
    /// Listener rules and the healthy target set
    Routes,
    /// Current desired capacity record
    Capacity,
    /// Every recorded capacity version
    Versions,
    /// Set the desired member count
    Scale { desired: u32 },
    /// Re-apply the capacity recorded at VERSION
    Rollback { version: u64 },
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
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Members => client.get(format!("{}/admin/members", base)),
        Commands::Routes => client.get(format!("{}/admin/routes", base)),
        Commands::Capacity => client.get(format!("{}/admin/capacity", base)),
        Commands::Versions => client.get(format!("{}/admin/capacity/versions", base)),
        Commands::Scale { desired } => client
            .put(format!("{}/admin/capacity", base))
            .json(&json!({ "desired": desired, "actor": cli.actor })),
        Commands::Rollback { version } => client
            .post(format!("{}/admin/capacity/rollback", base))
            .json(&json!({ "version": version, "actor": cli.actor })),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
