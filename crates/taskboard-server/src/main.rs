use std::net::SocketAddr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;

use taskboard_gateway::BackendConfig;
use taskboard_server::{auth, ServerConfig};
use taskboard_service::attachments::DEFAULT_BUCKET;
use taskboard_service::{AttachmentConfig, DeleteOrder};
use taskboard_store::StoreConfig;

#[derive(Parser)]
#[command(name = "taskboard-server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Address to bind
    #[arg(long, env = "TASKBOARD_BIND", default_value = "0.0.0.0")]
    bind: String,

    #[arg(long, env = "TASKBOARD_PORT", default_value_t = 3710)]
    port: u16,

    /// Key required on /api/admin routes. Admin routes are refused without one.
    #[arg(long, env = "TASKBOARD_ADMIN_KEY")]
    admin_key: Option<String>,

    /// Storage bucket for task attachments
    #[arg(long, env = "TASKBOARD_BUCKET", default_value = DEFAULT_BUCKET)]
    bucket: String,

    /// storage-first or metadata-first
    #[arg(long, env = "TASKBOARD_DELETE_ORDER", default_value = "storage-first")]
    delete_order: DeleteOrder,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new admin key
    Keygen,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Keygen) => {
            let raw_key = auth::generate_api_key();
            // Print the raw key to stdout so it can be captured
            println!("{raw_key}");
            eprintln!("sha256: {}", auth::sha256_hex(&raw_key));
            eprintln!("\nSet TASKBOARD_ADMIN_KEY to this value when starting the server.");
        }
        None => {
            let config = ServerConfig {
                backend: BackendConfig::from_env(),
                store: StoreConfig::from_env(),
                admin_key: cli.admin_key,
                attachments: AttachmentConfig {
                    bucket: cli.bucket,
                    delete_order: cli.delete_order,
                    ..Default::default()
                },
            };
            let state = taskboard_server::build_state(&config)?;

            let addr = SocketAddr::new(cli.bind.parse()?, cli.port);
            let listener = TcpListener::bind(addr).await?;
            info!("taskboard-server listening on http://{addr}");

            taskboard_server::serve(listener, state).await?;
        }
    }

    Ok(())
}
