use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use verifact::db::AnalysisDb;
use verifact::registry::AgentRegistry;
use verifact::server::{start_server, ServerConfig};
use verifact::sessions::SessionProvider;

#[derive(Parser)]
#[command(name = "verifact")]
#[command(version, about = "Multi-agent document analysis service")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the analysis API server
    Serve {
        /// Port to serve on
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Database path
        #[arg(long, default_value = "data/verifact.db")]
        db_path: PathBuf,

        /// Directory for uploaded documents
        #[arg(long, default_value = "data/documents")]
        documents_dir: PathBuf,

        /// Agent definitions file
        #[arg(long, default_value = "config/agents.yaml")]
        agents_config: PathBuf,

        /// Tool server definitions file
        #[arg(long, default_value = "config/tool_servers.yaml")]
        servers_config: PathBuf,

        /// Enable dev mode (bind all interfaces, CORS permissive)
        #[arg(long)]
        dev: bool,
    },
    /// Validate agent and tool server configuration files
    CheckConfig {
        /// Agent definitions file
        #[arg(long, default_value = "config/agents.yaml")]
        agents_config: PathBuf,

        /// Tool server definitions file
        #[arg(long, default_value = "config/tool_servers.yaml")]
        servers_config: PathBuf,
    },
    /// Create the database schema without starting the server
    InitDb {
        /// Database path
        #[arg(long, default_value = "data/verifact.db")]
        db_path: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "verifact=debug"
    } else {
        "verifact=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve {
            port,
            db_path,
            documents_dir,
            agents_config,
            servers_config,
            dev,
        } => {
            start_server(ServerConfig {
                port,
                db_path,
                documents_dir,
                agents_config,
                servers_config,
                dev_mode: dev,
            })
            .await?;
        }
        Commands::CheckConfig {
            agents_config,
            servers_config,
        } => {
            let registry = AgentRegistry::load(&agents_config)?;
            println!(
                "Loaded {} agent definitions from {}",
                registry.len(),
                agents_config.display()
            );
            let sessions = SessionProvider::load(&servers_config)?;
            println!(
                "Loaded {} tool server entries from {}",
                sessions.server_count(),
                servers_config.display()
            );
        }
        Commands::InitDb { db_path } => {
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            AnalysisDb::new(&db_path)?;
            println!("Database initialized at {}", db_path.display());
        }
    }

    Ok(())
}
