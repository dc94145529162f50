use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use decree_cli::{loader, serve};
use decree_storage::{EtcdKv, KvRulesetStore};

/// Decree rule engine toolchain.
#[derive(Parser)]
#[command(name = "decree", version, about = "Decree rule engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service in front of an etcd cluster.
    Serve {
        /// Listen address.
        #[arg(long, default_value = "0.0.0.0:5331", env = "DECREE_ADDR")]
        addr: String,
        /// Comma-separated etcd endpoints.
        #[arg(long, default_value = "127.0.0.1:2379", env = "DECREE_ETCD_ENDPOINTS")]
        etcd_endpoints: String,
        /// Key namespace prefix.
        #[arg(long, default_value = "decree", env = "DECREE_NAMESPACE")]
        namespace: String,
        /// Long-poll deadline of watch requests, in seconds.
        #[arg(long, default_value_t = 55, env = "DECREE_WATCH_TIMEOUT")]
        watch_timeout: u64,
    },

    /// Load a JSON snapshot of rulesets into the store.
    Load {
        /// Path to a JSON file mapping ruleset paths to rulesets.
        file: PathBuf,
        /// Comma-separated etcd endpoints.
        #[arg(long, default_value = "127.0.0.1:2379", env = "DECREE_ETCD_ENDPOINTS")]
        etcd_endpoints: String,
        /// Key namespace prefix.
        #[arg(long, default_value = "decree", env = "DECREE_NAMESPACE")]
        namespace: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Serve {
            addr,
            etcd_endpoints,
            namespace,
            watch_timeout,
        } => {
            let store = connect(&etcd_endpoints, &namespace).await?
                .with_watch_timeout(Duration::from_secs(watch_timeout));
            serve::start_server(&addr, Arc::new(store)).await
        }
        Commands::Load {
            file,
            etcd_endpoints,
            namespace,
        } => {
            let store = connect(&etcd_endpoints, &namespace).await?;
            let reader = std::fs::File::open(&file)?;
            let report = loader::load_snapshot(&store, reader).await?;
            eprintln!(
                "loaded {} ruleset(s), {} unchanged",
                report.written, report.unchanged
            );
            Ok(())
        }
    }
}

async fn connect(
    endpoints: &str,
    namespace: &str,
) -> Result<KvRulesetStore<EtcdKv>, Box<dyn std::error::Error>> {
    let endpoints: Vec<String> = endpoints.split(',').map(|s| s.trim().to_string()).collect();
    let kv = EtcdKv::connect(&endpoints).await?;
    Ok(KvRulesetStore::new(kv, namespace))
}
