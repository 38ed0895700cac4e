//! Server peer entry point

// Use mimalloc as global allocator for better p99 latency
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use ssgate::crypto::KeyCache;
use ssgate::dns::Resolver;
use ssgate::inbound::InboundListener;
use ssgate::server::Server;
use ssgate::{Config, VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ssserver")]
#[command(version = VERSION)]
#[command(about = "Server peer: decrypts tunnel streams and relays upstream")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", default_value = "config.yaml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    // Install aws-lc-rs as the default crypto provider for rustls
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .enable_all()
        .thread_name("ssgate-worker")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match Config::load(args.config.to_str().unwrap_or("config.yaml")) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let log_level = config.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("ssgate={}", log_level).parse()?),
        )
        .init();

    info!("ssgate server v{}", VERSION);
    info!("configuration loaded from: {}", args.config.display());

    let keys = KeyCache::new();
    let resolver = match Resolver::new(&config.nameserver) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!("failed to initialize resolver: {}", e);
            std::process::exit(1);
        }
    };

    let server = match Server::new(&config, &keys, resolver) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("failed to initialize server: {}", e);
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = server.start() => {
            if let Err(e) = result {
                error!("server error: {}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            let _ = server.stop().await;
        }
    }

    Ok(())
}
