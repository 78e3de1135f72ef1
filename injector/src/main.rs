use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rustls::RootCertStore;
use tracing_subscriber::EnvFilter;

use injector_core::config::{load_conf_file, FileConfig, InjectorConfig};
use injector_core::signing::InjectorKey;
use injector_core::transport::{TcpTransport, Transport};
use injector_services::accept;
use injector_services::common::CancelToken;
use injector_services::pool::ConnPool;

mod cli;
mod shutdown;

use cli::Args;

#[monoio::main(timer_enabled = true)]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let repo = args.repo.clone();
    let config_path = args.config.clone();
    let print_config = args.print_config;

    let file_from_disk = match &config_path {
        Some(path) => load_conf_file(path).with_context(|| format!("reading config file {}", path.display()))?,
        None => FileConfig::default(),
    };
    let cli_config = args.into_file_config();
    let config = InjectorConfig::load(repo.clone(), file_from_disk, cli_config).await?;

    if print_config {
        println!("{}", config_summary_json(&config));
        return Ok(());
    }

    if config.open_file_limit.is_some() {
        apply_open_file_limit(&config)?;
    }

    let key = InjectorKey::load_or_generate(&config.key_path()).await?;
    tracing::info!(key_id = %key.key_id(), "injector signing identity ready");

    let roots = Arc::new(load_native_roots()?);
    let pool = ConnPool::new();
    let cancel = CancelToken::new();
    shutdown::watch(cancel.clone())?;

    let addr: SocketAddr = config
        .listen_on_tcp
        .expect("validated by InjectorConfig::from_file_config");
    let transport = TcpTransport::bind(addr)?;
    let bound_addr = transport.local_addr()?;
    std::fs::create_dir_all(&repo)?;
    std::fs::write(config.endpoint_tcp_path(), bound_addr.to_string())?;
    tracing::info!(%bound_addr, "listening");

    let config = Rc::new(config);
    accept::run(transport, config, key, pool, roots, cancel).await;
    Ok(())
}

fn config_summary_json(config: &InjectorConfig) -> serde_json::Value {
    serde_json::json!({
        "repo": config.repo,
        "listen_on_tcp": config.listen_on_tcp.map(|a| a.to_string()),
        "credentials": config.credentials.iter().map(|c| &c.user).collect::<Vec<_>>(),
        "open_file_limit": config.open_file_limit,
        "cache_private_key": config.cache_private_key,
        "supported_version": config.supported_version,
    })
}

fn load_native_roots() -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs().context("loading platform root certificates")?;
    for cert in certs {
        roots.add(&cert).ok();
    }
    Ok(roots)
}

fn apply_open_file_limit(config: &InjectorConfig) -> Result<()> {
    let limit = config.open_file_limit.expect("checked by caller");
    rlimit::setrlimit(rlimit::Resource::NOFILE, limit, limit).context("raising open file limit")
}
