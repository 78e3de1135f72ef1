//! Command-line surface: one `clap` flag per config key named in the
//! external-interfaces section, folded into an `injector_core::config::FileConfig`
//! so it can be merged under whatever `--config` TOML file the operator points
//! at (CLI wins, matching `InjectorConfig::load`'s merge order).

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use injector_core::config::FileConfig;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Ouinet-compatible HTTP injector node", long_about = None)]
pub struct Args {
    /// Repository directory holding persisted state (signing key, endpoint files).
    #[clap(long)]
    pub repo: PathBuf,

    /// Optional TOML config file, merged under the CLI flags given here.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Dump the fully-merged, validated config as JSON and exit.
    #[clap(long)]
    pub print_config: bool,

    #[clap(long)]
    pub listen_on_tcp: Option<SocketAddr>,
    #[clap(long)]
    pub listen_on_tcp_tls: Option<String>,
    #[clap(long)]
    pub listen_on_utp: Option<String>,
    #[clap(long)]
    pub listen_on_utp_tls: Option<String>,
    #[clap(long)]
    pub listen_on_i2p: bool,
    #[clap(long)]
    pub listen_on_obfs2: Option<String>,
    #[clap(long)]
    pub listen_on_obfs3: Option<String>,
    #[clap(long)]
    pub listen_on_obfs4: Option<String>,
    #[clap(long)]
    pub listen_on_lampshade: Option<String>,
    #[clap(long)]
    pub listen_on_bep5: Option<String>,

    /// Repeatable `user:pass` credential accepted over Basic auth.
    #[clap(long = "credential")]
    pub credentials: Vec<String>,

    #[clap(long)]
    pub open_file_limit: Option<u64>,

    #[clap(long)]
    pub cache_private_key: Option<PathBuf>,
}

impl Args {
    pub fn into_file_config(self) -> FileConfig {
        FileConfig {
            listen_on_tcp: self.listen_on_tcp,
            listen_on_tcp_tls: self.listen_on_tcp_tls,
            listen_on_utp: self.listen_on_utp,
            listen_on_utp_tls: self.listen_on_utp_tls,
            listen_on_i2p: if self.listen_on_i2p { Some(true) } else { None },
            listen_on_obfs2: self.listen_on_obfs2,
            listen_on_obfs3: self.listen_on_obfs3,
            listen_on_obfs4: self.listen_on_obfs4,
            listen_on_lampshade: self.listen_on_lampshade,
            listen_on_bep5: self.listen_on_bep5,
            credentials: self.credentials,
            open_file_limit: self.open_file_limit,
            cache_private_key: self.cache_private_key,
        }
    }
}
