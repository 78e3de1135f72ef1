//! Configuration surface, mirroring the CLI/config keys this injector
//! accepts, merged from a `clap`-parsed CLI struct and an optional
//! `ouinet-injector.conf`-equivalent TOML file found under the repo
//! directory (CLI wins over file, matching the merge order of the original
//! `injector.cpp`'s `boost::program_options` file-then-CLI layering, here
//! inverted because `clap` already owns argv and we only fold the file in
//! for keys the user didn't pass).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::AnyResult;

/// Basic credential pair for `Proxy-Authorization: Basic`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub user: String,
    pub pass: String,
}

impl Credential {
    pub fn parse(s: &str) -> AnyResult<Self> {
        let (user, pass) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("credential must be in user:pass form: {s:?}"))?;
        Ok(Self {
            user: user.to_string(),
            pass: pass.to_string(),
        })
    }
}

/// Transports named in the external-interface surface beyond plain TCP.
/// Only `Tcp` is actually implementable in this build; the rest are
/// accepted as config so operators get a clear "not implemented" error
/// instead of a silently-ignored flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnimplementedTransport {
    TcpTls,
    Utp,
    UtpTls,
    I2p,
    Obfs2,
    Obfs3,
    Obfs4,
    Lampshade,
    Bep5,
}

impl std::fmt::Display for UnimplementedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TcpTls => "listen-on-tcp-tls",
            Self::Utp => "listen-on-utp",
            Self::UtpTls => "listen-on-utp-tls",
            Self::I2p => "listen-on-i2p",
            Self::Obfs2 => "listen-on-obfs2",
            Self::Obfs3 => "listen-on-obfs3",
            Self::Obfs4 => "listen-on-obfs4",
            Self::Lampshade => "listen-on-lampshade",
            Self::Bep5 => "listen-on-bep5",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub listen_on_tcp: Option<SocketAddr>,
    pub listen_on_tcp_tls: Option<String>,
    pub listen_on_utp: Option<String>,
    pub listen_on_utp_tls: Option<String>,
    pub listen_on_i2p: Option<bool>,
    pub listen_on_obfs2: Option<String>,
    pub listen_on_obfs3: Option<String>,
    pub listen_on_obfs4: Option<String>,
    pub listen_on_lampshade: Option<String>,
    pub listen_on_bep5: Option<String>,
    #[serde(default)]
    pub credentials: Vec<String>,
    pub open_file_limit: Option<u64>,
    pub cache_private_key: Option<PathBuf>,
}

/// Fully merged, validated configuration.
#[derive(Debug, Clone)]
pub struct InjectorConfig {
    pub repo: PathBuf,
    pub listen_on_tcp: Option<SocketAddr>,
    pub unimplemented: Vec<UnimplementedTransport>,
    pub credentials: Vec<Credential>,
    pub open_file_limit: Option<u64>,
    pub cache_private_key: Option<PathBuf>,
    pub supported_version: u32,
}

impl InjectorConfig {
    /// Read `repo/ouinet-injector.conf` if present, apply it under whatever
    /// the caller already decided from CLI flags, and validate.
    pub async fn load(repo: PathBuf, file: FileConfig, cli: FileConfig) -> AnyResult<Self> {
        let merged = merge(file, cli);
        Self::from_file_config(repo, merged)
    }

    pub fn from_file_config(repo: PathBuf, cfg: FileConfig) -> AnyResult<Self> {
        let mut unimplemented = Vec::new();
        if cfg.listen_on_tcp_tls.is_some() {
            unimplemented.push(UnimplementedTransport::TcpTls);
        }
        if cfg.listen_on_utp.is_some() {
            unimplemented.push(UnimplementedTransport::Utp);
        }
        if cfg.listen_on_utp_tls.is_some() {
            unimplemented.push(UnimplementedTransport::UtpTls);
        }
        if cfg.listen_on_i2p.unwrap_or(false) {
            unimplemented.push(UnimplementedTransport::I2p);
        }
        if cfg.listen_on_obfs2.is_some() {
            unimplemented.push(UnimplementedTransport::Obfs2);
        }
        if cfg.listen_on_obfs3.is_some() {
            unimplemented.push(UnimplementedTransport::Obfs3);
        }
        if cfg.listen_on_obfs4.is_some() {
            unimplemented.push(UnimplementedTransport::Obfs4);
        }
        if cfg.listen_on_lampshade.is_some() {
            unimplemented.push(UnimplementedTransport::Lampshade);
        }
        if cfg.listen_on_bep5.is_some() {
            unimplemented.push(UnimplementedTransport::Bep5);
        }

        if !unimplemented.is_empty() {
            anyhow::bail!(
                "transport(s) not implemented in this build: {}",
                unimplemented
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        if cfg.listen_on_tcp.is_none() {
            anyhow::bail!(
                "at least one of {{listen-on-tcp,listen-on-tcp-tls,listen-on-utp,listen-on-utp-tls,\
                 listen-on-i2p,listen-on-obfs2,listen-on-obfs3,listen-on-obfs4,listen-on-lampshade,\
                 listen-on-bep5}} must be provided"
            );
        }

        let credentials = cfg
            .credentials
            .iter()
            .map(|s| Credential::parse(s))
            .collect::<AnyResult<Vec<_>>>()?;

        Ok(Self {
            repo,
            listen_on_tcp: cfg.listen_on_tcp,
            unimplemented,
            credentials,
            open_file_limit: cfg.open_file_limit,
            cache_private_key: cfg.cache_private_key,
            supported_version: 6,
        })
    }

    pub fn key_path(&self) -> PathBuf {
        self.cache_private_key
            .clone()
            .unwrap_or_else(|| self.repo.join("ed25519-injector.key"))
    }

    pub fn endpoint_tcp_path(&self) -> PathBuf {
        self.repo.join("endpoint-tcp")
    }
}

fn merge(base: FileConfig, overlay: FileConfig) -> FileConfig {
    FileConfig {
        listen_on_tcp: overlay.listen_on_tcp.or(base.listen_on_tcp),
        listen_on_tcp_tls: overlay.listen_on_tcp_tls.or(base.listen_on_tcp_tls),
        listen_on_utp: overlay.listen_on_utp.or(base.listen_on_utp),
        listen_on_utp_tls: overlay.listen_on_utp_tls.or(base.listen_on_utp_tls),
        listen_on_i2p: overlay.listen_on_i2p.or(base.listen_on_i2p),
        listen_on_obfs2: overlay.listen_on_obfs2.or(base.listen_on_obfs2),
        listen_on_obfs3: overlay.listen_on_obfs3.or(base.listen_on_obfs3),
        listen_on_obfs4: overlay.listen_on_obfs4.or(base.listen_on_obfs4),
        listen_on_lampshade: overlay.listen_on_lampshade.or(base.listen_on_lampshade),
        listen_on_bep5: overlay.listen_on_bep5.or(base.listen_on_bep5),
        credentials: if overlay.credentials.is_empty() {
            base.credentials
        } else {
            overlay.credentials
        },
        open_file_limit: overlay.open_file_limit.or(base.open_file_limit),
        cache_private_key: overlay.cache_private_key.or(base.cache_private_key),
    }
}

pub fn load_conf_file(path: &Path) -> AnyResult<FileConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_at_least_one_listener() {
        let cfg = FileConfig::default();
        let result = InjectorConfig::from_file_config(PathBuf::from("/tmp/repo"), cfg);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unimplemented_transport() {
        let mut cfg = FileConfig::default();
        cfg.listen_on_tcp = Some("127.0.0.1:7070".parse().unwrap());
        cfg.listen_on_i2p = Some(true);
        let result = InjectorConfig::from_file_config(PathBuf::from("/tmp/repo"), cfg);
        assert!(result.is_err());
    }

    #[test]
    fn parses_credential() {
        let c = Credential::parse("alice:s3cret").unwrap();
        assert_eq!(c.user, "alice");
        assert_eq!(c.pass, "s3cret");
    }

    #[test]
    fn cli_overrides_file() {
        let mut file = FileConfig::default();
        file.listen_on_tcp = Some("127.0.0.1:1".parse().unwrap());
        let mut cli = FileConfig::default();
        cli.listen_on_tcp = Some("127.0.0.1:2".parse().unwrap());
        let merged = merge(file, cli);
        assert_eq!(merged.listen_on_tcp.unwrap().port(), 2);
    }
}
