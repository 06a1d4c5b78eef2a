use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

use crate::limits::DEFAULT_COMPACT_THRESHOLD;

/// Server settings, read from `ROOMBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            bind: lookup("ROOMBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_var(&lookup, "ROOMBOOK_PORT").unwrap_or(5433),
            data_dir: lookup("ROOMBOOK_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            password: lookup("ROOMBOOK_PASSWORD").unwrap_or_else(|| "roombook".into()),
            max_connections: parse_var(&lookup, "ROOMBOOK_MAX_CONNECTIONS")
                .map(|n: usize| n.max(1))
                .unwrap_or(256),
            compact_threshold: parse_var(&lookup, "ROOMBOOK_COMPACT_THRESHOLD")
                .unwrap_or(DEFAULT_COMPACT_THRESHOLD),
            metrics_port: parse_var(&lookup, "ROOMBOOK_METRICS_PORT"),
            tls_cert: lookup("ROOMBOOK_TLS_CERT"),
            tls_key: lookup("ROOMBOOK_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }

    /// TLS acceptor from the configured PEM files, if any.
    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        let (cert_path, key_path) = match (&self.tls_cert, &self.tls_key) {
            (None, None) => return Ok(None),
            (Some(c), Some(k)) => (c, k),
            _ => {
                return Err(io::Error::new(
                    ErrorKind::InvalidInput,
                    "set both ROOMBOOK_TLS_CERT and ROOMBOOK_TLS_KEY, or neither",
                ));
            }
        };

        let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<Result<_, _>>()?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key in key file"))?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
        config.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(Some(TlsAcceptor::from(Arc::new(config))))
    }
}
