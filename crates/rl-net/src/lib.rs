//! ---
//! rl_section: "02-remote-api"
//! rl_subsection: "module"
//! rl_type: "source"
//! rl_scope: "code"
//! rl_description: "Client connection setup and call helpers."
//! rl_version: "v0.1.0"
//! rl_owner: "tbd"
//! ---
//! Connection setup for the racelog gRPC endpoints.
//!
//! Dials a server with TLS (the default) or plaintext, optionally using a
//! custom root CA and client certificate, and provides the metadata helper
//! that attaches the configured `api-token` to outgoing requests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tonic::metadata::MetadataValue;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tonic::{IntoRequest, Request};
use tracing::debug;

use rl_proto::common::v1::{event_selector, EventSelector};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while establishing a client connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid endpoint address '{addr}': {source}")]
    InvalidAddress {
        addr: String,
        source: tonic::transport::Error,
    },
    #[error("unable to read TLS material from {path}: {source}")]
    TlsMaterial {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("transport setup failed: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// Options controlling how a connection is dialed.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    tls_enabled: bool,
    ca: Option<PathBuf>,
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
    domain: Option<String>,
}

impl ClientOptions {
    /// TLS-enabled options without custom certificate material.
    pub fn new() -> Self {
        Self {
            tls_enabled: true,
            ..Self::default()
        }
    }

    /// Enable or disable TLS (plaintext is intended for development only).
    pub fn with_tls_enabled(mut self, enabled: bool) -> Self {
        self.tls_enabled = enabled;
        self
    }

    /// Use a custom root CA certificate (PEM file).
    pub fn with_ca<P: AsRef<Path>>(mut self, ca: P) -> Self {
        self.ca = Some(ca.as_ref().to_path_buf());
        self
    }

    /// Present a client certificate (PEM cert + key files).
    pub fn with_client_cert<P: AsRef<Path>>(mut self, cert: P, key: P) -> Self {
        self.cert = Some(cert.as_ref().to_path_buf());
        self.key = Some(key.as_ref().to_path_buf());
        self
    }

    /// Override the domain name used for certificate verification.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// Dial `addr` and return a lazily connecting channel.
///
/// The address may omit the scheme; `https://` or `http://` is derived from
/// the TLS setting. The channel connects on first use, so a replay task can
/// be constructed before the server is reachable.
pub async fn connect(addr: &str, options: ClientOptions) -> Result<Channel, ConnectError> {
    let uri = normalize_addr(addr, options.tls_enabled);
    let mut endpoint =
        Endpoint::from_shared(uri.clone()).map_err(|source| ConnectError::InvalidAddress {
            addr: uri.clone(),
            source,
        })?;
    endpoint = endpoint.connect_timeout(CONNECT_TIMEOUT);

    if options.tls_enabled {
        let mut tls = ClientTlsConfig::new();
        if let Some(ca) = &options.ca {
            let pem = read_pem(ca).await?;
            tls = tls.ca_certificate(Certificate::from_pem(pem));
        }
        if let (Some(cert), Some(key)) = (&options.cert, &options.key) {
            let cert_pem = read_pem(cert).await?;
            let key_pem = read_pem(key).await?;
            tls = tls.identity(Identity::from_pem(cert_pem, key_pem));
        }
        if let Some(domain) = &options.domain {
            tls = tls.domain_name(domain.clone());
        }
        endpoint = endpoint.tls_config(tls)?;
        debug!(addr = %uri, "TLS enabled");
    } else {
        debug!(addr = %uri, "TLS disabled");
    }

    Ok(endpoint.connect_lazy())
}

async fn read_pem(path: &Path) -> Result<Vec<u8>, ConnectError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| ConnectError::TlsMaterial {
            path: path.to_path_buf(),
            source,
        })
}

fn normalize_addr(addr: &str, tls: bool) -> String {
    if addr.contains("://") {
        return addr.to_owned();
    }
    if tls {
        format!("https://{addr}")
    } else {
        format!("http://{addr}")
    }
}

/// Wrap `message` in a [`Request`], attaching the `api-token` metadata entry
/// when a token is configured.
pub fn with_api_token<T: IntoRequest<T>>(message: T, token: Option<&str>) -> Request<T> {
    let mut request = message.into_request();
    if let Some(token) = token {
        match MetadataValue::try_from(token) {
            Ok(value) => {
                request.metadata_mut().insert("api-token", value);
            }
            Err(_) => debug!("api token contains non-ascii characters; not attached"),
        }
    }
    request
}

/// Resolve a CLI event argument into a selector: numeric values select by id,
/// anything else by registration key.
pub fn resolve_event(arg: &str) -> EventSelector {
    if let Ok(id) = arg.parse::<i32>() {
        return EventSelector {
            arg: Some(event_selector::Arg::Id(id)),
        };
    }
    EventSelector {
        arg: Some(event_selector::Arg::Key(arg.to_owned())),
    }
}
