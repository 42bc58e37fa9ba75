// SPDX-License-Identifier: Apache-2.0

use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::exporters::lumberjack::errors::PublisherError;

#[derive(Default)]
pub struct TlsConfig {
    ca_certificates: Vec<CertificateDer<'static>>, // if empty, it will use native roots
    identity: Option<ClientIdentity>,
}

struct ClientIdentity(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

/// PEM file locations for the client side of the connection.
#[derive(Clone, Default)]
pub struct TlsConfigBuilder {
    ca: Option<PathBuf>,
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
}

impl TlsConfig {
    pub fn builder() -> TlsConfigBuilder {
        Default::default()
    }

    pub fn into_client_config(self) -> Result<Arc<ClientConfig>, PublisherError> {
        let mut root_store = RootCertStore::empty();

        if self.ca_certificates.is_empty() {
            let native = rustls_native_certs::load_native_certs();
            for e in &native.errors {
                debug!(error = %e, "Failed to load a native root certificate.");
            }
            let (added, ignored) = root_store.add_parsable_certificates(native.certs);
            if added == 0 {
                warn!(ignored, "No usable native root certificates found.");
            }
        } else {
            for cert in self.ca_certificates {
                root_store
                    .add(cert)
                    .map_err(|e| PublisherError::Tls(format!("invalid CA certificate: {}", e)))?;
            }
        }

        let builder = ClientConfig::builder().with_root_certificates(root_store);
        let client_config = match self.identity {
            Some(ClientIdentity(certs, key)) => builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| PublisherError::Tls(format!("invalid client identity: {}", e)))?,
            None => builder.with_no_client_auth(),
        };

        Ok(Arc::new(client_config))
    }
}

impl TlsConfigBuilder {
    pub fn with_cert_file(mut self, cert_file: impl Into<PathBuf>) -> Self {
        self.cert = Some(cert_file.into());
        self
    }

    pub fn with_key_file(mut self, key_file: impl Into<PathBuf>) -> Self {
        self.key = Some(key_file.into());
        self
    }

    pub fn with_ca_file(mut self, ca_file: impl Into<PathBuf>) -> Self {
        self.ca = Some(ca_file.into());
        self
    }

    pub fn build(self) -> Result<TlsConfig, PublisherError> {
        let identity = match (self.cert, self.key) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(ClientIdentity(load_certs(&cert)?, load_key(&key)?)),
            _ => {
                return Err(PublisherError::Config(
                    "either both or neither of ssl certificate and ssl key must be provided"
                        .to_string(),
                ));
            }
        };

        let ca_certificates = match &self.ca {
            Some(ca) => load_certs(ca)?,
            None => Vec::new(),
        };

        Ok(TlsConfig {
            ca_certificates,
            identity,
        })
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, PublisherError> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .map_err(|e| {
            PublisherError::Config(format!("failed to load certificates from {}: {}", path.display(), e))
        })?;

    if certs.is_empty() {
        return Err(PublisherError::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, PublisherError> {
    PrivateKeyDer::from_pem_file(path)
        .map_err(|e| PublisherError::Config(format!("failed to load key from {}: {}", path.display(), e)))
}
