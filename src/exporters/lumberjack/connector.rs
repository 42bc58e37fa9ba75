// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::exporters::lumberjack::errors::PublisherError;

/// Opens the byte stream a publisher talks to a collector over, in two
/// steps so the publisher can tell a failed connect from a failed handshake.
pub trait Connector: Send {
    /// Connected but not yet secured.
    type Transport: Send;
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect to `addr` within `deadline`.
    fn open(
        &mut self,
        addr: SocketAddr,
        deadline: Duration,
    ) -> impl Future<Output = Result<Self::Transport, PublisherError>> + Send;

    /// Secure `transport`, identifying the peer as `host`, within `deadline`.
    fn handshake(
        &mut self,
        host: &str,
        transport: Self::Transport,
        deadline: Duration,
    ) -> impl Future<Output = Result<Self::Stream, PublisherError>> + Send;
}

/// TCP followed by a TLS handshake, verifying the peer against `host`.
#[derive(Clone)]
pub struct TlsTcpConnector {
    connector: TlsConnector,
}

impl TlsTcpConnector {
    pub fn new(client_config: Arc<ClientConfig>) -> Self {
        Self {
            connector: TlsConnector::from(client_config),
        }
    }
}

impl Connector for TlsTcpConnector {
    type Transport = TcpStream;
    type Stream = TlsStream<TcpStream>;

    async fn open(&mut self, addr: SocketAddr, deadline: Duration) -> Result<TcpStream, PublisherError> {
        let tcp_stream = timeout(deadline, TcpStream::connect(addr))
            .await
            .map_err(|_| PublisherError::Timeout("TCP connect"))??;
        tcp_stream.set_nodelay(true)?;
        Ok(tcp_stream)
    }

    fn handshake(
        &mut self,
        host: &str,
        transport: TcpStream,
        deadline: Duration,
    ) -> impl Future<Output = Result<Self::Stream, PublisherError>> + Send {
        let connector = self.connector.clone();
        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|e| PublisherError::Tls(format!("invalid server name {}: {}", host, e)));

        async move {
            timeout(deadline, connector.connect(server_name?, transport))
                .await
                .map_err(|_| PublisherError::Timeout("TLS handshake"))?
                .map_err(|e| PublisherError::Tls(format!("handshake failed: {}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporters::lumberjack::tls::TlsConfig;
    use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};
    use rustls::server::WebPkiClientVerifier;
    use rustls::{RootCertStore, ServerConfig};
    use rustls_pki_types::pem::PemObject;
    use rustls_pki_types::{CertificateDer, PrivateKeyDer};
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    const DEADLINE: Duration = Duration::from_secs(5);

    struct Authority {
        cert: Certificate,
        key: KeyPair,
    }

    impl Authority {
        fn new(name: &str) -> Self {
            let mut params = CertificateParams::default();
            params.distinguished_name.push(DnType::CommonName, name);
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            let key = KeyPair::generate().unwrap();
            let cert = params.self_signed(&key).unwrap();
            Self { cert, key }
        }

        /// Leaf certificate for `name`, signed by this authority.
        fn issue(&self, name: &str) -> (Certificate, KeyPair) {
            let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
            params.distinguished_name.push(DnType::CommonName, name);
            let key = KeyPair::generate().unwrap();
            let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
            (cert, key)
        }

        fn roots(&self) -> RootCertStore {
            let mut roots = RootCertStore::empty();
            roots.add(self.cert.der().clone()).unwrap();
            roots
        }
    }

    fn rustls_pair(cert: &Certificate, key: &KeyPair) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        let key = PrivateKeyDer::from_pem_slice(key.serialize_pem().as_bytes()).unwrap();
        (vec![cert.der().clone()], key)
    }

    fn write_pem(dir: &TempDir, name: &str, pem: String) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, pem).unwrap();
        path
    }

    /// Accepts one connection and writes `ok` once the handshake completes.
    async fn serve_once(config: ServerConfig) -> SocketAddr {
        let acceptor = TlsAcceptor::from(Arc::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            if let Ok(mut tls) = acceptor.accept(tcp).await {
                let _ = tls.write_all(b"ok").await;
                let _ = tls.flush().await;
            }
        });
        addr
    }

    fn server_config(authority: &Authority) -> ServerConfig {
        let (cert, key) = authority.issue("localhost");
        let (chain, key) = rustls_pair(&cert, &key);
        ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .unwrap()
    }

    fn connector(tls: TlsConfig) -> TlsTcpConnector {
        TlsTcpConnector::new(tls.into_client_config().unwrap())
    }

    async fn read_ok(stream: &mut TlsStream<TcpStream>) {
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(b"ok", &buf);
    }

    #[tokio::test]
    async fn handshake_succeeds_against_configured_ca() {
        crate::crypto::init_crypto_provider().unwrap();
        let authority = Authority::new("logship test CA");
        let addr = serve_once(server_config(&authority)).await;

        let dir = TempDir::new().unwrap();
        let ca = write_pem(&dir, "ca.pem", authority.cert.pem());
        let mut connector = connector(TlsConfig::builder().with_ca_file(ca).build().unwrap());

        let tcp = connector.open(addr, DEADLINE).await.unwrap();
        let mut tls = connector.handshake("localhost", tcp, DEADLINE).await.unwrap();
        read_ok(&mut tls).await;
    }

    #[tokio::test]
    async fn untrusted_server_fails_handshake() {
        crate::crypto::init_crypto_provider().unwrap();
        let addr = serve_once(server_config(&Authority::new("someone else"))).await;

        let dir = TempDir::new().unwrap();
        let ca = write_pem(&dir, "ca.pem", Authority::new("logship test CA").cert.pem());
        let mut connector = connector(TlsConfig::builder().with_ca_file(ca).build().unwrap());

        let tcp = connector.open(addr, DEADLINE).await.unwrap();
        match connector.handshake("localhost", tcp, DEADLINE).await {
            Err(PublisherError::Tls(msg)) => assert!(msg.contains("handshake failed"), "{}", msg),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("handshake with an untrusted server succeeded"),
        }
    }

    #[tokio::test]
    async fn server_name_must_match_certificate() {
        crate::crypto::init_crypto_provider().unwrap();
        let authority = Authority::new("logship test CA");
        let addr = serve_once(server_config(&authority)).await;

        let dir = TempDir::new().unwrap();
        let ca = write_pem(&dir, "ca.pem", authority.cert.pem());
        let mut connector = connector(TlsConfig::builder().with_ca_file(ca).build().unwrap());

        let tcp = connector.open(addr, DEADLINE).await.unwrap();
        let res = connector.handshake("collector.internal", tcp, DEADLINE).await;
        assert!(matches!(res, Err(PublisherError::Tls(_))));
    }

    #[tokio::test]
    async fn client_certificate_is_presented() {
        crate::crypto::init_crypto_provider().unwrap();
        let authority = Authority::new("logship test CA");
        let (cert, key) = authority.issue("localhost");
        let (chain, server_key) = rustls_pair(&cert, &key);
        let verifier = WebPkiClientVerifier::builder(Arc::new(authority.roots()))
            .build()
            .unwrap();
        let config = ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(chain, server_key)
            .unwrap();
        let addr = serve_once(config).await;

        let dir = TempDir::new().unwrap();
        let (client_cert, client_key) = authority.issue("agent.internal");
        let tls = TlsConfig::builder()
            .with_ca_file(write_pem(&dir, "ca.pem", authority.cert.pem()))
            .with_cert_file(write_pem(&dir, "cert.pem", client_cert.pem()))
            .with_key_file(write_pem(&dir, "key.pem", client_key.serialize_pem()))
            .build()
            .unwrap();
        let mut connector = connector(tls);

        let tcp = connector.open(addr, DEADLINE).await.unwrap();
        let mut tls = connector.handshake("localhost", tcp, DEADLINE).await.unwrap();
        read_ok(&mut tls).await;
    }

    #[tokio::test]
    async fn refused_connection_is_an_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        crate::crypto::init_crypto_provider().unwrap();
        let authority = Authority::new("logship test CA");
        let dir = TempDir::new().unwrap();
        let ca = write_pem(&dir, "ca.pem", authority.cert.pem());
        let mut connector = connector(TlsConfig::builder().with_ca_file(ca).build().unwrap());

        assert!(matches!(connector.open(addr, DEADLINE).await, Err(PublisherError::Io(_))));
    }
}
