//! Listener binding, plain or TLS.

use crate::config::{ServerConfig, TlsConfig};
use crate::error::ServerError;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

/// A bound listener, with the TLS acceptor when TLS material was configured.
pub(crate) struct Listener {
    tcp: TcpListener,
    tls: Option<TlsAcceptor>,
}

/// An accepted connection.
pub(crate) enum Accepted {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Listener {
    /// Binds the configured address.
    ///
    /// TLS material is validated first, so a bad certificate never leaves a
    /// bound socket behind.
    pub(crate) async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let tls = config.tls().map(acceptor).transpose()?;

        let tcp = TcpListener::bind((config.bind_host(), config.port()))
            .await
            .map_err(|source| ServerError::Listener {
                address: config.address().to_string(),
                source,
            })?;

        Ok(Self { tcp, tls })
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub(crate) fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Accepts the next TCP connection.
    pub(crate) async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.tcp.accept().await
    }

    /// Completes the handshake of an accepted stream when TLS is enabled.
    pub(crate) fn handshake(
        &self,
        stream: TcpStream,
    ) -> impl std::future::Future<Output = io::Result<Accepted>> + Send + 'static {
        let tls = self.tls.clone();
        async move {
            match tls {
                Some(acceptor) => {
                    let stream = acceptor.accept(stream).await?;
                    Ok(Accepted::Tls(Box::new(stream)))
                }
                None => Ok(Accepted::Plain(stream)),
            }
        }
    }
}

fn acceptor(tls: &TlsConfig) -> Result<TlsAcceptor, ServerError> {
    let certs = rustls_pemfile::certs(&mut tls.cert_pem())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("unreadable certificate: {e}")))?;
    if certs.is_empty() {
        return Err(ServerError::Tls("no certificate found".to_string()));
    }

    let key = rustls_pemfile::private_key(&mut tls.key_pem())
        .map_err(|e| ServerError::Tls(format!("unreadable private key: {e}")))?
        .ok_or_else(|| ServerError::Tls("no private key found".to_string()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut server_config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))?;
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}
