use crate::error::FlowError;
use crate::net::Endpoint;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tracing::debug;

pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

pub type BoxedStream = Box<dyn ByteStream>;

/// Сетевой слой, через который провайдеры и клиент сигнального сервера
/// открывают соединения. Тесты подменяют его сценарием.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr>;

    async fn connect(&self, endpoint: &Endpoint, addr: SocketAddr) -> io::Result<BoxedStream>;
}

/// Клиентский TLS с корнями webpki, общий для всех соединений.
static TLS_CONNECTOR: LazyLock<Result<TlsConnector, rustls::Error>> = LazyLock::new(|| {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
});

/// TCP поверх tokio; для `https` поверх него поднимается TLS (rustls).
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}")))
    }

    async fn connect(&self, endpoint: &Endpoint, addr: SocketAddr) -> io::Result<BoxedStream> {
        debug!("Connecting to {} ({})", endpoint.host(), addr);
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        if !endpoint.is_tls() {
            return Ok(Box::new(stream));
        }

        let connector = TLS_CONNECTOR
            .as_ref()
            .map_err(|e| io::Error::other(e.clone()))?;
        let host = endpoint.host().trim_start_matches('[').trim_end_matches(']');
        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let stream = connector.connect(server_name, stream).await?;
        debug!("TLS session established with {}", endpoint.host());
        Ok(Box::new(stream))
    }
}

/// Адрес endpoint'а: литерал из URI либо результат DNS-запроса.
pub async fn resolve_endpoint(
    transport: &dyn Transport,
    endpoint: &Endpoint,
) -> Result<SocketAddr, FlowError> {
    if let Some(addr) = endpoint.resolved_addr() {
        return Ok(addr);
    }
    transport
        .resolve(endpoint.host(), endpoint.port())
        .await
        .map_err(|source| FlowError::Resolve {
            host: endpoint.host().to_owned(),
            source,
        })
}

pub async fn connect_endpoint(
    transport: &dyn Transport,
    endpoint: &Endpoint,
    addr: SocketAddr,
) -> Result<BoxedStream, FlowError> {
    transport
        .connect(endpoint, addr)
        .await
        .map_err(|source| FlowError::Connect { addr, source })
}
