use crate::error::ConfigError;
use std::net::{IpAddr, SocketAddr};
use url::{Host, Url};

/// Адрес HTTP-сервиса, разобранный из URI конфигурации.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    host: String,
    ip: Option<IpAddr>,
    port: u16,
}

impl Endpoint {
    /// Порт берется из URI, иначе 443 для https и 80 для всего остального.
    pub fn parse(uri: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(uri.trim()).map_err(|source| ConfigError::InvalidUri {
            uri: uri.to_owned(),
            source,
        })?;

        let (host, ip) = match url.host() {
            Some(Host::Domain(domain)) => (domain.to_owned(), None),
            Some(Host::Ipv4(addr)) => (addr.to_string(), Some(IpAddr::V4(addr))),
            Some(Host::Ipv6(addr)) => (addr.to_string(), Some(IpAddr::V6(addr))),
            None => return Err(ConfigError::MissingHost(uri.to_owned())),
        };

        let default_port = if url.scheme() == "https" { 443 } else { 80 };
        let port = url.port().unwrap_or(default_port);

        Ok(Self {
            url,
            host,
            ip,
            port,
        })
    }

    /// Endpoint на `host:port` без пути, для сигнального сервера.
    pub fn from_host_port(host: &str, port: u16) -> Result<Self, ConfigError> {
        if host.trim().is_empty() {
            return Err(ConfigError::EmptyField("server"));
        }
        let host = host.trim();
        if host.contains("://") {
            let mut endpoint = Self::parse(host)?;
            endpoint.port = port;
            return Ok(endpoint);
        }
        Self::parse(&format!("http://{host}:{port}/"))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.url.scheme(), "https" | "wss")
    }

    /// Хост задан именем, и перед подключением нужен DNS-запрос.
    pub fn is_unresolved(&self) -> bool {
        self.ip.is_none()
    }

    pub fn resolved_addr(&self) -> Option<SocketAddr> {
        self.ip.map(|ip| SocketAddr::new(ip, self.port))
    }

    /// Значение заголовка `Host`.
    pub fn authority(&self) -> String {
        let host = match self.ip {
            Some(IpAddr::V6(addr)) => format!("[{addr}]"),
            _ => self.host.clone(),
        };
        let default_port = if self.is_tls() { 443 } else { 80 };
        if self.port == default_port {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// Путь запроса вместе с query.
    pub fn target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_owned(),
        }
    }

    pub fn with_query_pair(&self, key: &str, value: &str) -> Self {
        let mut next = self.clone();
        next.url.query_pairs_mut().append_pair(key, value);
        next
    }
}
