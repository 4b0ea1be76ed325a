use crate::error::HttpError;
use crate::net::Endpoint;
use bytes::Bytes;
use http::header::{CONNECTION, HOST};
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::debug;

/// Один HTTP/1.1 запрос. Всегда уходит с `Connection: close`.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    target: String,
    host: String,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl HttpRequest {
    pub fn get(endpoint: &Endpoint) -> Self {
        Self {
            method: Method::GET,
            target: endpoint.target(),
            host: endpoint.authority(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn post(endpoint: &Endpoint, content_type: &str, body: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            target: endpoint.target(),
            host: endpoint.authority(),
            headers: vec![("Content-Type".to_owned(), content_type.to_owned())],
            body: Bytes::from(body.into()),
        }
    }

    /// POST с телом `application/x-www-form-urlencoded`.
    pub fn post_form(endpoint: &Endpoint, pairs: &[(&str, &str)]) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        Self::post(endpoint, "application/x-www-form-urlencoded", body)
    }

    pub fn put(endpoint: &Endpoint) -> Self {
        Self {
            method: Method::PUT,
            ..Self::get(endpoint)
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn to_hyper(&self) -> Result<Request<Full<Bytes>>, HttpError> {
        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(self.target.as_str())
            .header(HOST, self.host.as_str())
            .header(CONNECTION, "close");
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        Ok(builder.body(Full::new(self.body.clone()))?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl HttpResponse {
    pub fn status(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

/// HTTP/1.1 поверх уже открытого потока. Поток дает `Transport`, так что
/// TLS и подмена сети в тестах остаются за его пределами.
pub struct HttpTextClient {
    sender: http1::SendRequest<Full<Bytes>>,
    connection: JoinHandle<()>,
}

impl HttpTextClient {
    pub async fn handshake<S>(stream: S) -> Result<Self, HttpError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut builder = http1::Builder::new();
        builder.title_case_headers(true);
        let (sender, connection) = builder.handshake(TokioIo::new(stream)).await?;

        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("HTTP connection ended: {}", e);
            }
        });
        Ok(Self { sender, connection })
    }

    /// Отправляет запрос и читает ответ целиком: по `Content-Length`,
    /// по chunked-кодированию или до закрытия соединения.
    pub async fn exchange(&mut self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        debug!("HTTP {} {}", request.method(), request.target());
        self.sender.ready().await?;
        let response = self.sender.send_request(request.to_hyper()?).await?;

        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(HttpResponse {
            status: parts.status,
            headers: parts.headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    /// Закрывает соединение. То же происходит при drop, например когда
    /// отменяют висящий запрос.
    pub fn close(self) {}
}

impl Drop for HttpTextClient {
    fn drop(&mut self) {
        self.connection.abort();
    }
}
