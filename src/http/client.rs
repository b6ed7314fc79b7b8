use std::error::Error as StdError;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::http::request::{Credential, OutgoingRequest};
use crate::http::response::Response;
use crate::variable::Settings;

/// 传输层失败（连接被拒、DNS、TLS、超时……）
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport has been closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// 网络调用协作者
///
/// 拥有连接池、TLS 与重定向处理；执行器只负责在超时约束下等待结果。
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: OutgoingRequest,
        timeout: Duration,
    ) -> Result<Response, TransportError>;

    /// 释放连接池。之后的 `send` 应返回 `TransportError::Closed`。
    async fn close(&self) {}
}

/// 传输层配置
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// 0 表示不跟随重定向
    pub max_redirects: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("collrun/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(10),
            max_redirects: 10,
        }
    }
}

impl From<&Settings> for TransportConfig {
    fn from(settings: &Settings) -> Self {
        let mut config = Self::default();
        if let Some(agent) = settings.user_agent.as_ref().filter(|a| !a.trim().is_empty()) {
            config.user_agent = agent.clone();
        }
        config
    }
}

/// 基于 reqwest 的默认传输实现
pub struct HttpTransport {
    inner: RwLock<Option<reqwest::Client>>,
}

impl HttpTransport {
    pub fn new() -> crate::Result<Self> {
        Self::with_config(&TransportConfig::default())
    }

    pub fn with_config(config: &TransportConfig) -> crate::Result<Self> {
        let redirect = if config.max_redirects == 0 {
            reqwest::redirect::Policy::none()
        } else {
            reqwest::redirect::Policy::limited(config.max_redirects)
        };

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .redirect(redirect)
            .build()
            .map_err(|e| crate::CollrunError::ConfigError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            inner: RwLock::new(Some(client)),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().map(|c| c.is_none()).unwrap_or(true)
    }

    fn client(&self) -> Result<reqwest::Client, TransportError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| TransportError::Other("transport lock poisoned".to_string()))?;
        guard.clone().ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: OutgoingRequest,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        let client = self.client()?;
        let url = request
            .full_url()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        debug!(method = %request.method, url = %url, "sending request");

        let mut req = client
            .request(request.method.to_reqwest(), url)
            .timeout(timeout);
        for (key, value) in &request.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        if let Some(Credential::Basic { username, password }) = &request.credential {
            req = req.basic_auth(username, password.as_ref());
        }
        if let Some(body) = request.body {
            req = req.body(body);
        }

        let start = Instant::now();
        let response = req.send().await.map_err(|e| classify(e, timeout))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.text().await.map_err(|e| classify(e, timeout))?;
        let duration = start.elapsed();

        Response::new(status, headers, body, duration)
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    async fn close(&self) {
        if let Ok(mut guard) = self.inner.write()
            && guard.take().is_some()
        {
            debug!("HTTP transport closed");
        }
    }
}

/// 将 reqwest 错误归类，并附上完整的 source 链（DNS/TLS 细节在其中）
fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout(timeout);
    }

    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    if err.is_connect() {
        TransportError::Connect(message)
    } else if err.is_builder() {
        TransportError::InvalidRequest(message)
    } else {
        TransportError::Other(message)
    }
}
