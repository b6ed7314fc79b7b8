use crate::Result;
use crate::http::types::Status;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 传输层返回的响应
///
/// 可序列化，以便作为只读快照交给脚本沙箱。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    /// Header 列表，名称保持传输层给出的形式
    pub headers: Vec<(String, String)>,
    pub body: String,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl Response {
    pub fn new(
        status: u16,
        headers: Vec<(String, String)>,
        body: String,
        duration: Duration,
    ) -> Result<Self> {
        Ok(Self {
            status: Status::new(status)?,
            headers,
            body,
            duration,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_redirect(&self) -> bool {
        self.status.is_redirect()
    }

    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Header 名称不区分大小写
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    pub fn json(&self) -> std::result::Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
