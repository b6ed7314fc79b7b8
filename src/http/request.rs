use serde::Serialize;

use crate::http::types::{Method, build_url};

/// 传输层凭证（由传输层自己编码）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Credential {
    Basic {
        username: String,
        password: Option<String>,
    },
}

/// 已完成变量解析、认证注入，准备交给传输层的请求
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: String,
    /// Header 列表，保持原始顺序
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
    pub credential: Option<Credential>,
}

impl OutgoingRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            credential: None,
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key, value);
        self
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = Some(body.to_owned());
        self
    }

    /// Header 名称不区分大小写
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_header(&self, key: &str) -> bool {
        self.header(key).is_some()
    }

    /// 设置 Header，已存在的同名 Header 被替换
    pub fn set_header(&mut self, key: &str, value: &str) {
        if let Some(entry) = self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            entry.1 = value.to_string();
        } else {
            self.headers.push((key.to_string(), value.to_string()));
        }
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_query(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.query.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
        } else {
            self.query.push((key.to_string(), value.to_string()));
        }
    }

    /// 合并查询参数后的完整 URL
    pub fn full_url(&self) -> crate::Result<url::Url> {
        build_url(&self.url, &self.query)
    }
}
