use serde::{Deserialize, Serialize};

use crate::http::types::Method;

/// 变量声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// 变量名（在声明作用域内唯一）
    pub key: String,

    /// 变量值，本身可能包含 {{placeholder}}
    #[serde(default)]
    pub value: Option<String>,

    /// 类型提示（如 "string", "secret"）
    #[serde(default, rename = "type")]
    pub var_type: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// 被禁用的变量不参与解析
    #[serde(default)]
    pub disabled: bool,
}

impl Variable {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            var_type: None,
            description: None,
            disabled: false,
        }
    }

    pub fn with_type(mut self, var_type: impl Into<String>) -> Self {
        self.var_type = Some(var_type.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }
}

/// 键值对（Header、Query、路径参数、表单字段）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub disabled: bool,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            disabled: false,
        }
    }
}

/// 请求体模板
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Body {
    Raw {
        content: String,
        #[serde(default)]
        content_type: Option<String>,
    },
    #[serde(rename = "urlencoded")]
    UrlEncoded { fields: Vec<KeyValue> },
}

impl Body {
    pub fn raw(content: impl Into<String>) -> Self {
        Body::Raw {
            content: content.into(),
            content_type: None,
        }
    }

    pub fn json(content: impl Into<String>) -> Self {
        Body::Raw {
            content: content.into(),
            content_type: Some("application/json".to_string()),
        }
    }

    /// 所有可能包含占位符的文本片段
    pub fn texts(&self) -> Vec<&str> {
        match self {
            Body::Raw { content, .. } => vec![content.as_str()],
            Body::UrlEncoded { fields } => fields
                .iter()
                .filter(|f| !f.disabled)
                .flat_map(|f| [f.key.as_str(), f.value.as_str()])
                .collect(),
        }
    }
}

/// 认证参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthParam {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// 认证配置：类型标签 + 有序的命名参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    #[serde(rename = "type")]
    pub auth_type: String,
    #[serde(default)]
    pub params: Vec<AuthParam>,
}

impl Auth {
    pub fn new(auth_type: impl Into<String>) -> Self {
        Self {
            auth_type: auth_type.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(AuthParam {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new("basic")
            .with_param("username", username)
            .with_param("password", password)
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::new("bearer").with_param("token", token)
    }

    pub fn api_key(
        key: impl Into<String>,
        value: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self::new("apikey")
            .with_param("key", key)
            .with_param("value", value)
            .with_param("in", location)
    }

    /// 显式声明"不使用认证"，会终止继承链
    pub fn none() -> Self {
        Self::new("noauth")
    }

    /// 获取参数值（第一个同名参数）
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    pub fn is_noauth(&self) -> bool {
        self.auth_type.eq_ignore_ascii_case("noauth")
    }
}

/// 预请求脚本与测试脚本
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Scripts {
    #[serde(default)]
    pub pre_request: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
}

/// 请求模板
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestDef {
    #[serde(default)]
    pub method: Method,

    /// URL 模板，如 `{{base_url}}/users/:id`
    pub url: String,

    #[serde(default)]
    pub headers: Vec<KeyValue>,

    #[serde(default)]
    pub query: Vec<KeyValue>,

    /// `:name` 路径参数的绑定
    #[serde(default)]
    pub path_variables: Vec<KeyValue>,

    #[serde(default)]
    pub body: Option<Body>,
}

impl RequestDef {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(KeyValue::new(key, value));
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push(KeyValue::new(key, value));
        self
    }

    pub fn with_path_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_variables.push(KeyValue::new(key, value));
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }
}

/// 集合文档（已由外部解析/校验）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub auth: Option<Auth>,
    #[serde(default)]
    pub scripts: Scripts,
    #[serde(default)]
    pub items: Vec<ItemDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ItemDefinition {
    Folder(FolderDefinition),
    Request(RequestDefinition),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub auth: Option<Auth>,
    #[serde(default)]
    pub scripts: Scripts,
    #[serde(default)]
    pub items: Vec<ItemDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub request: RequestDef,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub auth: Option<Auth>,
    #[serde(default)]
    pub scripts: Scripts,
}
