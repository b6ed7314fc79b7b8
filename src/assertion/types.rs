use std::fmt;

use regex::Regex;

/// 断言错误类型
#[derive(Debug, thiserror::Error)]
pub enum AssertError {
    #[error("Invalid assertion syntax: {0}")]
    InvalidSyntax(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// 断言表达式
#[derive(Debug, Clone, PartialEq)]
pub enum AssertExpr {
    /// 比较断言: left op right
    Compare {
        left: ValuePath,
        op: CompareOp,
        right: AssertValue,
    },
    /// 存在性断言: `path exists` / `path not exists`
    Exists { path: ValuePath, negated: bool },
}

impl fmt::Display for AssertExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssertExpr::Compare { left, op, right } => write!(f, "{} {} {}", left, op, right),
            AssertExpr::Exists {
                path,
                negated: false,
            } => write!(f, "{} exists", path),
            AssertExpr::Exists {
                path,
                negated: true,
            } => write!(f, "{} not exists", path),
        }
    }
}

/// JSON body 路径中的一段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{}", key),
            PathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

/// 值路径 - 用于从响应中提取值
#[derive(Debug, Clone, PartialEq)]
pub enum ValuePath {
    /// HTTP 状态码
    Status,
    /// 响应 Header（名称不区分大小写）
    Header(String),
    /// JSON Body 路径；空路径表示整个 body
    Body(Vec<PathSegment>),
    /// 响应时间（毫秒）
    ResponseTime,
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValuePath::Status => write!(f, "status"),
            ValuePath::Header(name) => write!(f, "headers.{}", name),
            ValuePath::Body(segments) if segments.is_empty() => write!(f, "body"),
            ValuePath::Body(segments) => {
                write!(f, "body")?;
                for segment in segments {
                    write!(f, ".{}", segment)?;
                }
                Ok(())
            }
            ValuePath::ResponseTime => write!(f, "response.time"),
        }
    }
}

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,          // ==
    NotEqual,       // !=
    Greater,        // >
    Less,           // <
    GreaterOrEqual, // >=
    LessOrEqual,    // <=
    Contains,       // contains
    Matches,        // matches
}

impl CompareOp {
    /// 解析时的查找顺序：多字符运算符在前
    pub const SEARCH_ORDER: [CompareOp; 8] = [
        CompareOp::GreaterOrEqual,
        CompareOp::LessOrEqual,
        CompareOp::Equal,
        CompareOp::NotEqual,
        CompareOp::Greater,
        CompareOp::Less,
        CompareOp::Contains,
        CompareOp::Matches,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        Self::SEARCH_ORDER.into_iter().find(|op| op.as_str() == s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Greater => ">",
            Self::Less => "<",
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
            Self::Contains => "contains",
            Self::Matches => "matches",
        }
    }

    /// 单词形式的运算符需要两侧有空白
    pub fn is_word(&self) -> bool {
        matches!(self, Self::Contains | Self::Matches)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 断言值
#[derive(Debug, Clone, PartialEq)]
pub enum AssertValue {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
}

impl fmt::Display for AssertValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssertValue::Number(n) => write!(f, "{}", n),
            AssertValue::String(s) => write!(f, "\"{}\"", s),
            AssertValue::Bool(b) => write!(f, "{}", b),
            AssertValue::Null => write!(f, "null"),
        }
    }
}

impl AssertValue {
    fn type_name(&self) -> &'static str {
        match self {
            AssertValue::Number(_) => "number",
            AssertValue::String(_) => "string",
            AssertValue::Bool(_) => "boolean",
            AssertValue::Null => "null",
        }
    }

    /// 比较两个值
    ///
    /// Header 总是字符串，与数字比较时按数值解析。
    pub fn compare(&self, op: CompareOp, other: &AssertValue) -> Result<bool, AssertError> {
        match (self, other) {
            (AssertValue::String(s), AssertValue::Number(_))
                if !op.is_word() && s.trim().parse::<f64>().is_ok() =>
            {
                let n = s.trim().parse::<f64>().unwrap_or_default();
                AssertValue::Number(n).compare(op, other)
            }

            (AssertValue::Number(a), AssertValue::Number(b)) => match op {
                CompareOp::Equal => Ok((a - b).abs() < f64::EPSILON),
                CompareOp::NotEqual => Ok((a - b).abs() >= f64::EPSILON),
                CompareOp::Greater => Ok(a > b),
                CompareOp::Less => Ok(a < b),
                CompareOp::GreaterOrEqual => Ok(a >= b),
                CompareOp::LessOrEqual => Ok(a <= b),
                CompareOp::Contains | CompareOp::Matches => Err(AssertError::TypeMismatch {
                    expected: "string".to_string(),
                    actual: "number".to_string(),
                }),
            },

            (AssertValue::String(a), AssertValue::String(b)) => match op {
                CompareOp::Equal => Ok(a == b),
                CompareOp::NotEqual => Ok(a != b),
                CompareOp::Contains => Ok(a.contains(b.as_str())),
                CompareOp::Matches => Ok(Regex::new(b)?.is_match(a)),
                _ => Err(AssertError::TypeMismatch {
                    expected: "number".to_string(),
                    actual: "string".to_string(),
                }),
            },

            (AssertValue::Bool(a), AssertValue::Bool(b)) => match op {
                CompareOp::Equal => Ok(a == b),
                CompareOp::NotEqual => Ok(a != b),
                _ => Err(AssertError::InvalidOperator(format!(
                    "Operator {} not supported for boolean values",
                    op
                ))),
            },

            (AssertValue::Null, _) | (_, AssertValue::Null) => match op {
                CompareOp::Equal => Ok(self == other),
                CompareOp::NotEqual => Ok(self != other),
                _ => Err(AssertError::InvalidOperator(format!(
                    "Operator {} not supported for null comparison",
                    op
                ))),
            },

            _ => Err(AssertError::TypeMismatch {
                expected: other.type_name().to_string(),
                actual: self.type_name().to_string(),
            }),
        }
    }
}
