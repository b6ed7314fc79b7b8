use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use regex::{Captures, Regex};

use crate::variable::types::ScopeStore;

/// 内置动态变量，仅在所有作用域中都未定义时生效
pub const DYNAMIC_VARIABLES: &[&str] = &[
    "$guid",
    "$randomUUID",
    "$timestamp",
    "$isoTimestamp",
    "$randomInt",
];

fn placeholder_regex() -> &'static Regex {
    static VAR_REGEX: OnceLock<Regex> = OnceLock::new();
    VAR_REGEX.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_$][A-Za-z0-9_.\-]*)\s*\}\}").expect("valid placeholder regex")
    })
}

fn path_param_regex() -> &'static Regex {
    static PATH_REGEX: OnceLock<Regex> = OnceLock::new();
    PATH_REGEX.get_or_init(|| {
        Regex::new(r"(^|/):([A-Za-z_][A-Za-z0-9_]*)").expect("valid path parameter regex")
    })
}

/// 变量替换器
///
/// 对有序的作用域列表（近 → 远）做 `{{name}}` 替换。未定义或形成循环的占位符
/// 原样保留；替换失败是静默的，由调用方决定哪些字段必须完全解析。
pub struct VariableResolver;

impl VariableResolver {
    /// 替换文本中的所有 {{variable}} 占位符
    pub fn resolve(text: &str, stores: &[&ScopeStore]) -> String {
        Self::resolve_with_visited(text, stores, &HashSet::new())
    }

    /// `visited` 中的变量正处于解析过程中，遇到时保留原样
    pub fn resolve_with_visited(
        text: &str,
        stores: &[&ScopeStore],
        visited: &HashSet<String>,
    ) -> String {
        if !text.contains("{{") {
            return text.to_string();
        }

        placeholder_regex()
            .replace_all(text, |caps: &Captures| {
                let name = &caps[1];
                if visited.contains(name) {
                    return caps[0].to_string();
                }

                match Self::lookup(name, stores) {
                    Some(value) if Self::has_placeholders(value) => {
                        let mut nested = visited.clone();
                        nested.insert(name.to_string());
                        Self::resolve_with_visited(value, stores, &nested)
                    }
                    Some(value) => value.to_string(),
                    None => Self::dynamic_value(name).unwrap_or_else(|| caps[0].to_string()),
                }
            })
            .into_owned()
    }

    /// 按优先级查找第一个定义该变量的作用域
    pub fn lookup<'a>(name: &str, stores: &[&'a ScopeStore]) -> Option<&'a str> {
        stores.iter().find_map(|store| store.get(name))
    }

    pub fn has_placeholders(text: &str) -> bool {
        placeholder_regex().is_match(text)
    }

    /// 文本中出现的占位符名称（去重，保持出现顺序）
    pub fn placeholders(text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        placeholder_regex()
            .captures_iter(text)
            .map(|caps| caps[1].to_string())
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }

    /// 解析后仍残留的占位符
    pub fn unresolved(text: &str) -> Vec<String> {
        Self::placeholders(text)
    }

    /// URL 路径部分的 `:name` 参数（查询串不参与）
    pub fn path_params(url: &str) -> Vec<String> {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let mut seen = HashSet::new();
        path_param_regex()
            .captures_iter(path)
            .map(|caps| caps[2].to_string())
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }

    /// 用给定绑定替换 `:name` 路径参数，未绑定的保持原样
    pub fn substitute_path_params<F>(url: &str, binding: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        let split_at = url.find(['?', '#']).unwrap_or(url.len());
        let (path, rest) = url.split_at(split_at);

        let replaced = path_param_regex().replace_all(path, |caps: &Captures| {
            match binding(&caps[2]) {
                Some(value) => format!("{}{}", &caps[1], value),
                None => caps[0].to_string(),
            }
        });

        format!("{}{}", replaced, rest)
    }

    pub fn is_dynamic(name: &str) -> bool {
        DYNAMIC_VARIABLES.contains(&name)
    }

    fn dynamic_value(name: &str) -> Option<String> {
        match name {
            "$guid" | "$randomUUID" => Some(uuid::Uuid::new_v4().to_string()),
            "$timestamp" => Some(Utc::now().timestamp().to_string()),
            "$isoTimestamp" => Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            "$randomInt" => Some(rand::rng().random_range(0..=1000).to_string()),
            _ => None,
        }
    }

    /// 解析并替换系统环境变量 ${VAR}
    pub fn resolve_env_vars(text: &str) -> String {
        static ENV_REGEX: OnceLock<Regex> = OnceLock::new();
        let re = ENV_REGEX
            .get_or_init(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env regex"));

        re.replace_all(text, |caps: &Captures| {
            let env_name = &caps[1];
            std::env::var(env_name).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string()
    }
}
