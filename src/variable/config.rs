use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{CollrunError, Result};
use crate::variable::context::ExecutionContext;
use crate::variable::resolver::VariableResolver;

/// 运行参数
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// 单个请求的超时（毫秒）
    pub timeout_ms: u64,
    /// 顺序模式下请求之间的间隔（毫秒）
    pub delay_ms: u64,
    pub parallel: bool,
    pub stop_on_error: bool,
    pub max_concurrency: usize,
    pub fail_on_http_error: bool,
    pub fail_on_assertion: bool,
    pub user_agent: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            delay_ms: 0,
            parallel: false,
            stop_on_error: false,
            max_concurrency: 8,
            fail_on_http_error: false,
            fail_on_assertion: false,
            user_agent: None,
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// 环境配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Environment {
    /// 变量映射
    #[serde(flatten)]
    pub variables: HashMap<String, String>,
}

/// 完整的配置文件
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RunConfig {
    #[serde(default)]
    pub settings: Settings,

    /// 全局变量
    #[serde(default)]
    pub globals: HashMap<String, String>,

    /// 所有环境配置
    #[serde(default)]
    pub environments: HashMap<String, Environment>,
}

impl RunConfig {
    pub fn get_environment(&self, name: &str) -> Option<&Environment> {
        self.environments.get(name)
    }

    /// 环境名称，按字母排序
    pub fn environment_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.environments.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// 配置文件加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 配置文件名
    pub const CONFIG_FILE: &'static str = "collrun.toml";

    /// 从指定路径加载配置文件
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<RunConfig> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            CollrunError::ConfigError(format!(
                "无法读取配置文件 {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: RunConfig = toml::from_str(&content)?;
        if config.settings.max_concurrency == 0 {
            return Err(CollrunError::ConfigError(
                "max_concurrency 必须大于 0".to_string(),
            ));
        }
        debug!(path = %path.as_ref().display(), "config loaded");
        Ok(config)
    }

    /// 查找并加载配置文件
    /// 查找顺序：
    /// 1. 当前目录
    /// 2. 父目录递归查找
    /// 3. 用户配置目录 ~/.config/collrun/
    pub fn find_and_load() -> Option<RunConfig> {
        let path = Self::find_config_path()?;
        match Self::load_from_path(&path) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable config");
                None
            }
        }
    }

    /// 第一个存在的配置文件路径
    pub fn find_config_path() -> Option<PathBuf> {
        if let Ok(mut current) = std::env::current_dir() {
            loop {
                let candidate = current.join(Self::CONFIG_FILE);
                if candidate.exists() {
                    return Some(candidate);
                }
                if !current.pop() {
                    break;
                }
            }
        }

        let candidate = dirs::home_dir()?
            .join(".config")
            .join("collrun")
            .join(Self::CONFIG_FILE);
        candidate.exists().then_some(candidate)
    }

    /// 构建执行上下文
    /// env_name: 环境名称（如 "dev", "prod"）
    /// cli_vars: 命令行风格的变量覆盖（key=value），进入 Override 层
    pub fn build_context(
        config: &RunConfig,
        env_name: Option<&str>,
        cli_vars: &[(String, String)],
    ) -> Result<ExecutionContext> {
        let mut context = ExecutionContext::new().with_globals(expand_all(&config.globals));

        if let Some(name) = env_name {
            let env = config.get_environment(name).ok_or_else(|| {
                CollrunError::ConfigError(format!(
                    "未找到环境 '{}'，可用环境: {}",
                    name,
                    config.environment_names().join(", ")
                ))
            })?;
            context = context.with_environment(name, expand_all(&env.variables));
        }

        if !cli_vars.is_empty() {
            context = context.with_overrides(cli_vars.iter().cloned().collect());
        }

        Ok(context)
    }

    /// 解析变量参数 "key=value"
    pub fn parse_cli_var(s: &str) -> Option<(String, String)> {
        s.split_once('=')
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, _)| !k.is_empty())
    }
}

/// 解析系统环境变量 ${VAR}
fn expand_all(values: &HashMap<String, String>) -> HashMap<String, String> {
    values
        .iter()
        .map(|(k, v)| (k.clone(), VariableResolver::resolve_env_vars(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::types::VariableScope;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_from_path() {
        let config_content = r#"
[settings]
timeout_ms = 5000
parallel = true
max_concurrency = 4

[globals]
user = "alice"

[environments.dev]
base_url = "http://localhost:8080"
api_key = "dev-key"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = ConfigLoader::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.environments.len(), 1);
        assert!(config.get_environment("dev").is_some());
        assert_eq!(config.settings.timeout(), Duration::from_secs(5));
        assert!(config.settings.parallel);
        assert_eq!(config.settings.max_concurrency, 4);
        assert!(!config.settings.stop_on_error);
        assert_eq!(config.globals.get("user").map(String::as_str), Some("alice"));
    }

    #[test]
    fn test_load_rejects_zero_concurrency() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[settings]\nmax_concurrency = 0\n")
            .unwrap();
        temp_file.flush().unwrap();

        let err = ConfigLoader::load_from_path(temp_file.path()).unwrap_err();
        assert!(matches!(err, CollrunError::ConfigError(_)));
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[settings\n").unwrap();
        temp_file.flush().unwrap();

        let err = ConfigLoader::load_from_path(temp_file.path()).unwrap_err();
        assert!(matches!(err, CollrunError::TomlError(_)));
    }

    #[test]
    fn test_build_context() {
        let config_content = r#"
[globals]
base_url = "http://global"
region = "eu"

[environments.dev]
base_url = "http://localhost:8080"
token = "dev-token"

[environments.prod]
base_url = "https://api.example.com"
token = "${COLLRUN_PROD_TOKEN}"
"#;

        let config: RunConfig = toml::from_str(config_content).unwrap();

        // dev 环境覆盖全局
        let context = ConfigLoader::build_context(&config, Some("dev"), &[]).unwrap();
        assert_eq!(context.get_variable("base_url"), Some("http://localhost:8080"));
        assert_eq!(context.get_variable("token"), Some("dev-token"));
        assert_eq!(context.get_variable("region"), Some("eu"));

        // 覆盖进入 Override 层
        let cli_vars = vec![("token".to_string(), "custom-token".to_string())];
        let context = ConfigLoader::build_context(&config, Some("dev"), &cli_vars).unwrap();
        assert_eq!(context.get_variable("token"), Some("custom-token"));
        assert_eq!(
            context
                .store(VariableScope::Override)
                .and_then(|s| s.get("token")),
            Some("custom-token")
        );

        // 未设置的系统环境变量保持原样
        let context = ConfigLoader::build_context(&config, Some("prod"), &[]).unwrap();
        assert_eq!(context.get_variable("token"), Some("${COLLRUN_PROD_TOKEN}"));
    }

    #[test]
    fn test_build_context_unknown_environment() {
        let config = RunConfig::default();
        let err = ConfigLoader::build_context(&config, Some("staging"), &[]).unwrap_err();
        assert!(matches!(err, CollrunError::ConfigError(_)));
    }

    #[test]
    fn test_parse_cli_var() {
        assert_eq!(
            ConfigLoader::parse_cli_var("key=value"),
            Some(("key".to_string(), "value".to_string()))
        );

        assert_eq!(
            ConfigLoader::parse_cli_var("url=https://example.com?a=b"),
            Some(("url".to_string(), "https://example.com?a=b".to_string()))
        );

        assert_eq!(ConfigLoader::parse_cli_var("invalid"), None);
        assert_eq!(ConfigLoader::parse_cli_var("=value"), None);
    }
}
