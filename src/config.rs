//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AISIRI__*` 覆盖（双下划线表示嵌套，如 `AISIRI__DISPATCH__TIMEOUT_MS=5000`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub dispatch: DispatchSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 合成回复时助手的自称
    pub assistant_name: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            assistant_name: "小艾".to_string(),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：qwen / openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "qwen".to_string(),
            model: "qwen-plus".to_string(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [dispatch] 段：各阶段超时（毫秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    /// 整个调度（分类 + 执行）的全局截止时间
    pub timeout_ms: u64,
    pub synthesis_timeout_ms: u64,
    pub classify_timeout_ms: u64,
    /// “今天已有任务”查询
    pub inventory_timeout_ms: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            synthesis_timeout_ms: 10_000,
            classify_timeout_ms: 8_000,
            inventory_timeout_ms: 3_000,
        }
    }
}

impl DispatchSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_millis(self.classify_timeout_ms)
    }

    pub fn inventory_timeout(&self) -> Duration {
        Duration::from_millis(self.inventory_timeout_ms)
    }
}

/// [tools] 段：本地外部工具的默认城市与路线端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub default_city: String,
    pub route_origin: String,
    pub default_destination: String,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            default_city: "上海".to_string(),
            route_origin: "上海漕河泾B栋".to_string(),
            default_destination: "虹桥机场".to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 AISIRI__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AISIRI__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AISIRI")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 加载失败时记录告警并使用默认值
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.assistant_name, "小艾");
        assert_eq!(cfg.llm.provider, "qwen");
        assert_eq!(cfg.dispatch.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.tools.default_city, "上海");
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[app]
assistant_name = "小明"

[dispatch]
timeout_ms = 1500

[tools]
default_city = "北京"
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.app.assistant_name, "小明");
        assert_eq!(cfg.dispatch.timeout_ms, 1500);
        assert_eq!(cfg.tools.default_city, "北京");
        // 未出现的键保持默认
        assert_eq!(cfg.tools.default_destination, "虹桥机场");
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let cfg = load_config(Some(PathBuf::from("/nonexistent/aisiri.toml"))).unwrap();
        assert!(cfg.dispatch.classify_timeout_ms > 0);
    }
}
