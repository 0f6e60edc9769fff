//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HICRM__*` 覆盖（双下划线表示嵌套，
//! 如 `HICRM__TRACKER__SHORT_TERM_TTL_SECS=3600`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::orchestrator::OrchestratorConfig;
use crate::tracker::TrackerConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub tracker: TrackerSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [tracker] 段：上下文与记忆的容量参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerSection {
    /// 上下文变量上限
    #[serde(default = "default_context_memory_limit")]
    pub context_memory_limit: usize,
    /// 短期记忆默认 TTL（秒）
    #[serde(default = "default_short_term_ttl_secs")]
    pub short_term_ttl_secs: i64,
    /// 流程状态历史上限
    #[serde(default = "default_state_history_limit")]
    pub state_history_limit: usize,
}

fn default_context_memory_limit() -> usize {
    50
}

fn default_short_term_ttl_secs() -> i64 {
    7200
}

fn default_state_history_limit() -> usize {
    100
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            context_memory_limit: default_context_memory_limit(),
            short_term_ttl_secs: default_short_term_ttl_secs(),
            state_history_limit: default_state_history_limit(),
        }
    }
}

/// [orchestrator] 段：路由与回收参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 单次分发的 Agent 数上限
    #[serde(default = "default_max_agents_per_request")]
    pub max_agents_per_request: usize,
    /// 兜底 Agent ID
    #[serde(default = "default_fallback_agent")]
    pub fallback_agent: String,
    /// 不活跃会话回收阈值（小时）
    #[serde(default = "default_inactive_max_age_hours")]
    pub inactive_max_age_hours: i64,
}

fn default_max_agents_per_request() -> usize {
    2
}

fn default_fallback_agent() -> String {
    "crm_expert_agent".to_string()
}

fn default_inactive_max_age_hours() -> i64 {
    24
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_agents_per_request: default_max_agents_per_request(),
            fallback_agent: default_fallback_agent(),
            inactive_max_age_hours: default_inactive_max_age_hours(),
        }
    }
}

impl From<&TrackerSection> for TrackerConfig {
    fn from(section: &TrackerSection) -> Self {
        Self {
            context_memory_limit: section.context_memory_limit,
            short_term_ttl_secs: section.short_term_ttl_secs,
            state_history_limit: section.state_history_limit,
        }
    }
}

impl From<&OrchestratorSection> for OrchestratorConfig {
    fn from(section: &OrchestratorSection) -> Self {
        Self {
            max_agents_per_request: section.max_agents_per_request,
            fallback_agent: section.fallback_agent.clone(),
            inactive_max_age_hours: section.inactive_max_age_hours,
        }
    }
}

/// 从 config 目录加载配置，环境变量 HICRM__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HICRM__*（双下划线表示嵌套键）
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
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HICRM")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
