//! HiCRM - 对话式智能 CRM 编排引擎
//!
//! 模块划分：
//! - **agent**: Agent 抽象（消息、响应、负载快照）与外部 Agent 运行时接口
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **context**: 会话上下文数据模型（流程状态、有界变量、短期/长期记忆）
//! - **error**: 错误类型（跟踪器 / Agent / 编排管线）
//! - **orchestrator**: process_message 管线、路由指标、会话生命周期
//! - **routing**: Agent 选择策略、并发分发、响应融合
//! - **services**: 外部协作方接口（NLU / 知识检索 / 会话日志）与参考实现
//! - **store**: 会话上下文存储抽象与内存实现
//! - **tracker**: 状态与记忆跟踪器（TTL 短期记忆、重要度长期记忆）

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod observability;
pub mod orchestrator;
pub mod routing;
pub mod services;
pub mod store;
pub mod tracker;

pub use orchestrator::{Orchestrator, OrchestratorConfig, RoutingMetrics};
pub use routing::fusion::FusedResponse;
pub use tracker::StateTracker;
