//! 错误类型
//!
//! 跟踪器区分 NotFound / AlreadyExists / Storage（不再折叠为布尔失败通道）；
//! 管线各阶段错误由 Orchestrator 在边界统一捕获并降级，不向调用方抛出。

use thiserror::Error;

/// 状态跟踪器错误：会话缺失、重复初始化与底层存储失败互相可区分
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("conversation already tracked: {0}")]
    AlreadyExists(String),

    #[error("context storage failure: {0}")]
    Storage(String),
}

impl From<StoreError> for TrackerError {
    fn from(e: StoreError) -> Self {
        TrackerError::Storage(e.0)
    }
}

/// 上下文存储层错误（外部持久化协作方）
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

/// Agent 调用错误：不可用与执行失败；Dispatcher 按分支捕获，不中断扇出
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent unavailable: {0}")]
    Unavailable(String),

    #[error("agent call failed: {0}")]
    Failed(String),
}

/// 外部协作方（NLU / 检索 / 会话日志）的通用错误
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ServiceError(pub String);

/// 管线错误：在 process_message 边界被捕获一次并转为降级响应
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("nlu analysis failed: {0}")]
    Nlu(String),

    #[error("knowledge retrieval failed: {0}")]
    Retrieval(String),

    #[error("conversation log failed: {0}")]
    Log(String),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}
