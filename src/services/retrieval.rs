//! 知识检索服务
//!
//! 意图需要知识补充或 NLU 置信度不足时，编排层调用检索服务取回
//! 答案与来源，缓存在会话上下文中并随任务消息下发给 Agent。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ServiceError;

/// 检索模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RagMode {
    Hybrid,
    Vector,
    Keyword,
}

/// 检索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagResult {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Value>,
    pub confidence: f64,
}

/// 知识检索接口
#[async_trait]
pub trait RetrievalService: Send + Sync {
    async fn query(&self, question: &str, mode: RagMode) -> Result<RagResult, ServiceError>;
}

/// 空实现：未接入知识库时使用，返回零置信度空答案
#[derive(Debug, Default)]
pub struct NoopRetrieval;

#[async_trait]
impl RetrievalService for NoopRetrieval {
    async fn query(&self, _question: &str, _mode: RagMode) -> Result<RagResult, ServiceError> {
        Ok(RagResult {
            answer: String::new(),
            sources: Vec::new(),
            confidence: 0.0,
        })
    }
}
