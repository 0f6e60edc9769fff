//! Agent 抽象
//!
//! 鸭子类型的 Agent 对象收敛为封闭接口：`AgentRuntime` 负责可用性查询、
//! 消息投递、按能力指派与负载快照；具体 Agent 的业务逻辑在本 crate 之外。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;

/// Agent ID（如 sales_agent、crm_expert_agent）
pub type AgentId = String;

/// Agent 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Offline,
}

/// 投递给 Agent 的任务消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub sender_id: String,
    pub receiver_id: Option<AgentId>,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl AgentMessage {
    pub fn task(sender_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: None,
            content: content.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Agent 的单次应答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub content: String,
    pub confidence: f64,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub next_actions: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl AgentResponse {
    pub fn new(content: impl Into<String>, confidence: f64) -> Self {
        Self {
            content: content.into(),
            confidence,
            suggestions: Vec::new(),
            next_actions: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// 负载快照：load_based 与 round_robin 策略的输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoadInfo {
    pub id: AgentId,
    pub status: AgentStatus,
    pub error_count: u32,
    pub available: bool,
}

/// Agent 能力标签（capability_based 策略按此指派）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CustomerManagement,
    LeadManagement,
    OpportunityManagement,
    KnowledgeRetrieval,
}

/// 外部 Agent 注册/运行时接口（实现在本 crate 之外）
///
/// 超时与重试属于实现方；Dispatcher 不在此层附加超时。
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// 指定 Agent 当前是否可接收消息
    async fn is_available(&self, agent_id: &str) -> bool;

    /// 向 Agent 投递消息并等待应答
    async fn send(&self, agent_id: &str, message: AgentMessage) -> Result<AgentResponse, AgentError>;

    /// 按所需能力指派 Agent，可合法返回空集
    async fn assign(&self, required: &[Capability], max_agents: usize) -> Vec<AgentId>;

    /// 所有已注册 Agent 的负载快照（顺序稳定）
    async fn snapshot(&self) -> Vec<AgentLoadInfo>;
}
