//! 会话上下文数据模型
//!
//! 一条会话一份 `ConversationContext`：路由配置、流程状态、有界上下文变量、
//! 短期（TTL）与长期（重要度加权）记忆，随每条消息被跟踪器读写。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentId;
use crate::services::nlu::IntentType;
use crate::services::retrieval::RagResult;
use crate::tracker::memory::{LongTermEntry, ShortTermEntry};

/// 对话模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    SingleAgent,
    MultiAgent,
    AutoRouting,
}

/// Agent 路由策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    IntentBased,
    CapabilityBased,
    LoadBased,
    RoundRobin,
}

/// 插入序有界变量表
///
/// 超限时淘汰最早插入的键（而非按键名排序截断）；更新已有键保留其原位置，
/// 只有新键才可能触发淘汰。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoundedVars {
    entries: Vec<(String, Value)>,
}

impl BoundedVars {
    /// upsert；插入后若超过 limit，从头部（最旧）截断到 limit
    pub fn insert(&mut self, key: impl Into<String>, value: Value, limit: usize) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
        if self.entries.len() > limit {
            let overflow = self.entries.len() - limit;
            self.entries.drain(..overflow);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 转为 JSON 对象（投递给 Agent 时使用）
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.entries {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }
}

/// 业务流程状态：当前阶段 + 有界历史
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    pub current: String,
    pub history: Vec<String>,
    pub current_task: Option<String>,
    pub current_agent: Option<AgentId>,
    pub last_intent: Option<IntentType>,
    #[serde(default)]
    pub entities: HashMap<String, Value>,
}

impl FlowState {
    pub fn initialized() -> Self {
        Self {
            current: "initialized".to_string(),
            history: vec!["start".to_string()],
            current_task: None,
            current_agent: None,
            last_intent: None,
            entities: HashMap::new(),
        }
    }

    /// 进入新阶段；历史超限时丢弃最旧条目
    pub fn push_state(&mut self, state: impl Into<String>, history_limit: usize) {
        let state = state.into();
        self.current = state.clone();
        self.history.push(state);
        if self.history.len() > history_limit {
            let overflow = self.history.len() - history_limit;
            self.history.drain(..overflow);
        }
    }
}

/// 单个会话的全部持久状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: String,
    pub user_id: String,
    pub active_agents: Vec<AgentId>,
    pub current_intent: Option<IntentType>,
    pub mode: ConversationMode,
    pub routing_strategy: RoutingStrategy,
    pub context_variables: BoundedVars,
    #[serde(default)]
    pub per_agent_state: HashMap<AgentId, Value>,
    pub last_retrieval: Option<RagResult>,
    pub flow: FlowState,
    #[serde(default)]
    pub short_term: HashMap<String, ShortTermEntry>,
    #[serde(default)]
    pub long_term: HashMap<String, LongTermEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationContext {
    pub fn new(conversation_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            active_agents: Vec::new(),
            current_intent: None,
            mode: ConversationMode::AutoRouting,
            routing_strategy: RoutingStrategy::IntentBased,
            context_variables: BoundedVars::default(),
            per_agent_state: HashMap::new(),
            last_retrieval: None,
            flow: FlowState::initialized(),
            short_term: HashMap::new(),
            long_term: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 刷新最后活跃时间（不活跃清扫据此判断）
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
