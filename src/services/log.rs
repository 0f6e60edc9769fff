//! 会话消息日志
//!
//! 用户消息在分析前先落日志，Agent 融合应答带指标元数据落日志；
//! 摘要读取最近 N 条。内存实现按会话分桶、按时间追加。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agent::AgentId;
use crate::error::ServiceError;

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// 一条已落库的会话消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// 会话日志接口
#[async_trait]
pub trait ConversationLog: Send + Sync {
    /// 追加一条消息并返回落库记录
    async fn append(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        agent_id: Option<AgentId>,
        metadata: serde_json::Map<String, Value>,
    ) -> Result<MessageRecord, ServiceError>;

    /// 最近 limit 条消息（时间正序）
    async fn recent(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, ServiceError>;
}

/// 内存实现
#[derive(Default)]
pub struct InMemoryConversationLog {
    messages: RwLock<HashMap<String, Vec<MessageRecord>>>,
}

impl InMemoryConversationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationLog for InMemoryConversationLog {
    async fn append(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        agent_id: Option<AgentId>,
        metadata: serde_json::Map<String, Value>,
    ) -> Result<MessageRecord, ServiceError> {
        let record = MessageRecord {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            agent_id,
            metadata,
            created_at: Utc::now(),
        };
        let mut messages = self.messages.write().await;
        messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn recent(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, ServiceError> {
        let messages = self.messages.read().await;
        let Some(records) = messages.get(conversation_id) else {
            return Ok(Vec::new());
        };
        let skip = records.len().saturating_sub(limit);
        Ok(records[skip..].to_vec())
    }
}
