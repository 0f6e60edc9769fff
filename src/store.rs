//! 会话上下文存储
//!
//! `ContextStore` 是持久化边界：跟踪器只依赖该 trait，默认提供内存实现。
//! 替换为数据库 / Redis 实现时不需要改动跟踪器与编排层。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::context::ConversationContext;
use crate::error::StoreError;

/// 上下文存储接口
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// 按会话 ID 读取完整上下文
    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationContext>, StoreError>;

    /// 整条写回（以 conversation_id 为键覆盖）
    async fn save(&self, context: &ConversationContext) -> Result<(), StoreError>;

    /// 删除会话，返回是否确实存在
    async fn remove(&self, conversation_id: &str) -> Result<bool, StoreError>;

    /// 所有会话的 (ID, 最后活跃时间)，供不活跃清扫遍历
    async fn list_updated(&self) -> Result<Vec<(String, DateTime<Utc>)>, StoreError>;

    /// 当前会话总数
    async fn count(&self) -> Result<usize, StoreError>;
}

/// 内存实现：RwLock 保护的 HashMap
#[derive(Default)]
pub struct InMemoryContextStore {
    contexts: RwLock<HashMap<String, ConversationContext>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationContext>, StoreError> {
        let contexts = self.contexts.read().await;
        Ok(contexts.get(conversation_id).cloned())
    }

    async fn save(&self, context: &ConversationContext) -> Result<(), StoreError> {
        let mut contexts = self.contexts.write().await;
        contexts.insert(context.conversation_id.clone(), context.clone());
        Ok(())
    }

    async fn remove(&self, conversation_id: &str) -> Result<bool, StoreError> {
        let mut contexts = self.contexts.write().await;
        Ok(contexts.remove(conversation_id).is_some())
    }

    async fn list_updated(&self) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        let contexts = self.contexts.read().await;
        Ok(contexts
            .iter()
            .map(|(id, ctx)| (id.clone(), ctx.updated_at))
            .collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let contexts = self.contexts.read().await;
        Ok(contexts.len())
    }
}
