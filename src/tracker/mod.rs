//! 会话状态与记忆跟踪器
//!
//! 每条会话一份 `ConversationContext`，所有读写经 `ContextStore` 落盘。
//! 短期记忆按 TTL 在读取路径惰性清理；长期记忆晋升单调合并；
//! 不活跃会话由 `cleanup_inactive` 按最后活跃时间批量回收。

pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentId;
use crate::context::{ConversationContext, ConversationMode, RoutingStrategy};
use crate::error::TrackerError;
use crate::services::log::{ConversationLog, MessageRole};
use crate::services::nlu::IntentType;
use crate::services::retrieval::RagResult;
use crate::store::ContextStore;
use memory::{LongTermEntry, ShortTermEntry};

/// 摘要消息的截断长度（字符数）
const SUMMARY_DIGEST_CHARS: usize = 200;

/// 跟踪器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// 上下文变量上限，超出淘汰最早插入的键
    pub context_memory_limit: usize,
    /// 短期记忆默认 TTL（秒）
    pub short_term_ttl_secs: i64,
    /// 流程状态历史上限
    pub state_history_limit: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            context_memory_limit: 50,
            short_term_ttl_secs: 7200,
            state_history_limit: 100,
        }
    }
}

/// 状态的部分更新：None 字段保持原值
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub current_task: Option<String>,
    pub current_agent: Option<AgentId>,
    pub flow_state: Option<String>,
    pub last_intent: Option<IntentType>,
    pub entities: Option<HashMap<String, Value>>,
    pub active_agents: Option<Vec<AgentId>>,
    pub mode: Option<ConversationMode>,
    pub routing_strategy: Option<RoutingStrategy>,
    pub last_retrieval: Option<RagResult>,
    pub per_agent_state: Option<(AgentId, Value)>,
}

/// 会话摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub recent_messages: Vec<SummaryMessage>,
    pub current_state: String,
    pub current_task: Option<String>,
    pub current_agent: Option<AgentId>,
    pub context_keys: Vec<String>,
    pub short_term_count: usize,
    pub long_term_count: usize,
}

/// 摘要中的单条消息（内容截断为摘录）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryMessage {
    pub role: MessageRole,
    pub digest: String,
    pub agent_id: Option<AgentId>,
}

/// 状态跟踪器
pub struct StateTracker {
    store: Arc<dyn ContextStore>,
    log: Arc<dyn ConversationLog>,
    config: TrackerConfig,
}

impl StateTracker {
    pub fn new(
        store: Arc<dyn ContextStore>,
        log: Arc<dyn ConversationLog>,
        config: TrackerConfig,
    ) -> Self {
        Self { store, log, config }
    }

    pub fn store(&self) -> &Arc<dyn ContextStore> {
        &self.store
    }

    /// 初始化新会话；已存在则报 AlreadyExists
    pub async fn init(
        &self,
        conversation_id: &str,
        user_id: &str,
        initial_vars: Option<serde_json::Map<String, Value>>,
    ) -> Result<ConversationContext, TrackerError> {
        if self.store.load(conversation_id).await?.is_some() {
            return Err(TrackerError::AlreadyExists(conversation_id.to_string()));
        }

        let mut ctx = ConversationContext::new(conversation_id, user_id);
        if let Some(vars) = initial_vars {
            for (key, value) in vars {
                ctx.context_variables
                    .insert(key, value, self.config.context_memory_limit);
            }
        }
        self.store.save(&ctx).await?;
        tracing::info!(conversation_id, user_id, "conversation tracking started");
        Ok(ctx)
    }

    /// 读取会话上下文；不存在则报 NotFound
    pub async fn get_state(&self, conversation_id: &str) -> Result<ConversationContext, TrackerError> {
        self.store
            .load(conversation_id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(conversation_id.to_string()))
    }

    /// 读取或创建会话；返回 (上下文, 是否新建)
    ///
    /// 命中路径立刻刷新活跃时间并写回，避免久置会话的首条消息
    /// 与并发清扫在接收和首次状态更新之间撞上。
    pub async fn get_or_create(
        &self,
        conversation_id: &str,
        user_id: &str,
        initial_vars: Option<serde_json::Map<String, Value>>,
    ) -> Result<(ConversationContext, bool), TrackerError> {
        if let Some(mut ctx) = self.store.load(conversation_id).await? {
            ctx.touch();
            self.store.save(&ctx).await?;
            return Ok((ctx, false));
        }
        let ctx = self.init(conversation_id, user_id, initial_vars).await?;
        Ok((ctx, true))
    }

    /// 部分更新状态并刷新活跃时间
    pub async fn update_state(
        &self,
        conversation_id: &str,
        update: StateUpdate,
    ) -> Result<(), TrackerError> {
        let mut ctx = self.get_state(conversation_id).await?;

        if let Some(task) = update.current_task {
            ctx.flow.current_task = Some(task);
        }
        if let Some(agent) = update.current_agent {
            ctx.flow.current_agent = Some(agent);
        }
        if let Some(state) = update.flow_state {
            ctx.flow.push_state(state, self.config.state_history_limit);
        }
        if let Some(intent) = update.last_intent {
            ctx.flow.last_intent = Some(intent);
            ctx.current_intent = Some(intent);
        }
        if let Some(entities) = update.entities {
            ctx.flow.entities.extend(entities);
        }
        if let Some(agents) = update.active_agents {
            ctx.active_agents = agents;
        }
        if let Some(mode) = update.mode {
            ctx.mode = mode;
        }
        if let Some(strategy) = update.routing_strategy {
            ctx.routing_strategy = strategy;
        }
        if let Some(rag) = update.last_retrieval {
            ctx.last_retrieval = Some(rag);
        }
        if let Some((agent_id, state)) = update.per_agent_state {
            ctx.per_agent_state.insert(agent_id, state);
        }

        ctx.touch();
        self.store.save(&ctx).await?;
        Ok(())
    }

    /// 写入上下文变量（有界，超限淘汰最早插入的键）
    pub async fn add_context_variable(
        &self,
        conversation_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), TrackerError> {
        let mut ctx = self.get_state(conversation_id).await?;
        ctx.context_variables
            .insert(key, value, self.config.context_memory_limit);
        ctx.touch();
        self.store.save(&ctx).await?;
        Ok(())
    }

    /// 读取上下文变量
    pub async fn get_context_variable(
        &self,
        conversation_id: &str,
        key: &str,
    ) -> Result<Option<Value>, TrackerError> {
        let ctx = self.get_state(conversation_id).await?;
        Ok(ctx.context_variables.get(key).cloned())
    }

    /// 写入短期记忆；顺带清理同会话已过期的条目
    pub async fn set_short_term(
        &self,
        conversation_id: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), TrackerError> {
        let mut ctx = self.get_state(conversation_id).await?;
        let ttl = ttl.unwrap_or_else(|| Duration::seconds(self.config.short_term_ttl_secs));
        ctx.short_term
            .insert(key.to_string(), ShortTermEntry::new(value, ttl));

        let now = Utc::now();
        ctx.short_term.retain(|_, entry| !entry.is_expired_at(now));

        ctx.touch();
        self.store.save(&ctx).await?;
        Ok(())
    }

    /// 读取短期记忆；过期条目在读取时删除并返回 None
    pub async fn get_short_term(
        &self,
        conversation_id: &str,
        key: &str,
    ) -> Result<Option<Value>, TrackerError> {
        let mut ctx = self.get_state(conversation_id).await?;
        let Some(entry) = ctx.short_term.get(key) else {
            return Ok(None);
        };
        if entry.is_expired() {
            ctx.short_term.remove(key);
            self.store.save(&ctx).await?;
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    /// 晋升到长期记忆；键已存在则单调合并（重要度取大、访问数 +1）
    pub async fn promote_long_term(
        &self,
        conversation_id: &str,
        key: &str,
        value: Value,
        importance_score: f64,
    ) -> Result<(), TrackerError> {
        let mut ctx = self.get_state(conversation_id).await?;
        match ctx.long_term.get_mut(key) {
            Some(entry) => entry.merge(value, importance_score),
            None => {
                ctx.long_term
                    .insert(key.to_string(), LongTermEntry::new(value, importance_score));
            }
        }
        ctx.touch();
        self.store.save(&ctx).await?;
        Ok(())
    }

    /// 读取长期记忆；命中时累加访问计数
    pub async fn get_long_term(
        &self,
        conversation_id: &str,
        key: &str,
    ) -> Result<Option<Value>, TrackerError> {
        let mut ctx = self.get_state(conversation_id).await?;
        let Some(entry) = ctx.long_term.get_mut(key) else {
            return Ok(None);
        };
        entry.touch();
        let value = entry.value.clone();
        self.store.save(&ctx).await?;
        Ok(Some(value))
    }

    /// 推进流程状态；add_to_history 为 false 时只改当前阶段不留痕
    pub async fn update_flow_state(
        &self,
        conversation_id: &str,
        new_state: &str,
        add_to_history: bool,
    ) -> Result<(), TrackerError> {
        let mut ctx = self.get_state(conversation_id).await?;
        if add_to_history {
            ctx.flow
                .push_state(new_state, self.config.state_history_limit);
        } else {
            ctx.flow.current = new_state.to_string();
        }
        ctx.touch();
        self.store.save(&ctx).await?;
        Ok(())
    }

    /// 会话摘要：最近消息摘录 + 当前状态 + 记忆规模
    ///
    /// 短期记忆只统计未过期条目。
    pub async fn summary(
        &self,
        conversation_id: &str,
        message_limit: usize,
    ) -> Result<ConversationSummary, TrackerError> {
        let ctx = self.get_state(conversation_id).await?;

        let records = self
            .log
            .recent(conversation_id, message_limit)
            .await
            .map_err(|e| TrackerError::Storage(e.0))?;
        let recent_messages = records
            .into_iter()
            .map(|r| SummaryMessage {
                role: r.role,
                digest: r.content.chars().take(SUMMARY_DIGEST_CHARS).collect(),
                agent_id: r.agent_id,
            })
            .collect();

        let now = Utc::now();
        let short_term_count = ctx
            .short_term
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .count();

        Ok(ConversationSummary {
            conversation_id: ctx.conversation_id.clone(),
            recent_messages,
            current_state: ctx.flow.current.clone(),
            current_task: ctx.flow.current_task.clone(),
            current_agent: ctx.flow.current_agent.clone(),
            context_keys: ctx.context_variables.keys(),
            short_term_count,
            long_term_count: ctx.long_term.len(),
        })
    }

    /// 结束跟踪并删除会话，返回是否确实存在
    pub async fn end(&self, conversation_id: &str) -> Result<bool, TrackerError> {
        let removed = self.store.remove(conversation_id).await?;
        if removed {
            tracing::info!(conversation_id, "conversation tracking ended");
        }
        Ok(removed)
    }

    /// 回收不活跃会话，返回被删除的会话 ID
    ///
    /// 截止时间在开始时取定；删除前重读并复核活跃时间，
    /// 避免误删清扫期间刚收到消息的会话。
    pub async fn cleanup_inactive(
        &self,
        max_age: Duration,
    ) -> Result<Vec<String>, TrackerError> {
        let cutoff = Utc::now() - max_age;
        let candidates = self.store.list_updated().await?;

        let mut removed = Vec::new();
        for (conversation_id, updated_at) in candidates {
            if updated_at >= cutoff {
                continue;
            }
            // 复核：快照之后该会话可能已被触达
            let Some(ctx) = self.store.load(&conversation_id).await? else {
                continue;
            };
            if ctx.updated_at < cutoff && self.store.remove(&conversation_id).await? {
                removed.push(conversation_id);
            }
        }

        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "inactive conversations cleaned up");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::services::log::InMemoryConversationLog;
    use crate::store::InMemoryContextStore;

    use super::*;

    fn tracker() -> StateTracker {
        StateTracker::new(
            Arc::new(InMemoryContextStore::new()),
            Arc::new(InMemoryConversationLog::new()),
            TrackerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_init_rejects_duplicate() {
        let tracker = tracker();
        tracker.init("conv-1", "user-1", None).await.unwrap();

        let err = tracker.init("conv-1", "user-1", None).await.unwrap_err();
        assert!(matches!(err, TrackerError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_get_state_missing_is_not_found() {
        let tracker = tracker();
        let err = tracker.get_state("nope").await.unwrap_err();
        assert!(matches!(err, TrackerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_init_seeds_context_variables() {
        let tracker = tracker();
        let mut vars = serde_json::Map::new();
        vars.insert("channel".to_string(), json!("web"));
        tracker.init("conv-1", "user-1", Some(vars)).await.unwrap();

        let value = tracker
            .get_context_variable("conv-1", "channel")
            .await
            .unwrap();
        assert_eq!(value, Some(json!("web")));
    }

    #[tokio::test]
    async fn test_get_or_create_reports_creation() {
        let tracker = tracker();
        let (_, created) = tracker.get_or_create("conv-1", "user-1", None).await.unwrap();
        assert!(created);
        let (_, created) = tracker.get_or_create("conv-1", "user-1", None).await.unwrap();
        assert!(!created);
    }

    #[tokio::test]
    async fn test_get_or_create_hit_refreshes_activity() {
        let tracker = tracker();
        tracker.init("conv-1", "user-1", None).await.unwrap();

        // 回拨活跃时间，模拟久置会话收到新消息
        let mut ctx = tracker.get_state("conv-1").await.unwrap();
        ctx.updated_at = Utc::now() - Duration::hours(48);
        tracker.store().save(&ctx).await.unwrap();

        let (ctx, created) = tracker.get_or_create("conv-1", "user-1", None).await.unwrap();
        assert!(!created);
        assert!(Utc::now() - ctx.updated_at < Duration::minutes(1));

        // 刚触达的会话不会被清扫
        let removed = tracker.cleanup_inactive(Duration::hours(24)).await.unwrap();
        assert!(removed.is_empty());
        assert!(tracker.get_state("conv-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_update_state_is_partial() {
        let tracker = tracker();
        tracker.init("conv-1", "user-1", None).await.unwrap();

        tracker
            .update_state(
                "conv-1",
                StateUpdate {
                    current_task: Some("qualify_lead".to_string()),
                    ..StateUpdate::default()
                },
            )
            .await
            .unwrap();
        tracker
            .update_state(
                "conv-1",
                StateUpdate {
                    last_intent: Some(IntentType::LeadScoring),
                    ..StateUpdate::default()
                },
            )
            .await
            .unwrap();

        let ctx = tracker.get_state("conv-1").await.unwrap();
        assert_eq!(ctx.flow.current_task.as_deref(), Some("qualify_lead"));
        assert_eq!(ctx.current_intent, Some(IntentType::LeadScoring));
        assert_eq!(ctx.flow.current, "initialized");
    }

    #[tokio::test]
    async fn test_update_flow_state_history_is_optional() {
        let tracker = tracker();
        tracker.init("conv-1", "user-1", None).await.unwrap();

        tracker
            .update_flow_state("conv-1", "collecting_info", true)
            .await
            .unwrap();
        tracker
            .update_flow_state("conv-1", "waiting_agent", false)
            .await
            .unwrap();

        let ctx = tracker.get_state("conv-1").await.unwrap();
        assert_eq!(ctx.flow.current, "waiting_agent");
        assert_eq!(
            ctx.flow.history,
            vec!["start".to_string(), "collecting_info".to_string()]
        );
    }

    #[tokio::test]
    async fn test_short_term_expired_read_removes_entry() {
        let tracker = tracker();
        tracker.init("conv-1", "user-1", None).await.unwrap();
        tracker
            .set_short_term("conv-1", "temp", json!("v"), Some(Duration::seconds(0)))
            .await
            .unwrap();

        assert_eq!(tracker.get_short_term("conv-1", "temp").await.unwrap(), None);
        // 条目已被物理删除
        let ctx = tracker.get_state("conv-1").await.unwrap();
        assert!(!ctx.short_term.contains_key("temp"));
    }

    #[tokio::test]
    async fn test_short_term_live_read_returns_value() {
        let tracker = tracker();
        tracker.init("conv-1", "user-1", None).await.unwrap();
        tracker
            .set_short_term("conv-1", "temp", json!(42), Some(Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(
            tracker.get_short_term("conv-1", "temp").await.unwrap(),
            Some(json!(42))
        );
    }

    #[tokio::test]
    async fn test_set_short_term_sweeps_expired_siblings() {
        let tracker = tracker();
        tracker.init("conv-1", "user-1", None).await.unwrap();
        tracker
            .set_short_term("conv-1", "stale", json!(1), Some(Duration::seconds(0)))
            .await
            .unwrap();
        tracker
            .set_short_term("conv-1", "fresh", json!(2), Some(Duration::hours(1)))
            .await
            .unwrap();

        let ctx = tracker.get_state("conv-1").await.unwrap();
        assert!(!ctx.short_term.contains_key("stale"));
        assert!(ctx.short_term.contains_key("fresh"));
    }

    #[tokio::test]
    async fn test_promote_long_term_merges_monotonically() {
        let tracker = tracker();
        tracker.init("conv-1", "user-1", None).await.unwrap();

        tracker
            .promote_long_term("conv-1", "pref", json!("first"), 0.6)
            .await
            .unwrap();
        tracker
            .promote_long_term("conv-1", "pref", json!("second"), 0.4)
            .await
            .unwrap();

        let ctx = tracker.get_state("conv-1").await.unwrap();
        let entry = &ctx.long_term["pref"];
        assert_eq!(entry.value, json!("second"));
        assert_eq!(entry.importance_score, 0.6);
        assert_eq!(entry.access_count, 2);
    }

    #[tokio::test]
    async fn test_get_long_term_counts_access() {
        let tracker = tracker();
        tracker.init("conv-1", "user-1", None).await.unwrap();
        tracker
            .promote_long_term("conv-1", "pref", json!("v"), 0.5)
            .await
            .unwrap();

        assert_eq!(
            tracker.get_long_term("conv-1", "pref").await.unwrap(),
            Some(json!("v"))
        );
        let ctx = tracker.get_state("conv-1").await.unwrap();
        assert_eq!(ctx.long_term["pref"].access_count, 2);
    }

    #[tokio::test]
    async fn test_summary_counts_only_live_short_term() {
        let tracker = tracker();
        tracker.init("conv-1", "user-1", None).await.unwrap();
        tracker
            .set_short_term("conv-1", "live", json!(1), Some(Duration::hours(1)))
            .await
            .unwrap();
        // 直接写入一条已过期条目，绕过 set 路径的顺带清理
        let mut ctx = tracker.get_state("conv-1").await.unwrap();
        ctx.short_term.insert(
            "stale".to_string(),
            ShortTermEntry::new(json!(2), Duration::seconds(0)),
        );
        tracker.store().save(&ctx).await.unwrap();

        let summary = tracker.summary("conv-1", 10).await.unwrap();
        assert_eq!(summary.short_term_count, 1);
        assert_eq!(summary.current_state, "initialized");
    }

    #[tokio::test]
    async fn test_cleanup_inactive_spares_recent() {
        let tracker = tracker();
        tracker.init("old", "user-1", None).await.unwrap();
        tracker.init("fresh", "user-1", None).await.unwrap();

        // 回拨 old 的活跃时间
        let mut ctx = tracker.get_state("old").await.unwrap();
        ctx.updated_at = Utc::now() - Duration::hours(48);
        tracker.store().save(&ctx).await.unwrap();

        let removed = tracker.cleanup_inactive(Duration::hours(24)).await.unwrap();
        assert_eq!(removed, vec!["old".to_string()]);
        assert!(tracker.get_state("fresh").await.is_ok());
        assert!(matches!(
            tracker.get_state("old").await.unwrap_err(),
            TrackerError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_end_reports_existence() {
        let tracker = tracker();
        tracker.init("conv-1", "user-1", None).await.unwrap();
        assert!(tracker.end("conv-1").await.unwrap());
        assert!(!tracker.end("conv-1").await.unwrap());
    }
}
