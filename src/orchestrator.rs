//! 编排器
//!
//! process_message 管线：接收 → NLU 分析 → 知识补充 → Agent 选择 → 并发分发
//! → 响应融合 → 持久化。管线内部错误在边界统一捕获并降级为零置信度应答，
//! 调用方永远拿到 `FusedResponse`。同一会话的消息串行处理（逐会话互斥）。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::agent::{AgentId, AgentMessage, AgentRuntime};
use crate::context::{ConversationContext, ConversationMode, RoutingStrategy};
use crate::error::OrchestratorError;
use crate::routing::dispatcher::Dispatcher;
use crate::routing::fusion::{FusedResponse, ResponseFuser};
use crate::routing::selector::AgentSelector;
use crate::services::log::{ConversationLog, MessageRole};
use crate::services::nlu::{NluContext, NluService};
use crate::services::retrieval::{RagMode, RetrievalService};
use crate::tracker::{StateTracker, StateUpdate};

/// NLU 置信度低于该值时转入知识检索
const RAG_FALLBACK_CONFIDENCE: f64 = 0.7;

/// 编排器配置
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// 单次分发的 Agent 数上限
    pub max_agents_per_request: usize,
    /// 意图无映射或选择为空时的兜底 Agent
    pub fallback_agent: AgentId,
    /// 不活跃会话回收阈值（小时）
    pub inactive_max_age_hours: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_agents_per_request: 2,
            fallback_agent: "crm_expert_agent".to_string(),
            inactive_max_age_hours: 24,
        }
    }
}

/// 路由指标（进程内累计）
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoutingMetrics {
    pub total_conversations: u64,
    pub successful_routings: u64,
    pub failed_routings: u64,
    pub avg_response_time_ms: f64,
    pub agent_usage: HashMap<AgentId, u64>,
    pub active_conversations: usize,
}

impl RoutingMetrics {
    /// 增量均值更新
    fn record_elapsed(&mut self, elapsed_ms: f64) {
        let n = (self.successful_routings + self.failed_routings) as f64;
        // 调用方保证 n >= 1（先计成败再记耗时）
        self.avg_response_time_ms += (elapsed_ms - self.avg_response_time_ms) / n;
    }
}

/// 对话编排器
pub struct Orchestrator {
    config: OrchestratorConfig,
    tracker: Arc<StateTracker>,
    nlu: Arc<dyn NluService>,
    retrieval: Arc<dyn RetrievalService>,
    log: Arc<dyn ConversationLog>,
    agents: Arc<dyn AgentRuntime>,
    selector: AgentSelector,
    dispatcher: Dispatcher,
    fuser: ResponseFuser,
    metrics: Mutex<RoutingMetrics>,
    /// 逐会话互斥：同一会话的消息串行，不同会话互不阻塞
    flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        tracker: Arc<StateTracker>,
        nlu: Arc<dyn NluService>,
        retrieval: Arc<dyn RetrievalService>,
        agents: Arc<dyn AgentRuntime>,
        log: Arc<dyn ConversationLog>,
    ) -> Self {
        let selector = AgentSelector::new(
            agents.clone(),
            config.fallback_agent.clone(),
            config.max_agents_per_request,
        );
        let dispatcher = Dispatcher::new(agents.clone());
        Self {
            config,
            tracker,
            nlu,
            retrieval,
            log,
            agents,
            selector,
            dispatcher,
            fuser: ResponseFuser::new(),
            metrics: Mutex::new(RoutingMetrics::default()),
            flight: Mutex::new(HashMap::new()),
        }
    }

    /// 处理一条用户消息；任何内部错误都降级为应答，不向调用方抛错
    pub async fn process_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        text: &str,
        extra_vars: Option<serde_json::Map<String, Value>>,
    ) -> FusedResponse {
        let lock = self.flight_lock(conversation_id).await;
        let _guard = lock.lock().await;

        let started = Instant::now();
        let response = match self
            .run_pipeline(conversation_id, user_id, text, extra_vars)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    conversation_id,
                    error = %e,
                    "message pipeline failed, returning degraded response"
                );
                let fused = FusedResponse::degraded(e.to_string());
                // 降级应答也要落日志；日志再失败只告警，不影响返回
                let mut meta = serde_json::Map::new();
                meta.insert("confidence".to_string(), json!(fused.confidence));
                meta.insert(
                    "fusion_method".to_string(),
                    json!(fused.metadata.fusion_method),
                );
                if let Err(log_err) = self
                    .log
                    .append(conversation_id, MessageRole::Assistant, &fused.content, None, meta)
                    .await
                {
                    tracing::warn!(
                        conversation_id,
                        error = %log_err,
                        "failed to log degraded reply"
                    );
                }
                fused
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        {
            let mut metrics = self.metrics.lock().await;
            // 无 Agent、全部失败与降级都算路由失败
            if matches!(response.metadata.fusion_method.as_str(), "none" | "degraded") {
                metrics.failed_routings += 1;
            } else {
                metrics.successful_routings += 1;
            }
            metrics.record_elapsed(elapsed_ms);
        }
        response
    }

    async fn run_pipeline(
        &self,
        conversation_id: &str,
        user_id: &str,
        text: &str,
        extra_vars: Option<serde_json::Map<String, Value>>,
    ) -> Result<FusedResponse, OrchestratorError> {
        let started = Instant::now();

        // 接收：取或建会话，用户消息先落日志再分析
        let (ctx, created) = self
            .tracker
            .get_or_create(conversation_id, user_id, extra_vars)
            .await?;
        if created {
            self.metrics.lock().await.total_conversations += 1;
        }
        self.log
            .append(conversation_id, MessageRole::User, text, None, serde_json::Map::new())
            .await
            .map_err(|e| OrchestratorError::Log(e.0))?;

        // 分析
        let nlu_ctx = NluContext {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            previous_intent: ctx.current_intent,
        };
        let nlu = self
            .nlu
            .analyze(text, &nlu_ctx)
            .await
            .map_err(|e| OrchestratorError::Nlu(e.0))?;
        let entities: HashMap<String, Value> = nlu
            .entities
            .iter()
            .map(|e| (e.entity_type.clone(), json!(e.text)))
            .collect();
        self.tracker
            .update_state(
                conversation_id,
                StateUpdate {
                    last_intent: Some(nlu.intent),
                    entities: Some(entities.clone()),
                    ..StateUpdate::default()
                },
            )
            .await?;

        // 知识补充
        let retrieval = if nlu.intent.requires_knowledge() || nlu.confidence < RAG_FALLBACK_CONFIDENCE {
            let rag = self
                .retrieval
                .query(text, RagMode::Hybrid)
                .await
                .map_err(|e| OrchestratorError::Retrieval(e.0))?;
            self.tracker
                .update_state(
                    conversation_id,
                    StateUpdate {
                        last_retrieval: Some(rag.clone()),
                        ..StateUpdate::default()
                    },
                )
                .await?;
            Some(rag)
        } else {
            None
        };

        // 选择（空集回退兜底 Agent，兜底也不可用则返回规范应答）
        let mut selected = self
            .selector
            .select(ctx.routing_strategy, nlu.intent, retrieval.as_ref())
            .await;
        if selected.is_empty() {
            if self.agents.is_available(&self.config.fallback_agent).await {
                selected = vec![self.config.fallback_agent.clone()];
            } else {
                tracing::warn!(conversation_id, "no agent available, returning canned response");
                let fused = FusedResponse::no_agent_available();
                let mut meta = serde_json::Map::new();
                meta.insert("confidence".to_string(), json!(fused.confidence));
                meta.insert("suggestions".to_string(), json!(fused.suggestions));
                meta.insert("intent".to_string(), json!(nlu.intent));
                meta.insert(
                    "fusion_method".to_string(),
                    json!(fused.metadata.fusion_method),
                );
                self.log
                    .append(conversation_id, MessageRole::Assistant, &fused.content, None, meta)
                    .await
                    .map_err(|e| OrchestratorError::Log(e.0))?;
                return Ok(fused);
            }
        }
        {
            let mut metrics = self.metrics.lock().await;
            for agent_id in &selected {
                *metrics.agent_usage.entry(agent_id.clone()).or_default() += 1;
            }
        }

        // 分发
        let refreshed = self.tracker.get_state(conversation_id).await?;
        let message = self.build_task_message(&refreshed, user_id, text, &nlu.intent, &entities, &nlu.slots, retrieval.as_ref());
        let results = self.dispatcher.dispatch(&selected, &message).await;

        // 融合
        let fused = self.fuser.fuse(&results);

        // 持久化：融合应答带指标元数据落日志，刷新会话活跃状态
        let mut meta = serde_json::Map::new();
        meta.insert("confidence".to_string(), json!(fused.confidence));
        meta.insert("suggestions".to_string(), json!(fused.suggestions));
        meta.insert("next_actions".to_string(), json!(fused.next_actions));
        meta.insert("intent".to_string(), json!(nlu.intent));
        meta.insert(
            "processing_time_ms".to_string(),
            json!(started.elapsed().as_secs_f64() * 1000.0),
        );
        meta.insert("rag_used".to_string(), json!(retrieval.is_some()));
        self.log
            .append(
                conversation_id,
                MessageRole::Assistant,
                &fused.content,
                fused.metadata.primary_agent.clone(),
                meta,
            )
            .await
            .map_err(|e| OrchestratorError::Log(e.0))?;
        self.tracker
            .update_state(
                conversation_id,
                StateUpdate {
                    active_agents: Some(selected),
                    current_agent: fused.metadata.primary_agent.clone(),
                    ..StateUpdate::default()
                },
            )
            .await?;

        Ok(fused)
    }

    /// 组装投递给 Agent 的任务消息（会话背景随元数据下发）
    #[allow(clippy::too_many_arguments)]
    fn build_task_message(
        &self,
        ctx: &ConversationContext,
        user_id: &str,
        text: &str,
        intent: &crate::services::nlu::IntentType,
        entities: &HashMap<String, Value>,
        slots: &HashMap<String, Value>,
        retrieval: Option<&crate::services::retrieval::RagResult>,
    ) -> AgentMessage {
        let mut message = AgentMessage::task("orchestrator", text)
            .with_meta("conversation_id", json!(ctx.conversation_id))
            .with_meta("user_id", json!(user_id))
            .with_meta("intent", json!(intent))
            .with_meta("entities", json!(entities))
            .with_meta("slots", json!(slots))
            .with_meta("context_variables", ctx.context_variables.to_json());
        if let Some(rag) = retrieval {
            message = message.with_meta("rag_context", json!(rag));
        }
        message
    }

    /// 读取会话上下文（仅查询，不改状态）
    pub async fn get_context(&self, conversation_id: &str) -> Option<ConversationContext> {
        self.tracker.get_state(conversation_id).await.ok()
    }

    /// 切换会话的对话模式与路由策略；会话不存在返回 false
    pub async fn set_routing_mode(
        &self,
        conversation_id: &str,
        mode: ConversationMode,
        strategy: Option<RoutingStrategy>,
    ) -> bool {
        let update = StateUpdate {
            mode: Some(mode),
            routing_strategy: strategy,
            ..StateUpdate::default()
        };
        match self.tracker.update_state(conversation_id, update).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "routing mode change rejected");
                false
            }
        }
    }

    /// 指标快照（活跃会话数实时取自存储）
    pub async fn get_metrics(&self) -> RoutingMetrics {
        let mut snapshot = self.metrics.lock().await.clone();
        snapshot.active_conversations = self
            .tracker
            .store()
            .count()
            .await
            .unwrap_or(snapshot.active_conversations);
        snapshot
    }

    /// 回收不活跃会话并清理其互斥锁，返回回收数量；不传阈值时用配置值
    pub async fn cleanup_inactive(&self, max_age_hours: Option<i64>) -> usize {
        let max_age =
            Duration::hours(max_age_hours.unwrap_or(self.config.inactive_max_age_hours));
        match self.tracker.cleanup_inactive(max_age).await {
            Ok(removed) => {
                let mut flight = self.flight.lock().await;
                for conversation_id in &removed {
                    flight.remove(conversation_id);
                }
                removed.len()
            }
            Err(e) => {
                tracing::error!(error = %e, "inactive conversation cleanup failed");
                0
            }
        }
    }

    async fn flight_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut flight = self.flight.lock().await;
        flight
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
