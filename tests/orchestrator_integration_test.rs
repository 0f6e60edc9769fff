//! 编排器端到端测试：接收 → 分析 → 选择 → 分发 → 融合 → 持久化

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;

use hicrm::agent::{
    AgentId, AgentLoadInfo, AgentMessage, AgentResponse, AgentRuntime, AgentStatus, Capability,
};
use hicrm::context::{ConversationMode, RoutingStrategy};
use hicrm::error::{AgentError, ServiceError};
use hicrm::orchestrator::{Orchestrator, OrchestratorConfig};
use hicrm::services::log::{ConversationLog, InMemoryConversationLog, MessageRole};
use hicrm::services::nlu::{KeywordNlu, NluContext, NluResult, NluService};
use hicrm::services::retrieval::NoopRetrieval;
use hicrm::store::{ContextStore, InMemoryContextStore};
use hicrm::tracker::{StateTracker, TrackerConfig};

/// 固定应答的测试 Agent 运行时
struct ScriptedRuntime {
    responses: HashMap<AgentId, AgentResponse>,
    failing: HashSet<AgentId>,
    offline: HashSet<AgentId>,
}

impl ScriptedRuntime {
    fn new() -> Self {
        let mut responses = HashMap::new();
        responses.insert(
            "sales_agent".to_string(),
            AgentResponse {
                content: "已为您找到 3 个匹配的客户。".to_string(),
                confidence: 0.85,
                suggestions: vec!["查看客户详情".to_string()],
                next_actions: vec!["安排跟进".to_string()],
                metadata: serde_json::Map::new(),
            },
        );
        responses.insert(
            "crm_expert_agent".to_string(),
            AgentResponse {
                content: "从行业经验看，该客户群体转化率较高。".to_string(),
                confidence: 0.7,
                suggestions: vec!["参考行业报告".to_string()],
                next_actions: Vec::new(),
                metadata: serde_json::Map::new(),
            },
        );
        Self {
            responses,
            failing: HashSet::new(),
            offline: HashSet::new(),
        }
    }

    fn all_offline() -> Self {
        let mut runtime = Self::new();
        runtime.offline = runtime.responses.keys().cloned().collect();
        runtime
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn is_available(&self, agent_id: &str) -> bool {
        self.responses.contains_key(agent_id) && !self.offline.contains(agent_id)
    }

    async fn send(
        &self,
        agent_id: &str,
        _message: AgentMessage,
    ) -> Result<AgentResponse, AgentError> {
        if self.failing.contains(agent_id) {
            return Err(AgentError::Failed(format!("{} timed out", agent_id)));
        }
        self.responses
            .get(agent_id)
            .cloned()
            .ok_or_else(|| AgentError::Unavailable(agent_id.to_string()))
    }

    async fn assign(&self, required: &[Capability], max_agents: usize) -> Vec<AgentId> {
        if required.is_empty() {
            return Vec::new();
        }
        self.responses
            .keys()
            .filter(|id| !self.offline.contains(*id))
            .take(max_agents)
            .cloned()
            .collect()
    }

    async fn snapshot(&self) -> Vec<AgentLoadInfo> {
        self.responses
            .keys()
            .map(|id| AgentLoadInfo {
                id: id.clone(),
                status: AgentStatus::Idle,
                error_count: 0,
                available: !self.offline.contains(id),
            })
            .collect()
    }
}

/// 总是报错的 NLU（测试降级路径）
struct BrokenNlu;

#[async_trait]
impl NluService for BrokenNlu {
    async fn analyze(&self, _text: &str, _ctx: &NluContext) -> Result<NluResult, ServiceError> {
        Err(ServiceError("nlu backend unreachable".to_string()))
    }
}

struct Harness {
    orchestrator: Orchestrator,
    tracker: Arc<StateTracker>,
    store: Arc<InMemoryContextStore>,
    log: Arc<InMemoryConversationLog>,
}

fn harness_with(runtime: ScriptedRuntime, nlu: Arc<dyn NluService>) -> Harness {
    let store = Arc::new(InMemoryContextStore::new());
    let log = Arc::new(InMemoryConversationLog::new());
    let tracker = Arc::new(StateTracker::new(
        store.clone(),
        log.clone(),
        TrackerConfig::default(),
    ));
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default(),
        tracker.clone(),
        nlu,
        Arc::new(NoopRetrieval),
        Arc::new(runtime),
        log.clone(),
    );
    Harness {
        orchestrator,
        tracker,
        store,
        log,
    }
}

fn harness() -> Harness {
    harness_with(ScriptedRuntime::new(), Arc::new(KeywordNlu::new()))
}

#[tokio::test]
async fn test_single_agent_end_to_end() -> anyhow::Result<()> {
    let h = harness();

    let response = h
        .orchestrator
        .process_message("conv-1", "user-1", "帮我查找客户张三", None)
        .await;

    assert_eq!(response.content, "已为您找到 3 个匹配的客户。");
    assert_eq!(response.metadata.fusion_method, "pass_through");
    assert_eq!(response.metadata.primary_agent.as_deref(), Some("sales_agent"));

    // 用户消息与融合应答都已落日志
    let records = h.log.recent("conv-1", 10).await?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].role, MessageRole::User);
    assert_eq!(records[1].role, MessageRole::Assistant);
    assert_eq!(records[1].agent_id.as_deref(), Some("sales_agent"));
    assert_eq!(records[1].metadata.get("confidence"), Some(&json!(0.85)));

    // 会话状态已更新
    let ctx = h.tracker.get_state("conv-1").await?;
    assert_eq!(ctx.active_agents, vec!["sales_agent".to_string()]);
    assert_eq!(ctx.flow.current_agent.as_deref(), Some("sales_agent"));
    Ok(())
}

#[tokio::test]
async fn test_multi_agent_fusion_end_to_end() -> anyhow::Result<()> {
    let h = harness();

    // 客户分析映射到 sales_agent + crm_expert_agent 两个 Agent
    let response = h
        .orchestrator
        .process_message("conv-1", "user-1", "帮我做客户分析", None)
        .await;

    assert_eq!(response.metadata.fusion_method, "confidence_based");
    assert_eq!(response.metadata.primary_agent.as_deref(), Some("sales_agent"));
    assert_eq!(response.metadata.contributing_agents.len(), 2);
    assert!(response.content.starts_with("已为您找到 3 个匹配的客户。"));
    // 次应答置信度 0.7 > 0.5，进入补充信息
    assert!(response.content.contains("补充信息"));
    Ok(())
}

#[tokio::test]
async fn test_agent_failure_still_yields_response() -> anyhow::Result<()> {
    let mut runtime = ScriptedRuntime::new();
    runtime.failing.insert("sales_agent".to_string());
    let h = harness_with(runtime, Arc::new(KeywordNlu::new()));

    let response = h
        .orchestrator
        .process_message("conv-1", "user-1", "帮我做客户分析", None)
        .await;

    // sales_agent 失败，crm_expert_agent 的应答直通
    assert_eq!(response.metadata.fusion_method, "pass_through");
    assert_eq!(
        response.metadata.primary_agent.as_deref(),
        Some("crm_expert_agent")
    );
    Ok(())
}

#[tokio::test]
async fn test_nlu_failure_degrades_without_error() -> anyhow::Result<()> {
    let h = harness_with(ScriptedRuntime::new(), Arc::new(BrokenNlu));

    let response = h
        .orchestrator
        .process_message("conv-1", "user-1", "你好", None)
        .await;

    assert_eq!(response.confidence, 0.0);
    assert_eq!(response.metadata.fusion_method, "degraded");
    assert!(response
        .metadata
        .error
        .as_deref()
        .unwrap()
        .contains("nlu backend unreachable"));

    // 降级应答同样落日志：用户轮之后跟着 assistant 轮
    let records = h.log.recent("conv-1", 10).await?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].role, MessageRole::Assistant);
    assert_eq!(records[1].content, response.content);
    assert_eq!(records[1].metadata.get("fusion_method"), Some(&json!("degraded")));

    let metrics = h.orchestrator.get_metrics().await;
    assert_eq!(metrics.failed_routings, 1);
    assert_eq!(metrics.successful_routings, 0);
    Ok(())
}

#[tokio::test]
async fn test_no_agent_available_canned_response() -> anyhow::Result<()> {
    let h = harness_with(ScriptedRuntime::all_offline(), Arc::new(KeywordNlu::new()));

    let response = h
        .orchestrator
        .process_message("conv-1", "user-1", "帮我查找客户", None)
        .await;

    assert_eq!(response.content, "抱歉，当前没有可用的 Agent 来处理您的请求。");
    assert_eq!(response.confidence, 0.0);
    assert_eq!(response.metadata.fusion_method, "none");

    // 规范应答也是一轮 assistant 消息，会话历史不缺轮
    let records = h.log.recent("conv-1", 10).await?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].role, MessageRole::User);
    assert_eq!(records[1].role, MessageRole::Assistant);
    assert_eq!(records[1].content, response.content);
    assert_eq!(records[1].metadata.get("fusion_method"), Some(&json!("none")));
    Ok(())
}

#[tokio::test]
async fn test_set_routing_mode_and_get_context() -> anyhow::Result<()> {
    let h = harness();
    h.orchestrator
        .process_message("conv-1", "user-1", "你好", None)
        .await;

    assert!(
        h.orchestrator
            .set_routing_mode(
                "conv-1",
                ConversationMode::MultiAgent,
                Some(RoutingStrategy::RoundRobin),
            )
            .await
    );
    let ctx = h.orchestrator.get_context("conv-1").await.unwrap();
    assert_eq!(ctx.mode, ConversationMode::MultiAgent);
    assert_eq!(ctx.routing_strategy, RoutingStrategy::RoundRobin);

    // 不存在的会话拒绝切换
    assert!(
        !h.orchestrator
            .set_routing_mode("nope", ConversationMode::SingleAgent, None)
            .await
    );
    Ok(())
}

#[tokio::test]
async fn test_metrics_track_conversations_and_usage() -> anyhow::Result<()> {
    let h = harness();
    h.orchestrator
        .process_message("conv-1", "user-1", "帮我查找客户", None)
        .await;
    h.orchestrator
        .process_message("conv-1", "user-1", "再查找客户王五", None)
        .await;
    h.orchestrator
        .process_message("conv-2", "user-2", "你好", None)
        .await;

    let metrics = h.orchestrator.get_metrics().await;
    assert_eq!(metrics.total_conversations, 2);
    assert_eq!(metrics.active_conversations, 2);
    assert_eq!(metrics.successful_routings, 3);
    assert_eq!(metrics.agent_usage["sales_agent"], 2);
    assert_eq!(metrics.agent_usage["crm_expert_agent"], 1);
    assert!(metrics.avg_response_time_ms >= 0.0);
    Ok(())
}

#[tokio::test]
async fn test_cleanup_inactive_removes_stale_conversation() -> anyhow::Result<()> {
    let h = harness();
    h.orchestrator
        .process_message("stale", "user-1", "你好", None)
        .await;
    h.orchestrator
        .process_message("fresh", "user-2", "你好", None)
        .await;

    // 回拨 stale 的活跃时间到阈值之外
    let mut ctx = h.tracker.get_state("stale").await?;
    ctx.updated_at = Utc::now() - Duration::hours(48);
    h.store.save(&ctx).await?;

    let removed = h.orchestrator.cleanup_inactive(None).await;
    assert_eq!(removed, 1);
    assert!(h.orchestrator.get_context("stale").await.is_none());
    assert!(h.orchestrator.get_context("fresh").await.is_some());
    Ok(())
}

#[tokio::test]
async fn test_initial_variables_seed_context() -> anyhow::Result<()> {
    let h = harness();
    let mut vars = serde_json::Map::new();
    vars.insert("channel".to_string(), json!("wechat"));

    h.orchestrator
        .process_message("conv-1", "user-1", "你好", Some(vars))
        .await;

    let ctx = h.orchestrator.get_context("conv-1").await.unwrap();
    assert_eq!(ctx.context_variables.get("channel"), Some(&json!("wechat")));
    Ok(())
}
