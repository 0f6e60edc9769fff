//! Agent 选择策略
//!
//! 四种策略：意图映射、能力指派、最低负载、轮询。
//! 轮询游标由选择器自持（AtomicUsize），不依赖全局状态。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::agent::{AgentId, AgentRuntime, AgentStatus, Capability};
use crate::context::RoutingStrategy;
use crate::services::nlu::IntentType;
use crate::services::retrieval::RagResult;

/// 检索结果参与能力推导的置信度门槛
const KNOWLEDGE_CAP_THRESHOLD: f64 = 0.7;

/// 默认意图到 Agent 的映射表
pub fn default_intent_table() -> HashMap<IntentType, Vec<AgentId>> {
    let mut table: HashMap<IntentType, Vec<AgentId>> = HashMap::new();
    let mut put = |intent: IntentType, agents: &[&str]| {
        table.insert(intent, agents.iter().map(|s| s.to_string()).collect());
    };

    put(IntentType::CustomerSearch, &["sales_agent"]);
    put(IntentType::CustomerCreate, &["sales_agent"]);
    put(IntentType::CustomerUpdate, &["sales_agent"]);
    put(
        IntentType::CustomerAnalysis,
        &["sales_agent", "crm_expert_agent"],
    );
    put(IntentType::LeadSearch, &["market_agent"]);
    put(IntentType::LeadCreate, &["market_agent"]);
    put(IntentType::LeadUpdate, &["market_agent"]);
    put(IntentType::LeadScoring, &["market_agent"]);
    put(IntentType::LeadAssignment, &["sales_management_agent"]);
    put(IntentType::OpportunitySearch, &["sales_agent"]);
    put(
        IntentType::OpportunityCreate,
        &["sales_agent", "product_agent"],
    );
    put(IntentType::OpportunityUpdate, &["sales_agent"]);
    put(
        IntentType::OpportunityAnalysis,
        &["sales_agent", "management_strategy_agent"],
    );
    put(IntentType::TaskCreate, &["sales_agent"]);
    put(IntentType::TaskSearch, &["sales_agent"]);
    put(IntentType::ScheduleMeeting, &["sales_agent"]);
    put(IntentType::ReportGenerate, &["management_strategy_agent"]);
    put(
        IntentType::PerformanceAnalysis,
        &["management_strategy_agent", "sales_management_agent"],
    );
    put(IntentType::ForecastAnalysis, &["management_strategy_agent"]);
    put(IntentType::Greeting, &["crm_expert_agent"]);
    put(IntentType::Help, &["crm_expert_agent"]);
    put(IntentType::Unknown, &["crm_expert_agent"]);

    table
}

/// Agent 选择器
pub struct AgentSelector {
    agents: Arc<dyn AgentRuntime>,
    intent_table: HashMap<IntentType, Vec<AgentId>>,
    fallback_agent: AgentId,
    max_agents: usize,
    round_robin_cursor: AtomicUsize,
}

impl AgentSelector {
    pub fn new(agents: Arc<dyn AgentRuntime>, fallback_agent: AgentId, max_agents: usize) -> Self {
        Self {
            agents,
            intent_table: default_intent_table(),
            fallback_agent,
            max_agents,
            round_robin_cursor: AtomicUsize::new(0),
        }
    }

    /// 按策略选择 Agent；合法返回空集（由编排层回退处理）
    pub async fn select(
        &self,
        strategy: RoutingStrategy,
        intent: IntentType,
        retrieval: Option<&RagResult>,
    ) -> Vec<AgentId> {
        let selected = match strategy {
            RoutingStrategy::IntentBased => self.select_by_intent(intent).await,
            RoutingStrategy::CapabilityBased => self.select_by_capability(intent, retrieval).await,
            RoutingStrategy::LoadBased => self.select_by_load().await,
            RoutingStrategy::RoundRobin => self.select_round_robin().await,
        };
        tracing::debug!(?strategy, ?intent, agents = ?selected, "agents selected");
        selected
    }

    /// 意图映射：取表中候选（缺省回退兜底 Agent），过滤可用性，截断上限
    async fn select_by_intent(&self, intent: IntentType) -> Vec<AgentId> {
        let fallback = vec![self.fallback_agent.clone()];
        let candidates = self.intent_table.get(&intent).unwrap_or(&fallback);

        let mut selected = Vec::new();
        for agent_id in candidates {
            if selected.len() >= self.max_agents {
                break;
            }
            if self.agents.is_available(agent_id).await {
                selected.push(agent_id.clone());
            }
        }
        selected
    }

    /// 能力指派：从意图与检索结果推导所需能力，交给运行时指派
    async fn select_by_capability(
        &self,
        intent: IntentType,
        retrieval: Option<&RagResult>,
    ) -> Vec<AgentId> {
        let mut required = Vec::new();
        match intent {
            IntentType::CustomerSearch | IntentType::CustomerCreate => {
                required.push(Capability::CustomerManagement)
            }
            IntentType::LeadSearch | IntentType::LeadCreate => {
                required.push(Capability::LeadManagement)
            }
            IntentType::OpportunitySearch | IntentType::OpportunityCreate => {
                required.push(Capability::OpportunityManagement)
            }
            _ => {}
        }
        if let Some(rag) = retrieval {
            if rag.confidence > KNOWLEDGE_CAP_THRESHOLD {
                required.push(Capability::KnowledgeRetrieval);
            }
        }
        self.agents.assign(&required, self.max_agents).await
    }

    /// 最低负载：按 (错误数, 忙碌) 稳定排序取一个
    async fn select_by_load(&self) -> Vec<AgentId> {
        let mut available: Vec<_> = self
            .agents
            .snapshot()
            .await
            .into_iter()
            .filter(|info| info.available)
            .collect();
        available.sort_by_key(|info| (info.error_count, info.status == AgentStatus::Busy));
        available.into_iter().take(1).map(|info| info.id).collect()
    }

    /// 轮询：可用集合上按游标取一个
    async fn select_round_robin(&self) -> Vec<AgentId> {
        let available: Vec<AgentId> = self
            .agents
            .snapshot()
            .await
            .into_iter()
            .filter(|info| info.available)
            .map(|info| info.id)
            .collect();
        if available.is_empty() {
            return Vec::new();
        }
        let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % available.len();
        vec![available[idx].clone()]
    }
}
