//! 命令行演示：标准输入逐行读消息，走完整编排管线后打印融合应答
//!
//! Agent 运行时用内置的演示实现（按意图回显），生产部署应注入真实的
//! Agent 集群实现。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use hicrm::agent::{
    AgentId, AgentLoadInfo, AgentMessage, AgentResponse, AgentRuntime, AgentStatus, Capability,
};
use hicrm::config::load_config;
use hicrm::error::AgentError;
use hicrm::services::log::InMemoryConversationLog;
use hicrm::services::nlu::KeywordNlu;
use hicrm::services::retrieval::NoopRetrieval;
use hicrm::store::InMemoryContextStore;
use hicrm::{Orchestrator, StateTracker};

/// 演示用 Agent 运行时：固定花名册，按消息内容回显
struct DemoRuntime {
    roster: Vec<AgentId>,
}

impl DemoRuntime {
    fn new() -> Self {
        Self {
            roster: vec![
                "sales_agent".to_string(),
                "market_agent".to_string(),
                "crm_expert_agent".to_string(),
                "management_strategy_agent".to_string(),
                "sales_management_agent".to_string(),
                "product_agent".to_string(),
            ],
        }
    }
}

#[async_trait]
impl AgentRuntime for DemoRuntime {
    async fn is_available(&self, agent_id: &str) -> bool {
        self.roster.iter().any(|id| id == agent_id)
    }

    async fn send(
        &self,
        agent_id: &str,
        message: AgentMessage,
    ) -> Result<AgentResponse, AgentError> {
        Ok(AgentResponse::new(
            format!("[{}] 已收到您的请求：{}", agent_id, message.content),
            0.8,
        ))
    }

    async fn assign(&self, required: &[Capability], max_agents: usize) -> Vec<AgentId> {
        if required.is_empty() {
            return Vec::new();
        }
        self.roster.iter().take(max_agents).cloned().collect()
    }

    async fn snapshot(&self) -> Vec<AgentLoadInfo> {
        self.roster
            .iter()
            .map(|id| AgentLoadInfo {
                id: id.clone(),
                status: AgentStatus::Idle,
                error_count: 0,
                available: true,
            })
            .collect()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hicrm::observability::init();

    let cfg = load_config(None)?;
    let log = Arc::new(InMemoryConversationLog::new());
    let tracker = Arc::new(StateTracker::new(
        Arc::new(InMemoryContextStore::new()),
        log.clone(),
        (&cfg.tracker).into(),
    ));
    let orchestrator = Orchestrator::new(
        (&cfg.orchestrator).into(),
        tracker,
        Arc::new(KeywordNlu::new()),
        Arc::new(NoopRetrieval),
        Arc::new(DemoRuntime::new()),
        log,
    );

    println!("HiCRM 对话编排演示（Ctrl-D 退出）");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        let response = orchestrator
            .process_message("demo-conversation", "demo-user", text, None)
            .await;
        println!("{}", response.content);
        if !response.suggestions.is_empty() {
            println!("建议：{}", response.suggestions.join(" / "));
        }
    }

    let metrics = orchestrator.get_metrics().await;
    println!(
        "本次会话：成功 {} 次，失败 {} 次，平均耗时 {:.1}ms",
        metrics.successful_routings, metrics.failed_routings, metrics.avg_response_time_ms
    );
    Ok(())
}
