//! 并发分发
//!
//! 多 Agent 并发投递并全量收敛：任一 Agent 失败不影响其余分支，
//! 失败以字符串形式随结果返回，由融合层决定如何呈现。

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::json;

use crate::agent::{AgentId, AgentMessage, AgentResponse, AgentRuntime};

/// 单个 Agent 的分发结果
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub agent_id: AgentId,
    pub outcome: Result<AgentResponse, String>,
}

impl DispatchResult {
    pub fn response(&self) -> Option<&AgentResponse> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&str> {
        self.outcome.as_ref().err().map(|s| s.as_str())
    }
}

/// 分发器
pub struct Dispatcher {
    agents: Arc<dyn AgentRuntime>,
}

impl Dispatcher {
    pub fn new(agents: Arc<dyn AgentRuntime>) -> Self {
        Self { agents }
    }

    /// 向所有目标 Agent 分发同一任务，返回逐 Agent 结果（与入参同序）
    pub async fn dispatch(
        &self,
        agent_ids: &[AgentId],
        message: &AgentMessage,
    ) -> Vec<DispatchResult> {
        match agent_ids {
            [] => Vec::new(),
            [single] => vec![self.send_one(single, message.clone()).await],
            many => {
                let futures = many.iter().map(|agent_id| {
                    let mut msg = message.clone();
                    msg.receiver_id = Some(agent_id.clone());
                    // 多 Agent 协作标记与同伴列表
                    msg.metadata
                        .insert("collaboration_mode".to_string(), json!(true));
                    let others: Vec<&AgentId> =
                        many.iter().filter(|id| *id != agent_id).collect();
                    msg.metadata.insert("other_agents".to_string(), json!(others));
                    self.send_one(agent_id, msg)
                });
                join_all(futures).await
            }
        }
    }

    async fn send_one(&self, agent_id: &AgentId, mut message: AgentMessage) -> DispatchResult {
        if message.receiver_id.is_none() {
            message.receiver_id = Some(agent_id.clone());
        }
        let outcome = match self.agents.send(agent_id, message).await {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::warn!(agent_id = %agent_id, error = %e, "agent dispatch failed");
                Err(e.to_string())
            }
        };
        DispatchResult {
            agent_id: agent_id.clone(),
            outcome,
        }
    }
}
