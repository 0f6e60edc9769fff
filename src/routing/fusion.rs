//! 响应融合
//!
//! 按置信度融合多个 Agent 应答：最高置信者为主（并列取先），其余达到
//! 门槛的以"补充信息"摘录附注；建议与后续动作跨 Agent 去重并截断。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, AgentResponse};
use crate::routing::dispatcher::DispatchResult;

/// 融合后建议条数上限
const MAX_FUSED_SUGGESTIONS: usize = 5;
/// 融合后后续动作条数上限
const MAX_FUSED_NEXT_ACTIONS: usize = 3;
/// 非主应答入选补充信息的置信度门槛
const SUPPLEMENT_MIN_CONFIDENCE: f64 = 0.5;
/// 补充信息摘录长度（字符数）
const SUPPLEMENT_PREVIEW_CHARS: usize = 100;

/// 融合元数据
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FusionMetadata {
    pub primary_agent: Option<AgentId>,
    pub contributing_agents: Vec<AgentId>,
    pub fusion_method: String,
    pub error: Option<String>,
}

/// 管线对外的统一应答
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedResponse {
    pub content: String,
    pub confidence: f64,
    pub suggestions: Vec<String>,
    pub next_actions: Vec<String>,
    pub metadata: FusionMetadata,
}

impl FusedResponse {
    /// 无可用 Agent 时的规范应答
    pub fn no_agent_available() -> Self {
        Self {
            content: "抱歉，当前没有可用的 Agent 来处理您的请求。".to_string(),
            confidence: 0.0,
            suggestions: vec!["请稍后重试".to_string(), "联系系统管理员".to_string()],
            next_actions: Vec::new(),
            metadata: FusionMetadata {
                fusion_method: "none".to_string(),
                ..FusionMetadata::default()
            },
        }
    }

    /// 管线内部错误时的降级应答（错误细节进元数据，不进正文）
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            content: "抱歉，处理您的消息时遇到了问题，请稍后重试。".to_string(),
            confidence: 0.0,
            suggestions: Vec::new(),
            next_actions: Vec::new(),
            metadata: FusionMetadata {
                fusion_method: "degraded".to_string(),
                error: Some(reason.into()),
                ..FusionMetadata::default()
            },
        }
    }
}

/// 响应融合器
#[derive(Debug, Default)]
pub struct ResponseFuser;

impl ResponseFuser {
    pub fn new() -> Self {
        Self
    }

    /// 融合一轮分发结果
    pub fn fuse(&self, results: &[DispatchResult]) -> FusedResponse {
        let usable: Vec<(&AgentId, &AgentResponse)> = results
            .iter()
            .filter_map(|r| r.response().map(|resp| (&r.agent_id, resp)))
            .collect();

        match usable.as_slice() {
            [] => {
                let errors: Vec<String> = results
                    .iter()
                    .filter_map(|r| r.error().map(|e| format!("{}: {}", r.agent_id, e)))
                    .collect();
                tracing::warn!(errors = ?errors, "all agents failed, no response to fuse");
                FusedResponse {
                    content: "所有 Agent 都无法处理您的请求。".to_string(),
                    confidence: 0.0,
                    suggestions: vec!["请稍后重试".to_string(), "简化您的问题".to_string()],
                    next_actions: Vec::new(),
                    metadata: FusionMetadata {
                        fusion_method: "none".to_string(),
                        error: (!errors.is_empty()).then(|| errors.join("; ")),
                        ..FusionMetadata::default()
                    },
                }
            }
            [(agent_id, response)] => FusedResponse {
                content: response.content.clone(),
                confidence: response.confidence,
                suggestions: response.suggestions.clone(),
                next_actions: response.next_actions.clone(),
                metadata: FusionMetadata {
                    primary_agent: Some((*agent_id).clone()),
                    contributing_agents: vec![(*agent_id).clone()],
                    fusion_method: "pass_through".to_string(),
                    error: None,
                },
            },
            many => self.fuse_by_confidence(many),
        }
    }

    /// 多应答融合：主应答 + 高置信补充 + 去重截断的建议/动作
    fn fuse_by_confidence(&self, usable: &[(&AgentId, &AgentResponse)]) -> FusedResponse {
        // 并列时取先到者
        let (primary_id, primary) = usable
            .iter()
            .fold(usable[0], |best, candidate| {
                if candidate.1.confidence > best.1.confidence {
                    *candidate
                } else {
                    best
                }
            });

        let mut content = primary.content.clone();
        let supplements: Vec<String> = usable
            .iter()
            .filter(|(id, resp)| {
                **id != *primary_id && resp.confidence > SUPPLEMENT_MIN_CONFIDENCE
            })
            .map(|(_, resp)| {
                let preview: String = resp.content.chars().take(SUPPLEMENT_PREVIEW_CHARS).collect();
                format!("- {}...", preview)
            })
            .collect();
        if !supplements.is_empty() {
            content.push_str("\n\n补充信息：\n");
            content.push_str(&supplements.join("\n"));
        }

        let suggestions = dedup_capped(
            usable.iter().flat_map(|(_, r)| r.suggestions.iter()),
            MAX_FUSED_SUGGESTIONS,
        );
        let next_actions = dedup_capped(
            usable.iter().flat_map(|(_, r)| r.next_actions.iter()),
            MAX_FUSED_NEXT_ACTIONS,
        );

        FusedResponse {
            content,
            confidence: primary.confidence,
            suggestions,
            next_actions,
            metadata: FusionMetadata {
                primary_agent: Some(primary_id.clone()),
                contributing_agents: usable.iter().map(|(id, _)| (*id).clone()).collect(),
                fusion_method: "confidence_based".to_string(),
                error: None,
            },
        }
    }
}

/// 按出现顺序去重并截断
fn dedup_capped<'a>(items: impl Iterator<Item = &'a String>, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if out.len() >= cap {
            break;
        }
        if seen.insert(item.clone()) {
            out.push(item.clone());
        }
    }
    out
}
