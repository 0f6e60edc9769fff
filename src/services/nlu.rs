//! 自然语言理解服务
//!
//! `NluService` 为注入点；`KeywordNlu` 是规则实现：按 CRM 领域关键词表
//! 打分识别意图，无命中时返回低置信度的 Unknown（由编排层转入知识检索）。

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ServiceError;

/// CRM 领域意图（封闭枚举）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    CustomerSearch,
    CustomerCreate,
    CustomerUpdate,
    CustomerAnalysis,
    LeadSearch,
    LeadCreate,
    LeadUpdate,
    LeadScoring,
    LeadAssignment,
    OpportunitySearch,
    OpportunityCreate,
    OpportunityUpdate,
    OpportunityAnalysis,
    TaskCreate,
    TaskSearch,
    ScheduleMeeting,
    ReportGenerate,
    PerformanceAnalysis,
    ForecastAnalysis,
    Greeting,
    Help,
    Unknown,
}

impl IntentType {
    /// 该意图是否需要知识检索补充上下文
    pub fn requires_knowledge(&self) -> bool {
        matches!(
            self,
            IntentType::CustomerAnalysis
                | IntentType::OpportunityAnalysis
                | IntentType::PerformanceAnalysis
                | IntentType::ForecastAnalysis
                | IntentType::Help
                | IntentType::Unknown
        )
    }
}

/// 识别出的实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NluEntity {
    pub entity_type: String,
    pub text: String,
    pub confidence: f64,
}

/// NLU 分析结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluResult {
    pub intent: IntentType,
    pub confidence: f64,
    #[serde(default)]
    pub entities: Vec<NluEntity>,
    #[serde(default)]
    pub slots: HashMap<String, Value>,
}

/// 分析时可用的会话背景
#[derive(Debug, Clone, Default)]
pub struct NluContext {
    pub conversation_id: String,
    pub user_id: String,
    pub previous_intent: Option<IntentType>,
}

/// NLU 服务接口
#[async_trait]
pub trait NluService: Send + Sync {
    async fn analyze(&self, text: &str, ctx: &NluContext) -> Result<NluResult, ServiceError>;
}

/// 规则置信度上限
const RULE_CONFIDENCE_CAP: f64 = 0.8;
/// 无命中时的兜底置信度（低于检索阈值，触发知识补充）
const UNKNOWN_CONFIDENCE: f64 = 0.2;

/// 关键词规则 NLU
pub struct KeywordNlu {
    keyword_table: Vec<(IntentType, Vec<&'static str>)>,
}

impl Default for KeywordNlu {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordNlu {
    pub fn new() -> Self {
        Self {
            keyword_table: vec![
                (
                    IntentType::CustomerSearch,
                    vec!["找客户", "查找客户", "搜索客户", "客户列表", "潜在客户"],
                ),
                (
                    IntentType::CustomerCreate,
                    vec!["新建客户", "添加客户", "创建客户", "录入客户"],
                ),
                (
                    IntentType::CustomerUpdate,
                    vec!["更新客户", "修改客户", "编辑客户"],
                ),
                (
                    IntentType::CustomerAnalysis,
                    vec!["客户分析", "分析客户", "客户画像", "客户价值"],
                ),
                (
                    IntentType::LeadSearch,
                    vec!["找线索", "查找线索", "搜索线索", "线索列表"],
                ),
                (
                    IntentType::LeadCreate,
                    vec!["新建线索", "添加线索", "创建线索", "录入线索"],
                ),
                (
                    IntentType::LeadUpdate,
                    vec!["更新线索", "修改线索", "编辑线索"],
                ),
                (
                    IntentType::LeadScoring,
                    vec!["线索评分", "评估线索", "线索质量"],
                ),
                (
                    IntentType::LeadAssignment,
                    vec!["分配线索", "线索分配", "指派线索"],
                ),
                (
                    IntentType::OpportunitySearch,
                    vec!["找商机", "查找商机", "搜索商机", "商机列表", "销售机会"],
                ),
                (
                    IntentType::OpportunityCreate,
                    vec!["新建商机", "添加商机", "创建商机"],
                ),
                (
                    IntentType::OpportunityUpdate,
                    vec!["更新商机", "修改商机", "推进商机"],
                ),
                (
                    IntentType::OpportunityAnalysis,
                    vec!["商机分析", "分析商机", "赢率", "商机预测"],
                ),
                (
                    IntentType::TaskCreate,
                    vec!["新建任务", "创建任务", "添加任务", "待办"],
                ),
                (
                    IntentType::TaskSearch,
                    vec!["查找任务", "任务列表", "我的任务"],
                ),
                (
                    IntentType::ScheduleMeeting,
                    vec!["安排会议", "预约会议", "约个时间", "日程"],
                ),
                (
                    IntentType::ReportGenerate,
                    vec!["生成报告", "导出报表", "销售报告", "数据报表"],
                ),
                (
                    IntentType::PerformanceAnalysis,
                    vec!["业绩分析", "销售业绩", "完成率", "业绩统计"],
                ),
                (
                    IntentType::ForecastAnalysis,
                    vec!["销售预测", "预测分析", "趋势分析"],
                ),
                (
                    IntentType::Greeting,
                    vec!["你好", "您好", "早上好", "下午好", "晚上好"],
                ),
                (IntentType::Help, vec!["帮助", "怎么用", "如何", "教我"]),
            ],
        }
    }

    /// 取命中关键词数最多的意图；返回 (意图, 命中数)
    fn best_match(&self, text: &str) -> Option<(IntentType, usize)> {
        let mut best: Option<(IntentType, usize)> = None;
        for (intent, keywords) in &self.keyword_table {
            let hits = keywords.iter().filter(|kw| text.contains(*kw)).count();
            if hits > 0 {
                match best {
                    Some((_, best_hits)) if hits <= best_hits => {}
                    _ => best = Some((*intent, hits)),
                }
            }
        }
        best
    }
}

#[async_trait]
impl NluService for KeywordNlu {
    async fn analyze(&self, text: &str, _ctx: &NluContext) -> Result<NluResult, ServiceError> {
        let result = match self.best_match(text) {
            Some((intent, hits)) => {
                // 命中越多置信度越高，封顶 0.8（规则法不宣称更高把握）
                let confidence =
                    (0.4 + 0.2 * hits as f64).min(RULE_CONFIDENCE_CAP);
                NluResult {
                    intent,
                    confidence,
                    entities: Vec::new(),
                    slots: HashMap::new(),
                }
            }
            None => NluResult {
                intent: IntentType::Unknown,
                confidence: UNKNOWN_CONFIDENCE,
                entities: Vec::new(),
                slots: HashMap::new(),
            },
        };

        tracing::debug!(
            intent = ?result.intent,
            confidence = result.confidence,
            "NLU analysis completed"
        );
        Ok(result)
    }
}
