//! Agent 路由：选择 → 分发 → 融合

pub mod dispatcher;
pub mod fusion;
pub mod selector;
