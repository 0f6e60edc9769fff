//! 外部协作方接口与参考实现
//!
//! NLU、知识检索、会话日志均以 trait 注入编排层；
//! 参考实现（关键词 NLU、内存日志、空检索）用于开发与测试。

pub mod log;
pub mod nlu;
pub mod retrieval;
