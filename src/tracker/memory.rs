//! 分层记忆条目
//!
//! 短期记忆带 TTL，过期判定在读取路径完成（无后台定时器）；
//! 长期记忆带重要度评分与访问计数，重复晋升时单调合并。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 短期记忆条目（TTL 秒数随条目持久化）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortTermEntry {
    pub value: Value,
    pub set_at: DateTime<Utc>,
    pub ttl_secs: i64,
}

impl ShortTermEntry {
    pub fn new(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            set_at: Utc::now(),
            ttl_secs: ttl.num_seconds(),
        }
    }

    /// 存活时长达到 TTL 即过期（临界点按过期处理）
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now - self.set_at >= Duration::seconds(self.ttl_secs)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// 长期记忆条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermEntry {
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub importance_score: f64,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
}

impl LongTermEntry {
    pub fn new(value: Value, importance_score: f64) -> Self {
        let now = Utc::now();
        Self {
            value,
            created_at: now,
            importance_score,
            access_count: 1,
            last_accessed: now,
        }
    }

    /// 重复晋升：值覆盖、重要度取较大值、访问数 +1、created_at 保留
    pub fn merge(&mut self, value: Value, importance_score: f64) {
        self.value = value;
        self.importance_score = self.importance_score.max(importance_score);
        self.access_count += 1;
        self.last_accessed = Utc::now();
    }

    /// 读取命中：访问数 +1 并刷新访问时间
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = Utc::now();
    }
}
