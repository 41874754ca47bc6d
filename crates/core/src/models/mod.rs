//! # 数据模型
//!
//! 协调子系统在存储中读写的三类记录：
//!
//! - [`Task`] 可分发的任务单元，存放在待执行队列和运行中哈希表
//! - [`TaskResult`] 已结束任务的终态记录
//! - [`WorkerInfo`] Worker节点注册信息
//!
//! 所有记录以 JSON 字符串形式存入存储，存储本身只看到不透明字符串。
//! 枚举统一序列化为小写字符串，时间字段使用 `DateTime<Utc>`。

pub mod task;
pub mod worker;

pub use task::*;
pub use worker::*;

use serde::de::DeserializeOwned;
use tracing::warn;

/// 解码哈希表中的全部记录，单条损坏的记录只记录警告并跳过
pub fn decode_entries<T, I>(kind: &str, entries: I) -> Vec<T>
where
    T: DeserializeOwned,
    I: IntoIterator<Item = (String, String)>,
{
    entries
        .into_iter()
        .filter_map(|(key, raw)| match serde_json::from_str::<T>(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("跳过无法解析的{}记录 {}: {}", kind, key, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_entries_skips_malformed_records() {
        let good = Task::new("scan-x", WorkflowKind::Module, "example.com");
        let entries = vec![
            (good.id.clone(), good.to_json().unwrap()),
            ("broken".to_string(), "{not json".to_string()),
        ];

        let decoded: Vec<Task> = decode_entries("task", entries);
        assert_eq!(decoded, vec![good]);
    }
}
