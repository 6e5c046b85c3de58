// 后端行 ID 的序列化/反序列化辅助

use serde::{Deserialize, Deserializer, Serializer};

/// 行 ID 可能是 uuid 字符串，也可能是 bigint 自增列，统一转换为字符串
pub mod row_id {
    use super::*;

    pub fn serialize<S>(id: &str, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(id)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum IdValue {
            String(String),
            Number(serde_json::Number),
        }

        match IdValue::deserialize(deserializer)? {
            IdValue::String(s) => Ok(s),
            IdValue::Number(n) => Ok(n.to_string()),
        }
    }
}
