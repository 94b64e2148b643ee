use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::infra::error::Result;

/// 发送结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    /// 平台返回的消息 ID
    pub message_id: String,
    /// 消息实际落入的会话 ID
    pub chat_id: String,
}

/// 文本发送器 Trait
///
/// 平台传输层的发送接口，由具体渠道实现
#[async_trait]
pub trait TextSender: Send + Sync {
    /// 以指定账号发送文本
    ///
    /// # 参数说明
    /// * `account_id` - 发送账号
    /// * `to` - 目标，如 `chat:oc_xxx` 或 `user:ou_xxx`
    /// * `text` - 文本内容
    async fn send_text(&self, account_id: &str, to: &str, text: &str) -> Result<SendResult>;
}
