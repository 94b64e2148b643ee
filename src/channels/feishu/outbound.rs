//! 飞书出站适配器
//!
//! 包装平台文本发送接口。每次发送成功后，在后台触发一次 @提及转发，
//! 转发的结果不影响发送结果。

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::forward::MentionForwarder;
use super::mention::{build_mentioned_message, MentionFormat};
use crate::core::message::sender::{SendResult, TextSender};
use crate::core::message::types::{ChatType, MentionTarget};
use crate::infra::config::Config;
use crate::infra::error::Result;

/// 根据发送目标判断会话类型
///
/// `chat:` 前缀的目标或 `oc_` 开头的会话 ID 视为群聊。
pub fn detect_chat_type(to: &str, chat_id: &str) -> ChatType {
    if to.starts_with("chat:") || chat_id.starts_with("oc_") {
        ChatType::Group
    } else {
        ChatType::Direct
    }
}

/// 去掉目标前缀，得到会话 ID
fn strip_target_prefix(to: &str) -> &str {
    to.strip_prefix("chat:")
        .or_else(|| to.strip_prefix("user:"))
        .unwrap_or(to)
}

/// 一次出站发送
#[derive(Debug)]
pub struct OutboundSend {
    /// 平台发送结果
    pub result: SendResult,
    /// 后台转发任务，没有转发时为 `None`
    pub forward: Option<JoinHandle<()>>,
}

/// 飞书出站适配器
#[derive(Clone)]
pub struct FeishuOutbound {
    config: Arc<Config>,
    sender: Arc<dyn TextSender>,
    forwarder: MentionForwarder,
}

impl FeishuOutbound {
    pub fn new(config: Arc<Config>, sender: Arc<dyn TextSender>, forwarder: MentionForwarder) -> Self {
        Self {
            config,
            sender,
            forwarder,
        }
    }

    /// 发送文本
    pub async fn send_text(&self, account_id: &str, to: &str, text: &str) -> Result<SendResult> {
        Ok(self.send(account_id, to, text).await?.result)
    }

    /// 发送文本并返回后台转发任务
    ///
    /// # 参数说明
    /// * `account_id` - 发送账号
    /// * `to` - 目标，如 `chat:oc_xxx`
    /// * `text` - 文本内容
    pub async fn send(&self, account_id: &str, to: &str, text: &str) -> Result<OutboundSend> {
        let result = self.sender.send_text(account_id, to, text).await?;

        let chat_id = if result.chat_id.is_empty() {
            strip_target_prefix(to).to_string()
        } else {
            result.chat_id.clone()
        };
        let chat_type = detect_chat_type(to, &chat_id);
        debug!(account_id = %account_id, message_id = %result.message_id, chat_id = %chat_id, chat_type = %chat_type, "文本已发送");

        let forward = self
            .forwarder
            .spawn_forward(&self.config, text, &chat_id, chat_type, account_id);

        Ok(OutboundSend { result, forward })
    }

    /// 发送带 @提及 标记的文本
    pub async fn send_text_with_mentions(
        &self,
        account_id: &str,
        to: &str,
        targets: &[MentionTarget],
        text: &str,
    ) -> Result<OutboundSend> {
        let message = build_mentioned_message(targets, text, MentionFormat::Text);
        self.send(account_id, to, &message).await
    }
}
