//! 飞书事件解析模块
//!
//! 解析飞书推送的 `im.message.receive_v1` 事件，提取发送者、会话、
//! 文本内容以及平台给出的 @提及 列表。

use serde::Deserialize;
use tracing::{debug, warn};

use super::mention::EventMention;
use crate::core::message::types::ChatType;
use crate::infra::error::{Error, Result};

/// 收到消息事件的类型名
pub const MESSAGE_RECEIVE_EVENT: &str = "im.message.receive_v1";

/// 飞书事件请求结构
#[derive(Debug, Clone, Deserialize)]
pub struct FeishuEventRequest {
    /// 事件类型
    #[serde(rename = "type")]
    pub event_type: String,
    /// 事件唯一标识
    pub event_id: String,
    /// 创建时间戳
    #[serde(default)]
    pub created_at: i64,
    /// 事件数据
    pub event: serde_json::Value,
}

/// 飞书消息事件
#[derive(Debug, Clone, Deserialize)]
pub struct FeishuMessageEvent {
    /// 发送者
    pub sender: FeishuSender,
    /// 消息内容
    pub message: FeishuMessageBody,
}

/// 飞书消息体详情
#[derive(Debug, Clone, Deserialize)]
pub struct FeishuMessageBody {
    /// 消息 ID
    pub message_id: String,
    /// 根消息 ID（用于线程）
    #[serde(default)]
    pub root_id: Option<String>,
    /// 父消息 ID（用于回复）
    #[serde(default)]
    pub parent_id: Option<String>,
    /// 会话 ID
    pub chat_id: String,
    /// 会话类型（`p2p` / `group`）
    pub chat_type: String,
    /// 消息类型
    pub message_type: String,
    /// 消息内容（JSON 格式）
    pub content: String,
    /// 平台解析出的 @提及
    #[serde(default)]
    pub mentions: Vec<FeishuMention>,
}

/// 飞书文本消息内容
#[derive(Debug, Deserialize)]
pub struct FeishuTextContent {
    /// 文本内容
    pub text: String,
}

/// 飞书事件中的 @提及
#[derive(Debug, Clone, Deserialize)]
pub struct FeishuMention {
    /// 文本中的占位符，例如 `@_user_1`
    pub key: String,
    /// 被提及者名称
    #[serde(default)]
    pub name: String,
    /// 被提及者 ID
    #[serde(default)]
    pub id: FeishuSenderId,
}

/// 飞书发送者
#[derive(Debug, Clone, Deserialize)]
pub struct FeishuSender {
    /// 发送者 ID
    pub sender_id: FeishuSenderId,
    /// 发送者类型（`user` / `app`）
    #[serde(default)]
    pub sender_type: String,
}

/// 飞书用户 ID 集合
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeishuSenderId {
    /// Open ID
    #[serde(default)]
    pub open_id: Option<String>,
    /// User ID
    #[serde(default)]
    pub user_id: Option<String>,
    /// Union ID
    #[serde(default)]
    pub union_id: Option<String>,
}

impl FeishuSenderId {
    /// 按 open_id、user_id、union_id 顺序取第一个非空 ID
    pub fn resolve(&self) -> Option<String> {
        [&self.open_id, &self.user_id, &self.union_id]
            .into_iter()
            .flatten()
            .map(|id| id.trim())
            .find(|id| !id.is_empty())
            .map(str::to_string)
    }
}

impl EventMention for FeishuMention {
    fn mention_id(&self) -> Option<String> {
        self.id.resolve()
    }

    fn mention_name(&self) -> &str {
        &self.name
    }

    fn mention_key(&self) -> &str {
        &self.key
    }
}

impl FeishuMessageEvent {
    /// 会话类型
    pub fn chat_type(&self) -> ChatType {
        ChatType::from_feishu(&self.message.chat_type)
    }

    /// 发送者 ID，缺失时为 `"unknown"`
    pub fn sender_id(&self) -> String {
        self.sender
            .sender_id
            .resolve()
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// 发送者是否为应用（机器人）
    pub fn sender_is_app(&self) -> bool {
        self.sender.sender_type == "app"
    }

    /// 所有提及占位符
    pub fn mention_keys(&self) -> Vec<String> {
        self.message.mentions.iter().map(|m| m.key.clone()).collect()
    }

    /// 解析文本内容
    ///
    /// 非文本消息返回占位文本，不视为错误。
    pub fn text(&self) -> Result<String> {
        match self.message.message_type.as_str() {
            "text" => {
                let content: FeishuTextContent = serde_json::from_str(&self.message.content)
                    .map_err(|e| Error::Serialization(format!("解析文本消息失败: {}", e)))?;
                Ok(content.text)
            }
            other => {
                warn!(msg_type = %other, "收到非文本消息");
                Ok(format!("[{}]", other))
            }
        }
    }
}

/// 解析消息事件
///
/// # 参数说明
/// * `event` - 飞书事件请求
///
/// # 返回值
/// 非 `im.message.receive_v1` 事件返回 `Error::Channel`
pub fn parse_event(event: &FeishuEventRequest) -> Result<FeishuMessageEvent> {
    debug!(event_type = %event.event_type, event_id = %event.event_id, "解析飞书事件");

    if event.event_type != MESSAGE_RECEIVE_EVENT {
        return Err(Error::Channel(format!("不支持的事件类型: {}", event.event_type)));
    }

    let message_event: FeishuMessageEvent = serde_json::from_value(event.event.clone())
        .map_err(|e| Error::Serialization(e.to_string()))?;

    debug!(message_id = %message_event.message.message_id, "解析消息事件成功");
    Ok(message_event)
}
