//! 消息类型定义模块
//!
//! 定义与消息相关的类型结构体，包括：
//! - 会话类型（私聊、群聊）
//! - 发送者信息
//! - @提及目标
//! - 入站上下文（回复管道接收的标准化消息）
//! - 分发结果统计
//!
//! # 使用示例
//! ```rust
//! use clawdbot_relay::core::message::{ChatType, SenderInfo};
//!
//! let chat_type = ChatType::from_feishu("group");
//! let sender = SenderInfo::new("ou_123");
//! assert!(chat_type.is_group());
//! assert_eq!(sender.id, "ou_123");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 会话类型
///
/// 表示消息来自哪种类型的聊天
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    /// 私聊（一对一对话）
    Direct,
    /// 群组聊天
    Group,
}

impl ChatType {
    /// 从飞书的 chat_type 字段解析
    ///
    /// 只有 `"group"` 被视为群聊，其余（包括 `"p2p"`）均视为私聊。
    pub fn from_feishu(value: &str) -> Self {
        match value {
            "group" => ChatType::Group,
            _ => ChatType::Direct,
        }
    }

    /// 是否群聊
    pub fn is_group(&self) -> bool {
        matches!(self, ChatType::Group)
    }

    /// 会话键中使用的片段
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::Direct => "direct",
            ChatType::Group => "group",
        }
    }
}

impl std::fmt::Display for ChatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 发送者信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    /// 发送者唯一 ID（open_id 等）
    pub id: String,
    /// 发送者显示名称
    pub display_name: Option<String>,
    /// 是否为机器人
    pub is_bot: bool,
}

impl SenderInfo {
    /// 创建发送者信息
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }
}

/// @提及目标
///
/// # 字段说明
/// - `open_id`: 解析出的标识符
/// - `name`: 显示名称
/// - `key`: 原消息中的占位符，如 `@_user_1`；转发时合成为 `@<open_id>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionTarget {
    pub open_id: String,
    pub name: String,
    pub key: String,
}

impl MentionTarget {
    /// 由转发合成的提及目标
    pub fn synthetic(open_id: &str, name: &str) -> Self {
        Self {
            open_id: open_id.to_string(),
            name: name.to_string(),
            key: format!("@{}", open_id),
        }
    }
}

/// 入站上下文
///
/// 回复管道接收的标准化消息。平台推送的消息和转发合成的消息
/// 都会被转换为这个结构。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundContext {
    /// 消息唯一 ID
    pub message_id: String,
    /// 渠道（如 "feishu"）
    pub channel: String,
    /// 接收该消息的机器人账号
    pub account_id: String,
    /// 会话 ID（chat_id）
    pub chat_id: String,
    /// 会话类型
    pub chat_type: ChatType,
    /// 发送者
    pub sender: SenderInfo,
    /// 交给 Agent 的正文（可能带有发送者前缀）
    pub body: String,
    /// 原始正文
    pub raw_body: String,
    /// 消息中的其他提及目标
    pub mentions: Vec<MentionTarget>,
    /// 机器人是否被 @ 提及
    pub was_mentioned: bool,
    /// 路由到的 Agent ID
    pub agent_id: String,
    /// 会话键
    pub session_key: String,
    /// 消息时间戳
    pub timestamp: DateTime<Utc>,
}

/// 分发结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    /// 已入队的回复数
    pub queued: usize,
    /// 已发送的回复数
    pub sent: usize,
}
