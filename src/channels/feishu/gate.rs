//! 飞书入站消息过滤
//!
//! 平台推送的消息在进入回复管道前依次经过：
//! 1. 消息去重（按账号 + 消息 ID，带过期时间）
//! 2. 过滤机器人自己发出的消息
//! 3. 发送者白名单
//! 4. 群聊中要求 @ 本机器人
//!
//! 转发产生的合成消息不经过这里。

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::handlers::FeishuMessageEvent;
use super::mention::mentions_bot;
use crate::infra::config::GateConfig;

/// 拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// 重复消息
    Duplicate,
    /// 机器人自己发出的消息
    OwnMessage,
    /// 发送者不在白名单中
    SenderNotAllowed,
    /// 群聊中没有 @ 本机器人
    NotMentioned,
}

/// 过滤结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// 接受，附带是否 @ 了本机器人
    Accept { was_mentioned: bool },
    Reject(RejectReason),
}

impl GateDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, GateDecision::Accept { .. })
    }
}

/// 入站过滤器
#[derive(Debug, Clone)]
pub struct InboundGate {
    /// `{account_id}:{message_id}` → 首次处理时间
    processed: Arc<DashMap<String, Instant>>,
    config: GateConfig,
}

impl InboundGate {
    /// 创建过滤器
    pub fn new(config: GateConfig) -> Self {
        Self {
            processed: Arc::new(DashMap::new()),
            config,
        }
    }

    fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.config.dedup_ttl_secs)
    }

    /// 检查消息
    ///
    /// # 参数说明
    /// * `account_id` - 接收消息的账号
    /// * `event` - 消息事件
    /// * `bot_ids` - 该账号的全部标识符
    pub fn check(&self, account_id: &str, event: &FeishuMessageEvent, bot_ids: &[String]) -> GateDecision {
        let message_id = &event.message.message_id;
        let chat_id = &event.message.chat_id;

        if !self.mark_processed(account_id, message_id) {
            debug!(account_id = %account_id, message_id = %message_id, "重复消息，跳过");
            return GateDecision::Reject(RejectReason::Duplicate);
        }

        let sender_id = event.sender_id();
        if bot_ids.iter().any(|id| id == &sender_id) {
            debug!(account_id = %account_id, message_id = %message_id, "跳过机器人自己的消息");
            return GateDecision::Reject(RejectReason::OwnMessage);
        }

        if !self.config.allow_from.is_empty()
            && !self.config.allow_from.iter().any(|allowed| allowed == &sender_id || allowed == "*")
        {
            debug!(account_id = %account_id, sender_id = %sender_id, "发送者不在白名单中");
            return GateDecision::Reject(RejectReason::SenderNotAllowed);
        }

        let was_mentioned = mentions_bot(&event.message.mentions, bot_ids);
        if event.chat_type().is_group() && self.config.require_mention && !was_mentioned {
            debug!(account_id = %account_id, chat_id = %chat_id, "群聊消息未 @ 机器人，跳过");
            return GateDecision::Reject(RejectReason::NotMentioned);
        }

        GateDecision::Accept { was_mentioned }
    }

    /// 记录已处理的消息，首次出现时返回 `true`
    ///
    /// 判断和写入在同一个条目锁内完成，并发推送同一条消息时只有一次返回 `true`。
    fn mark_processed(&self, account_id: &str, message_id: &str) -> bool {
        let now = Instant::now();
        let ttl = self.dedup_ttl();
        self.processed.retain(|_, seen| now.duration_since(*seen) < ttl);

        match self.processed.entry(format!("{}:{}", account_id, message_id)) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) < ttl {
                    return false;
                }
                entry.insert(now);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    /// 去重表中的条目数
    pub fn tracked_messages(&self) -> usize {
        self.processed.len()
    }
}
