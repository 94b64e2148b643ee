//! 机器人间 @提及转发
//!
//! 飞书不会把机器人发出的消息推送给其他机器人。当一个机器人在群聊中
//! 发出 @另一个机器人 的消息时，本模块把这条消息合成为目标机器人的入站消息，
//! 直接提交到目标的回复管道。
//!
//! # 处理流程
//! ```text
//! 出站消息 → 转发判定（群聊 + 有目标）→ 深度保护 → 逐个目标：
//!     构造合成消息 → 解析路由 → 回复管道（跳过入站过滤）
//! ```
//!
//! 转发是发送路径上的附带动作：任何失败只记录日志，不会返回给调用方。

use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use super::guard::{DepthGuard, ForwardGuard};
use super::identity::IdentityRegistry;
use super::mention::{MentionExtractor, MentionSource};
use super::CHANNEL_ID;
use crate::core::message::pipeline::ReplyPipeline;
use crate::core::message::types::{ChatType, DispatchSummary, InboundContext, MentionTarget, SenderInfo};
use crate::core::routing::{RouteMatch, RouteRequest, RouteResolver};
use crate::infra::config::Config;
use crate::infra::error::Result;

/// 跳过转发的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 配置中关闭了转发
    Disabled,
    /// 非群聊
    NotGroup,
    /// 空消息
    EmptyText,
    /// 没有提及其他已启用的机器人
    NoTargets,
}

/// 转发目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    /// 目标账号
    pub account_id: String,
    /// 目标显示名称
    pub display_name: String,
    /// 目标主标识符
    pub open_id: String,
    /// 首次命中的来源
    pub source: MentionSource,
}

/// 转发判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardDecision {
    Skip(SkipReason),
    Forward(Vec<ForwardTarget>),
}

/// 转发判定
///
/// 只有群聊、且提及了至少一个其他已启用机器人时才转发。
pub fn decide(
    extractor: &MentionExtractor,
    registry: &IdentityRegistry,
    chat_type: ChatType,
    text: &str,
    sender_account_id: &str,
) -> ForwardDecision {
    if !chat_type.is_group() {
        return ForwardDecision::Skip(SkipReason::NotGroup);
    }
    if text.trim().is_empty() {
        return ForwardDecision::Skip(SkipReason::EmptyText);
    }

    let mut targets: Vec<ForwardTarget> = Vec::new();
    for candidate in extractor.candidates(text, sender_account_id) {
        if candidate.account_id == sender_account_id
            || targets.iter().any(|t| t.account_id == candidate.account_id)
        {
            continue;
        }

        let Some(account) = registry.get(&candidate.account_id) else {
            continue;
        };
        if !account.enabled {
            debug!(account_id = %account.account_id, "目标账号已停用，跳过");
            continue;
        }

        targets.push(ForwardTarget {
            display_name: account.display_name.clone(),
            open_id: account.primary_id.clone(),
            account_id: account.account_id,
            source: candidate.source,
        });
    }

    if targets.is_empty() {
        ForwardDecision::Skip(SkipReason::NoTargets)
    } else {
        ForwardDecision::Forward(targets)
    }
}

/// 合成消息
///
/// 代表一条“已经解析过提及”的入站消息，只使用一次。
#[derive(Debug, Clone)]
pub struct SyntheticEnvelope {
    /// 新生成的消息 ID
    pub message_id: String,
    /// 带发送者前缀的正文：`<发送者名称>: <原文>`
    pub body: String,
    /// 原文
    pub raw_body: String,
    /// 会话 ID
    pub chat_id: String,
    /// 发送者
    pub sender: SenderInfo,
    /// 目标账号
    pub target_account_id: String,
    /// 合成的提及目标
    pub mention: MentionTarget,
    /// 目标账号的路由
    pub route: RouteMatch,
    /// 提及已解析，目标视为被 @
    pub was_mentioned: bool,
}

impl SyntheticEnvelope {
    /// 转换为回复管道接收的上下文
    pub fn into_context(self) -> InboundContext {
        InboundContext {
            message_id: self.message_id,
            channel: CHANNEL_ID.to_string(),
            account_id: self.target_account_id,
            chat_id: self.chat_id,
            chat_type: ChatType::Group,
            sender: self.sender,
            body: self.body,
            raw_body: self.raw_body,
            mentions: vec![self.mention],
            was_mentioned: self.was_mentioned,
            agent_id: self.route.agent_id,
            session_key: self.route.session_key,
            timestamp: Utc::now(),
        }
    }
}

/// 生成合成消息 ID
pub fn synthetic_message_id() -> String {
    format!(
        "synthetic_{}_{}",
        Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    )
}

/// 提及转发器
///
/// 持有注册表、深度保护、路由解析器和回复管道。
#[derive(Clone)]
pub struct MentionForwarder {
    registry: Arc<IdentityRegistry>,
    extractor: MentionExtractor,
    guard: ForwardGuard,
    resolver: Arc<dyn RouteResolver>,
    pipeline: Arc<dyn ReplyPipeline>,
}

impl MentionForwarder {
    /// 创建转发器
    pub fn new(
        registry: Arc<IdentityRegistry>,
        guard: ForwardGuard,
        resolver: Arc<dyn RouteResolver>,
        pipeline: Arc<dyn ReplyPipeline>,
    ) -> Self {
        Self {
            extractor: MentionExtractor::new(registry.clone()),
            registry,
            guard,
            resolver,
            pipeline,
        }
    }

    /// 深度保护
    pub fn guard(&self) -> &ForwardGuard {
        &self.guard
    }

    /// 注册表
    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    /// 转发消息给被提及的机器人
    ///
    /// 是否转发和深度上限都取自传入的 `config.forwarding`。
    /// 没有返回值，结果只体现在日志中。
    pub async fn forward(
        &self,
        config: &Config,
        text: &str,
        chat_id: &str,
        chat_type: ChatType,
        sender_account_id: &str,
    ) {
        let Some((targets, scope)) = self.admit(config, text, chat_id, chat_type, sender_account_id) else {
            return;
        };

        self.dispatch_all(&targets, text, chat_id, sender_account_id).await;
        drop(scope);
    }

    /// 后台转发
    ///
    /// 判定和深度加一在调用时同步完成，分发在新任务中进行，任务结束时恢复深度。
    /// 不需要转发时返回 `None`。
    pub fn spawn_forward(
        &self,
        config: &Config,
        text: &str,
        chat_id: &str,
        chat_type: ChatType,
        sender_account_id: &str,
    ) -> Option<JoinHandle<()>> {
        let (targets, scope) = self.admit(config, text, chat_id, chat_type, sender_account_id)?;

        let forwarder = self.clone();
        let text = text.to_string();
        let chat_id = chat_id.to_string();
        let sender_account_id = sender_account_id.to_string();

        Some(tokio::spawn(async move {
            forwarder.dispatch_all(&targets, &text, &chat_id, &sender_account_id).await;
            drop(scope);
        }))
    }

    /// 判定是否转发并占用深度
    fn admit(
        &self,
        config: &Config,
        text: &str,
        chat_id: &str,
        chat_type: ChatType,
        sender_account_id: &str,
    ) -> Option<(Vec<ForwardTarget>, DepthGuard)> {
        if !config.forwarding.enabled {
            trace!(chat_id = %chat_id, reason = ?SkipReason::Disabled, "跳过转发");
            return None;
        }

        let targets = match decide(&self.extractor, &self.registry, chat_type, text, sender_account_id) {
            ForwardDecision::Forward(targets) => targets,
            ForwardDecision::Skip(reason) => {
                trace!(chat_id = %chat_id, sender = %sender_account_id, reason = ?reason, "跳过转发");
                return None;
            }
        };

        let Some(scope) = self.guard.try_enter_bounded(chat_id, config.forwarding.max_depth) else {
            trace!(chat_id = %chat_id, sender = %sender_account_id, "转发深度已达上限，跳过");
            return None;
        };

        Some((targets, scope))
    }

    /// 逐个目标分发，单个目标失败不影响其他目标
    async fn dispatch_all(&self, targets: &[ForwardTarget], text: &str, chat_id: &str, sender_account_id: &str) {
        for target in targets {
            info!(
                sender = %sender_account_id,
                target_account = %target.account_id,
                target_id = %target.open_id,
                source = ?target.source,
                chat_id = %chat_id,
                "转发提及消息给机器人"
            );

            match self.dispatch_one(target, text, chat_id, sender_account_id).await {
                Ok(summary) => {
                    debug!(
                        target_account = %target.account_id,
                        queued = summary.queued,
                        sent = summary.sent,
                        "转发分发完成"
                    );
                }
                Err(e) => {
                    error!(
                        sender = %sender_account_id,
                        target_account = %target.account_id,
                        chat_id = %chat_id,
                        error = %e,
                        "转发消息失败"
                    );
                }
            }
        }
    }

    async fn dispatch_one(
        &self,
        target: &ForwardTarget,
        text: &str,
        chat_id: &str,
        sender_account_id: &str,
    ) -> Result<DispatchSummary> {
        let route = self
            .resolver
            .resolve(&RouteRequest {
                channel: CHANNEL_ID.to_string(),
                account_id: target.account_id.clone(),
                chat_id: chat_id.to_string(),
                chat_type: ChatType::Group,
            })
            .await?;

        let envelope = self.build_envelope(target, text, chat_id, sender_account_id, route);
        debug!(message_id = %envelope.message_id, session_key = %envelope.route.session_key, "合成消息已构造");

        self.pipeline.dispatch(envelope.into_context()).await
    }

    /// 构造合成消息
    fn build_envelope(
        &self,
        target: &ForwardTarget,
        text: &str,
        chat_id: &str,
        sender_account_id: &str,
        route: RouteMatch,
    ) -> SyntheticEnvelope {
        let sender = self.registry.get(sender_account_id);
        let sender_name = sender
            .as_ref()
            .map(|account| account.display_name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| sender_account_id.to_string());
        let sender_id = sender
            .as_ref()
            .map(|account| account.primary_id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        let mention_id = if target.open_id.is_empty() {
            target.account_id.clone()
        } else {
            target.open_id.clone()
        };

        SyntheticEnvelope {
            message_id: synthetic_message_id(),
            body: format!("{}: {}", sender_name, text),
            raw_body: text.to_string(),
            chat_id: chat_id.to_string(),
            sender: SenderInfo {
                id: sender_id,
                display_name: Some(sender_name),
                is_bot: true,
            },
            target_account_id: target.account_id.clone(),
            mention: MentionTarget::synthetic(&mention_id, &target.display_name),
            route,
            was_mentioned: true,
        }
    }
}
