//! 回复管道模块
//!
//! 回复管道是消息进入 Agent 之后的下游处理链：会话记录、AI 执行、回复发送。
//! 本 crate 不实现 AI 执行本身，只定义管道接口，平台入站消息和转发合成的
//! 消息都通过同一个接口提交。
//!
//! # 处理流程
//! ```text
//! 平台入站消息 → 入站过滤 → 路由 → ReplyPipeline::dispatch
//! 转发合成消息 ─────────────→ 路由 → ReplyPipeline::dispatch
//! ```

use async_trait::async_trait;
use tracing::{info, instrument};

use super::types::{DispatchSummary, InboundContext};
use crate::infra::error::Result;

/// 回复管道 Trait
///
/// # 实现要求
/// - 必须实现 `Send + Sync` 以支持多线程
/// - 失败时返回错误，由调用方决定是否传播
#[async_trait]
pub trait ReplyPipeline: Send + Sync {
    /// 提交一条标准化入站消息
    ///
    /// # 返回值
    /// 本次处理产生的回复统计
    async fn dispatch(&self, ctx: InboundContext) -> Result<DispatchSummary>;
}

/// 日志回复管道
///
/// 只记录收到的上下文，不产生回复。命令行 `simulate` 使用它观察转发结果。
#[derive(Debug, Clone, Default)]
pub struct LoggingPipeline;

impl LoggingPipeline {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReplyPipeline for LoggingPipeline {
    #[instrument(skip(self, ctx), fields(message_id = %ctx.message_id, account_id = %ctx.account_id))]
    async fn dispatch(&self, ctx: InboundContext) -> Result<DispatchSummary> {
        info!(
            agent_id = %ctx.agent_id,
            session_key = %ctx.session_key,
            chat_id = %ctx.chat_id,
            sender = %ctx.sender.id,
            was_mentioned = ctx.was_mentioned,
            body = %ctx.body,
            "回复管道收到消息"
        );

        Ok(DispatchSummary { queued: 1, sent: 0 })
    }
}
