//! 飞书账号监控模块
//!
//! 管理每个机器人账号的生命周期：开始监听时探测身份并注册到身份注册表，
//! 停止时注销。平台推送的入站消息也从这里进入回复管道。
//!
//! # 入站流程
//! ```text
//! 飞书事件 → 解析 → 入站过滤 → 提取正文和提及 → 路由 → 回复管道
//! ```

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::gate::{GateDecision, InboundGate};
use super::handlers::{parse_event, FeishuEventRequest};
use super::identity::{BotAccount, BotIdentity, IdentityRegistry};
use super::mention::{extract_mention_targets, extract_message_body};
use super::probe::IdentityProbe;
use super::CHANNEL_ID;
use crate::core::message::pipeline::ReplyPipeline;
use crate::core::message::types::{DispatchSummary, InboundContext, SenderInfo};
use crate::core::routing::{RouteRequest, RouteResolver};
use crate::infra::config::Config;
use crate::infra::error::{Error, Result};

/// 飞书账号监控器
#[derive(Clone)]
pub struct FeishuMonitor {
    config: Arc<Config>,
    registry: Arc<IdentityRegistry>,
    probe: Arc<dyn IdentityProbe>,
    gate: InboundGate,
    resolver: Arc<dyn RouteResolver>,
    pipeline: Arc<dyn ReplyPipeline>,
    /// 正在监听的账号
    running: Arc<RwLock<BTreeSet<String>>>,
}

impl FeishuMonitor {
    /// 创建监控器
    ///
    /// # 参数说明
    /// * `config` - 应用配置
    /// * `registry` - 身份注册表，与转发器共享
    /// * `probe` - 身份探测
    /// * `resolver` - 路由解析器
    /// * `pipeline` - 回复管道
    pub fn new(
        config: Arc<Config>,
        registry: Arc<IdentityRegistry>,
        probe: Arc<dyn IdentityProbe>,
        resolver: Arc<dyn RouteResolver>,
        pipeline: Arc<dyn ReplyPipeline>,
    ) -> Self {
        Self {
            gate: InboundGate::new(config.gate.clone()),
            config,
            registry,
            probe,
            resolver,
            pipeline,
            running: Arc::new(RwLock::new(BTreeSet::new())),
        }
    }

    /// 开始监听一个账号
    ///
    /// 身份探测失败不会阻止启动：此时只用配置的名称注册，纯文本 @名称 仍然可用。
    pub async fn start_account(&self, account_id: &str) -> Result<BotAccount> {
        let account = self
            .config
            .channels
            .feishu
            .accounts
            .get(account_id)
            .ok_or_else(|| Error::Config(format!("未找到飞书账号: {}", account_id)))?;

        if !account.enabled {
            return Err(Error::Channel(format!("飞书账号已停用: {}", account_id)));
        }

        let identity = match self.probe.probe(account_id, account).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "探测机器人身份失败，使用空身份");
                BotIdentity::default()
            }
        };

        let display_name = account
            .bot_name
            .as_deref()
            .or(identity.bot_name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(account_id)
            .to_string();

        let mut ids = identity.candidates();
        let primary = if ids.is_empty() { String::new() } else { ids.remove(0) };
        let registered = self.registry.register(account_id, &primary, &ids, &display_name);

        self.running.write().await.insert(account_id.to_string());
        info!(account_id = %account_id, display_name = %display_name, "飞书账号开始监听");
        Ok(registered)
    }

    /// 开始监听所有已启用的账号
    ///
    /// 单个账号失败只记录日志；没有任何已启用账号时返回错误。
    pub async fn start_all(&self) -> Result<Vec<BotAccount>> {
        let account_ids: Vec<String> = self
            .config
            .channels
            .feishu
            .enabled_accounts()
            .map(|(id, _)| id.clone())
            .collect();

        if account_ids.is_empty() {
            return Err(Error::Config("没有已启用的飞书账号".to_string()));
        }

        let mut started = Vec::with_capacity(account_ids.len());
        for account_id in &account_ids {
            match self.start_account(account_id).await {
                Ok(account) => started.push(account),
                Err(e) => warn!(account_id = %account_id, error = %e, "飞书账号启动失败"),
            }
        }

        info!(started = started.len(), total = account_ids.len(), "飞书账号监听已启动");
        Ok(started)
    }

    /// 停止监听一个账号并注销身份
    pub async fn stop_account(&self, account_id: &str) {
        self.running.write().await.remove(account_id);
        self.registry.unregister(account_id);
        info!(account_id = %account_id, "飞书账号停止监听");
    }

    /// 停止全部账号
    pub async fn stop_all(&self) {
        let mut running = self.running.write().await;
        running.clear();
        self.registry.clear();
        info!("所有飞书账号已停止监听");
    }

    /// 账号是否在监听
    pub async fn is_running(&self, account_id: &str) -> bool {
        self.running.read().await.contains(account_id)
    }

    /// 处理平台推送的入站消息
    ///
    /// # 返回值
    /// 被入站过滤拒绝时返回 `Ok(None)`
    pub async fn handle_inbound(
        &self,
        account_id: &str,
        request: &FeishuEventRequest,
    ) -> Result<Option<DispatchSummary>> {
        if !self.is_running(account_id).await {
            return Err(Error::Channel(format!("飞书账号未在监听: {}", account_id)));
        }

        let event = parse_event(request)?;
        let bot_ids = self.registry.list_identifiers(account_id);

        let was_mentioned = match self.gate.check(account_id, &event, &bot_ids) {
            GateDecision::Accept { was_mentioned } => was_mentioned,
            GateDecision::Reject(reason) => {
                debug!(account_id = %account_id, message_id = %event.message.message_id, reason = ?reason, "入站消息被过滤");
                return Ok(None);
            }
        };

        let raw_body = event.text()?;
        let body = extract_message_body(&raw_body, &event.mention_keys());
        let mentions = extract_mention_targets(&event.message.mentions, &bot_ids);
        let chat_type = event.chat_type();

        let route = self
            .resolver
            .resolve(&RouteRequest {
                channel: CHANNEL_ID.to_string(),
                account_id: account_id.to_string(),
                chat_id: event.message.chat_id.clone(),
                chat_type,
            })
            .await?;

        let ctx = InboundContext {
            message_id: event.message.message_id.clone(),
            channel: CHANNEL_ID.to_string(),
            account_id: account_id.to_string(),
            chat_id: event.message.chat_id.clone(),
            chat_type,
            sender: SenderInfo {
                id: event.sender_id(),
                display_name: None,
                is_bot: event.sender_is_app(),
            },
            body,
            raw_body,
            mentions,
            was_mentioned,
            agent_id: route.agent_id,
            session_key: route.session_key,
            timestamp: Utc::now(),
        };

        let summary = self.pipeline.dispatch(ctx).await?;
        Ok(Some(summary))
    }
}
