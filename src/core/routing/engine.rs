//! 路由引擎模块
//!
//! 根据 (渠道, 账号, 会话) 决定由哪个 Agent 处理消息，并生成会话键。

use std::sync::Arc;
use tracing::debug;

use crate::core::message::types::ChatType;
use crate::infra::config::{BindingConfig, RoutingConfig};
use crate::infra::error::{Error, Result};

/// 路由请求
#[derive(Debug, Clone)]
pub struct RouteRequest {
    /// 渠道
    pub channel: String,
    /// 接收消息的账号
    pub account_id: String,
    /// 会话 ID
    pub chat_id: String,
    /// 会话类型
    pub chat_type: ChatType,
}

/// 路由匹配结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// 匹配的 Agent ID
    pub agent_id: String,
    /// 会话键
    pub session_key: String,
    /// 匹配的规则列表
    pub rules_matched: Vec<String>,
}

/// 路由规则（由一条绑定配置生成）
#[derive(Debug, Clone)]
pub struct RouteRule {
    /// 规则 ID
    pub id: String,
    /// 规则优先级（数值越大优先级越高）
    pub priority: u32,
    /// 规则条件，全部命中才算匹配
    pub conditions: Vec<RouteCondition>,
    /// 匹配的 Agent ID
    pub agent_id: String,
}

impl RouteRule {
    /// 检查请求是否命中所有条件
    pub fn matches(&self, request: &RouteRequest) -> bool {
        self.conditions.iter().all(|c| c.matches(request))
    }
}

/// 路由条件
#[derive(Debug, Clone)]
pub enum RouteCondition {
    /// 渠道匹配
    Channel(String),
    /// 账号匹配
    Account(String),
    /// 会话匹配
    Conversation(String),
    /// 会话类型匹配
    ChatType(ChatType),
}

impl RouteCondition {
    /// 检查请求是否匹配条件
    pub fn matches(&self, request: &RouteRequest) -> bool {
        match self {
            RouteCondition::Channel(channel) => channel == &request.channel,
            RouteCondition::Account(account_id) => account_id == &request.account_id,
            RouteCondition::Conversation(chat_id) => chat_id == &request.chat_id,
            RouteCondition::ChatType(chat_type) => chat_type == &request.chat_type,
        }
    }
}

/// 生成会话键
///
/// 格式：`agent:{agent_id}:{channel}:{group|direct}:{chat_id}`
pub fn build_session_key(agent_id: &str, channel: &str, chat_type: ChatType, chat_id: &str) -> String {
    format!("agent:{}:{}:{}:{}", agent_id, channel, chat_type.as_str(), chat_id)
}

/// 路由解析器 Trait
#[async_trait::async_trait]
pub trait RouteResolver: Send + Sync {
    /// 解析路由
    async fn resolve(&self, request: &RouteRequest) -> Result<RouteMatch>;
}

/// 绑定路由器
///
/// 按优先级匹配绑定规则；没有规则命中时回退到默认 Agent，
/// 未配置默认 Agent 则使用账号 ID 作为 Agent ID。
#[derive(Clone, Debug, Default)]
pub struct BindingRouter {
    /// 路由规则列表（按优先级降序）
    rules: Arc<Vec<RouteRule>>,
    /// 默认回退 Agent ID
    default_agent: Option<String>,
}

impl BindingRouter {
    /// 创建没有绑定规则的路由器
    pub fn new(default_agent: Option<String>) -> Self {
        Self {
            rules: Arc::new(Vec::new()),
            default_agent,
        }
    }

    /// 由路由配置创建
    pub fn from_config(config: &RoutingConfig) -> Self {
        let mut rules: Vec<RouteRule> = config
            .bindings
            .iter()
            .enumerate()
            .map(|(index, binding)| Self::rule_from_binding(index, binding))
            .collect();
        // 稳定排序，同优先级保持配置顺序
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        Self {
            rules: Arc::new(rules),
            default_agent: config.default_agent.clone(),
        }
    }

    fn rule_from_binding(index: usize, binding: &BindingConfig) -> RouteRule {
        let matcher = &binding.matcher;
        let mut conditions = Vec::new();
        if let Some(channel) = &matcher.channel {
            conditions.push(RouteCondition::Channel(channel.clone()));
        }
        if let Some(account_id) = &matcher.account_id {
            conditions.push(RouteCondition::Account(account_id.clone()));
        }
        if let Some(chat_id) = &matcher.chat_id {
            conditions.push(RouteCondition::Conversation(chat_id.clone()));
        }
        if let Some(chat_type) = matcher.chat_type {
            conditions.push(RouteCondition::ChatType(chat_type));
        }

        RouteRule {
            id: format!("binding-{}", index),
            priority: binding.priority,
            conditions,
            agent_id: binding.agent_id.clone(),
        }
    }

    /// 按优先级排列的规则
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

#[async_trait::async_trait]
impl RouteResolver for BindingRouter {
    async fn resolve(&self, request: &RouteRequest) -> Result<RouteMatch> {
        let matched = self.rules.iter().find(|r| r.matches(request));

        let (agent_id, rules_matched) = match matched {
            Some(rule) => {
                debug!(rule_id = %rule.id, agent_id = %rule.agent_id, "路由规则匹配成功");
                (rule.agent_id.clone(), vec![rule.id.clone()])
            }
            None => {
                let agent_id = self
                    .default_agent
                    .clone()
                    .unwrap_or_else(|| request.account_id.clone());
                (agent_id, vec!["fallback".to_string()])
            }
        };

        if agent_id.trim().is_empty() {
            return Err(Error::Routing(format!(
                "账号 {} 在会话 {} 中没有可用的 Agent",
                request.account_id, request.chat_id
            )));
        }

        let session_key = build_session_key(&agent_id, &request.channel, request.chat_type, &request.chat_id);
        Ok(RouteMatch {
            agent_id,
            session_key,
            rules_matched,
        })
    }
}
