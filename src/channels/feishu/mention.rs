//! @提及解析模块
//!
//! 从消息文本中找出被 @ 的机器人账号，分两个阶段：
//! 1. 名称扫描：对每个其他已注册账号匹配 `@<显示名称>`（不区分大小写，要求词边界）。
//!    模型生成的文本通常只写纯文本 `@Name`，这是主要来源。
//! 2. 标记扫描：从 `<at id=...>`、`<at user_id="...">` 以及 `"id": "..."`
//!    片段中提取标识符，再通过注册表反向解析为账号。未注册的标识符（普通用户）直接丢弃。
//!
//! 两个阶段的结果带来源标记合并，发送者自身总是被排除。
//!
//! 此外提供飞书提及标记的生成与解析工具函数。

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace};

use super::identity::IdentityRegistry;
use crate::core::message::types::MentionTarget;

/// 提及标记正则，按顺序应用
///
/// 第三个模式也会命中消息正文里普通的 JSON `"id": "..."` 片段，
/// 这类标识符通常无法解析为已注册账号，会在解析阶段被丢弃。
static MARKUP_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)<at\s+id\s*=\s*["']?([^"'\s>]+)["']?\s*[>\s]"#,
        r#"(?i)<at\s+user_id\s*=\s*["']?([^"'\s>]+)["']?\s*[>\s]"#,
        r#"(?i)["']?(?:id|user_id)["']?\s*:\s*["']?([^"',\s}]+)["']?"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("提及标记正则无效"))
    .collect()
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("空白正则无效"));

/// 提及来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MentionSource {
    /// 纯文本 `@显示名称`
    Name,
    /// `<at ...>` 标记或 id 片段
    Markup,
}

/// 提及候选
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionCandidate {
    /// 解析出的账号 ID
    pub account_id: String,
    /// 用于转发的标识符（名称扫描时为账号主标识符，可能为空）
    pub identifier: String,
    /// 来源
    pub source: MentionSource,
    /// 文本中命中的片段
    pub token: String,
}

/// 提及解析器
#[derive(Debug, Clone)]
pub struct MentionExtractor {
    registry: Arc<IdentityRegistry>,
}

impl MentionExtractor {
    pub fn new(registry: Arc<IdentityRegistry>) -> Self {
        Self { registry }
    }

    /// 第一阶段：名称扫描
    ///
    /// 使用注册时预编译的模式，显示名称为空的账号不参与扫描。
    pub fn scan_names(&self, text: &str, sender_account_id: &str) -> Vec<MentionCandidate> {
        let mut candidates = Vec::new();

        for (account, pattern) in self.registry.name_patterns() {
            if account.account_id == sender_account_id {
                continue;
            }

            if let Some(hit) = pattern.find(text) {
                trace!(account_id = %account.account_id, token = %hit.as_str(), "名称扫描命中");
                candidates.push(MentionCandidate {
                    account_id: account.account_id.clone(),
                    identifier: account.primary_id.clone(),
                    source: MentionSource::Name,
                    token: hit.as_str().to_string(),
                });
            }
        }

        candidates
    }

    /// 第二阶段：标记扫描
    ///
    /// 返回解析到已注册账号且不是发送者的候选。
    pub fn scan_markup(&self, text: &str, sender_account_id: &str) -> Vec<MentionCandidate> {
        let mut candidates = Vec::new();

        for identifier in extract_markup_ids(text) {
            match self.registry.resolve_account(&identifier) {
                Some(account_id) if account_id == sender_account_id => {
                    trace!(identifier = %identifier, "标记指向发送者自身，忽略");
                }
                Some(account_id) => {
                    trace!(identifier = %identifier, account_id = %account_id, "标记扫描命中");
                    candidates.push(MentionCandidate {
                        account_id,
                        token: identifier.clone(),
                        identifier,
                        source: MentionSource::Markup,
                    });
                }
                None => {
                    trace!(identifier = %identifier, "标识符未注册，忽略");
                }
            }
        }

        candidates
    }

    /// 两阶段合并后的候选，名称阶段在前
    pub fn candidates(&self, text: &str, sender_account_id: &str) -> Vec<MentionCandidate> {
        let mut candidates = self.scan_names(text, sender_account_id);
        candidates.extend(self.scan_markup(text, sender_account_id));
        candidates
    }

    /// 被提及的账号集合（不含发送者）
    pub fn extract(&self, text: &str, sender_account_id: &str) -> BTreeSet<String> {
        let targets: BTreeSet<String> = self
            .candidates(text, sender_account_id)
            .into_iter()
            .map(|candidate| candidate.account_id)
            .filter(|account_id| account_id != sender_account_id)
            .collect();

        debug!(sender = %sender_account_id, targets = ?targets, "提及解析完成");
        targets
    }
}

/// 从提及标记中提取原始标识符，保持出现顺序并去重
pub fn extract_markup_ids(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut ids = Vec::new();

    for pattern in MARKUP_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            if let Some(id) = caps.get(1).map(|m| m.as_str().trim()) {
                if !id.is_empty() && seen.insert(id.to_string()) {
                    ids.push(id.to_string());
                }
            }
        }
    }

    ids
}

/// 平台事件中的提及项
///
/// 标识符按 open_id、user_id、union_id 的顺序取第一个非空值。
pub trait EventMention {
    fn mention_id(&self) -> Option<String>;
    fn mention_name(&self) -> &str;
    fn mention_key(&self) -> &str;
}

/// 从平台事件的提及列表中提取目标（排除机器人自身和没有标识符的项）
pub fn extract_mention_targets<M: EventMention>(mentions: &[M], bot_ids: &[String]) -> Vec<MentionTarget> {
    let bot_ids: BTreeSet<&str> = bot_ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()).collect();

    mentions
        .iter()
        .filter_map(|mention| {
            let id = mention.mention_id()?;
            if bot_ids.contains(id.as_str()) {
                return None;
            }
            Some(MentionTarget {
                open_id: id,
                name: mention.mention_name().to_string(),
                key: mention.mention_key().to_string(),
            })
        })
        .collect()
}

/// 平台事件的提及列表中是否包含机器人自身
pub fn mentions_bot<M: EventMention>(mentions: &[M], bot_ids: &[String]) -> bool {
    mentions.iter().any(|mention| {
        mention
            .mention_id()
            .map(|id| bot_ids.iter().any(|bot_id| bot_id.trim() == id))
            .unwrap_or(false)
    })
}

/// 去掉文本中的提及占位符并压缩空白
pub fn extract_message_body(text: &str, mention_keys: &[String]) -> String {
    let mut result = text.to_string();
    for key in mention_keys.iter().filter(|key| !key.is_empty()) {
        result = result.replace(key.as_str(), "");
    }
    WHITESPACE.replace_all(&result, " ").trim().to_string()
}

/// 提及标记格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionFormat {
    /// 文本消息：`<at user_id="id">name</at>`
    Text,
    /// 卡片消息（lark_md）：`<at id=id></at>`
    Card,
}

/// 生成单个提及标记
pub fn format_mention(target: &MentionTarget, format: MentionFormat) -> String {
    match format {
        MentionFormat::Text => format!("<at user_id=\"{}\">{}</at>", target.open_id, target.name),
        MentionFormat::Card => format!("<at id={}></at>", target.open_id),
    }
}

/// 生成 @所有人 标记
pub fn format_mention_all(format: MentionFormat) -> String {
    match format {
        MentionFormat::Text => "<at user_id=\"all\">Everyone</at>".to_string(),
        MentionFormat::Card => "<at id=all></at>".to_string(),
    }
}

/// 在消息前拼接提及标记
pub fn build_mentioned_message(targets: &[MentionTarget], message: &str, format: MentionFormat) -> String {
    if targets.is_empty() {
        return message.to_string();
    }

    let mentions: Vec<String> = targets.iter().map(|t| format_mention(t, format)).collect();
    format!("{} {}", mentions.join(" "), message)
}
