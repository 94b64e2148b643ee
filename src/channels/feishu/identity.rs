//! 机器人身份注册表
//!
//! 记录每个已连接机器人账号的标识符（open_id / user_id / union_id）和显示名称，
//! 并维护 标识符 → 账号 的反向索引，供 @提及解析使用。
//!
//! # 生命周期
//! 账号开始监听时注册，停止时注销。注册是幂等的：重连后再次注册会覆盖旧记录，
//! 同一个标识符以最后一次注册为准。

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 探测到的机器人身份
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    pub open_id: Option<String>,
    pub user_id: Option<String>,
    pub union_id: Option<String>,
    /// 平台上的机器人名称
    pub bot_name: Option<String>,
}

impl BotIdentity {
    /// 标识符候选列表：open_id、user_id、union_id，去掉空白值
    pub fn candidates(&self) -> Vec<String> {
        [&self.open_id, &self.user_id, &self.union_id]
            .into_iter()
            .flatten()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect()
    }
}

/// 机器人账号记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotAccount {
    /// 账号 ID（配置中的键）
    pub account_id: String,
    /// 显示名称
    pub display_name: String,
    /// 主标识符（通常是 open_id），可能为空
    pub primary_id: String,
    /// 备用标识符，按顺序
    pub alternate_ids: Vec<String>,
    /// 是否启用
    pub enabled: bool,
}

impl BotAccount {
    /// 全部标识符：主标识符在前，之后是备用标识符
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::with_capacity(1 + self.alternate_ids.len());
        for id in std::iter::once(&self.primary_id).chain(self.alternate_ids.iter()) {
            if !id.is_empty() && !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}

/// 注册表内部记录：账号和预编译的名称匹配模式
#[derive(Debug, Clone)]
struct Registered {
    account: BotAccount,
    /// 显示名称为空或无法编译时为 `None`
    name_pattern: Option<Regex>,
}

/// 身份注册表
///
/// 使用 DashMap 保存，不同账号的注册可以并发进行。
#[derive(Debug, Clone, Default)]
pub struct IdentityRegistry {
    /// 账号 ID → 账号记录
    accounts: Arc<DashMap<String, Registered>>,
    /// 标识符 → 账号 ID
    index: Arc<DashMap<String, String>>,
}

impl IdentityRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册（或更新）一个已启用的账号
    ///
    /// # 参数说明
    /// * `account_id` - 账号 ID
    /// * `primary` - 主标识符
    /// * `alternates` - 备用标识符
    /// * `display_name` - 显示名称
    pub fn register(
        &self,
        account_id: &str,
        primary: &str,
        alternates: &[String],
        display_name: &str,
    ) -> BotAccount {
        self.register_account(account_id, primary, alternates, display_name, true)
    }

    /// 注册账号并指定启用状态
    ///
    /// 主标识符为空时，第一个非空备用标识符被提升为主标识符。
    /// 重新注册期间，仍属于该账号的标识符始终可以解析。
    pub fn register_account(
        &self,
        account_id: &str,
        primary: &str,
        alternates: &[String],
        display_name: &str,
        enabled: bool,
    ) -> BotAccount {
        let mut ids: Vec<String> = Vec::new();
        for id in std::iter::once(primary).chain(alternates.iter().map(String::as_str)) {
            let id = id.trim();
            if !id.is_empty() && !ids.iter().any(|existing| existing == id) {
                ids.push(id.to_string());
            }
        }

        let primary_id = if ids.is_empty() { String::new() } else { ids.remove(0) };
        let account = BotAccount {
            account_id: account_id.to_string(),
            display_name: display_name.trim().to_string(),
            primary_id,
            alternate_ids: ids,
            enabled,
        };

        let pattern = if account.display_name.is_empty() {
            None
        } else {
            match name_pattern(&account.display_name) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(account_id = %account_id, error = %e, "显示名称无法构造匹配模式");
                    None
                }
            }
        };

        self.accounts.insert(
            account_id.to_string(),
            Registered {
                account: account.clone(),
                name_pattern: pattern,
            },
        );

        // 先写入新标识符，再清理该账号不再拥有的旧标识符
        let identifiers = account.identifiers();
        for id in &identifiers {
            if let Some(previous) = self.index.insert(id.clone(), account_id.to_string()) {
                if previous != account_id {
                    debug!(identifier = %id, previous = %previous, account_id = %account_id, "标识符归属已覆盖");
                }
            }
        }
        self.index
            .retain(|id, owner| owner.as_str() != account_id || identifiers.contains(id));

        info!(
            account_id = %account_id,
            display_name = %account.display_name,
            primary_id = %account.primary_id,
            identifiers = identifiers.len(),
            "机器人身份已注册"
        );
        account
    }

    /// 注销账号
    ///
    /// 只删除仍指向该账号的标识符，已被其他账号接管的标识符保持不变。
    pub fn unregister(&self, account_id: &str) -> Option<BotAccount> {
        let removed = self.accounts.remove(account_id).map(|(_, entry)| entry.account);
        self.index.retain(|_, owner| owner.as_str() != account_id);
        if removed.is_some() {
            info!(account_id = %account_id, "机器人身份已注销");
        }
        removed
    }

    /// 清空注册表
    pub fn clear(&self) {
        self.accounts.clear();
        self.index.clear();
        info!("机器人身份注册表已清空");
    }

    /// 按标识符查找账号（区分大小写）
    pub fn resolve_account(&self, identifier: &str) -> Option<String> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return None;
        }
        self.index.get(identifier).map(|owner| owner.value().clone())
    }

    /// 列出账号的标识符，主标识符在前
    pub fn list_identifiers(&self, account_id: &str) -> Vec<String> {
        self.accounts
            .get(account_id)
            .map(|entry| entry.account.identifiers())
            .unwrap_or_default()
    }

    /// 获取账号记录
    pub fn get(&self, account_id: &str) -> Option<BotAccount> {
        self.accounts.get(account_id).map(|entry| entry.account.clone())
    }

    /// 获取显示名称
    pub fn display_name(&self, account_id: &str) -> Option<String> {
        self.accounts
            .get(account_id)
            .map(|entry| entry.account.display_name.clone())
            .filter(|name| !name.is_empty())
    }

    /// 设置启用状态，账号不存在时返回 `false`
    pub fn set_enabled(&self, account_id: &str, enabled: bool) -> bool {
        match self.accounts.get_mut(account_id) {
            Some(mut entry) => {
                entry.account.enabled = enabled;
                debug!(account_id = %account_id, enabled, "账号启用状态已更新");
                true
            }
            None => false,
        }
    }

    /// 是否已注册
    pub fn contains(&self, account_id: &str) -> bool {
        self.accounts.contains_key(account_id)
    }

    /// 所有账号的快照
    pub fn accounts(&self) -> Vec<BotAccount> {
        self.accounts.iter().map(|entry| entry.account.clone()).collect()
    }

    /// 有名称匹配模式的账号快照
    pub fn name_patterns(&self) -> Vec<(BotAccount, Regex)> {
        self.accounts
            .iter()
            .filter_map(|entry| {
                let pattern = entry.name_pattern.clone()?;
                Some((entry.account.clone(), pattern))
            })
            .collect()
    }

    /// 已注册账号数量
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// 注册表是否为空
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// 构造 `@<名称>` 匹配模式（不区分大小写）
///
/// 名称以单词字符结尾时追加词边界，避免 `@Reviewer` 命中 `@ReviewerBot`。
pub fn name_pattern(display_name: &str) -> Result<Regex, regex::Error> {
    let ends_with_word = display_name
        .chars()
        .last()
        .map(|c| c.is_alphanumeric() || c == '_')
        .unwrap_or(false);
    let boundary = if ends_with_word { r"\b" } else { "" };
    Regex::new(&format!("(?i)@{}{}", regex::escape(display_name), boundary))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = IdentityRegistry::new();
        registry.register("reviewer", "ou_r", &ids(&["u_r", "on_r"]), "Reviewer");

        assert_eq!(registry.resolve_account("ou_r"), Some("reviewer".to_string()));
        assert_eq!(registry.resolve_account("on_r"), Some("reviewer".to_string()));
        assert_eq!(registry.resolve_account("OU_R"), None);
        assert_eq!(registry.list_identifiers("reviewer"), ids(&["ou_r", "u_r", "on_r"]));
        assert_eq!(registry.display_name("reviewer"), Some("Reviewer".to_string()));
    }

    #[test]
    fn test_blank_identifiers_not_indexed() {
        let registry = IdentityRegistry::new();
        let account = registry.register("a", "  ", &ids(&["", " u_a ", "u_a"]), "A");

        assert_eq!(account.primary_id, "u_a");
        assert!(account.alternate_ids.is_empty());
        assert_eq!(registry.resolve_account(""), None);
        assert_eq!(registry.resolve_account("  "), None);
        assert_eq!(registry.resolve_account("u_a"), Some("a".to_string()));
    }

    #[test]
    fn test_reregister_is_upsert() {
        let registry = IdentityRegistry::new();
        registry.register("a", "ou_old", &[], "A");
        registry.register("a", "ou_new", &[], "A2");

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve_account("ou_old"), None);
        assert_eq!(registry.resolve_account("ou_new"), Some("a".to_string()));
        assert_eq!(registry.display_name("a"), Some("A2".to_string()));
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = IdentityRegistry::new();
        registry.register("a", "ou_shared", &[], "A");
        registry.register("b", "ou_shared", &[], "B");

        assert_eq!(registry.resolve_account("ou_shared"), Some("b".to_string()));

        // a 注销时不影响已被 b 接管的标识符
        registry.unregister("a");
        assert_eq!(registry.resolve_account("ou_shared"), Some("b".to_string()));
    }

    #[test]
    fn test_unregister() {
        let registry = IdentityRegistry::new();
        registry.register("a", "ou_a", &ids(&["u_a"]), "A");

        let removed = registry.unregister("a");
        assert!(removed.is_some());
        assert!(!registry.contains("a"));
        assert_eq!(registry.resolve_account("ou_a"), None);
        assert_eq!(registry.resolve_account("u_a"), None);
        assert!(registry.list_identifiers("a").is_empty());
        assert!(registry.unregister("a").is_none());
    }

    #[test]
    fn test_set_enabled() {
        let registry = IdentityRegistry::new();
        registry.register("a", "ou_a", &[], "A");

        assert!(registry.set_enabled("a", false));
        assert!(!registry.get("a").unwrap().enabled);
        assert!(!registry.set_enabled("missing", false));
    }

    #[test]
    fn test_identity_candidates() {
        let identity = BotIdentity {
            open_id: Some("ou_1".to_string()),
            user_id: Some(" ".to_string()),
            union_id: Some("on_1".to_string()),
            bot_name: None,
        };
        assert_eq!(identity.candidates(), ids(&["ou_1", "on_1"]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration() {
        let registry = IdentityRegistry::new();
        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.register(&format!("bot{}", i), &format!("ou_{}", i), &[], &format!("Bot{}", i));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.len(), 16);
        for i in 0..16 {
            assert_eq!(registry.resolve_account(&format!("ou_{}", i)), Some(format!("bot{}", i)));
        }
    }

    #[test]
    fn test_reregister_drops_only_stale_identifiers() {
        let registry = IdentityRegistry::new();
        registry.register("a", "ou_a", &ids(&["u_old"]), "A");
        registry.register("a", "ou_a", &ids(&["u_new"]), "A");

        assert_eq!(registry.resolve_account("ou_a"), Some("a".to_string()));
        assert_eq!(registry.resolve_account("u_new"), Some("a".to_string()));
        assert_eq!(registry.resolve_account("u_old"), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_identifier_resolvable_during_reconnect() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

        let registry = IdentityRegistry::new();
        registry.register("r", "ou_r", &[], "Reviewer");

        let done = Arc::new(AtomicBool::new(false));
        let misses = Arc::new(AtomicUsize::new(0));

        let reader = {
            let registry = registry.clone();
            let done = done.clone();
            let misses = misses.clone();
            tokio::task::spawn_blocking(move || {
                while !done.load(Ordering::Acquire) {
                    if registry.resolve_account("ou_r").is_none() {
                        misses.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        };

        let writer = {
            let registry = registry.clone();
            tokio::task::spawn_blocking(move || {
                for i in 0..5_000 {
                    let alternate = vec![format!("u_r_{}", i % 3)];
                    registry.register("r", "ou_r", &alternate, "Reviewer");
                }
            })
        };

        writer.await.unwrap();
        done.store(true, Ordering::Release);
        reader.await.unwrap();

        assert_eq!(misses.load(Ordering::Relaxed), 0);
        assert_eq!(registry.list_identifiers("r"), ids(&["ou_r", "u_r_1"]));
    }

    #[test]
    fn test_name_pattern_compiled_at_registration() {
        let registry = IdentityRegistry::new();
        registry.register("r", "ou_r", &[], "Reviewer");
        registry.register("blank", "ou_b", &[], "  ");

        let patterns = registry.name_patterns();
        assert_eq!(patterns.len(), 1);
        let (account, pattern) = &patterns[0];
        assert_eq!(account.account_id, "r");
        assert!(pattern.is_match("hey @reviewer"));
        assert!(!pattern.is_match("hey @ReviewerBot"));

        // 改名后模式随之更新
        registry.register("r", "ou_r", &[], "Critic");
        let (_, pattern) = &registry.name_patterns()[0];
        assert!(pattern.is_match("@Critic"));
        assert!(!pattern.is_match("@Reviewer"));
    }
}
