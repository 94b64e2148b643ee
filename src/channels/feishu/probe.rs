//! 机器人身份探测

use async_trait::async_trait;
use tracing::debug;

use super::identity::BotIdentity;
use crate::infra::config::FeishuAccountConfig;
use crate::infra::error::{Error, Result};

/// 身份探测 Trait
///
/// 账号开始监听时调用一次，获取机器人在平台上的标识符和名称。
#[async_trait]
pub trait IdentityProbe: Send + Sync {
    async fn probe(&self, account_id: &str, account: &FeishuAccountConfig) -> Result<BotIdentity>;
}

/// 从配置读取身份
///
/// 配置里既没有标识符也没有机器人名称时返回错误。
#[derive(Debug, Clone, Default)]
pub struct ConfiguredIdentityProbe;

impl ConfiguredIdentityProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IdentityProbe for ConfiguredIdentityProbe {
    async fn probe(&self, account_id: &str, account: &FeishuAccountConfig) -> Result<BotIdentity> {
        let identity = BotIdentity {
            open_id: account.open_id.clone(),
            user_id: account.user_id.clone(),
            union_id: account.union_id.clone(),
            bot_name: account.bot_name.clone(),
        };

        let has_name = identity.bot_name.as_deref().is_some_and(|name| !name.trim().is_empty());
        if identity.candidates().is_empty() && !has_name {
            return Err(Error::Channel(format!("账号 {} 未配置机器人身份", account_id)));
        }

        debug!(account_id = %account_id, identifiers = identity.candidates().len(), "已读取机器人身份");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_from_config() {
        let account = FeishuAccountConfig {
            open_id: Some("ou_1".to_string()),
            bot_name: Some("Reviewer".to_string()),
            ..Default::default()
        };

        let identity = ConfiguredIdentityProbe::new().probe("reviewer", &account).await.unwrap();
        assert_eq!(identity.candidates(), vec!["ou_1".to_string()]);
        assert_eq!(identity.bot_name.as_deref(), Some("Reviewer"));
    }

    #[tokio::test]
    async fn test_probe_without_identity_fails() {
        let result = ConfiguredIdentityProbe::new()
            .probe("empty", &FeishuAccountConfig::default())
            .await;
        assert!(matches!(result, Err(Error::Channel(_))));
    }
}
