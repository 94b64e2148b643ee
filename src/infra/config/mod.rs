//! 配置管理系统模块
//!
//! 本模块负责加载和管理系统配置。
//!
//! # 配置文件示例
//! ```toml
//! [logging]
//! level = "info"
//!
//! [forwarding]
//! enabled = true
//! max_depth = 1
//!
//! [channels.feishu.accounts.manager]
//! app_id = "${FEISHU_MANAGER_APP_ID}"
//! app_secret = "${FEISHU_MANAGER_APP_SECRET}"
//! bot_name = "Manager"
//!
//! [[routing.bindings]]
//! agent_id = "manager"
//! match = { channel = "feishu", account_id = "manager" }
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::{env, fs};

use super::error::{Error, Result};
use crate::core::message::types::ChatType;

/// 默认转发深度上限
///
/// 允许一次转发（A @B），拒绝由此产生的回复链再次转发（B @A）。
pub const DEFAULT_MAX_FORWARD_DEPTH: u32 = 1;

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("环境变量正则无效"));

/// 主配置结构
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingSettings,
    /// 机器人间转发配置
    #[serde(default)]
    pub forwarding: ForwardingConfig,
    /// 入站过滤配置
    #[serde(default)]
    pub gate: GateConfig,
    /// 渠道配置
    #[serde(default)]
    pub channels: ChannelsConfig,
    /// 路由配置
    #[serde(default)]
    pub routing: RoutingConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingSettings {
    /// 日志级别
    pub level: Option<String>,
    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json: bool,
}

/// 转发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingConfig {
    /// 是否启用 @提及转发
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 每个会话的最大转发深度
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: DEFAULT_MAX_FORWARD_DEPTH,
        }
    }
}

/// 入站过滤配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// 群聊中是否必须 @ 机器人才处理
    #[serde(default = "default_true")]
    pub require_mention: bool,
    /// 发送者白名单（为空表示不限制）
    #[serde(default)]
    pub allow_from: Vec<String>,
    /// 消息 ID 去重窗口（秒）
    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            require_mention: true,
            allow_from: Vec::new(),
            dedup_ttl_secs: default_dedup_ttl(),
        }
    }
}

/// 渠道配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    /// 飞书渠道
    #[serde(default)]
    pub feishu: FeishuConfig,
}

/// 飞书渠道配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeishuConfig {
    /// 机器人账号，键为账号 ID
    #[serde(default)]
    pub accounts: BTreeMap<String, FeishuAccountConfig>,
}

impl FeishuConfig {
    /// 已启用的账号列表
    pub fn enabled_accounts(&self) -> impl Iterator<Item = (&String, &FeishuAccountConfig)> {
        self.accounts.iter().filter(|(_, account)| account.enabled)
    }
}

/// 单个飞书机器人账号配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeishuAccountConfig {
    /// 是否启用
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 应用 ID
    pub app_id: Option<String>,
    /// 应用密钥
    pub app_secret: Option<String>,
    /// 机器人显示名称（用于纯文本 @Name 检测）
    pub bot_name: Option<String>,
    /// 已知的 open_id
    pub open_id: Option<String>,
    /// 已知的 user_id
    pub user_id: Option<String>,
    /// 已知的 union_id
    pub union_id: Option<String>,
}

impl Default for FeishuAccountConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_id: None,
            app_secret: None,
            bot_name: None,
            open_id: None,
            user_id: None,
            union_id: None,
        }
    }
}

/// 路由配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoutingConfig {
    /// 无绑定命中时使用的 Agent（未设置时使用账号 ID）
    pub default_agent: Option<String>,
    /// Agent 绑定
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

/// Agent 绑定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    /// 目标 Agent ID
    pub agent_id: String,
    /// 匹配条件
    #[serde(rename = "match", default)]
    pub matcher: BindingMatch,
    /// 优先级（数值越大越优先）
    #[serde(default)]
    pub priority: u32,
}

/// 绑定匹配条件，所有已设置字段都必须命中
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BindingMatch {
    pub channel: Option<String>,
    pub account_id: Option<String>,
    pub chat_id: Option<String>,
    /// `group` 或 `direct`
    pub chat_type: Option<ChatType>,
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> u32 {
    DEFAULT_MAX_FORWARD_DEPTH
}

fn default_dedup_ttl() -> u64 {
    300
}

impl Config {
    /// 校验配置
    ///
    /// 返回发现的第一个错误；重名机器人只记录警告。
    pub fn validate(&self) -> Result<()> {
        for (account_id, account) in &self.channels.feishu.accounts {
            if account_id.trim().is_empty() {
                return Err(Error::Config("飞书账号 ID 不能为空".to_string()));
            }
            if account.enabled && account.app_id.as_deref().map_or(true, |s| s.trim().is_empty()) {
                tracing::warn!(account_id = %account_id, "账号未配置 app_id");
            }
        }

        let mut names = HashSet::new();
        for (account_id, account) in self.channels.feishu.enabled_accounts() {
            if let Some(name) = account.bot_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
                if !names.insert(name.to_lowercase()) {
                    tracing::warn!(account_id = %account_id, bot_name = %name, "机器人名称重复，@提及将命中多个账号");
                }
            }
        }

        for binding in &self.routing.bindings {
            if binding.agent_id.trim().is_empty() {
                return Err(Error::Config("路由绑定的 agent_id 不能为空".to_string()));
            }
            if let Some(account_id) = &binding.matcher.account_id {
                if !self.channels.feishu.accounts.contains_key(account_id) {
                    tracing::warn!(account_id = %account_id, agent_id = %binding.agent_id, "路由绑定引用了未知账号");
                }
            }
        }

        if self.forwarding.enabled && self.forwarding.max_depth == 0 {
            tracing::warn!("max_depth 为 0，转发实际上被禁用");
        }

        Ok(())
    }
}

/// 配置加载器
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// 创建新的配置加载器
    pub fn new() -> Self {
        Self
    }

    /// 加载配置
    pub async fn load(&self, path: &str) -> Result<Config> {
        tracing::info!(path = path, "加载配置文件");

        if !PathBuf::from(path).exists() {
            tracing::warn!(path = path, "配置文件不存在，使用默认配置");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("读取配置文件失败: {}", e)))?;

        let config = self.parse(&content)?;

        tracing::info!(accounts = config.channels.feishu.accounts.len(), "配置加载成功");
        Ok(config)
    }

    /// 从字符串解析配置并替换环境变量
    pub fn parse(&self, content: &str) -> Result<Config> {
        let mut config: Config = toml::from_str(content)?;
        self.substitute_env_vars(&mut config);
        Ok(config)
    }

    /// 替换环境变量
    ///
    /// 将 `${VAR_NAME}` 格式的字符串替换为对应的环境变量值
    fn substitute_env_vars(&self, config: &mut Config) {
        for account in config.channels.feishu.accounts.values_mut() {
            for field in [
                &mut account.app_id,
                &mut account.app_secret,
                &mut account.open_id,
                &mut account.user_id,
                &mut account.union_id,
            ] {
                if let Some(value) = field.as_mut() {
                    *value = self.replace_env_vars(value);
                }
            }
        }
    }

    /// 替换字符串中的环境变量，未定义的变量保留原样
    fn replace_env_vars(&self, input: &str) -> String {
        ENV_VAR_PATTERN
            .replace_all(input, |caps: &regex::Captures| {
                env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
            })
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[forwarding]
enabled = true

[channels.feishu.accounts.manager]
app_id = "cli_manager"
bot_name = "Manager"
open_id = "ou_m"

[channels.feishu.accounts.reviewer]
bot_name = "Reviewer"
open_id = "ou_r"
enabled = false

[[routing.bindings]]
agent_id = "review-agent"
match = { channel = "feishu", account_id = "reviewer" }

[[routing.bindings]]
agent_id = "private"
match = { chat_type = "direct" }
"#;

    #[test]
    fn test_parse_sample() {
        let config = ConfigLoader::new().parse(SAMPLE).unwrap();

        assert!(config.forwarding.enabled);
        assert_eq!(config.forwarding.max_depth, 1);
        assert_eq!(config.channels.feishu.accounts.len(), 2);
        assert_eq!(config.channels.feishu.enabled_accounts().count(), 1);
        assert_eq!(config.routing.bindings[0].matcher.account_id.as_deref(), Some("reviewer"));
        assert_eq!(config.routing.bindings[1].matcher.chat_type, Some(ChatType::Direct));
        assert!(config.gate.require_mention);
        assert_eq!(config.gate.dedup_ttl_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_substitution() {
        env::set_var("CLAWDBOT_RELAY_TEST_APP_SECRET", "s3cret");
        let config = ConfigLoader::new()
            .parse(
                r#"
[channels.feishu.accounts.a]
app_secret = "${CLAWDBOT_RELAY_TEST_APP_SECRET}"
app_id = "${CLAWDBOT_RELAY_TEST_UNSET_VAR}"
"#,
            )
            .unwrap();

        let account = &config.channels.feishu.accounts["a"];
        assert_eq!(account.app_secret.as_deref(), Some("s3cret"));
        assert_eq!(account.app_id.as_deref(), Some("${CLAWDBOT_RELAY_TEST_UNSET_VAR}"));
        assert!(account.enabled);
    }

    #[test]
    fn test_validate_rejects_empty_agent() {
        let config = ConfigLoader::new()
            .parse(
                r#"
[[routing.bindings]]
agent_id = " "
"#,
            )
            .unwrap();

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_default() {
        let config = ConfigLoader::new().load("/nonexistent/clawdbot-relay.toml").await.unwrap();
        assert!(config.channels.feishu.accounts.is_empty());
        assert!(config.forwarding.enabled);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let path = file.path().to_string_lossy().to_string();
        let config = ConfigLoader::new().load(&path).await.unwrap();

        assert_eq!(config.channels.feishu.accounts["manager"].bot_name.as_deref(), Some("Manager"));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = ConfigLoader::new().parse("[channels.feishu");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
