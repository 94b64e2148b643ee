//! 飞书渠道模块
//!
//! 多个飞书机器人账号共处同一个群聊时，平台不会把机器人发出的消息推送给
//! 其他机器人。本模块在出站发送之后解析消息里的 @提及，把消息直接投递给
//! 被提及机器人的回复管道。
//!
//! # 模块结构
//! - `identity` - 机器人身份注册表
//! - `mention` - @提及解析与标记生成
//! - `guard` - 转发递归保护
//! - `forward` - 转发判定与分发
//! - `handlers` / `gate` / `monitor` - 账号生命周期与平台入站路径
//! - `outbound` - 出站发送与转发触发
//!
//! # 配置文件示例
//! ```toml
//! [channels.feishu.accounts.manager]
//! app_id = "${MANAGER_APP_ID}"
//! app_secret = "${MANAGER_APP_SECRET}"
//! bot_name = "Manager"
//! open_id = "ou_manager"
//! ```

pub mod forward;
pub mod gate;
pub mod guard;
pub mod handlers;
pub mod identity;
pub mod mention;
pub mod monitor;
pub mod outbound;
pub mod probe;

/// 渠道标识
pub const CHANNEL_ID: &str = "feishu";

pub use forward::{ForwardDecision, ForwardTarget, MentionForwarder, SkipReason, SyntheticEnvelope};
pub use gate::{GateDecision, InboundGate, RejectReason};
pub use guard::{DepthGuard, ForwardGuard};
pub use handlers::{FeishuEventRequest, FeishuMention, FeishuMessageEvent};
pub use identity::{BotAccount, BotIdentity, IdentityRegistry};
pub use mention::{MentionCandidate, MentionExtractor, MentionFormat, MentionSource};
pub use monitor::FeishuMonitor;
pub use outbound::{detect_chat_type, FeishuOutbound, OutboundSend};
pub use probe::{ConfiguredIdentityProbe, IdentityProbe};
