//! 飞书多机器人 @提及转发库入口
//!
//! # 使用示例
//! ```rust
//! use clawdbot_relay::channels::feishu::IdentityRegistry;
//!
//! let registry = IdentityRegistry::new();
//! registry.register("reviewer", "ou_r", &[], "Reviewer");
//! assert_eq!(registry.resolve_account("ou_r").as_deref(), Some("reviewer"));
//! ```

pub mod channels;
pub mod core;
pub mod infra;

pub use infra::config::Config;
pub use infra::error::{Error, Result};
