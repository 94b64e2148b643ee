//! 核心运行时模块
//!
//! # 模块结构
//! - `message/` - 消息类型、回复管道、文本发送接口
//! - `routing/` - 消息路由（决定消息由哪个 Agent 和会话处理）

pub mod message;
pub mod routing;
