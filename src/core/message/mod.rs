//! 消息处理模块
//!
//! 本模块负责：
//! 1. 定义消息类型（会话类型、入站上下文、提及目标）
//! 2. 定义回复管道接口
//! 3. 定义平台文本发送接口

pub mod types;      // 消息类型定义
pub mod pipeline;   // 回复管道
pub mod sender;     // 文本发送器

// 重新导出常用类型
pub use types::{ChatType, DispatchSummary, InboundContext, MentionTarget, SenderInfo};
pub use pipeline::{LoggingPipeline, ReplyPipeline};
pub use sender::{SendResult, TextSender};
