//! 消息路由模块
//!
//! 本模块负责将消息路由到对应的 Agent 和会话。

pub mod engine;

// 重新导出常用类型
pub use engine::{build_session_key, BindingRouter, RouteCondition, RouteMatch, RouteRequest, RouteResolver, RouteRule};
