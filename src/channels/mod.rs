//! 渠道适配器模块

pub mod feishu;
