//! 转发递归保护
//!
//! 每个会话维护一个在途转发计数。进入时加一，离开时减一，归零时删除条目，
//! 计数达到上限时拒绝新的转发。上限为 1 时允许 A @B 的一次转发，
//! 而 B 在处理期间回复 @A 产生的转发会被拒绝。
//!
//! 计数的读-改-写在 DashMap 的单个条目锁内完成，不同会话互不影响。

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

use crate::infra::config::DEFAULT_MAX_FORWARD_DEPTH;

/// 转发深度保护
#[derive(Debug, Clone)]
pub struct ForwardGuard {
    depths: Arc<DashMap<String, u32>>,
    max_depth: u32,
}

impl Default for ForwardGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FORWARD_DEPTH)
    }
}

impl ForwardGuard {
    /// 创建保护器
    pub fn new(max_depth: u32) -> Self {
        Self {
            depths: Arc::new(DashMap::new()),
            max_depth,
        }
    }

    /// 深度上限
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// 按默认上限尝试进入会话
    pub fn try_enter(&self, chat_id: &str) -> Option<DepthGuard> {
        self.try_enter_bounded(chat_id, self.max_depth)
    }

    /// 按指定上限尝试进入会话
    ///
    /// 成功时返回作用域守卫，守卫释放时恢复深度；达到上限时返回 `None`，状态不变。
    pub fn try_enter_bounded(&self, chat_id: &str, max_depth: u32) -> Option<DepthGuard> {
        match self.depths.entry(chat_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() >= max_depth {
                    trace!(chat_id = %chat_id, depth = *entry.get(), "转发深度已达上限");
                    return None;
                }
                *entry.get_mut() += 1;
            }
            Entry::Vacant(entry) => {
                if max_depth == 0 {
                    trace!(chat_id = %chat_id, "转发深度上限为 0");
                    return None;
                }
                entry.insert(1);
            }
        }

        Some(DepthGuard {
            depths: self.depths.clone(),
            chat_id: chat_id.to_string(),
        })
    }

    /// 当前深度，没有在途转发时为 0
    pub fn depth(&self, chat_id: &str) -> u32 {
        self.depths.get(chat_id).map(|depth| *depth).unwrap_or(0)
    }

    /// 有在途转发的会话数量
    pub fn active_conversations(&self) -> usize {
        self.depths.len()
    }
}

/// 作用域守卫
///
/// 无论分发成功、失败还是任务被取消，释放时都会恢复深度。
#[derive(Debug)]
pub struct DepthGuard {
    depths: Arc<DashMap<String, u32>>,
    chat_id: String,
}

impl DepthGuard {
    /// 守卫所属会话
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        if let Entry::Occupied(mut entry) = self.depths.entry(self.chat_id.clone()) {
            if *entry.get() <= 1 {
                entry.remove();
            } else {
                *entry.get_mut() -= 1;
            }
        }
        trace!(chat_id = %self.chat_id, "转发深度已恢复");
    }
}
