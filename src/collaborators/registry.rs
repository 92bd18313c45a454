//! 处理器注册表
//!
//! 按 ActionKind 存储 Arc<dyn ActionHandler>；未注册的类型在执行时记为 NoHandler 失败。

use std::collections::HashMap;
use std::sync::Arc;

use crate::collaborators::traits::ActionHandler;
use crate::dispatch::types::ActionKind;

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ActionKind, handler: impl ActionHandler + 'static) {
        self.handlers.insert(kind, Arc::new(handler));
    }

    pub fn register_arc(&mut self, kind: ActionKind, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// 链式注册
    pub fn with(mut self, kind: ActionKind, handler: impl ActionHandler + 'static) -> Self {
        self.register(kind, handler);
        self
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// 已注册的类型（有序）
    pub fn kinds(&self) -> Vec<ActionKind> {
        let mut kinds: Vec<ActionKind> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
