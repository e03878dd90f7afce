//! 行回调（Line Callbacks）
//!
//! MCU 的信息行按第一个逗号字段（标签）分发给注册的回调，回调收到其余字段。
//! 回调在读线程中执行，必须尽快返回；耗时处理应转发到 channel。
//!
//! ```rust
//! use sorter_driver::hooks::CallbackRegistry;
//! use crossbeam_channel::unbounded;
//! use std::sync::Arc;
//!
//! let mut registry = CallbackRegistry::new();
//! let (tx, rx) = unbounded();
//! registry.register("ENC", Arc::new(move |fields: &[String]| {
//!     let _ = tx.send(fields.to_vec());
//! }));
//!
//! assert!(registry.dispatch("ENC,12,-3"));
//! assert_eq!(rx.try_recv().unwrap(), vec!["12".to_string(), "-3".to_string()]);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

/// 行回调 trait
pub trait LineCallback: Send + Sync {
    /// 收到带有注册标签的行时调用（不含标签字段）
    fn on_line(&self, fields: &[String]);
}

impl<F> LineCallback for F
where
    F: Fn(&[String]) + Send + Sync,
{
    fn on_line(&self, fields: &[String]) {
        self(fields)
    }
}

/// 回调注册表（每个标签一个回调，后注册的覆盖先注册的）
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<String, Arc<dyn LineCallback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册回调，返回是否覆盖了已有回调
    pub fn register(&mut self, tag: impl Into<String>, callback: Arc<dyn LineCallback>) -> bool {
        self.callbacks.insert(tag.into(), callback).is_some()
    }

    /// 移除回调
    pub fn unregister(&mut self, tag: &str) -> bool {
        self.callbacks.remove(tag).is_some()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// 按标签分发一行，返回是否有回调处理
    pub fn dispatch(&self, line: &str) -> bool {
        let mut parts = line.split(',');
        let tag = parts.next().unwrap_or("");
        match self.callbacks.get(tag) {
            Some(callback) => {
                let fields: Vec<String> = parts.map(str::to_string).collect();
                callback.on_line(&fields);
                true
            },
            None => false,
        }
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("tags", &self.callbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_by_first_field() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = hits.clone();
        let mut registry = CallbackRegistry::new();
        registry.register(
            "LIMIT",
            Arc::new(move |fields: &[String]| {
                assert_eq!(fields, ["2".to_string()]);
                hits_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(registry.dispatch("LIMIT,2"));
        assert!(!registry.dispatch("OTHER,2"));
        assert!(!registry.dispatch("T done id=1"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = CallbackRegistry::new();
        assert!(!registry.register("A", Arc::new(|_: &[String]| {})));
        assert!(registry.register("A", Arc::new(|_: &[String]| {})));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister("A"));
        assert!(registry.is_empty());
    }
}
