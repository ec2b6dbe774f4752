use crate::template::Template;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// 缓存条目：读取到的源码或编译后的模板
#[derive(Debug, Clone)]
pub enum Cached {
    Source(Arc<str>),
    Template(Template),
}

/// 编译模板缓存
///
/// 以文件名为键缓存模板，以 `文件名 + ":string"` 为键缓存源码。
/// 不限容量，不单独淘汰，只能整体清空。
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: Mutex<HashMap<String, Cached>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 源码条目的键
    pub fn source_key(path: &str) -> String {
        format!("{path}:string")
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Cached>> {
        // 持锁期间不执行用户代码，中毒的锁仍可安全使用
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn template(&self, key: &str) -> Option<Template> {
        match self.lock().get(key) {
            Some(Cached::Template(template)) => Some(template.clone()),
            _ => None,
        }
    }

    pub fn source(&self, key: &str) -> Option<Arc<str>> {
        match self.lock().get(key) {
            Some(Cached::Source(source)) => Some(source.clone()),
            _ => None,
        }
    }

    pub fn insert(&self, key: impl Into<String>, entry: Cached) {
        self.lock().insert(key.into(), entry);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_and_templates_share_one_map() {
        let cache = TemplateCache::new();
        cache.insert(TemplateCache::source_key("a.ejs"), Cached::Source(Arc::from("hi")));
        assert_eq!(cache.source("a.ejs:string").as_deref(), Some("hi"));
        assert!(cache.template("a.ejs:string").is_none());
        assert!(cache.source("a.ejs").is_none());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
