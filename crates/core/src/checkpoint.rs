use std::error::Error as StdError;
use std::fmt;
use std::sync::Mutex;

use crate::outline::OutlineTree;

#[derive(Debug)]
pub struct CheckpointError {
    inner: Box<dyn StdError + Send + Sync>,
}

impl CheckpointError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
        }
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync> {
        self.inner
    }
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for CheckpointError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// 持久化协作方：接收大纲（整树覆盖写）与逐节点的增量内容快照，
/// 供调用方在生成过程中观察部分结果。
pub trait CheckpointStore: Send + Sync {
    fn save_outline(&self, tree: &OutlineTree) -> Result<(), CheckpointError>;

    fn save_content(&self, title: &str, html: &str) -> Result<(), CheckpointError>;
}

#[derive(Default)]
pub struct NullCheckpointStore;

impl CheckpointStore for NullCheckpointStore {
    fn save_outline(&self, _tree: &OutlineTree) -> Result<(), CheckpointError> {
        Ok(())
    }

    fn save_content(&self, _title: &str, _html: &str) -> Result<(), CheckpointError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    outline: Mutex<Option<OutlineTree>>,
    contents: Mutex<Vec<(String, String)>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outline(&self) -> Option<OutlineTree> {
        self.outline.lock().map(|guard| guard.clone()).ok().flatten()
    }

    pub fn contents(&self) -> Vec<(String, String)> {
        self.contents
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn checkpoint_count(&self) -> usize {
        self.contents.lock().map(|guard| guard.len()).unwrap_or(0)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save_outline(&self, tree: &OutlineTree) -> Result<(), CheckpointError> {
        if let Ok(mut guard) = self.outline.lock() {
            *guard = Some(tree.clone());
        }
        Ok(())
    }

    fn save_content(&self, title: &str, html: &str) -> Result<(), CheckpointError> {
        if let Ok(mut guard) = self.contents.lock() {
            guard.push((title.to_string(), html.to_string()));
        }
        Ok(())
    }
}
