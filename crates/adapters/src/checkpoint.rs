use std::fs;
use std::path::{Path, PathBuf};

use docgen_core::checkpoint::{CheckpointError, CheckpointStore};
use docgen_core::outline::OutlineTree;

const OUTLINE_FILE_NAME: &str = "outline.json";
const DOCUMENT_FILE_NAME: &str = "document.html";

/// 把大纲与增量内容快照落到本地目录。大纲整树覆盖写；正文快照
/// 每次覆盖同一个 HTML 文件，外部观察该文件即可看到生成进展。
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn outline_path(&self) -> PathBuf {
        self.root.join(OUTLINE_FILE_NAME)
    }

    pub fn document_path(&self) -> PathBuf {
        self.root.join(DOCUMENT_FILE_NAME)
    }

    fn ensure_root(&self) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.root).map_err(CheckpointError::new)
    }

    fn write(&self, path: &Path, contents: &str) -> Result<(), CheckpointError> {
        fs::write(path, contents).map_err(CheckpointError::new)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save_outline(&self, tree: &OutlineTree) -> Result<(), CheckpointError> {
        self.ensure_root()?;
        let serialized = serde_json::to_string_pretty(tree).map_err(CheckpointError::new)?;
        self.write(&self.outline_path(), &serialized)
    }

    fn save_content(&self, _title: &str, html: &str) -> Result<(), CheckpointError> {
        self.ensure_root()?;
        self.write(&self.document_path(), html)
    }
}
