// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 录像库: 列出与安全解析事件录像文件名

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("invalid recording name: {0}")]
    InvalidName(String),
    #[error("recording not found: {0}")]
    NotFound(String),
    #[error("failed to read recordings directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]+\.(mjpeg|mp4|avi)$").ok())
        .as_ref()
}

/// 文件名是否合法 (不允许路径分隔符与 `..`)
pub fn is_valid_name(name: &str) -> bool {
    !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && name_pattern().is_some_and(|re| re.is_match(name))
}

#[derive(Clone, Debug)]
pub struct RecordingLibrary {
    dir: PathBuf,
}

impl RecordingLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 最新在前 (文件名倒序, 时间戳在文件名中)
    pub fn list(&self) -> Result<Vec<String>, LibraryError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            // 目录尚未创建: 还没有任何录像
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(LibraryError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| is_valid_name(name))
            .collect();
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// 解析为库目录内的现有文件
    pub fn resolve(&self, name: &str) -> Result<PathBuf, LibraryError> {
        if !is_valid_name(name) {
            return Err(LibraryError::InvalidName(name.to_string()));
        }
        let path = self.dir.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(LibraryError::NotFound(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        assert!(is_valid_name("cam1_incident_20240101120000000.mjpeg"));
        assert!(is_valid_name("clip-2.mp4"));
        assert!(is_valid_name("a.avi"));
        assert!(!is_valid_name("../secret.mp4"));
        assert!(!is_valid_name("..mp4"));
        assert!(!is_valid_name("dir/clip.mp4"));
        assert!(!is_valid_name("dir\\clip.mp4"));
        assert!(!is_valid_name("clip.txt"));
        assert!(!is_valid_name("clip mp4.mp4"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn test_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "cam1_incident_20240101120000000.mjpeg",
            "cam1_incident_20240301120000000.mjpeg",
            "cam2_incident_20240201120000000.mjpeg",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.mp4")).unwrap();

        let lib = RecordingLibrary::new(dir.path());
        assert_eq!(
            lib.list().unwrap(),
            vec![
                "cam2_incident_20240201120000000.mjpeg",
                "cam1_incident_20240301120000000.mjpeg",
                "cam1_incident_20240101120000000.mjpeg",
            ]
        );
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let lib = RecordingLibrary::new(dir.path().join("absent"));
        assert!(lib.list().unwrap().is_empty());
    }

    #[test]
    fn test_resolve() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mjpeg"), b"x").unwrap();
        let lib = RecordingLibrary::new(dir.path());

        assert_eq!(lib.resolve("a.mjpeg").unwrap(), dir.path().join("a.mjpeg"));
        assert!(matches!(lib.resolve("b.mjpeg"), Err(LibraryError::NotFound(_))));
        assert!(matches!(
            lib.resolve("../a.mjpeg"),
            Err(LibraryError::InvalidName(_))
        ));
    }
}
