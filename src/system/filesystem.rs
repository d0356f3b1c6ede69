use crate::error::{HarnessError, HarnessResult};
#[cfg(test)]
use std::collections::HashMap;

/// Abstraction for reading harness inputs (config and scenario files)
pub trait FilesystemReader {
    fn read_to_string(&self, path: &str) -> HarnessResult<String>;
    fn exists(&self, path: &str) -> bool;
}

/// Real filesystem reader using std::fs
pub struct RealFilesystemReader;

impl FilesystemReader for RealFilesystemReader {
    fn read_to_string(&self, path: &str) -> HarnessResult<String> {
        std::fs::read_to_string(path).map_err(|e| HarnessError::config_error(path, &e.to_string()))
    }

    fn exists(&self, path: &str) -> bool {
        std::path::Path::new(path).exists()
    }
}

/// Filesystem reader serving files from memory
#[cfg(test)]
#[derive(Debug, Default)]
pub struct InMemoryFilesystemReader {
    files: HashMap<String, String>,
}

#[cfg(test)]
impl InMemoryFilesystemReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }
}

#[cfg(test)]
impl FilesystemReader for InMemoryFilesystemReader {
    fn read_to_string(&self, path: &str) -> HarnessResult<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| HarnessError::config_error(path, "no such file"))
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_real_reader_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[target]\nkind = \"local\"\n").unwrap();
        let path = file.path().to_str().unwrap();

        let reader = RealFilesystemReader;
        assert!(reader.exists(path));
        assert!(reader.read_to_string(path).unwrap().contains("kind"));
    }

    #[test]
    fn test_real_reader_missing_file() {
        let reader = RealFilesystemReader;
        let result = reader.read_to_string("/nonexistent/harness.toml");
        assert!(matches!(result, Err(HarnessError::ConfigError { .. })));
        assert!(!reader.exists("/nonexistent/harness.toml"));
    }

    #[test]
    fn test_in_memory_reader() {
        let reader = InMemoryFilesystemReader::new().with_file("a.toml", "x = 1");
        assert_eq!(reader.read_to_string("a.toml").unwrap(), "x = 1");
        assert!(reader.read_to_string("b.toml").is_err());
    }
}
