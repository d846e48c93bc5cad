use std::io;
use std::path::{Path, PathBuf};

/// Where generated directories and playlist files go.
///
/// `FilesystemSink` writes to disk; `DryRunSink` only records what would
/// have been written.
#[cfg_attr(test, mockall::automock)]
pub trait OutputSink {
    fn create_dir(&mut self, path: &Path) -> io::Result<()>;

    fn write_file(&mut self, path: &Path, contents: &str) -> io::Result<()>;
}

#[derive(Debug, Default)]
pub struct FilesystemSink;

impl OutputSink for FilesystemSink {
    fn create_dir(&mut self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> io::Result<()> {
        std::fs::write(path, contents)
    }
}

#[derive(Debug, Default)]
pub struct DryRunSink {
    pub directories: Vec<PathBuf>,
    pub files: Vec<(PathBuf, String)>,
}

impl OutputSink for DryRunSink {
    fn create_dir(&mut self, path: &Path) -> io::Result<()> {
        log::debug!("[dry run] would create directory {}", path.display());
        self.directories.push(path.to_path_buf());
        Ok(())
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> io::Result<()> {
        log::debug!("[dry run] would write {}", path.display());
        self.files.push((path.to_path_buf(), contents.to_string()));
        Ok(())
    }
}
