use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Pluggable file-system collaborator. Implementations must tolerate calls
/// from arbitrary threads; the engine reads the installed pointer under a
/// short-lived lock and invokes it unlocked.
pub trait FileSystem: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove(&self, path: &Path) -> io::Result<()>;
    fn stat(&self, path: &Path) -> io::Result<FileStat>;
    /// Resolve a script-supplied relative path to the location the host
    /// wants it to land in.
    fn resolve(&self, path: &Path) -> PathBuf;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStat {
    pub exists: bool,
    pub is_directory: bool,
    pub last_modified_ms: u64,
}

/// std::fs-backed file system rooted at an optional base directory.
pub struct DefaultFileSystem {
    base_path: Option<PathBuf>,
}

impl DefaultFileSystem {
    pub fn new() -> Self {
        DefaultFileSystem { base_path: None }
    }

    pub fn with_base_path(base: impl Into<PathBuf>) -> Self {
        DefaultFileSystem { base_path: Some(base.into()) }
    }
}

impl Default for DefaultFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for DefaultFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(path))
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        fs::write(self.resolve(path), data)
    }

    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(self.resolve(from), self.resolve(to))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(self.resolve(path))
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let resolved = self.resolve(path);
        let metadata = match fs::metadata(&resolved) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(FileStat::default());
            }
            Err(err) => return Err(err),
        };
        let last_modified_ms = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        Ok(FileStat { exists: true, is_directory: metadata.is_dir(), last_modified_ms })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match (&self.base_path, path.is_relative()) {
            (Some(base), true) => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// Status of a completed web request, mirrored into script-visible codes by
/// the host's global surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Ok,
    Failure,
}

#[derive(Debug, Clone)]
pub struct ServerResponse {
    pub status: RequestStatus,
    pub response_status: u16,
    pub response_headers: Vec<(String, String)>,
    pub response_text: String,
}

impl ServerResponse {
    pub fn failure() -> Self {
        ServerResponse {
            status: RequestStatus::Failure,
            response_status: 0,
            response_headers: Vec::new(),
            response_text: String::new(),
        }
    }
}

/// Pluggable blocking HTTP GET collaborator.
pub trait WebRequest: Send + Sync {
    fn get(&self, url: &str, headers: &[(String, String)]) -> ServerResponse;
}

/// Placeholder transport installed until the host wires a real one in; every
/// request reports failure.
pub struct DefaultWebRequest;

impl WebRequest for DefaultWebRequest {
    fn get(&self, _url: &str, _headers: &[(String, String)]) -> ServerResponse {
        ServerResponse::failure()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Log,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Log => "log",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Pluggable log sink for both host-side diagnostics and script `console`
/// output routed through the global surface.
pub trait LogSystem: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, source: &str);
}

/// Writes tagged lines to stdout, warnings and errors to stderr.
pub struct DefaultLogSystem;

impl LogSystem for DefaultLogSystem {
    fn log(&self, level: LogLevel, message: &str, source: &str) {
        let tag = level.label();
        if source.is_empty() {
            match level {
                LogLevel::Warn | LogLevel::Error => eprintln!("[{tag}] {message}"),
                _ => println!("[{tag}] {message}"),
            }
        } else {
            match level {
                LogLevel::Warn | LogLevel::Error => eprintln!("[{tag}] {source}: {message}"),
                _ => println!("[{tag}] {source}: {message}"),
            }
        }
    }
}

/// Optional permission predicate consulted before network connections.
/// Absence means "allowed".
pub type ConnectionAllowedCallback = Arc<dyn Fn() -> bool + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn stat_reports_missing_files_without_error() {
        let fs = DefaultFileSystem::new();
        let stat = fs.stat(Path::new("/definitely/not/here.txt")).expect("stat should not fail");
        assert!(!stat.exists);
        assert!(!stat.is_directory);
    }

    #[test]
    fn stat_sees_real_files() {
        let mut temp = NamedTempFile::new().expect("temp file");
        write!(temp, "payload").expect("write temp");
        let fs = DefaultFileSystem::new();
        let stat = fs.stat(temp.path()).expect("stat temp file");
        assert!(stat.exists);
        assert!(!stat.is_directory);
        assert!(stat.last_modified_ms > 0);
    }

    #[test]
    fn relative_paths_resolve_under_base() {
        let fs = DefaultFileSystem::with_base_path("/data/scripts");
        assert_eq!(fs.resolve(Path::new("rules.txt")), PathBuf::from("/data/scripts/rules.txt"));
        assert_eq!(fs.resolve(Path::new("/abs/rules.txt")), PathBuf::from("/abs/rules.txt"));
    }

    #[test]
    fn default_web_request_reports_failure() {
        let response = DefaultWebRequest.get("https://example.com/list.txt", &[]);
        assert_eq!(response.status, RequestStatus::Failure);
        assert_eq!(response.response_status, 0);
    }
}
