use sieve_engine::{
    create_default_timer, runtime, AppInfo, EngineError, FileStat, FileSystem, LogLevel, LogSystem,
    RequestStatus, ScriptEngine, ServerResponse, WebRequest,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

fn new_engine() -> Arc<ScriptEngine> {
    ScriptEngine::create(AppInfo::default(), create_default_timer(), runtime::init(), |_, _, _| Ok(()))
        .expect("engine should build")
}

/// File system that answers every resolve with a marker path, so tests can
/// tell whether it is still the installed collaborator.
struct MarkerFileSystem;

impl FileSystem for MarkerFileSystem {
    fn read(&self, _path: &Path) -> io::Result<Vec<u8>> {
        Ok(b"marker".to_vec())
    }

    fn write(&self, _path: &Path, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn move_file(&self, _from: &Path, _to: &Path) -> io::Result<()> {
        Ok(())
    }

    fn remove(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn stat(&self, _path: &Path) -> io::Result<FileStat> {
        Ok(FileStat::default())
    }

    fn resolve(&self, _path: &Path) -> PathBuf {
        PathBuf::from("/marker")
    }
}

struct MarkerWebRequest;

impl WebRequest for MarkerWebRequest {
    fn get(&self, _url: &str, _headers: &[(String, String)]) -> ServerResponse {
        ServerResponse {
            status: RequestStatus::Ok,
            response_status: 204,
            response_headers: Vec::new(),
            response_text: String::new(),
        }
    }
}

#[derive(Default)]
struct MarkerLog {
    lines: Mutex<Vec<String>>,
}

impl LogSystem for MarkerLog {
    fn log(&self, _level: LogLevel, message: &str, _source: &str) {
        self.lines.lock().expect("log lines").push(message.to_string());
    }
}

#[test]
fn null_file_system_is_rejected_and_previous_stays_installed() {
    let engine = new_engine();
    engine.set_file_system(Some(Arc::new(MarkerFileSystem))).expect("install marker fs");

    let err = engine.set_file_system(None).expect_err("null collaborator must be rejected");
    assert!(matches!(err, EngineError::InvalidArgument(_)), "expected InvalidArgument, got {err:?}");

    let installed = engine.file_system();
    assert_eq!(installed.resolve(Path::new("anything")), PathBuf::from("/marker"));
    assert_eq!(installed.read(Path::new("anything")).expect("marker read"), b"marker".to_vec());
}

#[test]
fn null_web_request_is_rejected_and_previous_stays_installed() {
    let engine = new_engine();
    engine.set_web_request(Some(Arc::new(MarkerWebRequest))).expect("install marker transport");

    let err = engine.set_web_request(None).expect_err("null collaborator must be rejected");
    assert!(matches!(err, EngineError::InvalidArgument(_)), "expected InvalidArgument, got {err:?}");

    let response = engine.web_request().get("https://example.com", &[]);
    assert_eq!(response.status, RequestStatus::Ok);
    assert_eq!(response.response_status, 204);
}

#[test]
fn null_log_system_is_rejected_and_previous_stays_installed() {
    let engine = new_engine();
    let log = Arc::new(MarkerLog::default());
    engine.set_log_system(Some(log.clone())).expect("install marker log");

    let err = engine.set_log_system(None).expect_err("null collaborator must be rejected");
    assert!(matches!(err, EngineError::InvalidArgument(_)), "expected InvalidArgument, got {err:?}");

    engine.log_system().log(LogLevel::Info, "still here", "");
    assert_eq!(*log.lines.lock().expect("log lines"), vec!["still here".to_string()]);
}

#[test]
fn default_collaborators_are_installed_at_construction() {
    let engine = new_engine();
    // Default transport is the failure stub; a real one is the host's job.
    let response = engine.web_request().get("https://example.com", &[]);
    assert_eq!(response.status, RequestStatus::Failure);

    let stat = engine.file_system().stat(Path::new("/nonexistent-sieve-path")).expect("stat");
    assert!(!stat.exists);
}

#[test]
fn connection_permission_defaults_to_allowed() {
    let engine = new_engine();
    assert!(engine.is_connection_allowed(), "no predicate means allowed");
}

#[test]
fn connection_permission_callback_is_consulted() {
    let engine = new_engine();
    engine.set_is_connection_allowed_callback(Some(Arc::new(|| false)));
    assert!(!engine.is_connection_allowed());

    engine.set_is_connection_allowed_callback(Some(Arc::new(|| true)));
    assert!(engine.is_connection_allowed());

    engine.set_is_connection_allowed_callback(None);
    assert!(engine.is_connection_allowed(), "clearing the predicate restores the default");
}

#[test]
fn engine_weak_reference_fails_after_teardown() {
    let engine = new_engine();
    let weak = ScriptEngine::downgrade(&engine);
    assert!(weak.upgrade().is_ok(), "live engine must upgrade");

    drop(engine);
    let err = weak.upgrade().expect_err("upgrade after teardown must fail");
    assert!(matches!(err, EngineError::EngineGone), "expected EngineGone, got {err:?}");
}
