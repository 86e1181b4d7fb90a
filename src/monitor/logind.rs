// Logind Watcher Thread
//
// Linux adapter. systemd-logind keeps one KEY=VALUE file per session under
// /run/systemd/sessions; sd_login_monitor is an inotify watch on that
// directory. We watch it with notify and send a debounced snapshot of the
// live ids whenever something changes, the registry reconciles the rest.

use super::{EventSink, NotificationChannel, PlatformEvent};
use crate::config::DEFAULT_SESSIONS_DIR;
use crate::error::{QueryError, Result};
use crate::event::State;
use crate::session::finder::{find_session_variable, scope_name};
use crate::session::{AttributeSource, SessionRecord};
use crate::types::SessionId;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Bounded wait so stop requests are seen promptly
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Quiet period before a burst of file changes becomes one snapshot
const DEBOUNCE: Duration = Duration::from_millis(200);

fn parse_flag(key: &str, value: &str) -> std::result::Result<bool, QueryError> {
    match value {
        "1" | "yes" | "true" => Ok(true),
        "0" | "no" | "false" => Ok(false),
        _ => Err(QueryError::Malformed(format!("{}={}", key, value))),
    }
}

fn parse_number(key: &str, value: &str) -> std::result::Result<u32, QueryError> {
    value
        .parse()
        .map_err(|_| QueryError::Malformed(format!("{}={}", key, value)))
}

/// Parse a logind session file
pub fn parse_session_file(content: &str) -> std::result::Result<SessionRecord, QueryError> {
    let mut record = SessionRecord::default();

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            trace!(line, "Ignoring session file line");
            continue;
        };

        let text = || Some(value.to_string()).filter(|v| !v.is_empty());

        match key {
            "UID" => record.uid = Some(parse_number(key, value)?),
            "USER" => record.user = text(),
            "ACTIVE" => record.active = Some(parse_flag(key, value)?),
            "STATE" => record.state = Some(State::parse(value)),
            "REMOTE" => record.remote = Some(parse_flag(key, value)?),
            "LOCKED_HINT" => record.locked = Some(parse_flag(key, value)?),
            "TYPE" => record.kind = text(),
            "CLASS" => record.class = text(),
            "SERVICE" => record.service = text(),
            "DISPLAY" => record.display = text(),
            "SCOPE" => record.scope = text(),
            "LEADER" => record.leader = Some(parse_number(key, value)?),
            _ => {}
        }
    }

    Ok(record)
}

/// Attribute source reading the logind runtime directory
#[derive(Debug, Clone)]
pub struct LogindSource {
    dir: PathBuf,
    proc_root: PathBuf,
}

impl Default for LogindSource {
    fn default() -> Self {
        Self::new(DEFAULT_SESSIONS_DIR)
    }
}

impl LogindSource {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            proc_root: PathBuf::from("/proc"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl AttributeSource for LogindSource {
    fn query(&self, sid: &str) -> std::result::Result<SessionRecord, QueryError> {
        match fs::read_to_string(self.dir.join(sid)) {
            Ok(content) => parse_session_file(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(QueryError::NotFound(sid.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> std::result::Result<Vec<SessionId>, QueryError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            // <sid>.ref entries are fifos, skip anything with an extension
            if let Some(name) = entry.file_name().to_str().filter(|n| !n.contains('.')) {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn environment(&self, sid: &str, record: &SessionRecord, name: &str) -> Option<String> {
        let uid = record.uid?;
        let scope = record.scope.clone().unwrap_or_else(|| scope_name(sid));
        find_session_variable(&self.proc_root, uid, &scope, name)
    }
}

/// inotify channel over the logind runtime directory
pub struct LogindChannel {
    source: Arc<LogindSource>,
    stop: Option<Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl LogindChannel {
    pub fn new(source: LogindSource) -> Self {
        Self {
            source: Arc::new(source),
            stop: None,
            thread: None,
        }
    }
}

impl NotificationChannel for LogindChannel {
    fn name(&self) -> &str {
        "logind"
    }

    fn attributes(&self) -> Arc<dyn AttributeSource> {
        self.source.clone()
    }

    fn start(&mut self, sink: EventSink) -> Result<()> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let source = self.source.clone();

        let handle = thread::Builder::new()
            .name("logind".to_string())
            .spawn(move || {
                if let Err(e) = run_logind_watcher(&source, &sink, stop_rx) {
                    error!(dir = %source.dir().display(), error = %e, "Logind watcher failed");
                    sink.send(PlatformEvent::Failed(e.to_string()));
                }
            })?;

        self.stop = Some(stop_tx);
        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Logind watcher panicked");
            }
        }
    }
}

impl Drop for LogindChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_relevant(event: &Event) -> bool {
    !matches!(event.kind, EventKind::Access(_))
}

/// Returns false once the coordinator is gone
fn send_snapshot(source: &LogindSource, sink: &EventSink) -> bool {
    match source.list() {
        Ok(ids) => {
            debug!(sessions = ids.len(), "Sending session snapshot");
            sink.send(PlatformEvent::Snapshot(ids))
        }
        Err(e) => {
            warn!(error = %e, "Can't list sessions");
            true
        }
    }
}

fn run_logind_watcher(source: &LogindSource, sink: &EventSink, stop: Receiver<()>) -> notify::Result<()> {
    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx)?;
    watcher.watch(source.dir(), RecursiveMode::NonRecursive)?;

    info!(dir = %source.dir().display(), "Logind monitor is active");

    // Covers changes between the caller's enumeration and the watch
    if !send_snapshot(source, sink) {
        return Ok(());
    }

    let mut pending: Option<Instant> = None;

    loop {
        match stop.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(event)) if is_relevant(&event) => {
                trace!(kind = ?event.kind, paths = ?event.paths, "Session directory changed");
                pending = Some(Instant::now());
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Watch error on session directory");
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(notify::Error::generic("session directory watch disconnected"));
            }
        }

        if pending.is_some_and(|since| since.elapsed() >= DEBOUNCE) {
            pending = None;
            if !send_snapshot(source, sink) {
                debug!("Coordinator gone, stopping logind monitor");
                break;
            }
        }
    }

    info!("Logind monitor is deactivating");
    Ok(())
}
