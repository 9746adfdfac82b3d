//! In-memory doubles for the remote store and the notifier.

use async_trait::async_trait;
use axum::body::Bytes;
use lettre::Address;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::notify::Notifier;
use crate::remote::{ProbeReport, RemoteError, RemoteStore};

#[derive(Default)]
struct StoreState {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Bytes>,
    writes: Vec<String>,
}

/// Behaves like a WebDAV collection tree: a directory or file can only be
/// created when its parent directory exists.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    unreachable: AtomicBool,
    fail_writes_containing: Mutex<Option<String>>,
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Makes every write or mkcol whose path contains `needle` fail.
    pub fn fail_writes_containing(&self, needle: &str) {
        *self.fail_writes_containing.lock().expect("lock") = Some(needle.to_string());
    }

    pub fn file(&self, path: &str) -> Option<Bytes> {
        self.state.lock().expect("lock").files.get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.state.lock().expect("lock").dirs.contains(path)
    }

    /// Paths written so far, in order.
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().expect("lock").writes.clone()
    }

    pub fn put_json(&self, path: &str, value: &serde_json::Value) {
        let mut state = self.state.lock().expect("lock");
        state
            .files
            .insert(path.to_string(), Bytes::from(value.to_string()));
    }

    fn check_failure(&self, method: &'static str, path: &str) -> Result<(), RemoteError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("connection refused".into()));
        }
        if let Some(needle) = self.fail_writes_containing.lock().expect("lock").as_deref()
            && path.contains(needle)
        {
            return Err(RemoteError::Status {
                method,
                path: path.to_string(),
                status: 507,
            });
        }
        Ok(())
    }

    fn parent_exists(state: &StoreState, path: &str) -> bool {
        let parent = parent_of(path);
        parent.is_empty() || state.dirs.contains(parent)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn probe(&self) -> ProbeReport {
        if self.unreachable.load(Ordering::SeqCst) {
            ProbeReport {
                ok: false,
                diagnostic: "connection refused".into(),
            }
        } else {
            ProbeReport {
                ok: true,
                diagnostic: "connection successful".into(),
            }
        }
    }

    async fn path_exists(&self, path: &str) -> Result<bool, RemoteError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("connection refused".into()));
        }
        let state = self.state.lock().expect("lock");
        Ok(state.dirs.contains(path) || state.files.contains_key(path))
    }

    async fn make_directory(&self, path: &str) -> Result<(), RemoteError> {
        self.check_failure("MKCOL", path)?;
        let mut state = self.state.lock().expect("lock");
        if !Self::parent_exists(&state, path) {
            return Err(RemoteError::Status {
                method: "MKCOL",
                path: path.to_string(),
                status: 409,
            });
        }
        state.dirs.insert(path.to_string());
        Ok(())
    }

    async fn write_file(
        &self,
        path: &str,
        content: Bytes,
        _content_type: &str,
    ) -> Result<(), RemoteError> {
        self.check_failure("PUT", path)?;
        let mut state = self.state.lock().expect("lock");
        if !Self::parent_exists(&state, path) {
            return Err(RemoteError::Status {
                method: "PUT",
                path: path.to_string(),
                status: 409,
            });
        }
        state.files.insert(path.to_string(), content);
        state.writes.push(path.to_string());
        Ok(())
    }

    async fn read_json(&self, path: &str) -> Result<serde_json::Value, RemoteError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("connection refused".into()));
        }
        let state = self.state.lock().expect("lock");
        let bytes = state
            .files
            .get(path)
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))?;
        serde_json::from_slice(bytes).map_err(|err| RemoteError::Decode(err.to_string()))
    }
}

#[derive(Clone, Debug)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Records every mail; fails for recipients listed in `failing`.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<SentMail>>,
    pub failing: Mutex<BTreeSet<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, address: &str) {
        self.failing.lock().expect("lock").insert(address.to_string());
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, to: &Address, subject: &str, html_body: &str) -> bool {
        if self.failing.lock().expect("lock").contains(&to.to_string()) {
            return false;
        }
        self.sent.lock().expect("lock").push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: html_body.to_string(),
        });
        true
    }
}
