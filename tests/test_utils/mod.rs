//! Test utilities and fixtures for clux tests
#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use clux::config::{Config, Paths};
use clux::data::TmuxSession;
use clux::error::{CluxError, Result};
use clux::integrations::claude::ClaudeProjects;
use clux::integrations::tmux::{tail_lines, Multiplexer, Snapshot};
use clux::manager::SessionManager;
use clux::store::SessionStore;
use clux::util::Clock;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tempfile::TempDir;

/// Fixed starting point for every test clock
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

// ============================================================================
// Clock
// ============================================================================

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ============================================================================
// Fake tmux
// ============================================================================

/// In-memory stand-in for the tmux server
#[derive(Default)]
pub struct FakeTmux {
    sessions: RefCell<BTreeMap<String, TmuxSession>>,
    panes: RefCell<BTreeMap<String, String>>,
    fail_create: Cell<bool>,
    fail_send_keys: Cell<bool>,
    pub created: RefCell<Vec<String>>,
    pub killed: RefCell<Vec<String>>,
    pub sent: RefCell<Vec<(String, String)>>,
    pub attached: RefCell<Vec<String>>,
    pub switched: RefCell<Vec<String>>,
    pub messages: RefCell<Vec<String>>,
}

impl FakeTmux {
    /// Pretend a session is already running
    pub fn add(&self, name: &str, attached: bool) {
        self.sessions.borrow_mut().insert(
            name.to_string(),
            TmuxSession {
                name: name.to_string(),
                attached,
                windows: 1,
            },
        );
    }

    pub fn set_attached(&self, name: &str, attached: bool) {
        if let Some(session) = self.sessions.borrow_mut().get_mut(name) {
            session.attached = attached;
        }
    }

    pub fn set_pane(&self, name: &str, content: &str) {
        self.panes
            .borrow_mut()
            .insert(name.to_string(), content.to_string());
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.set(fail);
    }

    pub fn fail_send_keys(&self, fail: bool) {
        self.fail_send_keys.set(fail);
    }

    pub fn is_live(&self, name: &str) -> bool {
        self.sessions.borrow().contains_key(name)
    }

    pub fn live_names(&self) -> Vec<String> {
        self.sessions.borrow().keys().cloned().collect()
    }

    /// Number of calls that changed anything
    pub fn mutation_count(&self) -> usize {
        self.created.borrow().len()
            + self.killed.borrow().len()
            + self.sent.borrow().len()
            + self.switched.borrow().len()
    }

    fn require_live(&self, name: &str) -> Result<()> {
        if self.is_live(name) {
            Ok(())
        } else {
            Err(CluxError::Tmux(format!("can't find session: {}", name)))
        }
    }
}

impl Multiplexer for FakeTmux {
    fn snapshot(&self) -> Snapshot {
        Snapshot::from_sessions(self.sessions.borrow().values().cloned())
    }

    fn create(&self, name: &str, _working_directory: &str) -> Result<()> {
        if self.fail_create.get() {
            return Err(CluxError::Tmux("new-session: server exited".to_string()));
        }
        if self.is_live(name) {
            return Err(CluxError::Tmux(format!("duplicate session: {}", name)));
        }
        self.add(name, false);
        self.created.borrow_mut().push(name.to_string());
        Ok(())
    }

    fn send_keys(&self, name: &str, keys: &str) -> Result<()> {
        self.require_live(name)?;
        if self.fail_send_keys.get() {
            return Err(CluxError::Tmux("send-keys: no current client".to_string()));
        }
        self.sent
            .borrow_mut()
            .push((name.to_string(), keys.to_string()));
        Ok(())
    }

    fn attach(&self, name: &str) -> Result<i32> {
        self.require_live(name)?;
        self.attached.borrow_mut().push(name.to_string());
        Ok(0)
    }

    fn switch_client(&self, name: &str) -> Result<()> {
        self.require_live(name)?;
        self.switched.borrow_mut().push(name.to_string());
        Ok(())
    }

    fn kill(&self, name: &str) -> Result<()> {
        self.require_live(name)?;
        self.sessions.borrow_mut().remove(name);
        self.killed.borrow_mut().push(name.to_string());
        Ok(())
    }

    fn capture_pane(&self, name: &str, max_lines: usize) -> String {
        self.panes
            .borrow()
            .get(name)
            .map(|text| tail_lines(text, max_lines))
            .unwrap_or_default()
    }

    fn display_message(&self, message: &str) {
        self.messages.borrow_mut().push(message.to_string());
    }
}

// ============================================================================
// Claude project logs
// ============================================================================

/// Write `<uuid>.jsonl` for `working_directory` with the given mtime
pub fn write_claude_session(
    projects: &ClaudeProjects,
    working_directory: &str,
    id: &str,
    modified: DateTime<Utc>,
) -> PathBuf {
    let dir = projects.project_log_dir(Path::new(working_directory));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{}.jsonl", id));
    fs::write(&path, "{}\n").unwrap();
    set_mtime(&path, modified);
    path
}

/// Create the `<uuid>/` directory form of a session with the given mtime
pub fn write_claude_session_dir(
    projects: &ClaudeProjects,
    working_directory: &str,
    id: &str,
    modified: DateTime<Utc>,
) -> PathBuf {
    let path = projects
        .project_log_dir(Path::new(working_directory))
        .join(id);
    fs::create_dir_all(&path).unwrap();
    set_mtime(&path, modified);
    path
}

pub fn set_mtime(path: &Path, modified: DateTime<Utc>) {
    let file = File::open(path).unwrap();
    file.set_modified(SystemTime::from(modified)).unwrap();
}

// ============================================================================
// Harness
// ============================================================================

/// A manager wired to a fake tmux, an in-memory registry, a manual clock
/// and a scratch Claude projects root.
pub struct Harness {
    pub root: TempDir,
    pub paths: Paths,
    pub clock: Arc<ManualClock>,
    pub claude: ClaudeProjects,
    pub manager: SessionManager<FakeTmux>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let root = TempDir::new().unwrap();
        let paths = Paths::under(root.path());
        let clock = ManualClock::new(base_time());
        let store = SessionStore::open_in_memory()
            .unwrap()
            .with_clock(clock.clone());
        let claude = ClaudeProjects::from_paths(&paths);
        let manager = SessionManager::new(store, FakeTmux::default(), claude.clone(), config);
        Self {
            root,
            paths,
            clock,
            claude,
            manager,
        }
    }

    /// An existing, canonical working directory under the scratch root
    pub fn workdir(&self, name: &str) -> String {
        let dir = self.root.path().join("work").join(name);
        fs::create_dir_all(&dir).unwrap();
        dir.canonicalize().unwrap().to_string_lossy().into_owned()
    }

    pub fn tmux(&self) -> &FakeTmux {
        self.manager.tmux()
    }

    pub fn store(&self) -> &SessionStore {
        self.manager.store()
    }
}
