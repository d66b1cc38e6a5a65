//! Background agents: detached invocations tracked through metadata files.
//!
//! Each agent has `<id>.json` (its [`AgentRecord`]) plus `<id>.stdout.log`
//! and `<id>.stderr.log` under the agent root. No handle survives the
//! invocation that spawned it, so liveness is answered from the recorded
//! pid. A running record whose process is gone is reclassified the next
//! time it is read: failed if it wrote to stderr, complete otherwise.
//! A running record that never got a pid (the spawner died between writing
//! it and starting the process) is failed once it is older than a minute.

use crate::error::{Result, ScopeError};
use crate::fsutil::write_json_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessStatus, System};
use tracing::{debug, info, warn};

/// Lines of stderr kept in a failed record.
const ERROR_TAIL_LINES: usize = 20;

/// A running record still without a pid after this long lost its spawner.
const SPAWN_GRACE_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    Complete,
    Failed,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Complete => write!(f, "complete"),
            AgentStatus::Failed => write!(f, "failed"),
        }
    }
}

impl AgentStatus {
    pub fn emoji(&self) -> &'static str {
        match self {
            AgentStatus::Running => "⏳",
            AgentStatus::Complete => "✅",
            AgentStatus::Failed => "❌",
        }
    }
}

/// Persisted state of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub resource_path: Option<String>,
    pub status: AgentStatus,
    pub started: DateTime<Utc>,
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl AgentRecord {
    pub fn is_running(&self) -> bool {
        self.status == AgentStatus::Running
    }

    /// When the agent reached its terminal state.
    pub fn finished(&self) -> Option<DateTime<Utc>> {
        self.completed.or(self.failed)
    }

    fn mark_complete(&mut self) {
        self.status = AgentStatus::Complete;
        self.completed = Some(Utc::now());
    }

    fn mark_failed(&mut self, error: String, traceback: Option<String>) {
        self.status = AgentStatus::Failed;
        self.failed = Some(Utc::now());
        self.error = Some(error);
        self.traceback = traceback;
    }
}

/// Whether `pid` names a live, non-zombie process.
pub fn is_process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    if !system.refresh_process(pid) {
        return false;
    }
    system
        .process(pid)
        .map(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .unwrap_or(false)
}

/// Spawns and tracks agents under one root directory.
pub struct AgentManager {
    root: PathBuf,
    program: PathBuf,
}

impl AgentManager {
    /// Agents run `<program> <command> <args...>`.
    pub fn new(root: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            program: program.into(),
        }
    }

    /// Agents re-invoke the running executable.
    pub fn for_current_exe(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(root, std::env::current_exe()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    pub fn log_path(&self, id: &str, stderr: bool) -> PathBuf {
        let stream = if stderr { "stderr" } else { "stdout" };
        self.root.join(format!("{}.{}.log", id, stream))
    }

    fn allocate_id(&self, command: &str) -> String {
        let mut slug: String = command
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect::<String>()
            .trim_matches('-')
            .chars()
            .take(32)
            .collect();
        if slug.is_empty() {
            slug = "agent".to_string();
        }

        let base = format!("{}-{}", slug, Utc::now().format("%Y%m%d-%H%M%S%9f"));
        let mut id = base.clone();
        let mut n = 2;
        while self.record_path(&id).exists() {
            id = format!("{}-{}", base, n);
            n += 1;
        }
        id
    }

    fn save(&self, record: &AgentRecord) -> Result<()> {
        write_json_atomic(&self.record_path(&record.id), record)?;
        Ok(())
    }

    fn load(&self, id: &str) -> Result<AgentRecord> {
        let path = self.record_path(id);
        if !path.is_file() {
            return Err(ScopeError::AgentNotFound(id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Starts a detached agent and returns its initial record.
    pub fn spawn(
        &self,
        command: &str,
        args: &[String],
        resource_path: Option<&Path>,
    ) -> Result<AgentRecord> {
        fs::create_dir_all(&self.root)?;

        let id = self.allocate_id(command);
        let mut record = AgentRecord {
            id: id.clone(),
            command: command.to_string(),
            args: args.to_vec(),
            resource_path: resource_path.map(|p| p.display().to_string()),
            status: AgentStatus::Running,
            started: Utc::now(),
            pid: None,
            completed: None,
            failed: None,
            error: None,
            traceback: None,
        };
        self.save(&record)?;

        let stdout = File::create(self.log_path(&id, false))?;
        let stderr = File::create(self.log_path(&id, true))?;

        let mut cmd = Command::new(&self.program);
        cmd.arg(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        if let Some(dir) = resource_path.filter(|p| p.is_dir()) {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so the caller's terminal signals don't reach it
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("{}: {}", self.program.display(), e);
                record.mark_failed(message.clone(), None);
                self.save(&record)?;
                return Err(ScopeError::AgentSpawn(message));
            }
        };

        record.pid = Some(child.id());
        self.save(&record)?;
        info!("Spawned agent {} (pid {})", id, child.id());

        // Reap the child if this process outlives it
        std::thread::spawn(move || {
            let _ = child.wait();
        });

        Ok(record)
    }

    /// Reclassifies a running record whose process has exited, or that never
    /// got a pid within [`SPAWN_GRACE_SECS`]. Persisting the new state is
    /// best effort; the caller still sees it.
    fn refresh(&self, mut record: AgentRecord) -> AgentRecord {
        if !record.is_running() {
            return record;
        }
        match record.pid {
            Some(pid) if is_process_alive(pid) => return record,
            Some(_) => self.classify_exit(&mut record),
            None => {
                if Utc::now() - record.started < chrono::Duration::seconds(SPAWN_GRACE_SECS) {
                    return record;
                }
                record.mark_failed("agent process never started".to_string(), None);
            }
        }

        debug!("Agent {} is now {}", record.id, record.status);
        if let Err(e) = self.save(&record) {
            warn!("Could not persist agent {} as {}: {}", record.id, record.status, e);
        }
        record
    }

    /// Complete when the stderr log is empty, failed with its tail otherwise.
    fn classify_exit(&self, record: &mut AgentRecord) {
        let stderr = fs::read_to_string(self.log_path(&record.id, true)).unwrap_or_default();
        if stderr.trim().is_empty() {
            record.mark_complete();
            return;
        }
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(ERROR_TAIL_LINES)..].join("\n");
        let summary = lines
            .iter()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .unwrap_or_default();
        record.mark_failed(summary, Some(tail));
    }

    /// One agent, reclassified if needed.
    pub fn get(&self, id: &str) -> Result<AgentRecord> {
        let record = self.load(id)?;
        Ok(self.refresh(record))
    }

    /// Every agent, oldest first, reclassified if needed.
    pub fn list(&self) -> Result<Vec<AgentRecord>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_str::<AgentRecord>(&content) {
                Ok(record) => records.push(self.refresh(record)),
                Err(e) => warn!("Skipping malformed agent record {}: {}", path.display(), e),
            }
        }

        records.sort_by(|a, b| a.started.cmp(&b.started).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Contents of an agent's stdout or stderr log.
    pub fn read_log(&self, id: &str, stderr: bool) -> Result<String> {
        self.load(id)?;
        match fs::read_to_string(self.log_path(id, stderr)) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Waits until the given agents (all known agents when `ids` is `None`)
    /// have left the running state. Agents still running at the deadline are
    /// named in the error and left alone.
    pub async fn wait(
        &self,
        ids: Option<&[String]>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Vec<AgentRecord>> {
        let targets: Vec<String> = match ids {
            Some(ids) => {
                for id in ids {
                    self.load(id)?;
                }
                ids.to_vec()
            }
            None => self.list()?.into_iter().map(|r| r.id).collect(),
        };

        let start = Instant::now();
        loop {
            let records = targets
                .iter()
                .map(|id| self.get(id))
                .collect::<Result<Vec<_>>>()?;

            let running: Vec<String> = records
                .iter()
                .filter(|r| r.is_running())
                .map(|r| r.id.clone())
                .collect();
            if running.is_empty() {
                return Ok(records);
            }
            if start.elapsed() >= timeout {
                return Err(ScopeError::AgentWaitTimeout { running });
            }

            debug!("Waiting on {} agent(s)", running.len());
            tokio::time::sleep(poll_interval.min(timeout.saturating_sub(start.elapsed()))).await;
        }
    }
}
