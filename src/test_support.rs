//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::backend::{
    BackendFuture, ContentBackend, Environment, EnvironmentStatus, RemoteFailure, Space,
};
use crate::executor::{CommandOutput, OutputLine, OutputStream, TransferError, TransferRunner};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Errors produced by [`MemoryBackend`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MemoryBackendError {
    /// The requested resource does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Resource description.
        resource: String,
    },
    /// The request was refused and had no effect.
    #[error("request rejected: {message}")]
    Rejected {
        /// Rejection message.
        message: String,
    },
    /// The request outcome is unknown.
    #[error("backend unavailable: {message}")]
    Unavailable {
        /// Failure message.
        message: String,
    },
}

impl RemoteFailure for MemoryBackendError {
    fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Scripted failure for the next environment creation.
#[derive(Clone, Debug)]
pub struct CreateFailure {
    /// Error returned to the caller.
    pub error: MemoryBackendError,
    /// Whether the environment is created despite the error.
    pub applied: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    spaces: Vec<Space>,
    environments: HashMap<String, Vec<Environment>>,
    entries: HashMap<(String, String, String), Value>,
    pending_statuses: HashMap<(String, String), VecDeque<EnvironmentStatus>>,
    creation_statuses: VecDeque<EnvironmentStatus>,
    create_failure: Option<CreateFailure>,
    lookup_failure: Option<MemoryBackendError>,
    create_calls: usize,
    status_polls: usize,
}

/// In-memory [`ContentBackend`] with scripted readiness and failures.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a space.
    pub fn add_space(&self, id: &str, name: &str) {
        lock(&self.state).spaces.push(Space {
            id: id.to_owned(),
            name: name.to_owned(),
        });
    }

    /// Adds a ready environment to `space_id`.
    pub fn add_environment(&self, space_id: &str, environment_id: &str) {
        lock(&self.state)
            .environments
            .entry(space_id.to_owned())
            .or_default()
            .push(Environment {
                id: environment_id.to_owned(),
                name: environment_id.to_owned(),
                created_at: Some(Utc::now()),
                status: EnvironmentStatus::Ready,
            });
    }

    /// Stores a raw entry document.
    pub fn add_entry(&self, space_id: &str, environment_id: &str, entry_id: &str, entry: Value) {
        lock(&self.state).entries.insert(
            (
                space_id.to_owned(),
                environment_id.to_owned(),
                entry_id.to_owned(),
            ),
            entry,
        );
    }

    /// Statuses reported by successive lookups of newly created
    /// environments. The last status sticks once the queue drains; an empty
    /// script reports ready immediately.
    pub fn script_creation_statuses(&self, statuses: impl IntoIterator<Item = EnvironmentStatus>) {
        lock(&self.state).creation_statuses = statuses.into_iter().collect();
    }

    /// Fails the next creation request.
    pub fn fail_next_create(&self, failure: CreateFailure) {
        lock(&self.state).create_failure = Some(failure);
    }

    /// Fails the next environment lookup.
    pub fn fail_next_lookup(&self, error: MemoryBackendError) {
        lock(&self.state).lookup_failure = Some(error);
    }

    /// Number of creation requests received.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        lock(&self.state).create_calls
    }

    /// Number of lookups that returned a scripted readiness status.
    #[must_use]
    pub fn status_polls(&self) -> usize {
        lock(&self.state).status_polls
    }

    /// Returns `true` when the environment exists.
    #[must_use]
    pub fn has_environment(&self, space_id: &str, environment_id: &str) -> bool {
        lock(&self.state)
            .environments
            .get(space_id)
            .is_some_and(|list| list.iter().any(|env| env.id == environment_id))
    }

    fn insert_created(state: &mut MemoryState, space_id: &str, environment_id: &str, name: &str) {
        let status = state
            .creation_statuses
            .front()
            .copied()
            .unwrap_or(EnvironmentStatus::Ready);
        state
            .environments
            .entry(space_id.to_owned())
            .or_default()
            .push(Environment {
                id: environment_id.to_owned(),
                name: name.to_owned(),
                created_at: Some(Utc::now()),
                status,
            });
        state.pending_statuses.insert(
            (space_id.to_owned(), environment_id.to_owned()),
            state.creation_statuses.clone(),
        );
    }

    fn lookup(&self, space_id: &str, environment_id: &str) -> Result<Environment, MemoryBackendError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        if let Some(error) = state.lookup_failure.take() {
            return Err(error);
        }
        let key = (space_id.to_owned(), environment_id.to_owned());
        let scripted = state.pending_statuses.get_mut(&key).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().copied()
            }
        });
        if scripted.is_some() {
            state.status_polls = state.status_polls.saturating_add(1);
        }
        let environment = state
            .environments
            .get_mut(space_id)
            .and_then(|list| list.iter_mut().find(|env| env.id == environment_id))
            .ok_or_else(|| MemoryBackendError::NotFound {
                resource: format!("environment {space_id}/{environment_id}"),
            })?;
        if let Some(status) = scripted {
            environment.status = status;
        }
        Ok(environment.clone())
    }
}

impl ContentBackend for MemoryBackend {
    type Error = MemoryBackendError;

    fn get_space<'a>(&'a self, space_id: &'a str) -> BackendFuture<'a, Space, Self::Error> {
        Box::pin(async move {
            lock(&self.state)
                .spaces
                .iter()
                .find(|space| space.id == space_id)
                .cloned()
                .ok_or_else(|| MemoryBackendError::NotFound {
                    resource: format!("space {space_id}"),
                })
        })
    }

    fn list_spaces(&self) -> BackendFuture<'_, Vec<Space>, Self::Error> {
        Box::pin(async move { Ok(lock(&self.state).spaces.clone()) })
    }

    fn get_environments<'a>(
        &'a self,
        space_id: &'a str,
    ) -> BackendFuture<'a, Vec<Environment>, Self::Error> {
        Box::pin(async move {
            Ok(lock(&self.state)
                .environments
                .get(space_id)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn get_environment<'a>(
        &'a self,
        space_id: &'a str,
        environment_id: &'a str,
    ) -> BackendFuture<'a, Environment, Self::Error> {
        Box::pin(async move { self.lookup(space_id, environment_id) })
    }

    fn create_environment<'a>(
        &'a self,
        space_id: &'a str,
        environment_id: &'a str,
        name: &'a str,
    ) -> BackendFuture<'a, Environment, Self::Error> {
        Box::pin(async move {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            state.create_calls = state.create_calls.saturating_add(1);
            if let Some(failure) = state.create_failure.take() {
                if failure.applied {
                    Self::insert_created(state, space_id, environment_id, name);
                }
                return Err(failure.error);
            }
            Self::insert_created(state, space_id, environment_id, name);
            drop(guard);
            self.lookup(space_id, environment_id)
        })
    }

    fn get_entry<'a>(
        &'a self,
        space_id: &'a str,
        environment_id: &'a str,
        entry_id: &'a str,
    ) -> BackendFuture<'a, Value, Self::Error> {
        Box::pin(async move {
            let key = (
                space_id.to_owned(),
                environment_id.to_owned(),
                entry_id.to_owned(),
            );
            lock(&self.state)
                .entries
                .get(&key)
                .cloned()
                .ok_or_else(|| MemoryBackendError::NotFound {
                    resource: format!("entry {entry_id}"),
                })
        })
    }
}

/// Records a single invocation made through [`ScriptedTransferRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Document read from `--content-file` for import invocations.
    pub imported: Option<Value>,
}

impl TransferInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len().saturating_add(1));
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the value following `flag`, if present.
    #[must_use]
    pub fn flag_value(&self, flag: &str) -> Option<String> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|index| self.args.get(index.saturating_add(1)))
            .map(|value| value.to_string_lossy().into_owned())
    }

    /// Returns `true` for `space import` invocations.
    #[must_use]
    pub fn is_import(&self) -> bool {
        self.args.get(1).is_some_and(|verb| verb == "import")
    }
}

/// Pre-seeded result of one scripted run.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransfer {
    /// Lines emitted before exiting.
    pub lines: Vec<OutputLine>,
    /// Exit code.
    pub code: Option<i32>,
    /// Document written to the export location, for exports.
    pub export: Option<Value>,
}

impl ScriptedTransfer {
    /// Successful run that emits no output.
    #[must_use]
    pub const fn success() -> Self {
        Self {
            lines: Vec::new(),
            code: Some(0),
            export: None,
        }
    }

    /// Successful export producing `document`.
    #[must_use]
    pub fn export(document: Value) -> Self {
        Self {
            export: Some(document),
            ..Self::success()
        }
    }

    /// Failing run that prints `stderr` and exits with `code`.
    #[must_use]
    pub fn failure(code: i32, stderr: &str) -> Self {
        Self {
            lines: stderr
                .lines()
                .map(|text| OutputLine {
                    stream: OutputStream::Stderr,
                    text: text.to_owned(),
                })
                .collect(),
            code: Some(code),
            export: None,
        }
    }

    /// Adds a stdout line emitted before exit.
    #[must_use]
    pub fn with_stdout(mut self, text: &str) -> Self {
        self.lines.push(OutputLine {
            stream: OutputStream::Stdout,
            text: text.to_owned(),
        });
        self
    }
}

/// Gate that holds a scripted run until released.
#[derive(Clone, Debug, Default)]
pub struct RunGate {
    state: Arc<(Mutex<GateState>, Condvar)>,
}

#[derive(Debug, Default)]
struct GateState {
    entered: bool,
    released: bool,
}

impl RunGate {
    /// Lets the held run continue.
    pub fn release(&self) {
        let (mutex, condvar) = &*self.state;
        lock(mutex).released = true;
        condvar.notify_all();
    }

    /// Returns `true` once the run reached the gate.
    #[must_use]
    pub fn entered(&self) -> bool {
        lock(&self.state.0).entered
    }

    fn wait(&self) {
        let (mutex, condvar) = &*self.state;
        let mut state = lock(mutex);
        state.entered = true;
        condvar.notify_all();
        while !state.released {
            state = condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[derive(Debug, Default)]
struct RunnerState {
    responses: VecDeque<ScriptedTransfer>,
    invocations: Vec<TransferInvocation>,
    gate: Option<RunGate>,
}

/// Scripted transfer runner that returns pre-seeded outcomes in FIFO order.
///
/// Exports write their document where the arguments ask for it, so the
/// executor reads it back exactly as it would read the real tool's output.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransferRunner {
    state: Arc<Mutex<RunnerState>>,
}

impl ScriptedTransferRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an outcome.
    pub fn push(&self, outcome: ScriptedTransfer) {
        lock(&self.state).responses.push_back(outcome);
    }

    /// Holds the next run until the returned gate is released.
    #[must_use]
    pub fn hold_next_run(&self) -> RunGate {
        let gate = RunGate::default();
        lock(&self.state).gate = Some(gate.clone());
        gate
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<TransferInvocation> {
        lock(&self.state).invocations.clone()
    }

    /// Documents passed to import invocations, in order.
    #[must_use]
    pub fn imported_documents(&self) -> Vec<Value> {
        lock(&self.state)
            .invocations
            .iter()
            .filter_map(|invocation| invocation.imported.clone())
            .collect()
    }
}

fn read_json(path: &Path) -> Option<Value> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

impl TransferRunner for ScriptedTransferRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        on_line: &mut dyn FnMut(&OutputLine),
    ) -> Result<CommandOutput, TransferError> {
        let mut invocation = TransferInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            imported: None,
        };
        if invocation.is_import() {
            invocation.imported = invocation
                .flag_value("--content-file")
                .and_then(|path| read_json(Path::new(&path)));
        }

        let (outcome, gate) = {
            let mut state = lock(&self.state);
            state.invocations.push(invocation.clone());
            (state.responses.pop_front(), state.gate.take())
        };
        let scripted = outcome.ok_or_else(|| TransferError::Spawn {
            program: program.to_owned(),
            message: String::from("no scripted response available"),
        })?;
        if let Some(held) = gate {
            held.wait();
        }

        if let Some(document) = &scripted.export
            && let (Some(dir), Some(file)) = (
                invocation.flag_value("--export-dir"),
                invocation.flag_value("--content-file"),
            )
        {
            let text = serde_json::to_string(document).map_err(|err| TransferError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;
            std::fs::write(PathBuf::from(dir).join(file), text).map_err(|err| {
                TransferError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                }
            })?;
        }

        let mut output = CommandOutput {
            code: scripted.code,
            ..CommandOutput::default()
        };
        for line in &scripted.lines {
            on_line(line);
            let buffer = match line.stream {
                OutputStream::Stdout => &mut output.stdout,
                OutputStream::Stderr => &mut output.stderr,
            };
            buffer.push_str(&line.text);
            buffer.push('\n');
        }
        Ok(output)
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    /// An empty value removes the variable for the guard's lifetime.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                if value.is_empty() {
                    env::remove_var(key);
                } else {
                    env::set_var(key, value);
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
