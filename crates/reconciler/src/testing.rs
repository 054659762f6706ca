//! In-process fakes for hooks and the broker.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use spawner_broker::{Collected, ResourcePayload, TicketId};
use tokio::time::Instant;

use crate::broker::TicketBroker;
use crate::config::HookPaths;
use crate::error::{Error, Result};
use crate::hooks::{CommandOutput, CommandRunner};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Canned outcome of one scripted hook run.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Exit(i32, String),
    Slow(Duration, i32, String),
    Timeout,
    Missing,
}

impl Reply {
    pub(crate) fn exit(code: i32, stdout: &str) -> Self {
        Self::Exit(code, stdout.to_string())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub(crate) program: PathBuf,
    pub(crate) args: Vec<String>,
    pub(crate) at: Instant,
}

#[derive(Default)]
struct RunnerState {
    converge: VecDeque<Reply>,
    desired: i64,
    failing_take: HashSet<String>,
    failing_release: HashSet<String>,
    missing_release: HashSet<String>,
    calls: Vec<Call>,
}

/// Command runner that answers from a script instead of spawning processes.
///
/// The converge-to hook replays queued replies, then keeps printing the
/// current desired count. Take and release succeed unless their payload was
/// marked as failing.
pub(crate) struct ScriptedRunner {
    hooks: HookPaths,
    state: Mutex<RunnerState>,
}

impl ScriptedRunner {
    pub(crate) fn new(hooks: HookPaths) -> Self {
        Self {
            hooks,
            state: Mutex::new(RunnerState::default()),
        }
    }

    pub(crate) fn queue_converge(&self, replies: Vec<Reply>) {
        locked(&self.state).converge.extend(replies);
    }

    pub(crate) fn set_desired(&self, desired: i64) {
        locked(&self.state).desired = desired;
    }

    pub(crate) fn fail_take_for(&self, payload: &str) {
        locked(&self.state).failing_take.insert(payload.to_string());
    }

    pub(crate) fn fail_release_for(&self, payload: &str) {
        locked(&self.state)
            .failing_release
            .insert(payload.to_string());
    }

    pub(crate) fn allow_release_for(&self, payload: &str) {
        locked(&self.state).failing_release.remove(payload);
    }

    /// Make the release hook unspawnable for `payload`.
    pub(crate) fn missing_release_for(&self, payload: &str) {
        locked(&self.state)
            .missing_release
            .insert(payload.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        locked(&self.state).calls.clone()
    }

    pub(crate) fn calls_to(&self, program: &Path) -> usize {
        self.args_for(program).len()
    }

    pub(crate) fn args_for(&self, program: &Path) -> Vec<Vec<String>> {
        locked(&self.state)
            .calls
            .iter()
            .filter(|c| c.program == program)
            .map(|c| c.args.clone())
            .collect()
    }

    pub(crate) fn call_times(&self, program: &Path) -> Vec<Instant> {
        locked(&self.state)
            .calls
            .iter()
            .filter(|c| c.program == program)
            .map(|c| c.at)
            .collect()
    }

    fn next_reply(&self, program: &Path, args: &[String]) -> Reply {
        let mut state = locked(&self.state);
        state.calls.push(Call {
            program: program.to_path_buf(),
            args: args.to_vec(),
            at: Instant::now(),
        });

        let payload = args.first().cloned().unwrap_or_default();
        if program == self.hooks.converge_to {
            let desired = state.desired;
            state
                .converge
                .pop_front()
                .unwrap_or_else(|| Reply::Exit(0, format!("{desired}\n")))
        } else if program == self.hooks.take && state.failing_take.contains(&payload) {
            Reply::exit(1, "")
        } else if program == self.hooks.release && state.missing_release.contains(&payload) {
            Reply::Missing
        } else if program == self.hooks.release && state.failing_release.contains(&payload) {
            Reply::exit(1, "")
        } else {
            Reply::exit(0, "")
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput> {
        let reply = self.next_reply(program, args);
        let name = program.display().to_string();

        match reply {
            Reply::Exit(code, stdout) => Ok(CommandOutput::exited(code, stdout)),
            Reply::Slow(delay, code, stdout) => {
                tokio::time::sleep(delay).await;
                Ok(CommandOutput::exited(code, stdout))
            }
            Reply::Timeout => Err(Error::hook_timeout(name, 1_000)),
            Reply::Missing => Err(Error::hook_spawn(name, "No such file or directory")),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    issued: u64,
    pending: HashSet<TicketId>,
    failing_wait: HashSet<TicketId>,
    failing_close: HashSet<TicketId>,
    closed: Vec<TicketId>,
    requested_tags: Vec<Vec<String>>,
}

/// Broker that assigns `resource-<id>` to ticket `<id>`, numbering from 1.
#[derive(Default)]
pub(crate) struct InMemoryBroker {
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn payload_for(id: &TicketId) -> ResourcePayload {
        ResourcePayload::new(format!("resource-{id}"))
    }

    /// Make `collect` report the ticket as not ready.
    pub(crate) fn mark_pending(&self, id: impl Into<TicketId>) {
        locked(&self.state).pending.insert(id.into());
    }

    /// Make `wait` fail for the ticket.
    pub(crate) fn fail_wait_for(&self, id: impl Into<TicketId>) {
        locked(&self.state).failing_wait.insert(id.into());
    }

    /// Close the ticket behind the pool's back, so `collect` rejects it.
    pub(crate) fn close_externally(&self, id: impl Into<TicketId>) {
        locked(&self.state).closed.push(id.into());
    }

    /// Make `close` fail for the ticket.
    pub(crate) fn fail_close_for(&self, id: impl Into<TicketId>) {
        locked(&self.state).failing_close.insert(id.into());
    }

    pub(crate) fn closed(&self) -> Vec<TicketId> {
        locked(&self.state).closed.clone()
    }

    pub(crate) fn issued(&self) -> u64 {
        locked(&self.state).issued
    }

    pub(crate) fn requested_tags(&self) -> Vec<Vec<String>> {
        locked(&self.state).requested_tags.clone()
    }
}

#[async_trait]
impl TicketBroker for InMemoryBroker {
    async fn new_ticket(&self, tags: &[String]) -> Result<TicketId> {
        let mut state = locked(&self.state);
        state.issued = state.issued.saturating_add(1);
        state.requested_tags.push(tags.to_vec());
        Ok(TicketId::from(state.issued))
    }

    async fn wait(&self, id: &TicketId) -> Result<ResourcePayload> {
        if locked(&self.state).failing_wait.contains(id) {
            return Err(spawner_broker::Error::connection_failed("broker went away").into());
        }
        Ok(Self::payload_for(id))
    }

    async fn collect(&self, id: &TicketId) -> Result<Collected> {
        let state = locked(&self.state);
        if state.closed.contains(id) {
            return Err(spawner_broker::Error::rpc("collectTicket", 3, "ticket closed").into());
        }
        if state.pending.contains(id) {
            return Ok(Collected::pending());
        }
        Ok(Collected::ready(Self::payload_for(id).as_str()))
    }

    async fn close(&self, id: &TicketId) -> Result<()> {
        let mut state = locked(&self.state);
        if state.failing_close.contains(id) {
            return Err(spawner_broker::Error::rpc("closeTicket", 1, "close rejected").into());
        }
        state.closed.push(id.clone());
        Ok(())
    }
}
