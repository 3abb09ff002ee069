use crate::command::Command;
use crate::error::{PostError, QueueClosed};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Tuning knobs for [`CommandQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a not-ready analysis may sit in the queue before it is
    /// cancelled instead of deferred again.
    pub not_ready_expiry: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            not_ready_expiry: Duration::from_secs(60),
        }
    }
}

struct QueuedCommand {
    command: Command,
    queued_at: Instant,
}

struct QueueState {
    commands: Vec<QueuedCommand>,
    closed: bool,
}

/// Priority queue of pending commands with a single blocking consumer.
///
/// Posting coalesces superseded duplicates; taking picks the lowest
/// `(priority, sequence)` among ready commands, drops commands cancelled
/// while they waited, and expires commands whose preconditions have not held
/// for [`QueueConfig::not_ready_expiry`].
pub struct CommandQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    config: QueueConfig,
}

impl CommandQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState {
                commands: Vec::new(),
                closed: false,
            }),
            available: Condvar::new(),
            config,
        }
    }

    /// Enqueue a command, cancelling and removing any queued command it
    /// supersedes.
    pub fn post(&self, command: Command) -> Result<(), PostError> {
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            command.cancel();
            return Err(PostError::Closed);
        }
        let mut superseded = 0usize;
        state.commands.retain(|queued| {
            if queued.command.should_cancel_post(&command) {
                tracing::debug!(
                    target = "argus.queue",
                    superseded = ?queued.command,
                    by = ?command,
                    "coalescing queued command"
                );
                queued.command.cancel();
                superseded += 1;
                false
            } else {
                true
            }
        });
        tracing::debug!(
            target = "argus.queue",
            command = ?command,
            superseded,
            depth = state.commands.len() + 1,
            "posted command"
        );
        state.commands.push(QueuedCommand {
            command,
            queued_at: Instant::now(),
        });
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Block until a ready command is available (or the queue closes).
    ///
    /// Delivering an unregister command also purges all queued analyses for
    /// the same scope, cancelling them, since they can no longer produce
    /// meaningful results.
    pub fn take_next(&self) -> Result<Command, QueueClosed> {
        let mut state = self.state.lock();
        loop {
            self.sweep(&mut state);
            if let Some(index) = Self::pick(&state.commands) {
                let taken = state.commands.remove(index);
                if let Command::UnregisterScope(unregister) = &taken.command {
                    let scope = unregister.scope_id().clone();
                    state.commands.retain(|queued| {
                        let purge = matches!(&queued.command, Command::Analyze(analyze) if *analyze.scope_id() == scope);
                        if purge {
                            tracing::debug!(
                                target = "argus.queue",
                                command = ?queued.command,
                                "purging analysis for unregistered scope"
                            );
                            queued.command.cancel();
                        }
                        !purge
                    });
                }
                return Ok(taken.command);
            }
            if state.closed {
                return Err(QueueClosed);
            }
            if state.commands.is_empty() {
                self.available.wait(&mut state);
            } else {
                // Everything queued is deferred on preconditions; poll until
                // one becomes ready or expires.
                self.available
                    .wait_for(&mut state, Duration::from_millis(100));
            }
        }
    }

    /// Drop cancelled commands, expire stale not-ready ones.
    fn sweep(&self, state: &mut QueueState) {
        let expiry = self.config.not_ready_expiry;
        state.commands.retain(|queued| {
            if queued.command.should_cancel_queue() {
                tracing::debug!(
                    target = "argus.queue",
                    command = ?queued.command,
                    "dropping command cancelled while queued"
                );
                queued.command.cancel();
                return false;
            }
            if !queued.command.is_ready() && queued.queued_at.elapsed() >= expiry {
                tracing::warn!(
                    target = "argus.queue",
                    command = ?queued.command,
                    waited = ?queued.queued_at.elapsed(),
                    "expiring command whose preconditions never held"
                );
                queued.command.cancel();
                return false;
            }
            true
        });
    }

    /// Index of the ready command with the lowest `(priority, sequence)`.
    fn pick(commands: &[QueuedCommand]) -> Option<usize> {
        commands
            .iter()
            .enumerate()
            .filter(|(_, queued)| queued.command.is_ready())
            .min_by_key(|(_, queued)| (queued.command.priority(), queued.command.sequence()))
            .map(|(index, _)| index)
    }

    /// Close the queue: pending commands are cancelled and dropped, blocked
    /// consumers wake with [`QueueClosed`], and later posts are rejected.
    pub fn close(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.commands)
        };
        for queued in &drained {
            queued.command.cancel();
        }
        if !drained.is_empty() {
            tracing::debug!(
                target = "argus.queue",
                dropped = drained.len(),
                "queue closed with pending commands"
            );
        }
        self.available.notify_all();
    }

    /// Wake the consumer so it re-evaluates readiness and expiry.
    pub fn wake_up(&self) {
        self.available.notify_all();
    }

    /// Cancel and remove every queued command matching `predicate`.
    pub fn remove_all(&self, predicate: impl Fn(&Command) -> bool) {
        let mut state = self.state.lock();
        state.commands.retain(|queued| {
            if predicate(&queued.command) {
                queued.command.cancel();
                false
            } else {
                true
            }
        });
    }

    /// Number of commands currently queued (including not-ready ones).
    pub fn depth(&self) -> usize {
        self.state.lock().commands.len()
    }
}
