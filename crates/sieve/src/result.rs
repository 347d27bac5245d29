//! The result engine: accumulates actions during interpretation and drives
//! the start/execute/commit protocol against the script environment.

use sieve_contracts::limits;

use crate::actions::{Action, ConflictVerdict, DuplicateVerdict, SideEffect, StoreAction};
use crate::environment::ScriptEnv;
use crate::interp::RuntimeError;

/// Visibility of a run-log entry. Info and warnings surface only in traces
/// and dumps; errors are meant for the end user or postmaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunLog {
    entries: Vec<LogEntry>,
}

impl RunLog {
    pub fn push(&mut self, level: LogLevel, message: String) {
        self.entries.push(LogEntry { level, message });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn errors(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|e| e.level == LogLevel::Error)
    }
}

/// Per-commit context handed to action and side-effect callbacks.
pub struct CommitCtx<'a> {
    cancel_keep: bool,
    log: &'a mut RunLog,
}

impl<'a> CommitCtx<'a> {
    fn new(log: &'a mut RunLog) -> Self {
        Self {
            cancel_keep: false,
            log,
        }
    }

    /// Requests cancellation of the implicit keep once this commit is
    /// recorded as successful.
    pub fn cancel_implicit_keep(&mut self) {
        self.cancel_keep = true;
    }

    /// Undoes a cancellation requested earlier in the same commit; used by
    /// the preserve-implicit-keep side effect.
    pub fn preserve_implicit_keep(&mut self) {
        self.cancel_keep = false;
    }

    pub fn log(&mut self, message: String) {
        self.log.push(LogLevel::Info, message);
    }

    pub fn warn(&mut self, message: String) {
        self.log.push(LogLevel::Warning, message);
    }

    pub fn error(&mut self, message: String) {
        self.log.push(LogLevel::Error, message);
    }
}

struct ActionEntry {
    action: Box<dyn Action>,
    side_effects: Vec<Box<dyn SideEffect>>,
    line: Option<u32>,
    /// Set once `execute` succeeded; duplicate checks in later scripts of a
    /// chain consult this.
    executed: bool,
    committed: bool,
    /// The implicit keep appended by the engine itself.
    implicit: bool,
    /// Processed by a previous `execute` round.
    finished: bool,
    error: Option<String>,
}

/// Summary of one `execute` round.
#[derive(Debug)]
pub struct CommitSummary {
    /// Final implicit-keep disposition. True means the embedding system is
    /// still responsible for a fallback store.
    pub keep: bool,
    pub committed: usize,
    pub rolled_back: usize,
    /// A commit failed; every not-yet-committed action was rolled back.
    pub failed: bool,
    pub log: RunLog,
}

/// An ordered set of actions for one message, plus the implicit-keep flag.
pub struct SieveResult {
    entries: Vec<ActionEntry>,
    implicit_keep: bool,
}

impl Default for SieveResult {
    fn default() -> Self {
        Self::new()
    }
}

impl SieveResult {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            implicit_keep: true,
        }
    }

    pub fn implicit_keep(&self) -> bool {
        self.implicit_keep
    }

    /// Forces the implicit keep off before execution; the discard opcode
    /// uses this so no default store is ever appended.
    pub fn cancel_implicit_keep(&mut self) {
        self.implicit_keep = false;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of the accumulated actions, in order.
    pub fn action_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.action.name()).collect()
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.action.describe()).collect()
    }

    /// Adds an action, enforcing the duplicate, conflict, merge, and
    /// instance-limit rules.
    pub fn add_action(
        &mut self,
        action: Box<dyn Action>,
        side_effects: Vec<Box<dyn SideEffect>>,
        line: Option<u32>,
        instance_limit: Option<usize>,
    ) -> Result<(), RuntimeError> {
        if self.entries.len() >= limits::MAX_ACTIONS {
            return Err(RuntimeError::limit(
                format!("more than {} actions in one result", limits::MAX_ACTIONS),
                line,
            ));
        }

        let new_flags = action.flags();
        for entry in &mut self.entries {
            if entry.action.name() == action.name() {
                match action.check_duplicate(&*entry.action, entry.executed) {
                    DuplicateVerdict::Duplicate(reason) => {
                        return Err(RuntimeError::duplicate(reason, line, entry.line));
                    }
                    DuplicateVerdict::AlreadyExecuted => return Ok(()),
                    DuplicateVerdict::Distinct => {}
                }
            } else if new_flags.conflicts_with(entry.action.flags()) {
                // An already-executed prior cannot resolve a conflict by
                // rewriting itself any more; only the candidate may react.
                let prior_verdict = if entry.executed {
                    ConflictVerdict::NoConflict
                } else {
                    entry.action.check_conflict(&*action)
                };
                match prior_verdict {
                    ConflictVerdict::Abort(reason) => {
                        return Err(RuntimeError::conflict(reason, line, entry.line));
                    }
                    ConflictVerdict::Transformed => continue,
                    ConflictVerdict::NoConflict => {}
                }
                match action.check_conflict_as_new(&*entry.action, entry.executed) {
                    ConflictVerdict::Abort(reason) => {
                        return Err(RuntimeError::conflict(reason, line, entry.line));
                    }
                    ConflictVerdict::Transformed | ConflictVerdict::NoConflict => {}
                }
            }
        }

        // Merge into an equal, not-yet-executed instance instead of
        // inserting a second one.
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| !e.executed && e.action.name() == action.name() && e.action.equals(&*action))
        {
            merge_side_effects(&mut entry.side_effects, side_effects);
            return Ok(());
        }

        if let Some(limit) = instance_limit {
            let count = self
                .entries
                .iter()
                .filter(|e| e.action.name() == action.name())
                .count();
            if count >= limit {
                return Err(RuntimeError::limit(
                    format!("more than {limit} {} actions", action.name()),
                    line,
                ));
            }
        }

        self.entries.push(ActionEntry {
            action,
            side_effects,
            line,
            executed: false,
            committed: false,
            implicit: false,
            finished: false,
            error: None,
        });
        Ok(())
    }

    fn append_implicit_keep(&mut self) {
        let keep = StoreAction::keep();
        if self
            .entries
            .iter()
            .any(|e| !e.finished && e.action.name() == "store" && e.action.equals(&keep))
        {
            // An equal explicit store already covers the default mailbox.
            return;
        }
        self.entries.push(ActionEntry {
            action: Box::new(keep),
            side_effects: Vec::new(),
            line: None,
            executed: false,
            committed: false,
            implicit: true,
            finished: false,
            error: None,
        });
    }

    /// Runs the three-phase protocol over every action added since the last
    /// round.
    ///
    /// Ordering and keep-cancellation are guaranteed; atomicity across the
    /// whole result is not. Actions committed before a later failure stay
    /// committed.
    pub fn execute(&mut self, env: &mut dyn ScriptEnv) -> CommitSummary {
        let mut log = RunLog::default();

        if self.implicit_keep {
            self.append_implicit_keep();
        }

        // Start phase: acquire resources; failures are stored per action.
        for entry in self.entries.iter_mut().filter(|e| !e.finished) {
            if let Err(err) = entry.action.start(env) {
                log.push(
                    LogLevel::Warning,
                    format!("failed to start {}: {err}", entry.action.describe()),
                );
                entry.error = Some(err);
            }
        }

        // Execute phase: one attempt per successfully started action.
        for entry in self.entries.iter_mut().filter(|e| !e.finished) {
            if entry.error.is_some() {
                continue;
            }
            let (action, side_effects) = (&mut entry.action, &mut entry.side_effects);
            let mut failed = None;
            for se in side_effects.iter_mut() {
                if let Err(err) = se.pre_execute(action.as_mut(), env) {
                    failed = Some(err);
                    break;
                }
            }
            if failed.is_none() {
                if let Err(err) = action.execute(env) {
                    failed = Some(err);
                }
            }
            match failed {
                None => entry.executed = true,
                Some(err) => {
                    log.push(
                        LogLevel::Warning,
                        format!("failed to execute {}: {err}", action.describe()),
                    );
                    entry.error = Some(err);
                }
            }
        }

        // Commit phase, in result order. The first failure rolls back every
        // action after it.
        let mut committed = 0;
        let mut rolled_back = 0;
        let mut failed = false;
        for entry in self.entries.iter_mut().filter(|e| !e.finished) {
            if failed || entry.error.is_some() || !entry.executed {
                entry.action.rollback(env);
                rolled_back += 1;
                continue;
            }
            if entry.implicit && !self.implicit_keep {
                // An earlier commit already cancelled the keep; the default
                // store must not run, and must not cancel anything itself.
                // Release the mailbox it opened during the start phase.
                entry.action.rollback(env);
                entry.committed = true;
                continue;
            }
            let (action, side_effects) = (&mut entry.action, &mut entry.side_effects);
            let mut ctx = CommitCtx::new(&mut log);
            match action.commit(env, &mut ctx) {
                Ok(()) => {
                    for se in side_effects.iter_mut() {
                        se.post_commit(action.as_mut(), &mut ctx);
                    }
                    if ctx.cancel_keep {
                        self.implicit_keep = false;
                    }
                    entry.committed = true;
                    committed += 1;
                }
                Err(err) => {
                    log.push(
                        LogLevel::Error,
                        format!("failed to commit {}: {err}", action.describe()),
                    );
                    action.rollback(env);
                    rolled_back += 1;
                    failed = true;
                }
            }
        }

        for entry in &mut self.entries {
            entry.finished = true;
        }

        CommitSummary {
            keep: self.implicit_keep,
            committed,
            rolled_back,
            failed,
            log,
        }
    }
}

fn merge_side_effects(
    existing: &mut Vec<Box<dyn SideEffect>>,
    incoming: Vec<Box<dyn SideEffect>>,
) {
    for se in incoming {
        match existing.iter_mut().find(|e| e.name() == se.name()) {
            Some(found) => found.merge(se),
            None => existing.push(se),
        }
    }
}
