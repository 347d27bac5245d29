//! Deferred delivery actions and their side effects.
//!
//! Opcode execution never touches a backend directly; it appends an action
//! to the result, and the result engine drives the start/execute/commit
//! protocol later. Actions are trait objects so extension crates can ship
//! their own; the engine only sees this interface.

use std::any::Any;

use crate::environment::ScriptEnv;
use crate::result::CommitCtx;

/// Behavioral flags of an action definition.
///
/// Two actions whose flags pair a delivery attempt with a response (or two
/// responses) are checked for conflicts before the new one is accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionFlags {
    pub tries_deliver: bool,
    pub sends_response: bool,
}

impl ActionFlags {
    pub const fn deliver() -> Self {
        Self {
            tries_deliver: true,
            sends_response: false,
        }
    }

    pub const fn respond() -> Self {
        Self {
            tries_deliver: false,
            sends_response: true,
        }
    }

    pub fn conflicts_with(self, other: Self) -> bool {
        (self.tries_deliver && other.sends_response)
            || (self.sends_response && other.tries_deliver)
            || (self.sends_response && other.sends_response)
    }
}

/// Outcome of checking a new action against a prior one of the same
/// definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateVerdict {
    /// Script error: the duplicate aborts the whole run.
    Duplicate(String),
    /// The prior instance already executed in an earlier script of a chain;
    /// the new one is silently dropped.
    AlreadyExecuted,
    Distinct,
}

/// Outcome of checking two actions with conflicting flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictVerdict {
    /// Script error: the conflict aborts the whole run.
    Abort(String),
    /// The checked action resolved the conflict by rewriting itself.
    Transformed,
    NoConflict,
}

/// One deferred action instance.
///
/// `check_conflict` runs on the *prior* action with the candidate as
/// argument and may mutate `self` to resolve the conflict;
/// `check_conflict_as_new` runs on the candidate against each prior.
pub trait Action: Send + 'static {
    fn name(&self) -> &'static str;
    fn flags(&self) -> ActionFlags;
    fn describe(&self) -> String;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Whether this action is interchangeable with `other` (same
    /// definition, same target); equal unexecuted actions merge.
    fn equals(&self, _other: &dyn Action) -> bool {
        false
    }

    fn check_duplicate(&self, _prior: &dyn Action, _prior_executed: bool) -> DuplicateVerdict {
        DuplicateVerdict::Distinct
    }

    fn check_conflict(&mut self, _new: &dyn Action) -> ConflictVerdict {
        ConflictVerdict::NoConflict
    }

    fn check_conflict_as_new(&self, _prior: &dyn Action, _prior_executed: bool) -> ConflictVerdict {
        ConflictVerdict::NoConflict
    }

    /// Acquires whatever the commit will need. Failures are stored on the
    /// action and do not abort siblings.
    fn start(&mut self, _env: &mut dyn ScriptEnv) -> Result<(), String> {
        Ok(())
    }

    /// Performs the side-effecting attempt. Called at most once.
    fn execute(&mut self, _env: &mut dyn ScriptEnv) -> Result<(), String> {
        Ok(())
    }

    /// Finalizes the action. A successful commit may cancel implicit keep
    /// through `ctx`.
    fn commit(&mut self, env: &mut dyn ScriptEnv, ctx: &mut CommitCtx<'_>) -> Result<(), String>;

    /// Releases resources without observable effect. Must tolerate being
    /// called when `start` failed or never ran.
    fn rollback(&mut self, _env: &mut dyn ScriptEnv) {}
}

/// One side-effect instance attached to an action.
pub trait SideEffect: Send + 'static {
    fn name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Folds another instance of the same kind into this one.
    fn merge(&mut self, _other: Box<dyn SideEffect>) {}

    fn pre_execute(
        &mut self,
        _action: &mut dyn Action,
        _env: &mut dyn ScriptEnv,
    ) -> Result<(), String> {
        Ok(())
    }

    fn post_commit(&mut self, _action: &mut dyn Action, _ctx: &mut CommitCtx<'_>) {}
}

/// The store action behind `keep`, `fileinto`, and the implicit keep.
///
/// `mailbox` is `None` for the default mailbox; the concrete name is
/// resolved from the environment when the mailbox is opened.
pub struct StoreAction {
    mailbox: Option<String>,
    resolved: Option<String>,
    flags: Vec<String>,
    token: Option<u64>,
}

impl StoreAction {
    pub fn keep() -> Self {
        Self {
            mailbox: None,
            resolved: None,
            flags: Vec::new(),
            token: None,
        }
    }

    pub fn file_into(mailbox: &str) -> Self {
        Self {
            mailbox: Some(mailbox.to_string()),
            resolved: None,
            flags: Vec::new(),
            token: None,
        }
    }

    pub fn mailbox(&self) -> Option<&str> {
        self.mailbox.as_deref()
    }

    /// Adds IMAP flags to set on the stored message, deduplicated.
    pub fn add_flags(&mut self, flags: &[String]) {
        for flag in flags {
            if !self.flags.iter().any(|f| f == flag) {
                self.flags.push(flag.clone());
            }
        }
    }

    pub fn store_flags(&self) -> &[String] {
        &self.flags
    }
}

impl Action for StoreAction {
    fn name(&self) -> &'static str {
        "store"
    }

    fn flags(&self) -> ActionFlags {
        ActionFlags::deliver()
    }

    fn describe(&self) -> String {
        match &self.mailbox {
            Some(m) => format!("store message into mailbox {m:?}"),
            None => "store message into the default mailbox".to_string(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn equals(&self, other: &dyn Action) -> bool {
        other
            .as_any()
            .downcast_ref::<StoreAction>()
            .is_some_and(|o| o.mailbox == self.mailbox)
    }

    fn check_duplicate(&self, prior: &dyn Action, prior_executed: bool) -> DuplicateVerdict {
        if prior_executed && self.equals(prior) {
            DuplicateVerdict::AlreadyExecuted
        } else {
            DuplicateVerdict::Distinct
        }
    }

    fn start(&mut self, env: &mut dyn ScriptEnv) -> Result<(), String> {
        let mailbox = match &self.mailbox {
            Some(m) => m.clone(),
            None => env.default_mailbox(),
        };
        self.token = Some(env.mailbox_open(&mailbox)?);
        self.resolved = Some(mailbox);
        Ok(())
    }

    fn execute(&mut self, env: &mut dyn ScriptEnv) -> Result<(), String> {
        let token = self.token.ok_or_else(|| "mailbox was not opened".to_string())?;
        env.mailbox_save(token, &self.flags)
    }

    fn commit(&mut self, env: &mut dyn ScriptEnv, ctx: &mut CommitCtx<'_>) -> Result<(), String> {
        let token = self.token.take().ok_or_else(|| "mailbox was not opened".to_string())?;
        env.mailbox_finish(token, true)?;
        ctx.cancel_implicit_keep();
        let mailbox = self.resolved.as_deref().unwrap_or("?");
        ctx.log(format!("stored message into mailbox {mailbox:?}"));
        Ok(())
    }

    fn rollback(&mut self, env: &mut dyn ScriptEnv) {
        if let Some(token) = self.token.take() {
            let _ = env.mailbox_finish(token, false);
        }
    }
}

/// The discard action: cancels implicit keep and delivers nowhere.
pub struct DiscardAction;

impl Action for DiscardAction {
    fn name(&self) -> &'static str {
        "discard"
    }

    fn flags(&self) -> ActionFlags {
        ActionFlags::default()
    }

    fn describe(&self) -> String {
        "discard message".to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn equals(&self, other: &dyn Action) -> bool {
        other.as_any().is::<DiscardAction>()
    }

    fn check_duplicate(&self, prior: &dyn Action, prior_executed: bool) -> DuplicateVerdict {
        if prior_executed && self.equals(prior) {
            DuplicateVerdict::AlreadyExecuted
        } else {
            DuplicateVerdict::Distinct
        }
    }

    fn commit(&mut self, _env: &mut dyn ScriptEnv, ctx: &mut CommitCtx<'_>) -> Result<(), String> {
        ctx.cancel_implicit_keep();
        ctx.log("marked message to be discarded".to_string());
        Ok(())
    }
}

/// The redirect action: forwards the message over SMTP.
pub struct RedirectAction {
    address: String,
    token: Option<u64>,
}

impl RedirectAction {
    pub fn new(address: String) -> Self {
        Self {
            address,
            token: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Action for RedirectAction {
    fn name(&self) -> &'static str {
        "redirect"
    }

    fn flags(&self) -> ActionFlags {
        ActionFlags::deliver()
    }

    fn describe(&self) -> String {
        format!("redirect message to {:?}", self.address)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn equals(&self, other: &dyn Action) -> bool {
        other
            .as_any()
            .downcast_ref::<RedirectAction>()
            .is_some_and(|o| o.address == self.address)
    }

    fn check_duplicate(&self, prior: &dyn Action, prior_executed: bool) -> DuplicateVerdict {
        if !self.equals(prior) {
            return DuplicateVerdict::Distinct;
        }
        if prior_executed {
            DuplicateVerdict::AlreadyExecuted
        } else {
            DuplicateVerdict::Duplicate(format!(
                "duplicate redirect to {:?}",
                self.address
            ))
        }
    }

    fn start(&mut self, env: &mut dyn ScriptEnv) -> Result<(), String> {
        self.token = Some(env.smtp_open(&self.address)?);
        Ok(())
    }

    fn execute(&mut self, env: &mut dyn ScriptEnv) -> Result<(), String> {
        let token = self.token.ok_or_else(|| "smtp session was not opened".to_string())?;
        env.smtp_send(token)
    }

    fn commit(&mut self, env: &mut dyn ScriptEnv, ctx: &mut CommitCtx<'_>) -> Result<(), String> {
        let token = self.token.take().ok_or_else(|| "smtp session was not opened".to_string())?;
        env.smtp_finish(token, true)?;
        ctx.cancel_implicit_keep();
        ctx.log(format!("redirected message to {:?}", self.address));
        Ok(())
    }

    fn rollback(&mut self, env: &mut dyn ScriptEnv) {
        if let Some(token) = self.token.take() {
            let _ = env.smtp_finish(token, false);
        }
    }
}
