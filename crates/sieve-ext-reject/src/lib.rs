//! The `reject`/`ereject` extension: refuse delivery with a reason.
//!
//! Capability string: `"reject"`. The reject action sends a response and is
//! mutually exclusive with delivery attempts and with other
//! response-sending actions. A response-sender added *after* an unexecuted
//! reject does not abort: it downgrades the reject into a silent discard by
//! clearing its stored reason. The opposite order aborts. This asymmetry is
//! deliberate and covered by scenario tests.

use std::any::Any;

use sieve::actions::{Action, ActionFlags, ConflictVerdict, DuplicateVerdict};
use sieve::ast::{ArgKind, CommandNode};
use sieve::diagnostics::Diagnostic;
use sieve::dump::Dumper;
use sieve::environment::ScriptEnv;
use sieve::generate::CodeGen;
use sieve::interp::{Interpreter, RuntimeError};
use sieve::registry::{CommandDef, CommandKind, Extension, Operation};
use sieve::result::CommitCtx;
use sieve_binary::CorruptError;

pub const CAPABILITY: &str = "reject";

const OP_REJECT: u64 = 0;
const OP_EREJECT: u64 = 1;

pub struct RejectExtension;

impl Extension for RejectExtension {
    fn name(&self) -> &'static str {
        CAPABILITY
    }

    fn commands(&self) -> Vec<Box<dyn CommandDef>> {
        vec![
            Box::new(RejectCommand { esmtp: false }),
            Box::new(RejectCommand { esmtp: true }),
        ]
    }

    fn operations(&self) -> Vec<Box<dyn Operation>> {
        vec![
            Box::new(RejectOp { esmtp: false }),
            Box::new(RejectOp { esmtp: true }),
        ]
    }
}

/// `reject <reason: string>` / `ereject <reason: string>`
pub struct RejectCommand {
    esmtp: bool,
}

impl CommandDef for RejectCommand {
    fn identifier(&self) -> &'static str {
        if self.esmtp {
            "ereject"
        } else {
            "reject"
        }
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn positional(&self) -> &'static [ArgKind] {
        &[ArgKind::String]
    }

    fn generate_command(&self, gen: &mut CodeGen<'_>, node: &CommandNode) -> Result<(), Diagnostic> {
        let ext = gen.registry().extension(CAPABILITY).ok_or_else(|| {
            Diagnostic::error(
                "internal",
                node.span,
                "reject generated without its extension registered".to_string(),
            )
        })?;
        let opcode = if self.esmtp { OP_EREJECT } else { OP_REJECT };
        gen.emit_operation(Some(ext), opcode, node.span.line)?;
        let reason = node.args.first().and_then(|a| a.as_string()).ok_or_else(|| {
            Diagnostic::error(
                "internal",
                node.span,
                "reject without a reason reached the generator".to_string(),
            )
        })?;
        gen.emit_string(reason);
        Ok(())
    }
}

pub struct RejectOp {
    esmtp: bool,
}

impl Operation for RejectOp {
    fn mnemonic(&self) -> &'static str {
        if self.esmtp {
            "ereject"
        } else {
            "reject"
        }
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let reason = interp.read_string()?.to_string();
        interp.add_action(Box::new(RejectAction::new(reason, self.esmtp)), Vec::new(), None)
    }

    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        dumper.operand_string("reason")
    }
}

/// The reject action. `reason = None` means the reject was downgraded to a
/// silent discard by a later response-sender.
pub struct RejectAction {
    reason: Option<String>,
    esmtp: bool,
}

impl RejectAction {
    pub fn new(reason: String, esmtp: bool) -> Self {
        Self {
            reason: Some(reason),
            esmtp,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

impl Action for RejectAction {
    fn name(&self) -> &'static str {
        "reject"
    }

    fn flags(&self) -> ActionFlags {
        ActionFlags::respond()
    }

    fn describe(&self) -> String {
        let verb = if self.esmtp { "ereject" } else { "reject" };
        match &self.reason {
            Some(reason) => format!("{verb} message: {reason:?}"),
            None => format!("{verb} message (silently discarded)"),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn equals(&self, other: &dyn Action) -> bool {
        other.as_any().is::<RejectAction>()
    }

    fn check_duplicate(&self, _prior: &dyn Action, prior_executed: bool) -> DuplicateVerdict {
        if prior_executed {
            DuplicateVerdict::AlreadyExecuted
        } else {
            DuplicateVerdict::Duplicate("message was already rejected".to_string())
        }
    }

    fn check_conflict(&mut self, new: &dyn Action) -> ConflictVerdict {
        let flags = new.flags();
        if flags.tries_deliver {
            return ConflictVerdict::Abort(format!(
                "rejecting the message conflicts with `{}`",
                new.describe()
            ));
        }
        if flags.sends_response {
            // A second response-sender wins: the reject becomes a silent
            // discard.
            self.reason = None;
            return ConflictVerdict::Transformed;
        }
        ConflictVerdict::NoConflict
    }

    fn check_conflict_as_new(&self, prior: &dyn Action, prior_executed: bool) -> ConflictVerdict {
        let flags = prior.flags();
        if flags.tries_deliver && !prior_executed {
            return ConflictVerdict::Abort(format!(
                "rejecting the message conflicts with `{}`",
                prior.describe()
            ));
        }
        if flags.sends_response {
            return ConflictVerdict::Abort(format!(
                "rejecting the message conflicts with the earlier `{}`",
                prior.describe()
            ));
        }
        ConflictVerdict::NoConflict
    }

    fn commit(&mut self, env: &mut dyn ScriptEnv, ctx: &mut CommitCtx<'_>) -> Result<(), String> {
        match &self.reason {
            Some(reason) => {
                env.reject_message(reason)?;
                ctx.cancel_implicit_keep();
                ctx.log(format!("rejected message: {reason:?}"));
            }
            None => {
                ctx.cancel_implicit_keep();
                ctx.warn("reject was superseded by another response; discarding silently".to_string());
            }
        }
        Ok(())
    }
}
