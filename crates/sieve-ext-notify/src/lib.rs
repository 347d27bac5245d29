//! The `enotify` extension: out-of-band notifications.
//!
//! Capability string: `"enotify"`. Only the `mailto:` method is accepted.
//! A literal method URI is checked and normalized at compile time; a
//! computed one gets the same check when the operation executes. The
//! optional message is encoded as a fixed operand slot that is either a
//! string or the omitted sentinel.

use std::any::Any;

use sieve::actions::{Action, ActionFlags, DuplicateVerdict};
use sieve::address;
use sieve::ast::{ArgKind, Argument, ArgValue, CommandNode, ResolvedTag};
use sieve::diagnostics::Diagnostic;
use sieve::dump::Dumper;
use sieve::environment::ScriptEnv;
use sieve::generate::CodeGen;
use sieve::interp::{Interpreter, RuntimeError};
use sieve::operands::OperandValue;
use sieve::registry::{CommandDef, CommandKind, Extension, Operation, TagDef};
use sieve::result::CommitCtx;
use sieve::validate::Validator;
use sieve_binary::CorruptError;

pub const CAPABILITY: &str = "enotify";

const OP_NOTIFY: u64 = 0;

const OPT_MESSAGE: u64 = 2;

const DEFAULT_MESSAGE: &str = "You have new mail";

/// Checks a method URI and returns its normalized form.
pub fn normalize_method(method: &str) -> Result<String, String> {
    let address_part = method
        .strip_prefix("mailto:")
        .ok_or_else(|| format!("unsupported notification method {method:?}"))?;
    let normalized = address::normalize(address_part)?;
    Ok(format!("mailto:{normalized}"))
}

pub struct NotifyExtension;

impl Extension for NotifyExtension {
    fn name(&self) -> &'static str {
        CAPABILITY
    }

    fn commands(&self) -> Vec<Box<dyn CommandDef>> {
        vec![Box::new(NotifyCommand)]
    }

    fn operations(&self) -> Vec<Box<dyn Operation>> {
        vec![Box::new(NotifyOp)]
    }
}

struct MessageTag;

impl TagDef for MessageTag {
    fn name(&self) -> &'static str {
        "message"
    }

    fn value(&self) -> Option<ArgKind> {
        Some(ArgKind::String)
    }

    fn validate(&self, _v: &mut Validator<'_>, value: Option<&mut Argument>) -> Option<ResolvedTag> {
        let message = value.and_then(|a| a.as_string().map(str::to_string))?;
        Some(ResolvedTag::Operand {
            opt_code: OPT_MESSAGE,
            value: OperandValue::String(message),
        })
    }
}

static NOTIFY_TAGS: &[&dyn TagDef] = &[&MessageTag];

/// `notify [:message s] <method: string>`
pub struct NotifyCommand;

impl CommandDef for NotifyCommand {
    fn identifier(&self) -> &'static str {
        "notify"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn positional(&self) -> &'static [ArgKind] {
        &[ArgKind::String]
    }

    fn tags(&self) -> &'static [&'static dyn TagDef] {
        NOTIFY_TAGS
    }

    fn validate_command(&self, v: &mut Validator<'_>, node: &mut CommandNode) {
        if let Some(arg) = node.args.first_mut() {
            if let ArgValue::String(method) = &arg.value {
                match normalize_method(method) {
                    Ok(normalized) => arg.value = ArgValue::String(normalized),
                    Err(err) => v.error("bad-notify-method", arg.span, err),
                }
            }
        }
    }

    fn generate_command(&self, gen: &mut CodeGen<'_>, node: &CommandNode) -> Result<(), Diagnostic> {
        let ext = gen.registry().extension(CAPABILITY).ok_or_else(|| {
            Diagnostic::error(
                "internal",
                node.span,
                "notify generated without its extension registered".to_string(),
            )
        })?;
        gen.emit_operation(Some(ext), OP_NOTIFY, node.span.line)?;
        let method = node.args.first().and_then(|a| a.as_string()).ok_or_else(|| {
            Diagnostic::error(
                "internal",
                node.span,
                "notify without a method reached the generator".to_string(),
            )
        })?;
        gen.emit_string(method);

        // The message rides in a fixed string-or-omitted slot.
        let message = node.resolved_tags.iter().find_map(|tag| match tag {
            ResolvedTag::Operand {
                opt_code: OPT_MESSAGE,
                value: OperandValue::String(s),
            } => Some(s.as_str()),
            _ => None,
        });
        match message {
            Some(message) => gen.emit_string(message),
            None => gen.emit_omitted(),
        }
        Ok(())
    }
}

pub struct NotifyOp;

impl Operation for NotifyOp {
    fn mnemonic(&self) -> &'static str {
        "notify"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let method = interp.read_string()?.to_string();
        let message = interp.read_opt_string()?.map(str::to_string);
        let normalized = normalize_method(&method).map_err(|e| interp.exec_error(e))?;
        interp.add_action(
            Box::new(NotifyAction {
                method: normalized,
                message,
            }),
            Vec::new(),
            None,
        )
    }

    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        dumper.operand_string("method")?;
        dumper.operand_opt_string("message")
    }
}

/// The notification action. Never cancels the implicit keep.
pub struct NotifyAction {
    method: String,
    message: Option<String>,
}

impl Action for NotifyAction {
    fn name(&self) -> &'static str {
        "notify"
    }

    fn flags(&self) -> ActionFlags {
        ActionFlags::respond()
    }

    fn describe(&self) -> String {
        format!("notify {:?}", self.method)
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
            .downcast_ref::<NotifyAction>()
            .is_some_and(|o| o.method == self.method && o.message == self.message)
    }

    fn check_duplicate(&self, prior: &dyn Action, prior_executed: bool) -> DuplicateVerdict {
        if prior_executed && self.equals(prior) {
            DuplicateVerdict::AlreadyExecuted
        } else {
            DuplicateVerdict::Distinct
        }
    }

    fn commit(&mut self, env: &mut dyn ScriptEnv, ctx: &mut CommitCtx<'_>) -> Result<(), String> {
        let message = self.message.as_deref().unwrap_or(DEFAULT_MESSAGE);
        env.notify(&self.method, message)?;
        ctx.log(format!("notified {:?}", self.method));
        Ok(())
    }
}
