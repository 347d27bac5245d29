//! Core commands and their operations.

use sieve_binary::CorruptError;
use sieve_contracts::limits;

use crate::actions::{DiscardAction, RedirectAction, StoreAction};
use crate::address;
use crate::ast::{ArgKind, ArgValue, CommandNode};
use crate::diagnostics::Diagnostic;
use crate::dump::Dumper;
use crate::generate::CodeGen;
use crate::interp::{split_opt_operands, Interpreter, RuntimeError};
use crate::registry::{BlockUse, CommandDef, CommandKind, Operation};
use crate::validate::Validator;

use super::opcodes;

/// `require <capabilities: string-list>`
///
/// Compile-time only: resolves each capability against the registry and
/// unlocks the extension for the rest of the script. Emits no code.
pub struct RequireCommand;

impl CommandDef for RequireCommand {
    fn identifier(&self) -> &'static str {
        "require"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn positional(&self) -> &'static [ArgKind] {
        &[ArgKind::StringList]
    }

    fn validate_command(&self, v: &mut Validator<'_>, node: &mut CommandNode) {
        let Some(arg) = node.args.first() else {
            return;
        };
        let Some(capabilities) = arg.as_string_list() else {
            return;
        };
        for capability in capabilities {
            match v.registry().extension(capability) {
                Some(ext) => v.require(ext),
                None => v.error(
                    "unknown-capability",
                    arg.span,
                    format!("unknown capability {capability:?}"),
                ),
            }
        }
    }

    fn generate_command(&self, _gen: &mut CodeGen<'_>, _node: &CommandNode) -> Result<(), Diagnostic> {
        Ok(())
    }
}

/// `if <test> { ... }` — compiled into jumps by the generator.
pub struct IfCommand;

impl CommandDef for IfCommand {
    fn identifier(&self) -> &'static str {
        "if"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn takes_test(&self) -> bool {
        true
    }

    fn block(&self) -> BlockUse {
        BlockUse::Required
    }
}

pub struct ElsifCommand;

impl CommandDef for ElsifCommand {
    fn identifier(&self) -> &'static str {
        "elsif"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn takes_test(&self) -> bool {
        true
    }

    fn block(&self) -> BlockUse {
        BlockUse::Required
    }
}

pub struct ElseCommand;

impl CommandDef for ElseCommand {
    fn identifier(&self) -> &'static str {
        "else"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn block(&self) -> BlockUse {
        BlockUse::Required
    }
}

/// `stop` — interrupts the run after the current operation.
pub struct StopCommand;

impl CommandDef for StopCommand {
    fn identifier(&self) -> &'static str {
        "stop"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn generate_command(&self, gen: &mut CodeGen<'_>, node: &CommandNode) -> Result<(), Diagnostic> {
        gen.emit_operation(None, opcodes::STOP, node.span.line)
    }
}

/// `keep` — stores into the default mailbox.
pub struct KeepCommand;

impl CommandDef for KeepCommand {
    fn identifier(&self) -> &'static str {
        "keep"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn generate_command(&self, gen: &mut CodeGen<'_>, node: &CommandNode) -> Result<(), Diagnostic> {
        gen.emit_operation(None, opcodes::KEEP, node.span.line)?;
        gen.emit_optional_run(&node.resolved_tags)
    }
}

/// `discard` — cancels the implicit keep.
pub struct DiscardCommand;

impl CommandDef for DiscardCommand {
    fn identifier(&self) -> &'static str {
        "discard"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn generate_command(&self, gen: &mut CodeGen<'_>, node: &CommandNode) -> Result<(), Diagnostic> {
        gen.emit_operation(None, opcodes::DISCARD, node.span.line)
    }
}

/// `redirect <address: string>` — forwards the message.
pub struct RedirectCommand;

impl CommandDef for RedirectCommand {
    fn identifier(&self) -> &'static str {
        "redirect"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn positional(&self) -> &'static [ArgKind] {
        &[ArgKind::String]
    }

    fn validate_command(&self, v: &mut Validator<'_>, node: &mut CommandNode) {
        // Literal addresses are normalized in place at compile time;
        // computed values get the same check at runtime.
        if let Some(arg) = node.args.first_mut() {
            if let ArgValue::String(s) = &arg.value {
                match address::normalize(s) {
                    Ok(normalized) => arg.value = ArgValue::String(normalized),
                    Err(err) => v.error("bad-address", arg.span, err),
                }
            }
        }
    }

    fn generate_command(&self, gen: &mut CodeGen<'_>, node: &CommandNode) -> Result<(), Diagnostic> {
        gen.emit_operation(None, opcodes::REDIRECT, node.span.line)?;
        let address = node.args.first().and_then(|a| a.as_string()).ok_or_else(|| {
            Diagnostic::error(
                "internal",
                node.span,
                "redirect without an address reached the generator".to_string(),
            )
        })?;
        gen.emit_string(address);
        gen.emit_optional_run(&node.resolved_tags)
    }
}

pub struct JmpOp;

impl Operation for JmpOp {
    fn mnemonic(&self) -> &'static str {
        "jmp"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        interp.take_jump()
    }

    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        dumper.jump_target("to")
    }
}

pub struct JmpTrueOp;

impl Operation for JmpTrueOp {
    fn mnemonic(&self) -> &'static str {
        "jmptrue"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let target = interp.read_jump_target()?;
        if interp.test_result() {
            interp.jump_to(target);
        }
        Ok(())
    }

    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        dumper.jump_target("to")
    }
}

pub struct JmpFalseOp;

impl Operation for JmpFalseOp {
    fn mnemonic(&self) -> &'static str {
        "jmpfalse"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let target = interp.read_jump_target()?;
        if !interp.test_result() {
            interp.jump_to(target);
        }
        Ok(())
    }

    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        dumper.jump_target("to")
    }
}

pub struct StopOp;

impl Operation for StopOp {
    fn mnemonic(&self) -> &'static str {
        "stop"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        interp.interrupt();
        Ok(())
    }

    fn dump(&self, _dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        Ok(())
    }
}

pub struct KeepOp;

impl Operation for KeepOp {
    fn mnemonic(&self) -> &'static str {
        "keep"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let opts = interp.read_optional_operands()?;
        let (side_effects, tagged) = split_opt_operands(opts);
        interp.expect_no_tagged(&tagged)?;
        interp.add_action(Box::new(StoreAction::keep()), side_effects, None)
    }

    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        dumper.optional_run()
    }
}

pub struct DiscardOp;

impl Operation for DiscardOp {
    fn mnemonic(&self) -> &'static str {
        "discard"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        interp.cancel_implicit_keep();
        interp.add_action(Box::new(DiscardAction), Vec::new(), None)
    }

    fn dump(&self, _dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        Ok(())
    }
}

pub struct RedirectOp;

impl Operation for RedirectOp {
    fn mnemonic(&self) -> &'static str {
        "redirect"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let address = interp.read_string()?.to_string();
        let opts = interp.read_optional_operands()?;
        let (side_effects, tagged) = split_opt_operands(opts);
        interp.expect_no_tagged(&tagged)?;
        let normalized = address::normalize(&address).map_err(|e| interp.exec_error(e))?;
        interp.add_action(
            Box::new(RedirectAction::new(normalized)),
            side_effects,
            Some(limits::MAX_REDIRECTS),
        )
    }

    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        dumper.operand_string("address")?;
        dumper.optional_run()
    }
}
