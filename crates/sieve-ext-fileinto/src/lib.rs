//! The `fileinto` extension: delivery into a named mailbox.
//!
//! Capability string: `"fileinto"`. Contributes one command and one
//! operation; the action itself is the core store action, so duplicate
//! stores merge with `keep` and the implicit keep exactly like default
//! delivery does.

use sieve::actions::StoreAction;
use sieve::ast::{ArgKind, CommandNode};
use sieve::diagnostics::Diagnostic;
use sieve::dump::Dumper;
use sieve::generate::CodeGen;
use sieve::interp::{split_opt_operands, Interpreter, RuntimeError};
use sieve::registry::{CommandDef, CommandKind, Extension, Operation};
use sieve_binary::CorruptError;

pub const CAPABILITY: &str = "fileinto";

const OP_FILEINTO: u64 = 0;

pub struct FileintoExtension;

impl Extension for FileintoExtension {
    fn name(&self) -> &'static str {
        CAPABILITY
    }

    fn commands(&self) -> Vec<Box<dyn CommandDef>> {
        vec![Box::new(FileintoCommand)]
    }

    fn operations(&self) -> Vec<Box<dyn Operation>> {
        vec![Box::new(FileintoOp)]
    }
}

/// `fileinto <mailbox: string>`
pub struct FileintoCommand;

impl CommandDef for FileintoCommand {
    fn identifier(&self) -> &'static str {
        "fileinto"
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
                "fileinto generated without its extension registered".to_string(),
            )
        })?;
        gen.emit_operation(Some(ext), OP_FILEINTO, node.span.line)?;
        let mailbox = node.args.first().and_then(|a| a.as_string()).ok_or_else(|| {
            Diagnostic::error(
                "internal",
                node.span,
                "fileinto without a mailbox reached the generator".to_string(),
            )
        })?;
        gen.emit_string(mailbox);
        gen.emit_optional_run(&node.resolved_tags)
    }
}

pub struct FileintoOp;

impl Operation for FileintoOp {
    fn mnemonic(&self) -> &'static str {
        "fileinto"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let mailbox = interp.read_string()?.to_string();
        let opts = interp.read_optional_operands()?;
        let (side_effects, tagged) = split_opt_operands(opts);
        interp.expect_no_tagged(&tagged)?;
        interp.add_action(Box::new(StoreAction::file_into(&mailbox)), side_effects, None)
    }

    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        dumper.operand_string("mailbox")?;
        dumper.optional_run()
    }
}
