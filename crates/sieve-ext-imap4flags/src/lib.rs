//! The `imap4flags` extension: IMAP flags on stored messages.
//!
//! Capability string: `"imap4flags"`. `setflag`/`addflag`/`removeflag`
//! maintain a per-run flag register in the interpreter's extension context.
//! Store actions pick flags up through a side effect: the `:flags` tag on
//! `keep`/`fileinto` carries an explicit list, and when the extension is
//! required without the tag, an implicit side effect with an omitted
//! payload snapshots the register at the point the store executes.

use std::any::Any;

use sieve::actions::{Action, SideEffect, StoreAction};
use sieve::ast::{ArgKind, Argument, CommandNode, ResolvedTag};
use sieve::diagnostics::Diagnostic;
use sieve::dump::Dumper;
use sieve::environment::ScriptEnv;
use sieve::generate::CodeGen;
use sieve::interp::{Interpreter, RuntimeError};
use sieve::operands::{read_operand_value, DecodedValue, OperandValue};
use sieve::registry::{
    CommandDef, CommandKind, ExtId, Extension, ExternalTag, Operation, SideEffectDef, TagDef,
};
use sieve::validate::Validator;
use sieve_binary::CorruptError;

pub const CAPABILITY: &str = "imap4flags";

const OP_SETFLAG: u64 = 0;
const OP_ADDFLAG: u64 = 1;
const OP_REMOVEFLAG: u64 = 2;

const SE_FLAGS: u64 = 0;

/// The per-run internal flag set.
#[derive(Debug, Clone, Default)]
pub struct FlagRegister {
    flags: Vec<String>,
}

impl FlagRegister {
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    fn set(&mut self, flags: Vec<String>) {
        self.flags = flags;
        self.dedup();
    }

    fn add(&mut self, flags: Vec<String>) {
        self.flags.extend(flags);
        self.dedup();
    }

    fn remove(&mut self, flags: &[String]) {
        self.flags.retain(|f| !flags.iter().any(|r| r.eq_ignore_ascii_case(f)));
    }

    fn dedup(&mut self) {
        let mut seen: Vec<String> = Vec::new();
        self.flags.retain(|f| {
            let known = seen.iter().any(|s| s.eq_ignore_ascii_case(f));
            if !known {
                seen.push(f.clone());
            }
            !known
        });
    }
}

/// Splits a flag list into individual atoms; items may hold several
/// space-separated flags.
fn flag_atoms(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        for atom in item.split_whitespace() {
            if !out.iter().any(|f| f.eq_ignore_ascii_case(atom)) {
                out.push(atom.to_string());
            }
        }
    }
    out
}

pub struct Imap4flagsExtension;

impl Extension for Imap4flagsExtension {
    fn name(&self) -> &'static str {
        CAPABILITY
    }

    fn commands(&self) -> Vec<Box<dyn CommandDef>> {
        vec![
            Box::new(FlagCommand {
                identifier: "setflag",
                opcode: OP_SETFLAG,
            }),
            Box::new(FlagCommand {
                identifier: "addflag",
                opcode: OP_ADDFLAG,
            }),
            Box::new(FlagCommand {
                identifier: "removeflag",
                opcode: OP_REMOVEFLAG,
            }),
        ]
    }

    fn operations(&self) -> Vec<Box<dyn Operation>> {
        vec![
            Box::new(FlagOp {
                mnemonic: "setflag",
                mode: FlagMode::Set,
            }),
            Box::new(FlagOp {
                mnemonic: "addflag",
                mode: FlagMode::Add,
            }),
            Box::new(FlagOp {
                mnemonic: "removeflag",
                mode: FlagMode::Remove,
            }),
        ]
    }

    fn side_effects(&self) -> Vec<Box<dyn SideEffectDef>> {
        vec![Box::new(FlagsSideEffectDef)]
    }

    fn external_tags(&self) -> Vec<ExternalTag> {
        vec![
            ExternalTag {
                host_command: "keep",
                tag: Box::new(FlagsTag),
            },
            ExternalTag {
                host_command: "fileinto",
                tag: Box::new(FlagsTag),
            },
        ]
    }
}

/// `setflag`/`addflag`/`removeflag <flags: string-list>`
pub struct FlagCommand {
    identifier: &'static str,
    opcode: u64,
}

impl CommandDef for FlagCommand {
    fn identifier(&self) -> &'static str {
        self.identifier
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn positional(&self) -> &'static [ArgKind] {
        &[ArgKind::StringList]
    }

    fn generate_command(&self, gen: &mut CodeGen<'_>, node: &CommandNode) -> Result<(), Diagnostic> {
        let ext = gen.registry().extension(CAPABILITY).ok_or_else(|| {
            Diagnostic::error(
                "internal",
                node.span,
                "flag command generated without its extension registered".to_string(),
            )
        })?;
        gen.emit_operation(Some(ext), self.opcode, node.span.line)?;
        let flags = node.args.first().and_then(|a| a.as_string_list()).ok_or_else(|| {
            Diagnostic::error(
                "internal",
                node.span,
                "flag command without a flag list reached the generator".to_string(),
            )
        })?;
        gen.emit_string_list(flags);
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum FlagMode {
    Set,
    Add,
    Remove,
}

pub struct FlagOp {
    mnemonic: &'static str,
    mode: FlagMode,
}

impl Operation for FlagOp {
    fn mnemonic(&self) -> &'static str {
        self.mnemonic
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let mut list = interp.read_string_list()?;
        let mut items = Vec::new();
        while let Some(item) = list.next_item().map_err(RuntimeError::corrupt)? {
            items.push(item.to_string());
        }
        let atoms = flag_atoms(&items);
        let ext = interp
            .current_ext()
            .ok_or_else(|| RuntimeError::corrupt_invalid(interp.pc(), "extension reference"))?;
        let register = interp.context_mut::<FlagRegister>(ext);
        match self.mode {
            FlagMode::Set => register.set(atoms),
            FlagMode::Add => register.add(atoms),
            FlagMode::Remove => register.remove(&atoms),
        }
        Ok(())
    }

    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        dumper.operand_string_list("flags")
    }
}

struct FlagsTag;

impl TagDef for FlagsTag {
    fn name(&self) -> &'static str {
        "flags"
    }

    fn value(&self) -> Option<ArgKind> {
        Some(ArgKind::StringList)
    }

    fn validate(&self, _v: &mut Validator<'_>, value: Option<&mut Argument>) -> Option<ResolvedTag> {
        let items = value.and_then(|a| a.as_string_list().map(<[String]>::to_vec))?;
        Some(ResolvedTag::SideEffect {
            extension: CAPABILITY,
            code: SE_FLAGS,
            payload: OperandValue::StringList(flag_atoms(&items)),
        })
    }

    fn implicit(&self) -> Option<ResolvedTag> {
        Some(ResolvedTag::SideEffect {
            extension: CAPABILITY,
            code: SE_FLAGS,
            payload: OperandValue::Omitted,
        })
    }
}

struct FlagsSideEffectDef;

impl SideEffectDef for FlagsSideEffectDef {
    fn name(&self) -> &'static str {
        "flags"
    }

    fn read(
        &self,
        interp: &mut Interpreter<'_>,
        ext: ExtId,
    ) -> Result<Box<dyn SideEffect>, CorruptError> {
        let block = interp.block();
        let offset = *interp.pc_mut();
        let flags = match read_operand_value(block, interp.pc_mut())? {
            DecodedValue::StringList(items) => flag_atoms(&items),
            // Omitted payload: snapshot the register as it stands now.
            DecodedValue::Omitted => interp.context_mut::<FlagRegister>(ext).flags().to_vec(),
            _ => {
                return Err(CorruptError::Invalid {
                    offset,
                    what: "flags side effect payload",
                })
            }
        };
        Ok(Box::new(FlagsEffect { flags }))
    }

    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        let block = dumper.block();
        let offset = *dumper.address_mut();
        match read_operand_value(block, dumper.address_mut())? {
            DecodedValue::StringList(items) => {
                dumper.note(&format!("  flags: {items:?}"));
                Ok(())
            }
            DecodedValue::Omitted => {
                dumper.note("  flags: (from flag register)");
                Ok(())
            }
            _ => Err(CorruptError::Invalid {
                offset,
                what: "flags side effect payload",
            }),
        }
    }
}

/// Applies flags to the store action it is attached to.
pub struct FlagsEffect {
    flags: Vec<String>,
}

impl SideEffect for FlagsEffect {
    fn name(&self) -> &'static str {
        "flags"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn merge(&mut self, other: Box<dyn SideEffect>) {
        if let Some(other) = other.as_any().downcast_ref::<FlagsEffect>() {
            for flag in &other.flags {
                if !self.flags.iter().any(|f| f.eq_ignore_ascii_case(flag)) {
                    self.flags.push(flag.clone());
                }
            }
        }
    }

    fn pre_execute(&mut self, action: &mut dyn Action, _env: &mut dyn ScriptEnv) -> Result<(), String> {
        if let Some(store) = action.as_any_mut().downcast_mut::<StoreAction>() {
            store.add_flags(&self.flags);
        }
        Ok(())
    }
}
