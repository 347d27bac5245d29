//! The `copy` extension: the `:copy` tag on `fileinto` and `redirect`.
//!
//! Capability string: `"copy"`. Contributes no command of its own; it
//! registers an external tag on two host commands it does not otherwise
//! know, compiled into a preserve-implicit-keep side effect on the host's
//! action. When a host command is not registered at all, the registration
//! is inert.

use std::any::Any;

use sieve::actions::{Action, SideEffect};
use sieve::ast::{Argument, ResolvedTag};
use sieve::dump::Dumper;
use sieve::interp::Interpreter;
use sieve::operands::{read_operand_value, DecodedValue, OperandValue};
use sieve::registry::{ExtId, Extension, ExternalTag, SideEffectDef, TagDef};
use sieve::result::CommitCtx;
use sieve::validate::Validator;
use sieve_binary::CorruptError;

pub const CAPABILITY: &str = "copy";

const SE_COPY: u64 = 0;

pub struct CopyExtension;

impl Extension for CopyExtension {
    fn name(&self) -> &'static str {
        CAPABILITY
    }

    fn external_tags(&self) -> Vec<ExternalTag> {
        vec![
            ExternalTag {
                host_command: "fileinto",
                tag: Box::new(CopyTag),
            },
            ExternalTag {
                host_command: "redirect",
                tag: Box::new(CopyTag),
            },
        ]
    }

    fn side_effects(&self) -> Vec<Box<dyn SideEffectDef>> {
        vec![Box::new(CopySideEffectDef)]
    }
}

struct CopyTag;

impl TagDef for CopyTag {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn validate(&self, _v: &mut Validator<'_>, _value: Option<&mut Argument>) -> Option<ResolvedTag> {
        Some(ResolvedTag::SideEffect {
            extension: CAPABILITY,
            code: SE_COPY,
            payload: OperandValue::Omitted,
        })
    }
}

struct CopySideEffectDef;

impl SideEffectDef for CopySideEffectDef {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn read(
        &self,
        interp: &mut Interpreter<'_>,
        _ext: ExtId,
    ) -> Result<Box<dyn SideEffect>, CorruptError> {
        let block = interp.block();
        let offset = *interp.pc_mut();
        match read_operand_value(block, interp.pc_mut())? {
            DecodedValue::Omitted => Ok(Box::new(CopyEffect)),
            _ => Err(CorruptError::Invalid {
                offset,
                what: "copy side effect payload",
            }),
        }
    }

    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        let block = dumper.block();
        let offset = *dumper.address_mut();
        match read_operand_value(block, dumper.address_mut())? {
            DecodedValue::Omitted => {
                dumper.note("  (preserve implicit keep)");
                Ok(())
            }
            _ => Err(CorruptError::Invalid {
                offset,
                what: "copy side effect payload",
            }),
        }
    }
}

/// Keeps the implicit keep alive through the host action's commit.
struct CopyEffect;

impl SideEffect for CopyEffect {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn post_commit(&mut self, _action: &mut dyn Action, ctx: &mut CommitCtx<'_>) {
        ctx.preserve_implicit_keep();
    }
}
