//! The `vacation` extension: duplicate-guarded auto-replies.
//!
//! Capability string: `"vacation"`. One response per sender per period,
//! tracked through the environment's duplicate store. The response is
//! addressed to the envelope sender; a missing sender suppresses the reply
//! instead of failing the run.

use std::any::Any;

use sieve::actions::{Action, ActionFlags, DuplicateVerdict};
use sieve::address;
use sieve::ast::{ArgKind, Argument, ArgValue, CommandNode, ResolvedTag};
use sieve::diagnostics::Diagnostic;
use sieve::dump::Dumper;
use sieve::environment::ScriptEnv;
use sieve::generate::CodeGen;
use sieve::interp::{split_opt_operands, Interpreter, RuntimeError};
use sieve::operands::OperandValue;
use sieve::registry::{CommandDef, CommandKind, Extension, Operation, TagDef};
use sieve::result::CommitCtx;
use sieve::validate::Validator;
use sieve_binary::CorruptError;

pub const CAPABILITY: &str = "vacation";

const OP_VACATION: u64 = 0;

const OPT_DAYS: u64 = 2;
const OPT_SUBJECT: u64 = 3;
const OPT_FROM: u64 = 4;

/// Default and minimum response period, in days.
const DEFAULT_DAYS: u64 = 7;
const MIN_DAYS: u64 = 1;

pub struct VacationExtension;

impl Extension for VacationExtension {
    fn name(&self) -> &'static str {
        CAPABILITY
    }

    fn commands(&self) -> Vec<Box<dyn CommandDef>> {
        vec![Box::new(VacationCommand)]
    }

    fn operations(&self) -> Vec<Box<dyn Operation>> {
        vec![Box::new(VacationOp)]
    }
}

struct DaysTag;

impl TagDef for DaysTag {
    fn name(&self) -> &'static str {
        "days"
    }

    fn value(&self) -> Option<ArgKind> {
        Some(ArgKind::Number)
    }

    fn validate(&self, _v: &mut Validator<'_>, value: Option<&mut Argument>) -> Option<ResolvedTag> {
        let days = value.and_then(|a| a.as_number()).unwrap_or(DEFAULT_DAYS);
        Some(ResolvedTag::Operand {
            opt_code: OPT_DAYS,
            value: OperandValue::Number(days.max(MIN_DAYS)),
        })
    }
}

struct SubjectTag;

impl TagDef for SubjectTag {
    fn name(&self) -> &'static str {
        "subject"
    }

    fn value(&self) -> Option<ArgKind> {
        Some(ArgKind::String)
    }

    fn validate(&self, _v: &mut Validator<'_>, value: Option<&mut Argument>) -> Option<ResolvedTag> {
        let subject = value.and_then(|a| a.as_string().map(str::to_string))?;
        Some(ResolvedTag::Operand {
            opt_code: OPT_SUBJECT,
            value: OperandValue::String(subject),
        })
    }
}

struct FromTag;

impl TagDef for FromTag {
    fn name(&self) -> &'static str {
        "from"
    }

    fn value(&self) -> Option<ArgKind> {
        Some(ArgKind::String)
    }

    fn validate(&self, v: &mut Validator<'_>, value: Option<&mut Argument>) -> Option<ResolvedTag> {
        let arg = value?;
        let ArgValue::String(raw) = &arg.value else {
            return None;
        };
        match address::normalize(raw) {
            Ok(normalized) => {
                arg.value = ArgValue::String(normalized.clone());
                Some(ResolvedTag::Operand {
                    opt_code: OPT_FROM,
                    value: OperandValue::String(normalized),
                })
            }
            Err(err) => {
                v.error("bad-address", arg.span, err);
                None
            }
        }
    }
}

static VACATION_TAGS: &[&dyn TagDef] = &[&DaysTag, &SubjectTag, &FromTag];

/// `vacation [:days n] [:subject s] [:from addr] <reason: string>`
pub struct VacationCommand;

impl CommandDef for VacationCommand {
    fn identifier(&self) -> &'static str {
        "vacation"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn positional(&self) -> &'static [ArgKind] {
        &[ArgKind::String]
    }

    fn tags(&self) -> &'static [&'static dyn TagDef] {
        VACATION_TAGS
    }

    fn generate_command(&self, gen: &mut CodeGen<'_>, node: &CommandNode) -> Result<(), Diagnostic> {
        let ext = gen.registry().extension(CAPABILITY).ok_or_else(|| {
            Diagnostic::error(
                "internal",
                node.span,
                "vacation generated without its extension registered".to_string(),
            )
        })?;
        gen.emit_operation(Some(ext), OP_VACATION, node.span.line)?;
        let reason = node.args.first().and_then(|a| a.as_string()).ok_or_else(|| {
            Diagnostic::error(
                "internal",
                node.span,
                "vacation without a reason reached the generator".to_string(),
            )
        })?;
        gen.emit_string(reason);
        gen.emit_optional_run(&node.resolved_tags)
    }
}

pub struct VacationOp;

impl Operation for VacationOp {
    fn mnemonic(&self) -> &'static str {
        "vacation"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let reason = interp.read_string()?.to_string();
        let opts = interp.read_optional_operands()?;
        let (side_effects, tagged) = split_opt_operands(opts);

        let mut days = DEFAULT_DAYS;
        let mut subject = None;
        let mut from = None;
        for (opt_code, value) in &tagged {
            match *opt_code {
                OPT_DAYS => {
                    days = value
                        .as_number()
                        .ok_or_else(|| RuntimeError::corrupt_invalid(interp.pc(), "days operand"))?;
                }
                OPT_SUBJECT => {
                    subject = Some(
                        value
                            .as_string()
                            .ok_or_else(|| {
                                RuntimeError::corrupt_invalid(interp.pc(), "subject operand")
                            })?
                            .to_string(),
                    );
                }
                OPT_FROM => {
                    from = Some(
                        value
                            .as_string()
                            .ok_or_else(|| {
                                RuntimeError::corrupt_invalid(interp.pc(), "from operand")
                            })?
                            .to_string(),
                    );
                }
                _ => {
                    return Err(RuntimeError::corrupt_invalid(
                        interp.pc(),
                        "optional operand code",
                    ))
                }
            }
        }

        let message = interp.message();
        let sender = message.sender();
        let original_subject = message.header("subject").into_iter().next();
        let action = VacationAction {
            reason,
            days,
            subject,
            from,
            sender,
            original_subject,
            suppressed: false,
        };
        interp.add_action(Box::new(action), side_effects, None)
    }

    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        dumper.operand_string("reason")?;
        dumper.optional_run()
    }
}

/// The auto-reply action. Never cancels the implicit keep.
pub struct VacationAction {
    reason: String,
    days: u64,
    subject: Option<String>,
    from: Option<String>,
    sender: Option<String>,
    original_subject: Option<String>,
    suppressed: bool,
}

impl VacationAction {
    fn duplicate_id(&self, sender: &str) -> Vec<u8> {
        let mut id = b"vacation:".to_vec();
        id.extend_from_slice(sender.as_bytes());
        id.push(b':');
        id.extend_from_slice(self.from.as_deref().unwrap_or("").as_bytes());
        id
    }

    fn response_subject(&self) -> String {
        match (&self.subject, &self.original_subject) {
            (Some(subject), _) => subject.clone(),
            (None, Some(original)) => format!("Auto: {original}"),
            (None, None) => "Automated reply".to_string(),
        }
    }
}

impl Action for VacationAction {
    fn name(&self) -> &'static str {
        "vacation"
    }

    fn flags(&self) -> ActionFlags {
        ActionFlags::respond()
    }

    fn describe(&self) -> String {
        "send vacation auto-reply".to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn equals(&self, other: &dyn Action) -> bool {
        other.as_any().is::<VacationAction>()
    }

    fn check_duplicate(&self, _prior: &dyn Action, prior_executed: bool) -> DuplicateVerdict {
        if prior_executed {
            DuplicateVerdict::AlreadyExecuted
        } else {
            DuplicateVerdict::Duplicate("multiple vacation responses in one run".to_string())
        }
    }

    fn execute(&mut self, env: &mut dyn ScriptEnv) -> Result<(), String> {
        let Some(sender) = self.sender.clone() else {
            self.suppressed = true;
            return Ok(());
        };
        if env.duplicate_seen(&self.duplicate_id(&sender)) {
            self.suppressed = true;
        }
        Ok(())
    }

    fn commit(&mut self, env: &mut dyn ScriptEnv, ctx: &mut CommitCtx<'_>) -> Result<(), String> {
        if self.suppressed {
            ctx.warn("vacation response suppressed".to_string());
            return Ok(());
        }
        let sender = self.sender.clone().unwrap_or_default();
        env.send_response(&sender, &self.response_subject(), &self.reason)?;
        env.duplicate_mark(&self.duplicate_id(&sender), self.days * 86_400);
        ctx.log(format!("sent vacation response to {sender:?}"));
        Ok(())
    }
}
