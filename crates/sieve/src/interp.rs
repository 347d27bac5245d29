//! The bytecode interpreter.
//!
//! A straight-line dispatch loop over the main block: decode one operation
//! at the program counter, advance past it, and hand control to the owning
//! extension's execute callback with the cursor positioned at its operands.
//! All interpreter state is explicit fields; nothing survives the run.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use sieve_binary::{Block, CorruptError};

use crate::actions::{Action, SideEffect};
use crate::binary::SieveBinary;
use crate::environment::MailMessage;
use crate::operands::{self, DecodedValue, StringListReader};
use crate::registry::{ExtId, ExtensionRegistry};
use crate::result::SieveResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// The binary does not decode to what a correct generator produces.
    Corrupt,
    /// A well-formed opcode executed, but the operation itself failed.
    Execution,
    /// Two actions of the same definition collided.
    Duplicate,
    /// Two actions with conflicting dispositions collided.
    Conflict,
    /// An instance or result cap was exceeded.
    Limit,
}

impl RuntimeErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeErrorKind::Corrupt => "corrupt binary",
            RuntimeErrorKind::Execution => "execution failure",
            RuntimeErrorKind::Duplicate => "duplicate action",
            RuntimeErrorKind::Conflict => "conflicting actions",
            RuntimeErrorKind::Limit => "limit exceeded",
        }
    }
}

/// A fatal runtime error. The run aborts; it is never retried internally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
    /// Source line of the operation that raised the error, when the debug
    /// block knows it.
    pub line: Option<u32>,
    /// Source line of the earlier action involved in a duplicate/conflict.
    pub related_line: Option<u32>,
}

impl RuntimeError {
    pub fn corrupt(err: CorruptError) -> Self {
        Self {
            kind: RuntimeErrorKind::Corrupt,
            message: err.to_string(),
            line: None,
            related_line: None,
        }
    }

    pub fn execution(message: String, line: Option<u32>) -> Self {
        Self {
            kind: RuntimeErrorKind::Execution,
            message,
            line,
            related_line: None,
        }
    }

    pub fn duplicate(message: String, line: Option<u32>, related_line: Option<u32>) -> Self {
        Self {
            kind: RuntimeErrorKind::Duplicate,
            message,
            line,
            related_line,
        }
    }

    pub fn conflict(message: String, line: Option<u32>, related_line: Option<u32>) -> Self {
        Self {
            kind: RuntimeErrorKind::Conflict,
            message,
            line,
            related_line,
        }
    }

    pub fn limit(message: String, line: Option<u32>) -> Self {
        Self {
            kind: RuntimeErrorKind::Limit,
            message,
            line,
            related_line: None,
        }
    }

    /// A structural mismatch in the operand stream.
    pub fn corrupt_invalid(offset: usize, what: &'static str) -> Self {
        Self::corrupt(CorruptError::Invalid { offset, what })
    }

    fn or_line(mut self, line: Option<u32>) -> Self {
        if self.line.is_none() {
            self.line = line;
        }
        self
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)?;
        if let Some(line) = self.line {
            write!(f, " (line {line}")?;
            if let Some(prior) = self.related_line {
                write!(f, ", earlier action at line {prior}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// How a run ended when it did not fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The program counter reached the end of the main block.
    Finished,
    /// A stop operation interrupted the dispatch loop.
    Stopped,
}

/// Receives one event per executed operation; optional.
pub trait Tracer {
    fn operation(&mut self, address: usize, mnemonic: &str);

    fn action(&mut self, _name: &str, _description: &str) {}
}

/// One entry of a decoded optional-operand run.
pub enum OptOperand {
    Tagged { opt_code: u64, value: DecodedValue },
    SideEffect(Box<dyn SideEffect>),
}

/// Splits a decoded run into side effects and tagged values.
pub fn split_opt_operands(
    operands: Vec<OptOperand>,
) -> (Vec<Box<dyn SideEffect>>, Vec<(u64, DecodedValue)>) {
    let mut side_effects = Vec::new();
    let mut tagged = Vec::new();
    for op in operands {
        match op {
            OptOperand::SideEffect(se) => side_effects.push(se),
            OptOperand::Tagged { opt_code, value } => tagged.push((opt_code, value)),
        }
    }
    (side_effects, tagged)
}

/// Per-run interpreter state.
pub struct Interpreter<'a> {
    binary: &'a SieveBinary,
    registry: &'a ExtensionRegistry,
    message: &'a dyn MailMessage,
    result: &'a mut SieveResult,
    tracer: Option<&'a mut dyn Tracer>,
    block: &'a Block,
    pc: usize,
    test_result: bool,
    interrupted: bool,
    current_ext: Option<ExtId>,
    current_line: Option<u32>,
    ext_context: BTreeMap<ExtId, Box<dyn Any + Send>>,
}

/// Executes the main block of `binary` against `message`, appending actions
/// to `result`.
pub fn run<'a>(
    binary: &'a SieveBinary,
    registry: &'a ExtensionRegistry,
    message: &'a dyn MailMessage,
    result: &'a mut SieveResult,
    tracer: Option<&'a mut dyn Tracer>,
) -> Result<RunOutcome, RuntimeError> {
    let mut interp = Interpreter {
        binary,
        registry,
        message,
        result,
        tracer,
        block: binary.main(),
        pc: 0,
        test_result: false,
        interrupted: false,
        current_ext: None,
        current_line: None,
        ext_context: BTreeMap::new(),
    };
    interp.dispatch()
}

impl<'a> Interpreter<'a> {
    fn dispatch(&mut self) -> Result<RunOutcome, RuntimeError> {
        loop {
            if self.interrupted {
                return Ok(RunOutcome::Stopped);
            }
            if self.pc >= self.block.len() {
                return Ok(RunOutcome::Finished);
            }
            let block = self.block;
            let registry = self.registry;
            let op_address = self.pc;
            self.current_line = self.binary.source_line(op_address);

            let ext_wire = block.read_varint(&mut self.pc).map_err(RuntimeError::corrupt)?;
            let ext = match ext_wire {
                0 => None,
                id => Some(self.binary.resolve_ext(id).ok_or_else(|| {
                    RuntimeError::corrupt(CorruptError::Invalid {
                        offset: op_address,
                        what: "extension reference",
                    })
                })?),
            };
            let opcode = block.read_varint(&mut self.pc).map_err(RuntimeError::corrupt)?;
            let op = registry.operation(ext, opcode).ok_or_else(|| {
                RuntimeError::corrupt(CorruptError::Invalid {
                    offset: op_address,
                    what: "opcode",
                })
            })?;

            self.current_ext = ext;
            if let Some(tracer) = self.tracer.as_deref_mut() {
                tracer.operation(op_address, op.mnemonic());
            }
            let line = self.current_line;
            op.execute(self).map_err(|e| e.or_line(line))?;
        }
    }

    pub fn message(&self) -> &'a dyn MailMessage {
        self.message
    }

    pub fn registry(&self) -> &'a ExtensionRegistry {
        self.registry
    }

    /// The raw main block; side-effect decoders read their payload here.
    pub fn block(&self) -> &'a Block {
        self.block
    }

    pub fn pc_mut(&mut self) -> &mut usize {
        &mut self.pc
    }

    pub fn test_result(&self) -> bool {
        self.test_result
    }

    pub fn set_test_result(&mut self, value: bool) {
        self.test_result = value;
    }

    /// Requests a halt; checked once per dispatch iteration, so no further
    /// operation executes after the current one returns.
    pub fn interrupt(&mut self) {
        self.interrupted = true;
    }

    /// Extension owning the currently executing operation.
    pub fn current_ext(&self) -> Option<ExtId> {
        self.current_ext
    }

    /// Source line of the currently executing operation.
    pub fn current_line(&self) -> Option<u32> {
        self.current_line
    }

    /// Per-extension runtime context, created on first access.
    pub fn context_mut<T: Default + Send + 'static>(&mut self, ext: ExtId) -> &mut T {
        self.ext_context
            .entry(ext)
            .or_insert_with(|| Box::<T>::default())
            .downcast_mut::<T>()
            .expect("extension context type is stable for one extension")
    }

    fn corrupt(err: CorruptError) -> RuntimeError {
        RuntimeError::corrupt(err)
    }

    pub fn exec_error(&self, message: String) -> RuntimeError {
        RuntimeError::execution(message, self.current_line)
    }

    pub fn read_number(&mut self) -> Result<u64, RuntimeError> {
        let block = self.block;
        operands::read_number(block, &mut self.pc).map_err(Self::corrupt)
    }

    pub fn read_string(&mut self) -> Result<&'a str, RuntimeError> {
        let block = self.block;
        operands::read_string(block, &mut self.pc).map_err(Self::corrupt)
    }

    pub fn read_opt_string(&mut self) -> Result<Option<&'a str>, RuntimeError> {
        let block = self.block;
        operands::read_opt_string(block, &mut self.pc).map_err(Self::corrupt)
    }

    pub fn read_string_list(&mut self) -> Result<StringListReader<'a>, RuntimeError> {
        let block = self.block;
        operands::read_string_list(block, &mut self.pc).map_err(Self::corrupt)
    }

    /// Reads an absolute jump target and moves the program counter there.
    pub fn take_jump(&mut self) -> Result<(), RuntimeError> {
        let target = self.read_jump_target()?;
        self.pc = target;
        Ok(())
    }

    /// Moves the program counter to an already-validated target.
    pub fn jump_to(&mut self, target: usize) {
        self.pc = target;
    }

    /// Current program counter, for error offsets.
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Reads an absolute jump target without taking it.
    pub fn read_jump_target(&mut self) -> Result<usize, RuntimeError> {
        let block = self.block;
        let offset = self.pc;
        let target = block.read_u32(&mut self.pc).map_err(Self::corrupt)? as usize;
        if target > block.len() {
            return Err(Self::corrupt(CorruptError::Invalid {
                offset,
                what: "jump target",
            }));
        }
        Ok(target)
    }

    /// Decodes the optional-operand run at the cursor into an explicit list.
    pub fn read_optional_operands(&mut self) -> Result<Vec<OptOperand>, RuntimeError> {
        let block = self.block;
        let registry = self.registry;
        let mut out = Vec::new();
        loop {
            let offset = self.pc;
            let opt_code = block.read_varint(&mut self.pc).map_err(Self::corrupt)?;
            match opt_code {
                operands::opt::END => return Ok(out),
                operands::opt::SIDE_EFFECT => {
                    let ext_wire = block.read_varint(&mut self.pc).map_err(Self::corrupt)?;
                    let ext = self.binary.resolve_ext(ext_wire).ok_or_else(|| {
                        Self::corrupt(CorruptError::Invalid {
                            offset,
                            what: "side effect extension",
                        })
                    })?;
                    let code = block.read_varint(&mut self.pc).map_err(Self::corrupt)?;
                    let def = registry.side_effect(ext, code).ok_or_else(|| {
                        Self::corrupt(CorruptError::Invalid {
                            offset,
                            what: "side effect code",
                        })
                    })?;
                    let instance = def.read(self, ext).map_err(Self::corrupt)?;
                    out.push(OptOperand::SideEffect(instance));
                }
                _ => {
                    let value =
                        operands::read_operand_value(block, &mut self.pc).map_err(Self::corrupt)?;
                    out.push(OptOperand::Tagged { opt_code, value });
                }
            }
        }
    }

    /// Fails when a run carried tagged operands the operation does not take.
    pub fn expect_no_tagged(&self, tagged: &[(u64, DecodedValue)]) -> Result<(), RuntimeError> {
        match tagged.first() {
            None => Ok(()),
            Some(_) => Err(RuntimeError::corrupt_invalid(
                self.pc,
                "optional operand code",
            )),
        }
    }

    /// Appends an action to the result, recording the current source line.
    pub fn add_action(
        &mut self,
        action: Box<dyn Action>,
        side_effects: Vec<Box<dyn SideEffect>>,
        instance_limit: Option<usize>,
    ) -> Result<(), RuntimeError> {
        if let Some(tracer) = self.tracer.as_deref_mut() {
            tracer.action(action.name(), &action.describe());
        }
        self.result
            .add_action(action, side_effects, self.current_line, instance_limit)
    }

    /// Cancels the implicit keep on the result (discard).
    pub fn cancel_implicit_keep(&mut self) {
        self.result.cancel_implicit_keep();
    }
}
