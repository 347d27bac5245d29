//! The process-wide extension registry.
//!
//! Built once at startup, frozen, and shared by reference across every
//! compile and every run. Commands, tests, operations, operands, and side
//! effects are trait objects looked up by identifier or by
//! `(extension id, local code)`; the ids recorded in a compiled binary are
//! re-resolved against this table before execution.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use sieve_binary::CorruptError;

use crate::ast::{ArgKind, CommandNode, ResolvedTag, TestNode};
use crate::diagnostics::Diagnostic;
use crate::dump::Dumper;
use crate::generate::CodeGen;
use crate::interp::{Interpreter, RuntimeError};
use crate::lang;
use crate::validate::Validator;

/// Index of a registered extension within the registry.
pub type ExtId = usize;

/// A pluggable bundle of commands, tests, operations, and side effects.
///
/// Registered once before any script compiles; never mutated afterwards.
/// Per-run state lives in the interpreter's per-extension context, not here.
pub trait Extension: Send + Sync {
    fn name(&self) -> &'static str;

    fn commands(&self) -> Vec<Box<dyn CommandDef>> {
        Vec::new()
    }

    /// Operations contributed by this extension; the opcode is the index
    /// into this list.
    fn operations(&self) -> Vec<Box<dyn Operation>> {
        Vec::new()
    }

    /// Side-effect definitions; the wire code is the index into this list.
    fn side_effects(&self) -> Vec<Box<dyn SideEffectDef>> {
        Vec::new()
    }

    /// Tags this extension contributes to commands owned by others.
    fn external_tags(&self) -> Vec<ExternalTag> {
        Vec::new()
    }

    /// Opaque header data recorded in the binary's extension table.
    fn binary_header(&self) -> Option<Vec<u8>> {
        None
    }

    /// Re-validates header data when a binary is loaded.
    fn load_binary_header(&self, _data: &[u8]) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Command,
    Test,
}

/// Whether a command carries a `{ ... }` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockUse {
    Forbidden,
    Required,
}

/// How many subtests a test accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestUse {
    None,
    One,
    Many,
}

/// One command or test contributed to the grammar.
///
/// The validator performs the generic shape checks (arity, argument kinds,
/// tag dispatch); `validate_command`/`validate_test` run after those for
/// definition-specific checks and literal rewrites.
pub trait CommandDef: Send + Sync {
    fn identifier(&self) -> &'static str;
    fn kind(&self) -> CommandKind;

    /// Expected kinds of the positional arguments, in order.
    fn positional(&self) -> &'static [ArgKind] {
        &[]
    }

    /// Number of leading positional arguments that are mandatory.
    fn required_positional(&self) -> usize {
        self.positional().len()
    }

    fn block(&self) -> BlockUse {
        BlockUse::Forbidden
    }

    /// Whether the command takes a test (`if`/`elsif`).
    fn takes_test(&self) -> bool {
        false
    }

    fn subtests(&self) -> TestUse {
        TestUse::None
    }

    /// Tagged arguments owned by this definition.
    fn tags(&self) -> &'static [&'static dyn TagDef] {
        &[]
    }

    fn validate_command(&self, _v: &mut Validator<'_>, _node: &mut CommandNode) {}

    fn validate_test(&self, _v: &mut Validator<'_>, _node: &mut TestNode) {}

    fn generate_command(&self, _gen: &mut CodeGen<'_>, node: &CommandNode) -> Result<(), Diagnostic> {
        Err(Diagnostic::error(
            "internal",
            node.span,
            format!("command {:?} has no generator", self.identifier()),
        ))
    }

    fn generate_test(&self, _gen: &mut CodeGen<'_>, node: &TestNode) -> Result<(), Diagnostic> {
        Err(Diagnostic::error(
            "internal",
            node.span,
            format!("test {:?} has no generator", self.identifier()),
        ))
    }
}

/// A tagged argument definition.
pub trait TagDef: Send + Sync {
    /// Tag name without the leading colon.
    fn name(&self) -> &'static str;

    /// Kind of the value argument following the tag, if it takes one.
    fn value(&self) -> Option<ArgKind> {
        None
    }

    /// Definition-specific validation of the (already kind-checked) value;
    /// returns what the generator should emit for this tag.
    fn validate(&self, v: &mut Validator<'_>, value: Option<&mut crate::ast::Argument>)
        -> Option<ResolvedTag>;

    /// Emitted when the owning extension is required but the tag was not
    /// written explicitly; lets an extension decorate a host command by
    /// default (the flag-register side effect does this).
    fn implicit(&self) -> Option<ResolvedTag> {
        None
    }
}

/// A tag contributed to another extension's (or the core's) command.
pub struct ExternalTag {
    pub host_command: &'static str,
    pub tag: Box<dyn TagDef>,
}

/// One bytecode operation.
pub trait Operation: Send + Sync {
    fn mnemonic(&self) -> &'static str;

    /// Executes the operation; the interpreter's cursor is positioned at
    /// the operation's operand stream.
    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError>;

    /// Renders the operand stream for the disassembler, consuming exactly
    /// the bytes `execute` would.
    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError>;
}

/// A side-effect kind: decodes instances from the operand stream.
pub trait SideEffectDef: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decodes one instance. `ext` is the owning extension's registry id,
    /// handed back so the definition can reach its runtime context.
    fn read(
        &self,
        interp: &mut Interpreter<'_>,
        ext: ExtId,
    ) -> Result<Box<dyn crate::actions::SideEffect>, CorruptError>;

    /// Renders the payload for the disassembler.
    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError>;
}

struct RegisteredExtension {
    ext: Box<dyn Extension>,
    commands: Vec<Box<dyn CommandDef>>,
    operations: Vec<Box<dyn Operation>>,
    side_effects: Vec<Box<dyn SideEffectDef>>,
}

/// The frozen registry.
pub struct ExtensionRegistry {
    core_commands: Vec<Box<dyn CommandDef>>,
    core_operations: Vec<Box<dyn Operation>>,
    extensions: Vec<RegisteredExtension>,
    by_identifier: BTreeMap<&'static str, (Option<ExtId>, usize)>,
    external_tags: Vec<(&'static str, ExtId, Box<dyn TagDef>)>,
}

impl ExtensionRegistry {
    pub fn extension(&self, name: &str) -> Option<ExtId> {
        self.extensions.iter().position(|e| e.ext.name() == name)
    }

    pub fn extension_name(&self, id: ExtId) -> Option<&'static str> {
        self.extensions.get(id).map(|e| e.ext.name())
    }

    pub fn extension_def(&self, id: ExtId) -> Option<&dyn Extension> {
        self.extensions.get(id).map(|e| e.ext.as_ref())
    }

    pub fn command(&self, identifier: &str) -> Option<(Option<ExtId>, &dyn CommandDef)> {
        let (owner, index) = *self.by_identifier.get(identifier)?;
        let def = match owner {
            None => self.core_commands[index].as_ref(),
            Some(ext) => self.extensions[ext].commands[index].as_ref(),
        };
        Some((owner, def))
    }

    pub fn operation(&self, ext: Option<ExtId>, opcode: u64) -> Option<&dyn Operation> {
        let table = match ext {
            None => &self.core_operations,
            Some(id) => &self.extensions.get(id)?.operations,
        };
        let index = usize::try_from(opcode).ok()?;
        table.get(index).map(Box::as_ref)
    }

    pub fn side_effect(&self, ext: ExtId, code: u64) -> Option<&dyn SideEffectDef> {
        let index = usize::try_from(code).ok()?;
        self.extensions.get(ext)?.side_effects.get(index).map(Box::as_ref)
    }

    /// Tags other extensions registered on `command`, with their owners.
    pub fn external_tags_for<'a>(&'a self, command: &'a str) -> impl Iterator<Item = (ExtId, &'a dyn TagDef)> + 'a {
        self.external_tags
            .iter()
            .filter(move |(host, _, _)| *host == command)
            .map(|(_, owner, tag)| (*owner, tag.as_ref()))
    }
}

/// Builds an [`ExtensionRegistry`]; the core grammar is preloaded.
pub struct RegistryBuilder {
    registry: ExtensionRegistry,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        let mut registry = ExtensionRegistry {
            core_commands: lang::core_commands(),
            core_operations: lang::core_operations(),
            extensions: Vec::new(),
            by_identifier: BTreeMap::new(),
            external_tags: Vec::new(),
        };
        for (index, def) in registry.core_commands.iter().enumerate() {
            registry.by_identifier.insert(def.identifier(), (None, index));
        }
        Self { registry }
    }

    /// Registers an extension. Identifier and name collisions are refused;
    /// external tags whose host command never materializes are kept and
    /// simply never consulted.
    pub fn register(&mut self, ext: Box<dyn Extension>) -> Result<ExtId, String> {
        let name = ext.name();
        if self.registry.extension(name).is_some() {
            return Err(format!("extension {name:?} is already registered"));
        }
        let id = self.registry.extensions.len();
        let commands = ext.commands();
        // Refuse the whole registration before touching the tables.
        for def in &commands {
            let identifier = def.identifier();
            if self.registry.by_identifier.contains_key(identifier) {
                return Err(format!(
                    "extension {name:?} redefines identifier {identifier:?}"
                ));
            }
        }
        for (index, def) in commands.iter().enumerate() {
            self.registry.by_identifier.insert(def.identifier(), (Some(id), index));
        }
        for tag in ext.external_tags() {
            self.registry.external_tags.push((tag.host_command, id, tag.tag));
        }
        self.registry.extensions.push(RegisteredExtension {
            operations: ext.operations(),
            side_effects: ext.side_effects(),
            commands,
            ext,
        });
        Ok(id)
    }

    pub fn build(self) -> ExtensionRegistry {
        self.registry
    }
}

static CORE_REGISTRY: Lazy<ExtensionRegistry> = Lazy::new(|| RegistryBuilder::new().build());

/// The shared core-only registry: the RFC base grammar with no extensions.
pub fn core_shared() -> &'static ExtensionRegistry {
    &CORE_REGISTRY
}
