//! Bytecode generation from a validated script tree.
//!
//! One operation record per command/test node: `(extension ref, opcode)`
//! followed by mandatory operands in fixed order, then the optional-operand
//! run. Control structures compile to conditional jumps with forward-patched
//! absolute targets inside the same block.

use sieve_binary::Container;

use crate::ast::{CommandNode, ResolvedTag, Script, TestNode};
use crate::binary::{encode_debug_table, SieveBinary};
use crate::diagnostics::Diagnostic;
use crate::lang;
use crate::operands::{self, opt};
use crate::registry::{ExtId, ExtensionRegistry};

/// Emission state for one compile.
pub struct CodeGen<'r> {
    registry: &'r ExtensionRegistry,
    container: Container,
    link: Vec<ExtId>,
    debug: Vec<(u32, u32)>,
}

impl<'r> CodeGen<'r> {
    fn new(registry: &'r ExtensionRegistry) -> Self {
        Self {
            registry,
            container: Container::new(),
            link: Vec::new(),
            debug: Vec::new(),
        }
    }

    pub fn registry(&self) -> &'r ExtensionRegistry {
        self.registry
    }

    /// Current emission address in the main block.
    pub fn here(&self) -> u32 {
        self.container.main().len() as u32
    }

    /// Binary-local id for `ext`, recording it in the extension table on
    /// first use (including its header hook data).
    fn ext_wire_id(&mut self, ext: ExtId) -> Result<u64, Diagnostic> {
        if let Some(index) = self.link.iter().position(|e| *e == ext) {
            return Ok(index as u64 + 1);
        }
        let def = self.registry.extension_def(ext).ok_or_else(|| {
            Diagnostic::error(
                "internal",
                Default::default(),
                format!("unregistered extension id {ext}"),
            )
        })?;
        let id = self.container.add_extension(def.name(), def.binary_header());
        self.link.push(ext);
        Ok(id)
    }

    /// Emits an operation record and its debug-line entry.
    pub fn emit_operation(
        &mut self,
        ext: Option<ExtId>,
        opcode: u64,
        line: u32,
    ) -> Result<(), Diagnostic> {
        let wire = match ext {
            None => 0,
            Some(ext) => self.ext_wire_id(ext)?,
        };
        self.debug.push((self.here(), line));
        let block = self.container.main_mut();
        block.write_varint(wire);
        block.write_varint(opcode);
        Ok(())
    }

    pub fn emit_number(&mut self, value: u64) {
        operands::write_number(self.container.main_mut(), value);
    }

    pub fn emit_string(&mut self, value: &str) {
        operands::write_string(self.container.main_mut(), value);
    }

    pub fn emit_omitted(&mut self) {
        operands::write_omitted(self.container.main_mut());
    }

    pub fn emit_string_list(&mut self, items: &[String]) {
        operands::write_string_list(self.container.main_mut(), items);
    }

    /// Emits the optional-operand run for a node's resolved tags, then the
    /// terminating sentinel.
    pub fn emit_optional_run(&mut self, tags: &[ResolvedTag]) -> Result<(), Diagnostic> {
        for tag in tags {
            match tag {
                ResolvedTag::Operand { opt_code, value } => {
                    debug_assert!(*opt_code >= opt::FIRST_CUSTOM);
                    self.container.main_mut().write_varint(*opt_code);
                    operands::write_operand(self.container.main_mut(), value);
                }
                ResolvedTag::SideEffect {
                    extension,
                    code,
                    payload,
                } => {
                    let ext = self.registry.extension(extension).ok_or_else(|| {
                        Diagnostic::error(
                            "internal",
                            Default::default(),
                            format!("side effect references unregistered extension {extension:?}"),
                        )
                    })?;
                    let wire = self.ext_wire_id(ext)?;
                    let block = self.container.main_mut();
                    block.write_varint(opt::SIDE_EFFECT);
                    block.write_varint(wire);
                    block.write_varint(*code);
                    operands::write_operand(self.container.main_mut(), payload);
                }
            }
        }
        self.container.main_mut().write_varint(opt::END);
        Ok(())
    }

    /// Emits a jump operation with a placeholder target; returns the patch
    /// site.
    pub fn emit_jump(&mut self, opcode: u64, line: u32) -> Result<usize, Diagnostic> {
        self.emit_operation(None, opcode, line)?;
        Ok(self.container.main_mut().reserve_u32())
    }

    /// Resolves a forward jump to the current address.
    pub fn patch_here(&mut self, site: usize) {
        let here = self.here();
        self.container.main_mut().patch_u32(site, here);
    }

    /// Generates one test node through its definition.
    pub fn generate_test(&mut self, node: &TestNode) -> Result<(), Diagnostic> {
        let (_, def) = self.registry.command(&node.identifier).ok_or_else(|| {
            Diagnostic::error(
                "internal",
                node.span,
                format!("unknown test {:?} reached the generator", node.identifier),
            )
        })?;
        def.generate_test(self, node)
    }

    /// Generates a command sequence, folding `if`/`elsif`/`else` chains into
    /// jump-patched branches.
    pub fn generate_block(&mut self, commands: &[CommandNode]) -> Result<(), Diagnostic> {
        let mut index = 0;
        while index < commands.len() {
            let node = &commands[index];
            match node.identifier.as_str() {
                "if" => {
                    let mut branches: Vec<&CommandNode> = vec![node];
                    let mut else_block: Option<&CommandNode> = None;
                    index += 1;
                    while index < commands.len() {
                        match commands[index].identifier.as_str() {
                            "elsif" => {
                                branches.push(&commands[index]);
                                index += 1;
                            }
                            "else" => {
                                else_block = Some(&commands[index]);
                                index += 1;
                                break;
                            }
                            _ => break,
                        }
                    }
                    self.generate_if_chain(&branches, else_block)?;
                }
                "elsif" | "else" => {
                    return Err(Diagnostic::error(
                        "internal",
                        node.span,
                        format!("misplaced {:?} reached the generator", node.identifier),
                    ));
                }
                _ => {
                    let (_, def) = self.registry.command(&node.identifier).ok_or_else(|| {
                        Diagnostic::error(
                            "internal",
                            node.span,
                            format!("unknown command {:?} reached the generator", node.identifier),
                        )
                    })?;
                    def.generate_command(self, node)?;
                    index += 1;
                }
            }
        }
        Ok(())
    }

    fn generate_if_chain(
        &mut self,
        branches: &[&CommandNode],
        else_block: Option<&CommandNode>,
    ) -> Result<(), Diagnostic> {
        let mut end_sites = Vec::new();
        for (position, branch) in branches.iter().enumerate() {
            let test = branch.test.as_ref().ok_or_else(|| {
                Diagnostic::error(
                    "internal",
                    branch.span,
                    "conditional without a test reached the generator".to_string(),
                )
            })?;
            self.generate_test(test)?;
            let skip = self.emit_jump(lang::opcodes::JMPFALSE, branch.span.line)?;
            self.generate_block(&branch.block)?;
            let last = position + 1 == branches.len() && else_block.is_none();
            if !last {
                end_sites.push(self.emit_jump(lang::opcodes::JMP, branch.span.line)?);
            }
            self.patch_here(skip);
        }
        if let Some(node) = else_block {
            self.generate_block(&node.block)?;
        }
        for site in end_sites {
            self.patch_here(site);
        }
        Ok(())
    }

    fn finish(mut self) -> SieveBinary {
        let debug_id = self.container.add_block();
        self.container
            .set_block(debug_id, encode_debug_table(&self.debug));
        self.container.set_debug_block(debug_id);
        SieveBinary::from_parts(self.container, self.link, self.debug)
    }
}

/// Generates the binary for a validated script.
pub fn generate(script: &Script, registry: &ExtensionRegistry) -> Result<SieveBinary, Diagnostic> {
    let mut gen = CodeGen::new(registry);
    gen.generate_block(&script.commands)?;
    Ok(gen.finish())
}
