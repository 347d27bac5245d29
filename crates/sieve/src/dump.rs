//! Human-readable disassembly of a compiled binary.
//!
//! The dumper mirrors the decode path exactly: it walks the same operation
//! and operand records the interpreter would, so a binary that dumps cleanly
//! also executes cleanly (and vice versa a corrupt stream fails both ways).
//! Output is a pure function of the binary, so repeated dumps are
//! byte-identical.

use std::fmt::Write as _;

use sieve_binary::{Block, CorruptError};

use crate::binary::SieveBinary;
use crate::operands::{self, opt, DecodedValue};
use crate::registry::ExtensionRegistry;

pub struct Dumper<'a> {
    binary: &'a SieveBinary,
    registry: &'a ExtensionRegistry,
    block: &'a Block,
    address: usize,
    out: String,
}

/// Disassembles the main block of `binary`.
pub fn dump(binary: &SieveBinary, registry: &ExtensionRegistry) -> Result<String, CorruptError> {
    let mut dumper = Dumper {
        binary,
        registry,
        block: binary.main(),
        address: 0,
        out: String::new(),
    };
    dumper.run()?;
    Ok(dumper.out)
}

impl<'a> Dumper<'a> {
    fn run(&mut self) -> Result<(), CorruptError> {
        writeln!(self.out, "; digest: sha256:{}", self.binary.digest_hex()).expect("write to string");
        for (index, ext) in self.binary.container().extensions().iter().enumerate() {
            writeln!(
                self.out,
                "; extension {}: {}{}",
                index + 1,
                ext.name,
                if ext.header.is_some() { " (+header)" } else { "" }
            )
            .expect("write to string");
        }

        while self.address < self.block.len() {
            let block = self.block;
            let registry = self.registry;
            let op_address = self.address;
            let ext_wire = block.read_varint(&mut self.address)?;
            let opcode = block.read_varint(&mut self.address)?;
            let ext = match ext_wire {
                0 => None,
                id => Some(self.binary.resolve_ext(id).ok_or(CorruptError::Invalid {
                    offset: op_address,
                    what: "extension reference",
                })?),
            };
            let op = registry.operation(ext, opcode).ok_or(CorruptError::Invalid {
                offset: op_address,
                what: "opcode",
            })?;
            let line = self.binary.source_line(op_address);
            match line {
                Some(line) => writeln!(
                    self.out,
                    "{op_address:08x}: [{line:>4}] {}",
                    op.mnemonic()
                )
                .expect("write to string"),
                None => writeln!(self.out, "{op_address:08x}: {}", op.mnemonic())
                    .expect("write to string"),
            }
            op.dump(self)?;
        }
        Ok(())
    }

    /// The raw block; side-effect definitions read their payload here.
    pub fn block(&self) -> &'a Block {
        self.block
    }

    pub fn address_mut(&mut self) -> &mut usize {
        &mut self.address
    }

    /// Emits one indented operand line.
    pub fn note(&mut self, text: &str) {
        writeln!(self.out, "              {text}").expect("write to string");
    }

    pub fn operand_number(&mut self, label: &str) -> Result<(), CorruptError> {
        let block = self.block;
        let value = operands::read_number(block, &mut self.address)?;
        self.note(&format!("{label}: {value}"));
        Ok(())
    }

    pub fn operand_string(&mut self, label: &str) -> Result<(), CorruptError> {
        let block = self.block;
        let value = operands::read_string(block, &mut self.address)?;
        let line = format!("{label}: {value:?}");
        self.note(&line);
        Ok(())
    }

    pub fn operand_opt_string(&mut self, label: &str) -> Result<(), CorruptError> {
        let block = self.block;
        let value = operands::read_opt_string(block, &mut self.address)?;
        let line = match value {
            Some(v) => format!("{label}: {v:?}"),
            None => format!("{label}: (omitted)"),
        };
        self.note(&line);
        Ok(())
    }

    pub fn operand_string_list(&mut self, label: &str) -> Result<(), CorruptError> {
        let block = self.block;
        let items = operands::read_string_list(block, &mut self.address)?.collect_items()?;
        let line = format!("{label}: {items:?}");
        self.note(&line);
        Ok(())
    }

    pub fn jump_target(&mut self, label: &str) -> Result<(), CorruptError> {
        let offset = self.address;
        let target = self.block.read_u32(&mut self.address)?;
        if target as usize > self.block.len() {
            return Err(CorruptError::Invalid {
                offset,
                what: "jump target",
            });
        }
        self.note(&format!("{label}: {target:08x}"));
        Ok(())
    }

    /// Walks an optional-operand run, rendering side effects through their
    /// definitions.
    pub fn optional_run(&mut self) -> Result<(), CorruptError> {
        let block = self.block;
        let registry = self.registry;
        loop {
            let offset = self.address;
            let opt_code = block.read_varint(&mut self.address)?;
            match opt_code {
                opt::END => return Ok(()),
                opt::SIDE_EFFECT => {
                    let ext_wire = block.read_varint(&mut self.address)?;
                    let ext = self.binary.resolve_ext(ext_wire).ok_or(CorruptError::Invalid {
                        offset,
                        what: "side effect extension",
                    })?;
                    let code = block.read_varint(&mut self.address)?;
                    let def = registry.side_effect(ext, code).ok_or(CorruptError::Invalid {
                        offset,
                        what: "side effect code",
                    })?;
                    let name = registry.extension_name(ext).unwrap_or("?");
                    self.note(&format!("side effect {}.{}", name, def.name()));
                    def.dump(self)?;
                }
                _ => {
                    let block = self.block;
                    let value = operands::read_operand_value(block, &mut self.address)?;
                    self.note(&format!("opt {opt_code}: {}", format_value(&value)));
                }
            }
        }
    }
}

fn format_value(value: &DecodedValue) -> String {
    match value {
        DecodedValue::Omitted => "(omitted)".to_string(),
        DecodedValue::Number(n) => n.to_string(),
        DecodedValue::String(s) => format!("{s:?}"),
        DecodedValue::StringList(items) => format!("{items:?}"),
    }
}
