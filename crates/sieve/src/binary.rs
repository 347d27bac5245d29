//! A compiled program linked against the runtime registry.
//!
//! The raw container stores extension *names*; this wrapper resolves them
//! to registry ids at load time and fails closed when one is missing, so an
//! operation can never dispatch into an extension that is not present.

use sha2::{Digest, Sha256};
use sieve_binary::{Block, Container, CorruptError};

use crate::registry::{ExtId, ExtensionRegistry};

#[derive(Debug)]
pub struct SieveBinary {
    container: Container,
    /// Binary-local extension id (1-based) minus one, to registry id.
    link: Vec<ExtId>,
    /// Sorted `(address, source line)` pairs from the debug block.
    debug: Vec<(u32, u32)>,
}

impl SieveBinary {
    pub(crate) fn from_parts(container: Container, link: Vec<ExtId>, debug: Vec<(u32, u32)>) -> Self {
        Self {
            container,
            link,
            debug,
        }
    }

    /// Decodes and links a stored binary.
    pub fn load(bytes: &[u8], registry: &ExtensionRegistry) -> Result<Self, CorruptError> {
        let container = Container::from_bytes(bytes)?;
        Self::from_container(container, registry)
    }

    /// Links a decoded container against `registry`.
    pub fn from_container(
        container: Container,
        registry: &ExtensionRegistry,
    ) -> Result<Self, CorruptError> {
        let mut link = Vec::with_capacity(container.extensions().len());
        for entry in container.extensions() {
            let id = registry
                .extension(&entry.name)
                .ok_or_else(|| CorruptError::UnknownExtension {
                    name: entry.name.clone(),
                })?;
            if let Some(header) = &entry.header {
                let ext = registry
                    .extension_def(id)
                    .expect("extension id was just resolved");
                if ext.load_binary_header(header).is_err() {
                    return Err(CorruptError::Invalid {
                        offset: 0,
                        what: "extension header data",
                    });
                }
            }
            link.push(id);
        }
        let debug = decode_debug_table(container.debug_block())?;
        Ok(Self {
            container,
            link,
            debug,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.container.to_bytes()
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn main(&self) -> &Block {
        self.container.main()
    }

    /// Resolves a wire extension reference (1-based) to a registry id.
    pub fn resolve_ext(&self, wire: u64) -> Option<ExtId> {
        let index = usize::try_from(wire.checked_sub(1)?).ok()?;
        self.link.get(index).copied()
    }

    /// Source line recorded for the operation at `address`, if any.
    pub fn source_line(&self, address: usize) -> Option<u32> {
        let address = u32::try_from(address).ok()?;
        let index = self.debug.partition_point(|(a, _)| *a <= address);
        index.checked_sub(1).map(|i| self.debug[i].1)
    }

    /// Stable content digest of the serialized binary.
    pub fn digest_hex(&self) -> String {
        let digest = Sha256::digest(self.to_bytes());
        let mut out = String::with_capacity(64);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

fn decode_debug_table(block: Option<&Block>) -> Result<Vec<(u32, u32)>, CorruptError> {
    let Some(block) = block else {
        return Ok(Vec::new());
    };
    let mut address = 0;
    let count = block.read_varint(&mut address)?;
    let mut out = Vec::new();
    let mut prev: Option<u32> = None;
    for _ in 0..count {
        let offset = address;
        let op_address = block.read_varint(&mut address)?;
        let line = block.read_varint(&mut address)?;
        let op_address =
            u32::try_from(op_address).map_err(|_| CorruptError::OutOfBounds { offset })?;
        let line = u32::try_from(line).map_err(|_| CorruptError::OutOfBounds { offset })?;
        if prev.is_some_and(|p| op_address < p) {
            return Err(CorruptError::Invalid {
                offset,
                what: "debug table order",
            });
        }
        prev = Some(op_address);
        out.push((op_address, line));
    }
    if address != block.len() {
        return Err(CorruptError::Invalid {
            offset: address,
            what: "debug table trailing bytes",
        });
    }
    Ok(out)
}

pub(crate) fn encode_debug_table(pairs: &[(u32, u32)]) -> Block {
    let mut block = Block::new();
    block.write_varint(pairs.len() as u64);
    for (address, line) in pairs {
        block.write_varint(u64::from(*address));
        block.write_varint(u64::from(*line));
    }
    block
}
