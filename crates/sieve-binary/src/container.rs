//! The on-disk container: named blocks, extension table, debug block.

use sieve_contracts::{SIEVE_BINARY_MAGIC, SIEVE_BINARY_VERSION};

use crate::block::Block;
use crate::error::CorruptError;

/// One entry of the extension table recorded at compile time.
///
/// The binary-local extension id is the entry's position plus one; id zero
/// always means the core operation/operand set and never appears here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionEntry {
    pub name: String,
    /// Opaque extension header data, present when the extension's header
    /// hook produced some at compile time.
    pub header: Option<Vec<u8>>,
}

/// A compiled program container.
///
/// Block 0 is the main program; further blocks are extension side blocks or
/// the debug block. The container is a dumb byte store: operation and
/// operand semantics live with the registry that compiled it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Container {
    blocks: Vec<Block>,
    extensions: Vec<ExtensionEntry>,
    debug_block: Option<usize>,
}

/// Index of the main program block.
pub const MAIN_BLOCK: usize = 0;

impl Container {
    /// Creates a container with an empty main block.
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::new()],
            extensions: Vec::new(),
            debug_block: None,
        }
    }

    pub fn main(&self) -> &Block {
        &self.blocks[MAIN_BLOCK]
    }

    pub fn main_mut(&mut self) -> &mut Block {
        &mut self.blocks[MAIN_BLOCK]
    }

    pub fn block(&self, id: usize) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Appends an empty block and returns its id.
    pub fn add_block(&mut self) -> usize {
        self.blocks.push(Block::new());
        self.blocks.len() - 1
    }

    pub fn set_block(&mut self, id: usize, block: Block) {
        self.blocks[id] = block;
    }

    pub fn debug_block(&self) -> Option<&Block> {
        self.debug_block.and_then(|id| self.blocks.get(id))
    }

    pub fn debug_block_id(&self) -> Option<usize> {
        self.debug_block
    }

    pub fn set_debug_block(&mut self, id: usize) {
        self.debug_block = Some(id);
    }

    pub fn extensions(&self) -> &[ExtensionEntry] {
        &self.extensions
    }

    /// Records an extension and returns its binary-local id (1-based).
    pub fn add_extension(&mut self, name: &str, header: Option<Vec<u8>>) -> u64 {
        self.extensions.push(ExtensionEntry {
            name: name.to_string(),
            header,
        });
        self.extensions.len() as u64
    }

    /// Serializes the container to its on-disk form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Block::new();
        out.write_bytes(&SIEVE_BINARY_MAGIC);
        out.write_bytes(&SIEVE_BINARY_VERSION.to_le_bytes());

        // Debug block id, shifted so that zero means "absent".
        match self.debug_block {
            Some(id) => out.write_varint(id as u64 + 1),
            None => out.write_varint(0),
        }

        out.write_varint(self.extensions.len() as u64);
        for (index, ext) in self.extensions.iter().enumerate() {
            out.write_varint(index as u64 + 1);
            out.write_string(&ext.name);
            match &ext.header {
                Some(data) => {
                    out.write_u8(1);
                    out.write_varint(data.len() as u64);
                    out.write_bytes(data);
                }
                None => out.write_u8(0),
            }
        }

        out.write_varint(self.blocks.len() as u64);
        for block in &self.blocks {
            out.write_varint(block.len() as u64);
            out.write_bytes(block.as_slice());
        }
        out.into_bytes()
    }

    /// Decodes a container from its on-disk form.
    ///
    /// Trailing bytes after the last block are corrupt: a correct encoder
    /// never produces them.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CorruptError> {
        let input = Block::from_bytes(bytes.to_vec());
        let mut address = 0;

        let magic = input.read_bytes(&mut address, 4)?;
        if magic != SIEVE_BINARY_MAGIC {
            return Err(CorruptError::BadMagic);
        }
        let v = input.read_bytes(&mut address, 2)?;
        let version = u16::from_le_bytes([v[0], v[1]]);
        if version != SIEVE_BINARY_VERSION {
            return Err(CorruptError::UnsupportedVersion { version });
        }

        let debug_raw = input.read_varint(&mut address)?;

        let ext_count = input.read_varint(&mut address)?;
        let mut extensions = Vec::new();
        for expected in 0..ext_count {
            let offset = address;
            let id = input.read_varint(&mut address)?;
            if id != expected + 1 {
                return Err(CorruptError::Invalid {
                    offset,
                    what: "extension table id",
                });
            }
            let name = input.read_string(&mut address)?.to_string();
            let header = match input.read_u8(&mut address)? {
                0 => None,
                1 => {
                    let offset = address;
                    let len = input.read_varint(&mut address)?;
                    let len =
                        usize::try_from(len).map_err(|_| CorruptError::OutOfBounds { offset })?;
                    Some(input.read_bytes(&mut address, len)?.to_vec())
                }
                _ => {
                    return Err(CorruptError::Invalid {
                        offset,
                        what: "extension header flag",
                    })
                }
            };
            extensions.push(ExtensionEntry { name, header });
        }

        let block_count = input.read_varint(&mut address)?;
        if block_count == 0 {
            return Err(CorruptError::Invalid {
                offset: address,
                what: "block count",
            });
        }
        let mut blocks = Vec::new();
        for _ in 0..block_count {
            let offset = address;
            let len = input.read_varint(&mut address)?;
            let len = usize::try_from(len).map_err(|_| CorruptError::OutOfBounds { offset })?;
            blocks.push(Block::from_bytes(input.read_bytes(&mut address, len)?.to_vec()));
        }
        if address != input.len() {
            return Err(CorruptError::Invalid {
                offset: address,
                what: "trailing bytes",
            });
        }

        let debug_block = match debug_raw {
            0 => None,
            id => {
                let id = usize::try_from(id - 1).map_err(|_| CorruptError::BadBlockId { id })?;
                if id >= blocks.len() {
                    return Err(CorruptError::BadBlockId { id: id as u64 });
                }
                Some(id)
            }
        };

        Ok(Self {
            blocks,
            extensions,
            debug_block,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Container {
        let mut c = Container::new();
        c.main_mut().write_varint(42);
        let id = c.add_extension("copy", None);
        assert_eq!(id, 1);
        let id = c.add_extension("imap4flags", Some(vec![1, 2, 3]));
        assert_eq!(id, 2);
        let dbg = c.add_block();
        c.set_debug_block(dbg);
        c
    }

    #[test]
    fn container_round_trips() {
        let c = sample();
        let bytes = c.to_bytes();
        let decoded = Container::from_bytes(&bytes).expect("decode container");
        assert_eq!(decoded, c);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        assert_eq!(Container::from_bytes(&bytes), Err(CorruptError::BadMagic));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut bytes = sample().to_bytes();
        bytes[4] = 0xee;
        assert!(matches!(
            Container::from_bytes(&bytes),
            Err(CorruptError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn truncated_container_is_corrupt() {
        let bytes = sample().to_bytes();
        let cut = &bytes[..bytes.len() - 2];
        assert!(matches!(
            Container::from_bytes(cut),
            Err(CorruptError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn trailing_bytes_are_corrupt() {
        let mut bytes = sample().to_bytes();
        bytes.push(0);
        assert!(matches!(
            Container::from_bytes(&bytes),
            Err(CorruptError::Invalid { what: "trailing bytes", .. })
        ));
    }

    #[test]
    fn debug_block_id_must_be_in_range() {
        let mut c = Container::new();
        c.set_debug_block(5);
        let bytes = c.to_bytes();
        assert!(matches!(
            Container::from_bytes(&bytes),
            Err(CorruptError::BadBlockId { .. })
        ));
    }
}
