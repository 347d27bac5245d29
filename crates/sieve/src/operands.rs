//! Typed operand encode/decode on top of the block primitives.
//!
//! Every operand starts with a class code so a dumper can walk any operand
//! stream without knowing the operation. The reserved `OMITTED` class lets
//! operations encode "optional argument not supplied" in a fixed operand
//! slot, keeping one decode path for both the explicit and the default case.

use sieve_binary::{Block, CorruptError};
use sieve_contracts::limits;

/// Operand class codes.
pub mod codes {
    pub const OMITTED: u64 = 0;
    pub const NUMBER: u64 = 1;
    pub const STRING: u64 = 2;
    pub const STRING_LIST: u64 = 3;
}

/// Optional-operand run codes. A run is `repeat { opt_code, operand }`
/// terminated by [`opt::END`]; [`opt::SIDE_EFFECT`] is reserved for side
/// effects, operation-specific codes start at [`opt::FIRST_CUSTOM`].
pub mod opt {
    pub const END: u64 = 0;
    pub const SIDE_EFFECT: u64 = 1;
    pub const FIRST_CUSTOM: u64 = 2;
}

/// An operand value on the write side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandValue {
    Omitted,
    Number(u64),
    String(String),
    StringList(Vec<String>),
}

pub fn write_operand(block: &mut Block, value: &OperandValue) {
    match value {
        OperandValue::Omitted => block.write_varint(codes::OMITTED),
        OperandValue::Number(n) => write_number(block, *n),
        OperandValue::String(s) => write_string(block, s),
        OperandValue::StringList(items) => write_string_list(block, items),
    }
}

pub fn write_number(block: &mut Block, value: u64) {
    block.write_varint(codes::NUMBER);
    block.write_varint(value);
}

pub fn write_string(block: &mut Block, value: &str) {
    block.write_varint(codes::STRING);
    block.write_string(value);
}

pub fn write_omitted(block: &mut Block) {
    block.write_varint(codes::OMITTED);
}

pub fn write_string_list(block: &mut Block, items: &[String]) {
    block.write_varint(codes::STRING_LIST);
    block.write_varint(items.len() as u64);
    for item in items {
        block.write_string(item);
    }
}

fn class_error(offset: usize) -> CorruptError {
    CorruptError::Invalid {
        offset,
        what: "operand class",
    }
}

/// Reads a number operand.
pub fn read_number(block: &Block, address: &mut usize) -> Result<u64, CorruptError> {
    let offset = *address;
    match block.read_varint(address)? {
        codes::NUMBER => block.read_varint(address),
        _ => Err(class_error(offset)),
    }
}

/// Reads a string operand.
pub fn read_string<'a>(block: &'a Block, address: &mut usize) -> Result<&'a str, CorruptError> {
    let offset = *address;
    match block.read_varint(address)? {
        codes::STRING => block.read_string(address),
        _ => Err(class_error(offset)),
    }
}

/// Reads a string operand that may be omitted.
pub fn read_opt_string<'a>(
    block: &'a Block,
    address: &mut usize,
) -> Result<Option<&'a str>, CorruptError> {
    let offset = *address;
    match block.read_varint(address)? {
        codes::OMITTED => Ok(None),
        codes::STRING => Ok(Some(block.read_string(address)?)),
        _ => Err(class_error(offset)),
    }
}

/// A restartable, lazily-evaluated string-list sequence.
///
/// Construction validates the whole encoding once and leaves the outer
/// cursor past it; iteration re-reads items in place without allocating.
#[derive(Debug, Clone)]
pub struct StringListReader<'a> {
    block: &'a Block,
    items_start: usize,
    count: u64,
    cursor: usize,
    index: u64,
}

impl<'a> StringListReader<'a> {
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn next_item(&mut self) -> Result<Option<&'a str>, CorruptError> {
        if self.index >= self.count {
            return Ok(None);
        }
        let item = self.block.read_string(&mut self.cursor)?;
        self.index += 1;
        Ok(Some(item))
    }

    pub fn reset(&mut self) {
        self.cursor = self.items_start;
        self.index = 0;
    }

    /// Collects the remaining items; used where a materialized list is
    /// genuinely needed (tag payloads, dump output).
    pub fn collect_items(mut self) -> Result<Vec<String>, CorruptError> {
        let mut out = Vec::new();
        while let Some(item) = self.next_item()? {
            out.push(item.to_string());
        }
        Ok(out)
    }
}

/// Reads a string-list operand, advancing `address` past the whole list.
pub fn read_string_list<'a>(
    block: &'a Block,
    address: &mut usize,
) -> Result<StringListReader<'a>, CorruptError> {
    let offset = *address;
    match block.read_varint(address)? {
        codes::STRING_LIST => {}
        _ => return Err(class_error(offset)),
    }
    let count = block.read_varint(address)?;
    if count > limits::MAX_LIST_ITEMS as u64 {
        return Err(CorruptError::OutOfBounds { offset });
    }
    let items_start = *address;
    // One validation walk; iteration afterwards cannot fail on bounds.
    for _ in 0..count {
        block.read_string(address)?;
    }
    Ok(StringListReader {
        block,
        items_start,
        count,
        cursor: items_start,
        index: 0,
    })
}

/// A fully-decoded operand, used for optional-run values and dumps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedValue {
    Omitted,
    Number(u64),
    String(String),
    StringList(Vec<String>),
}

impl DecodedValue {
    pub fn as_number(&self) -> Option<u64> {
        match self {
            DecodedValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            DecodedValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Reads any operand eagerly. The optional-operand decode path uses this to
/// materialize tag values into an explicit list.
pub fn read_operand_value(block: &Block, address: &mut usize) -> Result<DecodedValue, CorruptError> {
    let offset = *address;
    match block.read_varint(address)? {
        codes::OMITTED => Ok(DecodedValue::Omitted),
        codes::NUMBER => Ok(DecodedValue::Number(block.read_varint(address)?)),
        codes::STRING => Ok(DecodedValue::String(block.read_string(address)?.to_string())),
        codes::STRING_LIST => {
            let count = block.read_varint(address)?;
            if count > limits::MAX_LIST_ITEMS as u64 {
                return Err(CorruptError::OutOfBounds { offset });
            }
            let mut items = Vec::with_capacity(count.min(64) as usize);
            for _ in 0..count {
                items.push(block.read_string(address)?.to_string());
            }
            Ok(DecodedValue::StringList(items))
        }
        _ => Err(class_error(offset)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operands_round_trip() {
        let mut block = Block::new();
        write_number(&mut block, 9000);
        write_string(&mut block, "INBOX");
        write_omitted(&mut block);
        write_string_list(&mut block, &["a".to_string(), "b".to_string()]);

        let mut address = 0;
        assert_eq!(read_number(&block, &mut address).expect("number"), 9000);
        assert_eq!(read_string(&block, &mut address).expect("string"), "INBOX");
        assert_eq!(read_opt_string(&block, &mut address).expect("omitted"), None);
        let mut list = read_string_list(&block, &mut address).expect("list");
        assert_eq!(address, block.len());
        assert_eq!(list.next_item().expect("item"), Some("a"));
        assert_eq!(list.next_item().expect("item"), Some("b"));
        assert_eq!(list.next_item().expect("end"), None);
        list.reset();
        assert_eq!(list.next_item().expect("item again"), Some("a"));
    }

    #[test]
    fn class_mismatch_is_corrupt() {
        let mut block = Block::new();
        write_string(&mut block, "x");
        let mut address = 0;
        assert!(matches!(
            read_number(&block, &mut address),
            Err(CorruptError::Invalid { what: "operand class", .. })
        ));
    }

    #[test]
    fn truncated_list_is_corrupt() {
        let mut block = Block::new();
        block.write_varint(codes::STRING_LIST);
        block.write_varint(3);
        block.write_string("only one");
        let mut address = 0;
        assert!(matches!(
            read_string_list(&block, &mut address),
            Err(CorruptError::UnexpectedEof { .. })
        ));
    }
}
