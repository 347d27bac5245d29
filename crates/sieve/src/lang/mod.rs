//! The core command/test set and its operations.
//!
//! Everything defined by the base language lives here: control structure,
//! the keep/discard/redirect actions, and the built-in tests. Extensions
//! plug in beside these through the registry.

pub mod commands;
pub mod match_type;
pub mod tst;

use crate::registry::{CommandDef, Operation};

/// Core opcode numbers; indices into [`core_operations`].
pub mod opcodes {
    pub const JMP: u64 = 0;
    pub const JMPTRUE: u64 = 1;
    pub const JMPFALSE: u64 = 2;
    pub const STOP: u64 = 3;
    pub const KEEP: u64 = 4;
    pub const DISCARD: u64 = 5;
    pub const REDIRECT: u64 = 6;
    pub const TEST_TRUE: u64 = 7;
    pub const TEST_FALSE: u64 = 8;
    pub const TEST_NOT: u64 = 9;
    pub const TEST_EXISTS: u64 = 10;
    pub const TEST_HEADER: u64 = 11;
    pub const TEST_ADDRESS: u64 = 12;
    pub const TEST_SIZE: u64 = 13;
}

/// Optional-operand codes used by core operations. Codes are scoped per
/// operation; only the side-effect code is global.
pub const OPT_MATCH_TYPE: u64 = 2;
pub const OPT_ADDRESS_PART: u64 = 3;
pub const OPT_SIZE_MODE: u64 = 2;

pub(crate) fn core_commands() -> Vec<Box<dyn CommandDef>> {
    vec![
        Box::new(commands::RequireCommand),
        Box::new(commands::IfCommand),
        Box::new(commands::ElsifCommand),
        Box::new(commands::ElseCommand),
        Box::new(commands::StopCommand),
        Box::new(commands::KeepCommand),
        Box::new(commands::DiscardCommand),
        Box::new(commands::RedirectCommand),
        Box::new(tst::TrueTest),
        Box::new(tst::FalseTest),
        Box::new(tst::NotTest),
        Box::new(tst::AllofTest),
        Box::new(tst::AnyofTest),
        Box::new(tst::ExistsTest),
        Box::new(tst::HeaderTest),
        Box::new(tst::AddressTest),
        Box::new(tst::SizeTest),
    ]
}

pub(crate) fn core_operations() -> Vec<Box<dyn Operation>> {
    vec![
        Box::new(commands::JmpOp),
        Box::new(commands::JmpTrueOp),
        Box::new(commands::JmpFalseOp),
        Box::new(commands::StopOp),
        Box::new(commands::KeepOp),
        Box::new(commands::DiscardOp),
        Box::new(commands::RedirectOp),
        Box::new(tst::TrueOp),
        Box::new(tst::FalseOp),
        Box::new(tst::NotOp),
        Box::new(tst::ExistsOp),
        Box::new(tst::HeaderOp),
        Box::new(tst::AddressOp),
        Box::new(tst::SizeOp),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_constants_match_operation_table() {
        let ops = core_operations();
        let expect = [
            (opcodes::JMP, "jmp"),
            (opcodes::JMPTRUE, "jmptrue"),
            (opcodes::JMPFALSE, "jmpfalse"),
            (opcodes::STOP, "stop"),
            (opcodes::KEEP, "keep"),
            (opcodes::DISCARD, "discard"),
            (opcodes::REDIRECT, "redirect"),
            (opcodes::TEST_TRUE, "true"),
            (opcodes::TEST_FALSE, "false"),
            (opcodes::TEST_NOT, "not"),
            (opcodes::TEST_EXISTS, "exists"),
            (opcodes::TEST_HEADER, "header"),
            (opcodes::TEST_ADDRESS, "address"),
            (opcodes::TEST_SIZE, "size"),
        ];
        assert_eq!(ops.len(), expect.len());
        for (opcode, mnemonic) in expect {
            assert_eq!(ops[opcode as usize].mnemonic(), mnemonic);
        }
    }
}
