//! Core tests and their operations.

use sieve_binary::CorruptError;

use crate::address;
use crate::ast::{ArgKind, ResolvedTag, TestNode};
use crate::diagnostics::Diagnostic;
use crate::dump::Dumper;
use crate::generate::CodeGen;
use crate::interp::{split_opt_operands, Interpreter, RuntimeError};
use crate::operands::DecodedValue;
use crate::registry::{CommandDef, CommandKind, Operation, TagDef, TestUse};
use crate::validate::Validator;

use super::match_type::{
    AddressPart, AllTag, ContainsTag, DomainTag, IsTag, LocalpartTag, MatchType, MatchesTag,
};
use super::{opcodes, OPT_ADDRESS_PART, OPT_MATCH_TYPE, OPT_SIZE_MODE};

static MATCH_TAGS: &[&dyn TagDef] = &[&IsTag, &ContainsTag, &MatchesTag];
static ADDRESS_TAGS: &[&dyn TagDef] =
    &[&IsTag, &ContainsTag, &MatchesTag, &AllTag, &LocalpartTag, &DomainTag];
static SIZE_TAGS: &[&dyn TagDef] = &[&OverTag, &UnderTag];

/// Errors when mutually exclusive tags were combined on one test.
fn check_single_opt(v: &mut Validator<'_>, node: &TestNode, opt_code: u64, what: &str) {
    let count = node
        .resolved_tags
        .iter()
        .filter(|t| matches!(t, ResolvedTag::Operand { opt_code: c, .. } if *c == opt_code))
        .count();
    if count > 1 {
        v.error(
            "conflicting-tags",
            node.span,
            format!("test {:?} takes at most one {what}", node.identifier),
        );
    }
}

pub struct TrueTest;

impl CommandDef for TrueTest {
    fn identifier(&self) -> &'static str {
        "true"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn generate_test(&self, gen: &mut CodeGen<'_>, node: &TestNode) -> Result<(), Diagnostic> {
        gen.emit_operation(None, opcodes::TEST_TRUE, node.span.line)
    }
}

pub struct FalseTest;

impl CommandDef for FalseTest {
    fn identifier(&self) -> &'static str {
        "false"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn generate_test(&self, gen: &mut CodeGen<'_>, node: &TestNode) -> Result<(), Diagnostic> {
        gen.emit_operation(None, opcodes::TEST_FALSE, node.span.line)
    }
}

/// `not <test>` — inner test code followed by a register flip.
pub struct NotTest;

impl CommandDef for NotTest {
    fn identifier(&self) -> &'static str {
        "not"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn subtests(&self) -> TestUse {
        TestUse::One
    }

    fn generate_test(&self, gen: &mut CodeGen<'_>, node: &TestNode) -> Result<(), Diagnostic> {
        for test in &node.tests {
            gen.generate_test(test)?;
        }
        gen.emit_operation(None, opcodes::TEST_NOT, node.span.line)
    }
}

/// `allof (<tests>)` — false short-circuits to the end of the chain.
pub struct AllofTest;

impl CommandDef for AllofTest {
    fn identifier(&self) -> &'static str {
        "allof"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn subtests(&self) -> TestUse {
        TestUse::Many
    }

    fn generate_test(&self, gen: &mut CodeGen<'_>, node: &TestNode) -> Result<(), Diagnostic> {
        let mut exits = Vec::new();
        for (index, test) in node.tests.iter().enumerate() {
            gen.generate_test(test)?;
            if index + 1 < node.tests.len() {
                exits.push(gen.emit_jump(opcodes::JMPFALSE, test.span.line)?);
            }
        }
        for site in exits {
            gen.patch_here(site);
        }
        Ok(())
    }
}

/// `anyof (<tests>)` — true short-circuits to the end of the chain.
pub struct AnyofTest;

impl CommandDef for AnyofTest {
    fn identifier(&self) -> &'static str {
        "anyof"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn subtests(&self) -> TestUse {
        TestUse::Many
    }

    fn generate_test(&self, gen: &mut CodeGen<'_>, node: &TestNode) -> Result<(), Diagnostic> {
        let mut exits = Vec::new();
        for (index, test) in node.tests.iter().enumerate() {
            gen.generate_test(test)?;
            if index + 1 < node.tests.len() {
                exits.push(gen.emit_jump(opcodes::JMPTRUE, test.span.line)?);
            }
        }
        for site in exits {
            gen.patch_here(site);
        }
        Ok(())
    }
}

/// `exists <header-names: string-list>`
pub struct ExistsTest;

impl CommandDef for ExistsTest {
    fn identifier(&self) -> &'static str {
        "exists"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn positional(&self) -> &'static [ArgKind] {
        &[ArgKind::StringList]
    }

    fn generate_test(&self, gen: &mut CodeGen<'_>, node: &TestNode) -> Result<(), Diagnostic> {
        gen.emit_operation(None, opcodes::TEST_EXISTS, node.span.line)?;
        emit_list_arg(gen, node, 0)
    }
}

/// `header [:is|:contains|:matches] <names> <patterns>`
pub struct HeaderTest;

impl CommandDef for HeaderTest {
    fn identifier(&self) -> &'static str {
        "header"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn positional(&self) -> &'static [ArgKind] {
        &[ArgKind::StringList, ArgKind::StringList]
    }

    fn tags(&self) -> &'static [&'static dyn TagDef] {
        MATCH_TAGS
    }

    fn validate_test(&self, v: &mut Validator<'_>, node: &mut TestNode) {
        check_single_opt(v, node, OPT_MATCH_TYPE, "match type");
    }

    fn generate_test(&self, gen: &mut CodeGen<'_>, node: &TestNode) -> Result<(), Diagnostic> {
        gen.emit_operation(None, opcodes::TEST_HEADER, node.span.line)?;
        emit_list_arg(gen, node, 0)?;
        emit_list_arg(gen, node, 1)?;
        gen.emit_optional_run(&node.resolved_tags)
    }
}

/// `address [:all|:localpart|:domain] [match type] <headers> <patterns>`
pub struct AddressTest;

impl CommandDef for AddressTest {
    fn identifier(&self) -> &'static str {
        "address"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn positional(&self) -> &'static [ArgKind] {
        &[ArgKind::StringList, ArgKind::StringList]
    }

    fn tags(&self) -> &'static [&'static dyn TagDef] {
        ADDRESS_TAGS
    }

    fn validate_test(&self, v: &mut Validator<'_>, node: &mut TestNode) {
        check_single_opt(v, node, OPT_MATCH_TYPE, "match type");
        check_single_opt(v, node, OPT_ADDRESS_PART, "address part");
    }

    fn generate_test(&self, gen: &mut CodeGen<'_>, node: &TestNode) -> Result<(), Diagnostic> {
        gen.emit_operation(None, opcodes::TEST_ADDRESS, node.span.line)?;
        emit_list_arg(gen, node, 0)?;
        emit_list_arg(gen, node, 1)?;
        gen.emit_optional_run(&node.resolved_tags)
    }
}

pub struct OverTag;

impl TagDef for OverTag {
    fn name(&self) -> &'static str {
        "over"
    }

    fn validate(
        &self,
        _v: &mut Validator<'_>,
        _value: Option<&mut crate::ast::Argument>,
    ) -> Option<ResolvedTag> {
        Some(ResolvedTag::Operand {
            opt_code: OPT_SIZE_MODE,
            value: crate::operands::OperandValue::Number(0),
        })
    }
}

pub struct UnderTag;

impl TagDef for UnderTag {
    fn name(&self) -> &'static str {
        "under"
    }

    fn validate(
        &self,
        _v: &mut Validator<'_>,
        _value: Option<&mut crate::ast::Argument>,
    ) -> Option<ResolvedTag> {
        Some(ResolvedTag::Operand {
            opt_code: OPT_SIZE_MODE,
            value: crate::operands::OperandValue::Number(1),
        })
    }
}

/// `size :over|:under <limit: number>`
pub struct SizeTest;

impl CommandDef for SizeTest {
    fn identifier(&self) -> &'static str {
        "size"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn positional(&self) -> &'static [ArgKind] {
        &[ArgKind::Number]
    }

    fn tags(&self) -> &'static [&'static dyn TagDef] {
        SIZE_TAGS
    }

    fn validate_test(&self, v: &mut Validator<'_>, node: &mut TestNode) {
        let modes = node
            .resolved_tags
            .iter()
            .filter(|t| matches!(t, ResolvedTag::Operand { opt_code, .. } if *opt_code == OPT_SIZE_MODE))
            .count();
        if modes != 1 {
            v.error(
                "missing-size-mode",
                node.span,
                "size needs exactly one of :over or :under".to_string(),
            );
        }
    }

    fn generate_test(&self, gen: &mut CodeGen<'_>, node: &TestNode) -> Result<(), Diagnostic> {
        gen.emit_operation(None, opcodes::TEST_SIZE, node.span.line)?;
        let limit = node.args.first().and_then(|a| a.as_number()).ok_or_else(|| {
            Diagnostic::error(
                "internal",
                node.span,
                "size without a limit reached the generator".to_string(),
            )
        })?;
        gen.emit_number(limit);
        gen.emit_optional_run(&node.resolved_tags)
    }
}

fn emit_list_arg(gen: &mut CodeGen<'_>, node: &TestNode, index: usize) -> Result<(), Diagnostic> {
    let items = node
        .args
        .get(index)
        .and_then(|a| a.as_string_list())
        .ok_or_else(|| {
            Diagnostic::error(
                "internal",
                node.span,
                format!(
                    "test {:?} missing list argument {index} in the generator",
                    node.identifier
                ),
            )
        })?;
    gen.emit_string_list(items);
    Ok(())
}

pub struct TrueOp;

impl Operation for TrueOp {
    fn mnemonic(&self) -> &'static str {
        "true"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        interp.set_test_result(true);
        Ok(())
    }

    fn dump(&self, _dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        Ok(())
    }
}

pub struct FalseOp;

impl Operation for FalseOp {
    fn mnemonic(&self) -> &'static str {
        "false"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        interp.set_test_result(false);
        Ok(())
    }

    fn dump(&self, _dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        Ok(())
    }
}

pub struct NotOp;

impl Operation for NotOp {
    fn mnemonic(&self) -> &'static str {
        "not"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let flipped = !interp.test_result();
        interp.set_test_result(flipped);
        Ok(())
    }

    fn dump(&self, _dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        Ok(())
    }
}

pub struct ExistsOp;

impl Operation for ExistsOp {
    fn mnemonic(&self) -> &'static str {
        "exists"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let mut names = interp.read_string_list()?;
        let message = interp.message();
        let mut all_present = true;
        while let Some(name) = names.next_item().map_err(RuntimeError::corrupt)? {
            if message.header(name).is_empty() {
                all_present = false;
            }
        }
        interp.set_test_result(all_present);
        Ok(())
    }

    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        dumper.operand_string_list("headers")
    }
}

/// Reads the match type out of a decoded optional run.
fn match_type_of(
    interp: &Interpreter<'_>,
    tagged: &[(u64, DecodedValue)],
    allow_address_part: bool,
) -> Result<(MatchType, AddressPart), RuntimeError> {
    let mut match_type = MatchType::Is;
    let mut part = AddressPart::All;
    for (opt_code, value) in tagged {
        match *opt_code {
            OPT_MATCH_TYPE => {
                match_type = value
                    .as_number()
                    .and_then(MatchType::from_code)
                    .ok_or_else(|| RuntimeError::corrupt_invalid(interp.pc(), "match type"))?;
            }
            OPT_ADDRESS_PART if allow_address_part => {
                part = value
                    .as_number()
                    .and_then(AddressPart::from_code)
                    .ok_or_else(|| RuntimeError::corrupt_invalid(interp.pc(), "address part"))?;
            }
            _ => {
                return Err(RuntimeError::corrupt_invalid(
                    interp.pc(),
                    "optional operand code",
                ))
            }
        }
    }
    Ok((match_type, part))
}

pub struct HeaderOp;

impl Operation for HeaderOp {
    fn mnemonic(&self) -> &'static str {
        "header"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let mut names = interp.read_string_list()?;
        let mut patterns = interp.read_string_list()?;
        let opts = interp.read_optional_operands()?;
        let (_, tagged) = split_opt_operands(opts);
        let (match_type, _) = match_type_of(interp, &tagged, false)?;

        let message = interp.message();
        let mut found = false;
        'outer: while let Some(name) = names.next_item().map_err(RuntimeError::corrupt)? {
            for value in message.header(name) {
                patterns.reset();
                while let Some(pattern) = patterns.next_item().map_err(RuntimeError::corrupt)? {
                    if match_type
                        .matches(pattern, &value)
                        .map_err(|e| interp.exec_error(e))?
                    {
                        found = true;
                        break 'outer;
                    }
                }
            }
        }
        interp.set_test_result(found);
        Ok(())
    }

    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        dumper.operand_string_list("headers")?;
        dumper.operand_string_list("patterns")?;
        dumper.optional_run()
    }
}

pub struct AddressOp;

impl Operation for AddressOp {
    fn mnemonic(&self) -> &'static str {
        "address"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let mut names = interp.read_string_list()?;
        let mut patterns = interp.read_string_list()?;
        let opts = interp.read_optional_operands()?;
        let (_, tagged) = split_opt_operands(opts);
        let (match_type, part) = match_type_of(interp, &tagged, true)?;

        let message = interp.message();
        let mut found = false;
        'outer: while let Some(name) = names.next_item().map_err(RuntimeError::corrupt)? {
            for value in message.header(name) {
                for parsed in address::parse_header_addresses(&value) {
                    let candidate = part.extract(&parsed);
                    patterns.reset();
                    while let Some(pattern) = patterns.next_item().map_err(RuntimeError::corrupt)? {
                        if match_type
                            .matches(pattern, &candidate)
                            .map_err(|e| interp.exec_error(e))?
                        {
                            found = true;
                            break 'outer;
                        }
                    }
                }
            }
        }
        interp.set_test_result(found);
        Ok(())
    }

    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        dumper.operand_string_list("headers")?;
        dumper.operand_string_list("patterns")?;
        dumper.optional_run()
    }
}

pub struct SizeOp;

impl Operation for SizeOp {
    fn mnemonic(&self) -> &'static str {
        "size"
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let limit = interp.read_number()?;
        let opts = interp.read_optional_operands()?;
        let (_, tagged) = split_opt_operands(opts);
        let mut mode = None;
        for (opt_code, value) in &tagged {
            match *opt_code {
                OPT_SIZE_MODE => mode = value.as_number(),
                _ => {
                    return Err(RuntimeError::corrupt_invalid(
                        interp.pc(),
                        "optional operand code",
                    ))
                }
            }
        }
        let size = interp.message().size();
        let result = match mode {
            Some(0) => size > limit,
            Some(1) => size < limit,
            _ => return Err(RuntimeError::corrupt_invalid(interp.pc(), "size mode")),
        };
        interp.set_test_result(result);
        Ok(())
    }

    fn dump(&self, dumper: &mut Dumper<'_>) -> Result<(), CorruptError> {
        dumper.operand_number("limit")?;
        dumper.optional_run()
    }
}
