//! Shared helpers for the integration tests.
#![allow(dead_code)]

use sieve::ast::{CommandNode, Script};
use sieve::binary::SieveBinary;
use sieve::interp::{self, RunOutcome, RuntimeError, Tracer};
use sieve::registry::ExtensionRegistry;
use sieve::result::SieveResult;
use sieve_testing::TestMessage;

pub fn compile(commands: Vec<CommandNode>, registry: &ExtensionRegistry) -> SieveBinary {
    let mut script = Script::new(commands);
    let out = sieve::compile(&mut script, registry);
    assert!(
        out.report.ok,
        "unexpected compile errors: {:?}",
        out.report.diagnostics
    );
    out.binary.expect("compile produced no binary")
}

pub fn compile_err(commands: Vec<CommandNode>, registry: &ExtensionRegistry) -> sieve::CompileOutput {
    let mut script = Script::new(commands);
    let out = sieve::compile(&mut script, registry);
    assert!(!out.report.ok, "expected compile errors");
    assert!(out.binary.is_none());
    out
}

pub fn run(
    binary: &SieveBinary,
    registry: &ExtensionRegistry,
    message: &TestMessage,
    result: &mut SieveResult,
) -> Result<RunOutcome, RuntimeError> {
    interp::run(binary, registry, message, result, None)
}

pub fn run_traced(
    binary: &SieveBinary,
    registry: &ExtensionRegistry,
    message: &TestMessage,
    result: &mut SieveResult,
    tracer: &mut dyn Tracer,
) -> Result<RunOutcome, RuntimeError> {
    interp::run(binary, registry, message, result, Some(tracer))
}
