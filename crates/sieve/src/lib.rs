//! Mail filtering core: compiler, bytecode container, virtual machine, and
//! the transactional result engine.
//!
//! The embedding system parses script text into [`ast::Script`], compiles it
//! with [`compile`], persists or executes the resulting binary with
//! [`interp::run`], and applies the accumulated actions through
//! [`result::SieveResult::execute`]. Extensions register through
//! [`registry::RegistryBuilder`] before the first compile.

pub mod actions;
pub mod address;
pub mod ast;
pub mod binary;
pub mod diagnostics;
pub mod dump;
pub mod environment;
pub mod generate;
pub mod interp;
pub mod lang;
pub mod operands;
pub mod registry;
pub mod result;
pub mod validate;

use crate::ast::Script;
use crate::binary::SieveBinary;
use crate::diagnostics::Report;
use crate::registry::ExtensionRegistry;

/// Outcome of one compile: the report always, the binary only when no error
/// was recorded (the report stays available for diagnostics tooling).
pub struct CompileOutput {
    pub binary: Option<SieveBinary>,
    pub report: Report,
}

/// Validates and generates in one step.
pub fn compile(script: &mut Script, registry: &ExtensionRegistry) -> CompileOutput {
    let report = validate::validate(script, registry);
    if !report.ok {
        return CompileOutput {
            binary: None,
            report,
        };
    }
    match generate::generate(script, registry) {
        Ok(binary) => CompileOutput {
            binary: Some(binary),
            report,
        },
        Err(diagnostic) => {
            let mut diagnostics = report.diagnostics;
            diagnostics.push(diagnostic);
            CompileOutput {
                binary: None,
                report: Report::ok().with_diagnostics(diagnostics),
            }
        }
    }
}
