//! AST validation against the extension registry.
//!
//! Resolves every command/test identifier, enforces `require` gating and
//! argument shapes, dispatches tagged arguments to their definitions, and
//! lets definitions rewrite literal arguments in place. Errors accumulate
//! up to a cap; sibling statements keep validating past a failed one.

use std::collections::BTreeSet;

use sieve_contracts::limits;

use crate::ast::{ArgKind, ArgValue, Argument, CommandNode, ResolvedTag, Script, TestNode};
use crate::diagnostics::{Diagnostic, Report, Span};
use crate::registry::{CommandDef, CommandKind, ExtId, ExtensionRegistry, TagDef, TestUse};

/// Validation state for one script.
pub struct Validator<'r> {
    registry: &'r ExtensionRegistry,
    diagnostics: Vec<Diagnostic>,
    required: BTreeSet<ExtId>,
    depth: usize,
    seen_non_require: bool,
    gave_up: bool,
}

/// Validates `script` in place and returns the accumulated report.
pub fn validate(script: &mut Script, registry: &ExtensionRegistry) -> Report {
    let mut v = Validator {
        registry,
        diagnostics: Vec::new(),
        required: BTreeSet::new(),
        depth: 0,
        seen_non_require: false,
        gave_up: false,
    };
    v.validate_block(&mut script.commands, true);
    Report::ok().with_diagnostics(v.diagnostics)
}

impl<'r> Validator<'r> {
    pub fn registry(&self) -> &'r ExtensionRegistry {
        self.registry
    }

    pub fn error(&mut self, code: &str, span: Span, message: String) {
        if self.gave_up {
            return;
        }
        if self.diagnostics.len() >= limits::MAX_COMPILE_ERRORS {
            self.diagnostics.push(Diagnostic::error(
                "too-many-errors",
                span,
                "too many errors; giving up".to_string(),
            ));
            self.gave_up = true;
            return;
        }
        self.diagnostics.push(Diagnostic::error(code, span, message));
    }

    pub fn warning(&mut self, code: &str, span: Span, message: String) {
        if !self.gave_up {
            self.diagnostics.push(Diagnostic::warning(code, span, message));
        }
    }

    /// Marks an extension as required from this point on.
    pub fn require(&mut self, ext: ExtId) {
        self.required.insert(ext);
    }

    pub fn is_required(&self, ext: ExtId) -> bool {
        self.required.contains(&ext)
    }

    fn validate_block(&mut self, commands: &mut [CommandNode], top_level: bool) {
        let mut prev: Option<String> = None;
        for node in commands.iter_mut() {
            if self.gave_up {
                return;
            }
            self.validate_command(node, prev.as_deref(), top_level);
            prev = Some(node.identifier.clone());
        }
    }

    fn validate_command(&mut self, node: &mut CommandNode, prev: Option<&str>, top_level: bool) {
        let registry = self.registry;
        let Some((owner, def)) = registry.command(&node.identifier) else {
            self.error(
                "unknown-command",
                node.span,
                format!("unknown command {:?}", node.identifier),
            );
            return;
        };
        if def.kind() != CommandKind::Command {
            self.error(
                "not-a-command",
                node.span,
                format!("test {:?} used as a command", node.identifier),
            );
            return;
        }

        match node.identifier.as_str() {
            "require" => {
                if !top_level || self.seen_non_require {
                    self.error(
                        "misplaced-require",
                        node.span,
                        "require must precede all other commands".to_string(),
                    );
                }
            }
            "elsif" | "else" => {
                if !matches!(prev, Some("if") | Some("elsif")) {
                    self.error(
                        "misplaced-conditional",
                        node.span,
                        format!("{:?} must follow an if or elsif", node.identifier),
                    );
                }
                self.seen_non_require = true;
            }
            _ => self.seen_non_require = true,
        }

        if let Some(ext) = owner {
            if !self.is_required(ext) {
                let name = registry.extension_name(ext).unwrap_or("?");
                self.error(
                    "not-required",
                    node.span,
                    format!(
                        "command {:?} needs `require {name:?}` first",
                        node.identifier
                    ),
                );
            }
        }

        if def.takes_test() {
            match node.test.as_mut() {
                Some(test) => self.validate_test_nested(test),
                None => self.error(
                    "missing-test",
                    node.span,
                    format!("command {:?} needs a test", node.identifier),
                ),
            }
        } else if node.test.is_some() {
            self.error(
                "unexpected-test",
                node.span,
                format!("command {:?} takes no test", node.identifier),
            );
        }

        match def.block() {
            crate::registry::BlockUse::Required => {
                if self.depth >= limits::MAX_NESTING {
                    self.error(
                        "nesting",
                        node.span,
                        "blocks are nested too deeply".to_string(),
                    );
                } else {
                    self.depth += 1;
                    self.validate_block(&mut node.block, false);
                    self.depth -= 1;
                }
            }
            crate::registry::BlockUse::Forbidden => {
                if !node.block.is_empty() {
                    self.error(
                        "unexpected-block",
                        node.span,
                        format!("command {:?} takes no block", node.identifier),
                    );
                }
            }
        }

        let identifier = node.identifier.clone();
        self.validate_args(
            &identifier,
            node.span,
            def,
            &mut node.args,
            &mut node.resolved_tags,
        );
        def.validate_command(self, node);
    }

    fn validate_test_nested(&mut self, node: &mut TestNode) {
        if self.depth >= limits::MAX_NESTING {
            self.error("nesting", node.span, "tests are nested too deeply".to_string());
            return;
        }
        self.depth += 1;
        self.validate_test(node);
        self.depth -= 1;
    }

    fn validate_test(&mut self, node: &mut TestNode) {
        if self.gave_up {
            return;
        }
        let registry = self.registry;
        let Some((owner, def)) = registry.command(&node.identifier) else {
            self.error(
                "unknown-test",
                node.span,
                format!("unknown test {:?}", node.identifier),
            );
            return;
        };
        if def.kind() != CommandKind::Test {
            self.error(
                "not-a-test",
                node.span,
                format!("command {:?} used as a test", node.identifier),
            );
            return;
        }
        if let Some(ext) = owner {
            if !self.is_required(ext) {
                let name = registry.extension_name(ext).unwrap_or("?");
                self.error(
                    "not-required",
                    node.span,
                    format!("test {:?} needs `require {name:?}` first", node.identifier),
                );
            }
        }

        match def.subtests() {
            TestUse::None => {
                if !node.tests.is_empty() {
                    self.error(
                        "unexpected-subtest",
                        node.span,
                        format!("test {:?} takes no subtests", node.identifier),
                    );
                }
            }
            TestUse::One => {
                if node.tests.len() != 1 {
                    self.error(
                        "bad-subtests",
                        node.span,
                        format!("test {:?} takes exactly one subtest", node.identifier),
                    );
                }
                for test in node.tests.iter_mut() {
                    self.validate_test_nested(test);
                }
            }
            TestUse::Many => {
                if node.tests.is_empty() {
                    self.error(
                        "bad-subtests",
                        node.span,
                        format!("test {:?} needs at least one subtest", node.identifier),
                    );
                }
                for test in node.tests.iter_mut() {
                    self.validate_test_nested(test);
                }
            }
        }

        let identifier = node.identifier.clone();
        self.validate_args(
            &identifier,
            node.span,
            def,
            &mut node.args,
            &mut node.resolved_tags,
        );
        def.validate_test(self, node);
    }

    /// Splits tagged arguments out of the argument list, dispatches them to
    /// their definitions, and shape-checks the remaining positionals.
    fn validate_args(
        &mut self,
        identifier: &str,
        span: Span,
        def: &dyn CommandDef,
        args: &mut Vec<Argument>,
        resolved: &mut Vec<ResolvedTag>,
    ) {
        let registry = self.registry;
        let taken = std::mem::take(args);
        let mut positionals: Vec<Argument> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        let mut iter = taken.into_iter();

        while let Some(arg) = iter.next() {
            let tag_name = match &arg.value {
                ArgValue::Tag(name) => name.clone(),
                _ => {
                    positionals.push(arg);
                    continue;
                }
            };

            let mut tag_def: Option<&dyn TagDef> =
                def.tags().iter().copied().find(|t| t.name() == tag_name);
            let mut gated = false;
            if tag_def.is_none() {
                for (tag_owner, tag) in registry.external_tags_for(identifier) {
                    if tag.name() != tag_name {
                        continue;
                    }
                    if self.is_required(tag_owner) {
                        tag_def = Some(tag);
                    } else {
                        let name = registry.extension_name(tag_owner).unwrap_or("?");
                        self.error(
                            "not-required",
                            arg.span,
                            format!(":{tag_name} needs `require {name:?}` first"),
                        );
                        gated = true;
                    }
                    break;
                }
            }

            let Some(tag_def) = tag_def else {
                if !gated {
                    self.error(
                        "unknown-tag",
                        arg.span,
                        format!("unknown tag :{tag_name} on {identifier:?}"),
                    );
                }
                continue;
            };

            if seen.iter().any(|s| s == &tag_name) {
                self.error(
                    "duplicate-tag",
                    arg.span,
                    format!("tag :{tag_name} given twice"),
                );
                continue;
            }
            seen.push(tag_name.clone());

            let resolved_tag = match tag_def.value() {
                None => tag_def.validate(self, None),
                Some(kind) => match iter.next() {
                    None => {
                        self.error(
                            "missing-tag-value",
                            arg.span,
                            format!(":{tag_name} needs a {} value", kind.as_str()),
                        );
                        None
                    }
                    Some(mut value) => {
                        if !kind.accepts(&value.value) {
                            self.error(
                                "bad-tag-value",
                                value.span,
                                format!(":{tag_name} needs a {} value", kind.as_str()),
                            );
                            None
                        } else {
                            coerce_to_kind(&mut value, kind);
                            tag_def.validate(self, Some(&mut value))
                        }
                    }
                },
            };
            if let Some(rt) = resolved_tag {
                resolved.push(rt);
            }
        }

        // Implicit external decorations from required extensions.
        for (tag_owner, tag) in registry.external_tags_for(identifier) {
            if self.is_required(tag_owner) && !seen.iter().any(|s| s == tag.name()) {
                if let Some(rt) = tag.implicit() {
                    resolved.push(rt);
                }
            }
        }

        let spec = def.positional();
        let min = def.required_positional();
        if positionals.len() < min || positionals.len() > spec.len() {
            self.error(
                "bad-arity",
                span,
                format!(
                    "{identifier:?} expects {}{} positional arguments, got {}",
                    min,
                    if spec.len() > min {
                        format!(" to {}", spec.len())
                    } else {
                        String::new()
                    },
                    positionals.len()
                ),
            );
        }
        for (arg, kind) in positionals.iter_mut().zip(spec.iter()) {
            if !kind.accepts(&arg.value) {
                self.error(
                    "bad-arg-kind",
                    arg.span,
                    format!("{identifier:?} expects a {} here", kind.as_str()),
                );
            } else {
                coerce_to_kind(arg, *kind);
            }
        }
        *args = positionals;
    }
}

/// Rewrites a lone string into a one-item list where a list is expected.
fn coerce_to_kind(arg: &mut Argument, kind: ArgKind) {
    if kind == ArgKind::StringList {
        if let ArgValue::String(s) = &arg.value {
            arg.value = ArgValue::StringList(vec![s.clone()]);
        }
    }
}
