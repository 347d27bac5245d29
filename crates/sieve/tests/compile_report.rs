mod testutil;

use sieve::ast::{ArgValue, CommandNode, Script, TestNode};
use sieve::registry::core_shared;

#[test]
fn unknown_command_is_a_located_error() {
    let out = testutil::compile_err(vec![CommandNode::new("frobnicate", 3)], core_shared());
    let error = out.report.errors().next().expect("one error");
    assert_eq!(error.code, "unknown-command");
    assert_eq!(error.span.map(|s| s.line), Some(3));
}

#[test]
fn errors_accumulate_across_sibling_statements() {
    let out = testutil::compile_err(
        vec![
            CommandNode::new("frobnicate", 1),
            CommandNode::new("redirect", 2).arg(ArgValue::String("not-an-address".into())),
            CommandNode::new("keep", 3).arg(ArgValue::Number(7)),
            CommandNode::new("fileinto", 4).arg(ArgValue::String("INBOX".into())),
        ],
        core_shared(),
    );
    let codes: Vec<_> = out.report.errors().map(|e| e.code.as_str()).collect();
    assert!(codes.contains(&"unknown-command"));
    assert!(codes.contains(&"bad-address"));
    assert!(codes.contains(&"bad-arity"));
    // fileinto is not in the core registry at all.
    assert!(codes.len() >= 4);
    // Diagnostics come out sorted by source position.
    let lines: Vec<_> = out
        .report
        .diagnostics
        .iter()
        .filter_map(|d| d.span.map(|s| s.line))
        .collect();
    let mut sorted = lines.clone();
    sorted.sort_unstable();
    assert_eq!(lines, sorted);
}

#[test]
fn require_gates_capabilities_and_rejects_unknown_ones() {
    let out = testutil::compile_err(
        vec![CommandNode::new("require", 1).arg(ArgValue::String("no-such-capability".into()))],
        core_shared(),
    );
    assert_eq!(
        out.report.errors().next().map(|e| e.code.as_str()),
        Some("unknown-capability")
    );
}

#[test]
fn require_must_precede_other_commands() {
    let out = testutil::compile_err(
        vec![
            CommandNode::new("keep", 1),
            CommandNode::new("require", 2).arg(ArgValue::String("copy".into())),
        ],
        core_shared(),
    );
    let codes: Vec<_> = out.report.errors().map(|e| e.code.as_str()).collect();
    assert!(codes.contains(&"misplaced-require"));
}

#[test]
fn misplaced_elsif_is_rejected() {
    let out = testutil::compile_err(
        vec![
            CommandNode::new("keep", 1),
            CommandNode::new("elsif", 2)
                .test(TestNode::new("true", 2))
                .block(vec![]),
        ],
        core_shared(),
    );
    let codes: Vec<_> = out.report.errors().map(|e| e.code.as_str()).collect();
    assert!(codes.contains(&"misplaced-conditional"));
}

#[test]
fn conflicting_match_types_are_rejected() {
    let out = testutil::compile_err(
        vec![CommandNode::new("if", 1)
            .test(
                TestNode::new("header", 1)
                    .arg(ArgValue::Tag("is".into()))
                    .arg(ArgValue::Tag("contains".into()))
                    .arg(ArgValue::String("Subject".into()))
                    .arg(ArgValue::String("x".into())),
            )
            .block(vec![])],
        core_shared(),
    );
    let codes: Vec<_> = out.report.errors().map(|e| e.code.as_str()).collect();
    assert!(codes.contains(&"conflicting-tags"));
}

#[test]
fn size_requires_exactly_one_mode() {
    let out = testutil::compile_err(
        vec![CommandNode::new("if", 1)
            .test(TestNode::new("size", 1).arg(ArgValue::Number(10)))
            .block(vec![])],
        core_shared(),
    );
    let codes: Vec<_> = out.report.errors().map(|e| e.code.as_str()).collect();
    assert!(codes.contains(&"missing-size-mode"));
}

#[test]
fn report_serializes_with_its_schema_version() {
    let mut script = Script::new(vec![CommandNode::new("frobnicate", 1)]);
    let out = sieve::compile(&mut script, core_shared());
    let json = serde_json::to_value(&out.report).expect("serialize report");
    assert_eq!(
        json["schema_version"],
        serde_json::Value::String(sieve_contracts::SIEVE_REPORT_SCHEMA_VERSION.to_string())
    );
    assert_eq!(json["ok"], serde_json::Value::Bool(false));
    assert!(json["diagnostics"].as_array().is_some_and(|d| !d.is_empty()));
}
