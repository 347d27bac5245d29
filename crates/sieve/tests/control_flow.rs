mod testutil;

use sieve::ast::{ArgValue, CommandNode, TestNode};
use sieve::registry::core_shared;
use sieve::result::SieveResult;
use sieve_testing::{RecordingTracer, TestMessage};

fn spam_message() -> TestMessage {
    TestMessage::new()
        .header("X-Spam", "yes")
        .header("Subject", "cheap offers")
        .size(4_096)
}

fn header_is(name: &str, value: &str, line: u32) -> TestNode {
    TestNode::new("header", line)
        .arg(ArgValue::Tag("is".into()))
        .arg(ArgValue::String(name.into()))
        .arg(ArgValue::String(value.into()))
}

#[test]
fn if_branch_taken_when_test_matches() {
    let registry = core_shared();
    let binary = testutil::compile(
        vec![
            CommandNode::new("if", 1)
                .test(header_is("X-Spam", "yes", 1))
                .block(vec![CommandNode::new("discard", 2)]),
            CommandNode::new("keep", 4),
        ],
        registry,
    );

    let mut result = SieveResult::new();
    testutil::run(&binary, registry, &spam_message(), &mut result).expect("run");
    assert_eq!(result.action_names(), vec!["discard", "store"]);
}

#[test]
fn elsif_and_else_fall_through_in_order() {
    let registry = core_shared();
    // if / elsif / else are siblings in the command sequence.
    let commands = vec![
        CommandNode::new("if", 1)
            .test(header_is("X-Spam", "no", 1))
            .block(vec![CommandNode::new("discard", 2)]),
        CommandNode::new("elsif", 3)
            .test(header_is("Subject", "cheap offers", 3))
            .block(vec![CommandNode::new("redirect", 4)
                .arg(ArgValue::String("triage@example.org".into()))]),
        CommandNode::new("else", 5).block(vec![CommandNode::new("keep", 6)]),
    ];
    let binary = testutil::compile(commands, registry);

    let mut result = SieveResult::new();
    testutil::run(&binary, registry, &spam_message(), &mut result).expect("run");
    assert_eq!(result.action_names(), vec!["redirect"]);
}

#[test]
fn allof_and_anyof_short_circuit() {
    let registry = core_shared();
    let binary = testutil::compile(
        vec![
            CommandNode::new("if", 1)
                .test(
                    TestNode::new("allof", 1)
                        .subtest(TestNode::new("exists", 1).arg(ArgValue::String("X-Spam".into())))
                        .subtest(header_is("X-Spam", "yes", 1)),
                )
                .block(vec![CommandNode::new("discard", 2)]),
            CommandNode::new("if", 4)
                .test(
                    TestNode::new("anyof", 4)
                        .subtest(TestNode::new("false", 4))
                        .subtest(TestNode::new("size", 4)
                            .arg(ArgValue::Tag("over".into()))
                            .arg(ArgValue::Number(1_000))),
                )
                .block(vec![CommandNode::new("redirect", 5)
                    .arg(ArgValue::String("big@example.org".into()))]),
        ],
        registry,
    );

    let mut result = SieveResult::new();
    testutil::run(&binary, registry, &spam_message(), &mut result).expect("run");
    assert_eq!(result.action_names(), vec!["discard", "redirect"]);
}

#[test]
fn not_inverts_the_test_register() {
    let registry = core_shared();
    let binary = testutil::compile(
        vec![CommandNode::new("if", 1)
            .test(TestNode::new("not", 1).subtest(TestNode::new("exists", 1).arg(
                ArgValue::String("X-Missing".into()),
            )))
            .block(vec![CommandNode::new("discard", 2)])],
        registry,
    );

    let mut result = SieveResult::new();
    testutil::run(&binary, registry, &spam_message(), &mut result).expect("run");
    assert_eq!(result.action_names(), vec!["discard"]);
}

#[test]
fn no_operation_executes_after_stop() {
    let registry = core_shared();
    let binary = testutil::compile(
        vec![
            CommandNode::new("keep", 1),
            CommandNode::new("stop", 2),
            CommandNode::new("redirect", 3).arg(ArgValue::String("never@example.org".into())),
        ],
        registry,
    );

    let mut result = SieveResult::new();
    let mut tracer = RecordingTracer::default();
    let outcome =
        testutil::run_traced(&binary, registry, &spam_message(), &mut result, &mut tracer)
            .expect("run");
    assert_eq!(outcome, sieve::interp::RunOutcome::Stopped);
    assert_eq!(tracer.operations.last().map(String::as_str), Some("stop"));
    assert_eq!(result.action_names(), vec!["store"]);
}

#[test]
fn address_test_extracts_parts() {
    let registry = core_shared();
    let message = TestMessage::new().header("From", "Big Sender <Boss@Example.ORG>");
    let binary = testutil::compile(
        vec![CommandNode::new("if", 1)
            .test(
                TestNode::new("address", 1)
                    .arg(ArgValue::Tag("domain".into()))
                    .arg(ArgValue::Tag("is".into()))
                    .arg(ArgValue::String("From".into()))
                    .arg(ArgValue::String("example.org".into())),
            )
            .block(vec![CommandNode::new("discard", 2)])],
        registry,
    );

    let mut result = SieveResult::new();
    testutil::run(&binary, registry, &message, &mut result).expect("run");
    assert_eq!(result.action_names(), vec!["discard"]);
}

#[test]
fn header_matches_uses_wildcards() {
    let registry = core_shared();
    let binary = testutil::compile(
        vec![CommandNode::new("if", 1)
            .test(
                TestNode::new("header", 1)
                    .arg(ArgValue::Tag("matches".into()))
                    .arg(ArgValue::String("Subject".into()))
                    .arg(ArgValue::String("cheap*".into())),
            )
            .block(vec![CommandNode::new("discard", 2)])],
        registry,
    );

    let mut result = SieveResult::new();
    testutil::run(&binary, registry, &spam_message(), &mut result).expect("run");
    assert_eq!(result.action_names(), vec!["discard"]);
}
