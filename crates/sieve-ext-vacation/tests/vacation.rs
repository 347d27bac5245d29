use sieve::ast::{ArgValue, CommandNode, Script};
use sieve::registry::{ExtensionRegistry, RegistryBuilder};
use sieve::result::SieveResult;
use sieve_ext_reject::RejectExtension;
use sieve_ext_vacation::VacationExtension;
use sieve_testing::{Event, TestEnvironment, TestMessage};

fn registry() -> ExtensionRegistry {
    let mut builder = RegistryBuilder::new();
    builder
        .register(Box::new(VacationExtension))
        .expect("register vacation");
    builder
        .register(Box::new(RejectExtension))
        .expect("register reject");
    builder.build()
}

fn require(caps: &[&str], line: u32) -> CommandNode {
    CommandNode::new("require", line).arg(ArgValue::StringList(
        caps.iter().map(|c| c.to_string()).collect(),
    ))
}

fn compile(registry: &ExtensionRegistry, commands: Vec<CommandNode>) -> sieve::binary::SieveBinary {
    let mut script = Script::new(commands);
    let out = sieve::compile(&mut script, registry);
    assert!(out.report.ok, "compile errors: {:?}", out.report.diagnostics);
    out.binary.expect("binary")
}

fn away_message() -> TestMessage {
    TestMessage::new()
        .sender("friend@example.org")
        .recipient("me@example.net")
        .header("Subject", "lunch?")
}

#[test]
fn vacation_replies_once_per_sender() {
    let registry = registry();
    let binary = compile(
        &registry,
        vec![
            require(&["vacation"], 1),
            CommandNode::new("vacation", 2)
                .arg(ArgValue::Tag("days".into()))
                .arg(ArgValue::Number(3))
                .arg(ArgValue::String("away until Monday".into())),
        ],
    );

    let message = away_message();
    let mut env = TestEnvironment::new();

    // First delivery: the response goes out and the duplicate store is
    // marked with the configured period.
    let mut result = SieveResult::new();
    sieve::interp::run(&binary, &registry, &message, &mut result, None).expect("run");
    let summary = result.execute(&mut env);
    assert!(!summary.failed);
    // Vacation never cancels the keep; the implicit store also committed.
    assert_eq!(env.committed_mailboxes(), vec!["INBOX"]);
    let responses: Vec<_> = env
        .events()
        .iter()
        .filter(|e| matches!(e, Event::Response { .. }))
        .collect();
    assert_eq!(responses.len(), 1);
    assert!(env.events().iter().any(
        |e| matches!(e, Event::DuplicateMark { expire_secs, .. } if *expire_secs == 3 * 86_400)
    ));

    // Second delivery from the same sender: suppressed by the store.
    let mut result = SieveResult::new();
    sieve::interp::run(&binary, &registry, &message, &mut result, None).expect("run again");
    let summary = result.execute(&mut env);
    assert!(!summary.failed);
    let responses: Vec<_> = env
        .events()
        .iter()
        .filter(|e| matches!(e, Event::Response { .. }))
        .collect();
    assert_eq!(responses.len(), 1, "no second auto-reply");
    assert!(summary
        .log
        .entries()
        .iter()
        .any(|e| e.message.contains("suppressed")));
}

#[test]
fn vacation_without_a_sender_stays_silent() {
    let registry = registry();
    let binary = compile(
        &registry,
        vec![
            require(&["vacation"], 1),
            CommandNode::new("vacation", 2).arg(ArgValue::String("away".into())),
        ],
    );

    let mut result = SieveResult::new();
    sieve::interp::run(&binary, &registry, &TestMessage::new(), &mut result, None).expect("run");
    let mut env = TestEnvironment::new();
    let summary = result.execute(&mut env);
    assert!(!summary.failed);
    assert!(!env.events().iter().any(|e| matches!(e, Event::Response { .. })));
}

#[test]
fn vacation_subject_defaults_to_the_original_subject() {
    let registry = registry();
    let binary = compile(
        &registry,
        vec![
            require(&["vacation"], 1),
            CommandNode::new("vacation", 2).arg(ArgValue::String("away".into())),
        ],
    );

    let mut result = SieveResult::new();
    sieve::interp::run(&binary, &registry, &away_message(), &mut result, None).expect("run");
    let mut env = TestEnvironment::new();
    result.execute(&mut env);
    assert!(env.events().iter().any(
        |e| matches!(e, Event::Response { subject, .. } if subject == "Auto: lunch?")
    ));
}

/// The documented transform precedence: a vacation response added after an
/// unexecuted reject turns the reject into a silent discard.
#[test]
fn vacation_after_reject_downgrades_the_reject() {
    let registry = registry();
    let binary = compile(
        &registry,
        vec![
            require(&["vacation", "reject"], 1),
            CommandNode::new("reject", 2).arg(ArgValue::String("bounce".into())),
            CommandNode::new("vacation", 3).arg(ArgValue::String("away".into())),
        ],
    );

    let mut result = SieveResult::new();
    sieve::interp::run(&binary, &registry, &away_message(), &mut result, None).expect("run");
    assert_eq!(result.action_names(), vec!["reject", "vacation"]);

    let mut env = TestEnvironment::new();
    let summary = result.execute(&mut env);
    assert!(!summary.failed);
    // No rejection left the building, the keep was still cancelled, and
    // the auto-reply went out.
    assert!(env.rejections().is_empty());
    assert!(!summary.keep);
    assert!(env.events().iter().any(|e| matches!(e, Event::Response { .. })));
    assert!(summary
        .log
        .entries()
        .iter()
        .any(|e| e.message.contains("superseded")));
}

/// The opposite order aborts: adding a reject after another response.
#[test]
fn reject_after_vacation_aborts() {
    let registry = registry();
    let binary = compile(
        &registry,
        vec![
            require(&["vacation", "reject"], 1),
            CommandNode::new("vacation", 2).arg(ArgValue::String("away".into())),
            CommandNode::new("reject", 3).arg(ArgValue::String("bounce".into())),
        ],
    );

    let mut result = SieveResult::new();
    let err = sieve::interp::run(&binary, &registry, &away_message(), &mut result, None)
        .expect_err("reject after a response-sender aborts");
    assert_eq!(err.kind, sieve::interp::RuntimeErrorKind::Conflict);
    assert_eq!(err.line, Some(3));
    assert_eq!(err.related_line, Some(2));
}
