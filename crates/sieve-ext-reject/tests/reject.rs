use sieve::ast::{ArgValue, CommandNode, Script};
use sieve::interp::RuntimeErrorKind;
use sieve::registry::{ExtensionRegistry, RegistryBuilder};
use sieve::result::SieveResult;
use sieve_ext_fileinto::FileintoExtension;
use sieve_ext_reject::RejectExtension;
use sieve_testing::{TestEnvironment, TestMessage};

fn registry() -> ExtensionRegistry {
    let mut builder = RegistryBuilder::new();
    builder
        .register(Box::new(RejectExtension))
        .expect("register reject");
    builder
        .register(Box::new(FileintoExtension))
        .expect("register fileinto");
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

#[test]
fn reject_sends_the_reason_and_cancels_keep() {
    let registry = registry();
    let binary = compile(
        &registry,
        vec![
            require(&["reject"], 1),
            CommandNode::new("reject", 2).arg(ArgValue::String("not here".into())),
        ],
    );

    let mut result = SieveResult::new();
    sieve::interp::run(&binary, &registry, &TestMessage::new(), &mut result, None).expect("run");

    let mut env = TestEnvironment::new();
    let summary = result.execute(&mut env);
    assert!(!summary.failed);
    assert_eq!(env.rejections(), vec!["not here"]);
    assert!(!summary.keep);
    assert!(env.committed_mailboxes().is_empty());
}

#[test]
fn fileinto_after_reject_aborts_the_run() {
    let registry = registry();
    let binary = compile(
        &registry,
        vec![
            require(&["reject", "fileinto"], 1),
            CommandNode::new("reject", 2).arg(ArgValue::String("no".into())),
            CommandNode::new("fileinto", 3).arg(ArgValue::String("INBOX".into())),
        ],
    );

    let mut result = SieveResult::new();
    let err = sieve::interp::run(&binary, &registry, &TestMessage::new(), &mut result, None)
        .expect_err("delivery after reject conflicts");
    assert_eq!(err.kind, RuntimeErrorKind::Conflict);
    // Both source locations are reported.
    assert_eq!(err.line, Some(3));
    assert_eq!(err.related_line, Some(2));
}

#[test]
fn reject_after_keep_aborts_the_run() {
    let registry = registry();
    let binary = compile(
        &registry,
        vec![
            require(&["reject"], 1),
            CommandNode::new("keep", 2),
            CommandNode::new("reject", 3).arg(ArgValue::String("no".into())),
        ],
    );

    let mut result = SieveResult::new();
    let err = sieve::interp::run(&binary, &registry, &TestMessage::new(), &mut result, None)
        .expect_err("reject after delivery conflicts");
    assert_eq!(err.kind, RuntimeErrorKind::Conflict);
}

#[test]
fn two_rejects_are_a_duplicate_error() {
    let registry = registry();
    let binary = compile(
        &registry,
        vec![
            require(&["reject"], 1),
            CommandNode::new("reject", 2).arg(ArgValue::String("first".into())),
            CommandNode::new("ereject", 3).arg(ArgValue::String("second".into())),
        ],
    );

    let mut result = SieveResult::new();
    let err = sieve::interp::run(&binary, &registry, &TestMessage::new(), &mut result, None)
        .expect_err("second reject is a duplicate");
    assert_eq!(err.kind, RuntimeErrorKind::Duplicate);
    assert_eq!(err.line, Some(3));
    assert_eq!(err.related_line, Some(2));
}

#[test]
fn discard_and_reject_coexist() {
    let registry = registry();
    let binary = compile(
        &registry,
        vec![
            require(&["reject"], 1),
            CommandNode::new("discard", 2),
            CommandNode::new("reject", 3).arg(ArgValue::String("go away".into())),
        ],
    );

    let mut result = SieveResult::new();
    sieve::interp::run(&binary, &registry, &TestMessage::new(), &mut result, None).expect("run");

    let mut env = TestEnvironment::new();
    let summary = result.execute(&mut env);
    assert_eq!(env.rejections(), vec!["go away"]);
    assert!(!summary.keep);
}
