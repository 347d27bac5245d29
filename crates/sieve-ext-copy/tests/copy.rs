use sieve::ast::{ArgValue, CommandNode, Script};
use sieve::registry::{ExtensionRegistry, RegistryBuilder};
use sieve::result::SieveResult;
use sieve_ext_copy::CopyExtension;
use sieve_ext_fileinto::FileintoExtension;
use sieve_testing::{TestEnvironment, TestMessage};

fn registry_with_fileinto() -> ExtensionRegistry {
    let mut builder = RegistryBuilder::new();
    builder
        .register(Box::new(FileintoExtension))
        .expect("register fileinto");
    builder.register(Box::new(CopyExtension)).expect("register copy");
    builder.build()
}

fn require(caps: &[&str], line: u32) -> CommandNode {
    CommandNode::new("require", line).arg(ArgValue::StringList(
        caps.iter().map(|c| c.to_string()).collect(),
    ))
}

fn run(
    registry: &ExtensionRegistry,
    commands: Vec<CommandNode>,
) -> (SieveResult, TestEnvironment) {
    let mut script = Script::new(commands);
    let out = sieve::compile(&mut script, registry);
    assert!(out.report.ok, "compile errors: {:?}", out.report.diagnostics);
    let binary = out.binary.expect("binary");

    let mut result = SieveResult::new();
    sieve::interp::run(&binary, registry, &TestMessage::new(), &mut result, None).expect("run");
    let mut env = TestEnvironment::new();
    let summary = result.execute(&mut env);
    assert!(!summary.failed);
    (result, env)
}

#[test]
fn copy_on_fileinto_preserves_the_implicit_keep() {
    let registry = registry_with_fileinto();
    let (_, env) = run(
        &registry,
        vec![
            require(&["fileinto", "copy"], 1),
            CommandNode::new("fileinto", 2)
                .arg(ArgValue::Tag("copy".into()))
                .arg(ArgValue::String("Archive".into())),
        ],
    );
    // The copy store committed *and* the implicit keep still delivered.
    assert_eq!(env.committed_mailboxes(), vec!["Archive", "INBOX"]);
}

#[test]
fn copy_on_redirect_preserves_the_implicit_keep() {
    let registry = registry_with_fileinto();
    let (_, env) = run(
        &registry,
        vec![
            require(&["copy"], 1),
            CommandNode::new("redirect", 2)
                .arg(ArgValue::Tag("copy".into()))
                .arg(ArgValue::String("other@example.org".into())),
        ],
    );
    assert_eq!(env.committed_redirects(), vec!["other@example.org"]);
    assert_eq!(env.committed_mailboxes(), vec!["INBOX"]);
}

#[test]
fn plain_fileinto_still_cancels_keep_with_copy_registered() {
    let registry = registry_with_fileinto();
    let (_, env) = run(
        &registry,
        vec![
            require(&["fileinto", "copy"], 1),
            CommandNode::new("fileinto", 2).arg(ArgValue::String("Archive".into())),
        ],
    );
    assert_eq!(env.committed_mailboxes(), vec!["Archive"]);
}

#[test]
fn copy_tag_needs_require() {
    let registry = registry_with_fileinto();
    let mut script = Script::new(vec![
        require(&["fileinto"], 1),
        CommandNode::new("fileinto", 2)
            .arg(ArgValue::Tag("copy".into()))
            .arg(ArgValue::String("Archive".into())),
    ]);
    let out = sieve::compile(&mut script, &registry);
    assert!(!out.report.ok);
    assert_eq!(
        out.report.errors().next().map(|e| e.code.as_str()),
        Some("not-required")
    );
}

/// The copy extension registers a tag on `fileinto` without requiring that
/// the host command exists: a registry without fileinto still accepts the
/// registration, and `:copy` keeps working on `redirect`.
#[test]
fn registration_without_the_host_command_is_inert() {
    let mut builder = RegistryBuilder::new();
    builder.register(Box::new(CopyExtension)).expect("register copy alone");
    let registry = builder.build();
    assert!(registry.command("fileinto").is_none());

    let mut script = Script::new(vec![
        require(&["copy"], 1),
        CommandNode::new("redirect", 2)
            .arg(ArgValue::Tag("copy".into()))
            .arg(ArgValue::String("other@example.org".into())),
    ]);
    let out = sieve::compile(&mut script, &registry);
    assert!(out.report.ok, "compile errors: {:?}", out.report.diagnostics);
}
