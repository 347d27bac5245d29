use sieve::ast::{ArgValue, CommandNode, Script};
use sieve::registry::{ExtensionRegistry, RegistryBuilder};
use sieve::result::SieveResult;
use sieve_ext_fileinto::FileintoExtension;
use sieve_ext_imap4flags::Imap4flagsExtension;
use sieve_testing::{Event, TestEnvironment, TestMessage};

fn registry() -> ExtensionRegistry {
    let mut builder = RegistryBuilder::new();
    builder
        .register(Box::new(Imap4flagsExtension))
        .expect("register imap4flags");
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

fn run(registry: &ExtensionRegistry, commands: Vec<CommandNode>) -> TestEnvironment {
    let mut script = Script::new(commands);
    let out = sieve::compile(&mut script, registry);
    assert!(out.report.ok, "compile errors: {:?}", out.report.diagnostics);
    let binary = out.binary.expect("binary");

    let mut result = SieveResult::new();
    sieve::interp::run(&binary, registry, &TestMessage::new(), &mut result, None).expect("run");
    let mut env = TestEnvironment::new();
    let summary = result.execute(&mut env);
    assert!(!summary.failed);
    env
}

fn saved_flags(env: &TestEnvironment, mailbox: &str) -> Vec<String> {
    env.events()
        .iter()
        .find_map(|e| match e {
            Event::MailboxSave { mailbox: m, flags } if m == mailbox => Some(flags.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

#[test]
fn explicit_flags_tag_reaches_the_store() {
    let registry = registry();
    let env = run(
        &registry,
        vec![
            require(&["imap4flags"], 1),
            CommandNode::new("keep", 2)
                .arg(ArgValue::Tag("flags".into()))
                .arg(ArgValue::StringList(vec![r"\Seen".to_string(), "ham".to_string()])),
        ],
    );
    assert_eq!(saved_flags(&env, "INBOX"), vec![r"\Seen".to_string(), "ham".to_string()]);
}

#[test]
fn flag_register_is_applied_implicitly_when_required() {
    let registry = registry();
    let env = run(
        &registry,
        vec![
            require(&["imap4flags", "fileinto"], 1),
            CommandNode::new("setflag", 2)
                .arg(ArgValue::StringList(vec![r"\Flagged \Seen".to_string()])),
            CommandNode::new("removeflag", 3)
                .arg(ArgValue::StringList(vec![r"\Seen".to_string()])),
            CommandNode::new("addflag", 4)
                .arg(ArgValue::StringList(vec!["urgent".to_string()])),
            CommandNode::new("fileinto", 5).arg(ArgValue::String("Flagged".into())),
        ],
    );
    assert_eq!(
        saved_flags(&env, "Flagged"),
        vec![r"\Flagged".to_string(), "urgent".to_string()]
    );
}

#[test]
fn register_snapshot_happens_at_the_store_operation() {
    let registry = registry();
    // Flags set after the keep do not affect the earlier snapshot.
    let env = run(
        &registry,
        vec![
            require(&["imap4flags"], 1),
            CommandNode::new("setflag", 2).arg(ArgValue::StringList(vec!["early".to_string()])),
            CommandNode::new("keep", 3),
            CommandNode::new("setflag", 4).arg(ArgValue::StringList(vec!["late".to_string()])),
        ],
    );
    assert_eq!(saved_flags(&env, "INBOX"), vec!["early".to_string()]);
}

#[test]
fn flag_commands_need_require() {
    let registry = registry();
    let mut script = Script::new(vec![
        CommandNode::new("setflag", 1).arg(ArgValue::StringList(vec!["x".to_string()]))
    ]);
    let out = sieve::compile(&mut script, &registry);
    assert!(!out.report.ok);
    assert_eq!(
        out.report.errors().next().map(|e| e.code.as_str()),
        Some("not-required")
    );
}

#[test]
fn without_the_extension_keep_saves_without_flags() {
    let registry = registry();
    let env = run(&registry, vec![CommandNode::new("keep", 1)]);
    assert!(saved_flags(&env, "INBOX").is_empty());
}
