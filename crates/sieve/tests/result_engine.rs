mod testutil;

use sieve::ast::{ArgValue, CommandNode};
use sieve::registry::core_shared;
use sieve::result::SieveResult;
use sieve_testing::{Event, TestEnvironment, TestMessage};

#[test]
fn keep_stores_into_default_mailbox_and_cancels_keep() {
    let registry = core_shared();
    let binary = testutil::compile(vec![CommandNode::new("keep", 1)], registry);

    let message = TestMessage::new();
    let mut result = SieveResult::new();
    testutil::run(&binary, registry, &message, &mut result).expect("run");

    assert_eq!(result.action_names(), vec!["store"]);
    assert!(result.implicit_keep());

    let mut env = TestEnvironment::new();
    let summary = result.execute(&mut env);
    assert!(!summary.failed);
    assert_eq!(env.committed_mailboxes(), vec!["INBOX"]);
    // The store commit cancelled the implicit keep.
    assert!(!summary.keep);
    assert!(summary
        .log
        .entries()
        .iter()
        .any(|e| e.message.contains("stored message")));
}

#[test]
fn discard_forces_keep_off_and_stores_nothing() {
    let registry = core_shared();
    let binary = testutil::compile(vec![CommandNode::new("discard", 1)], registry);

    let message = TestMessage::new();
    let mut result = SieveResult::new();
    testutil::run(&binary, registry, &message, &mut result).expect("run");

    assert_eq!(result.action_names(), vec!["discard"]);
    assert!(!result.implicit_keep());

    let mut env = TestEnvironment::new();
    let summary = result.execute(&mut env);
    assert!(!summary.failed);
    assert!(!summary.keep);
    assert!(env.committed_mailboxes().is_empty());
    assert!(!env.events().iter().any(|e| matches!(e, Event::MailboxOpen { .. })));
}

#[test]
fn empty_script_falls_back_to_implicit_keep() {
    let registry = core_shared();
    let binary = testutil::compile(vec![], registry);

    let message = TestMessage::new();
    let mut result = SieveResult::new();
    testutil::run(&binary, registry, &message, &mut result).expect("run");
    assert!(result.is_empty());

    let mut env = TestEnvironment::new();
    let summary = result.execute(&mut env);
    assert_eq!(env.committed_mailboxes(), vec!["INBOX"]);
    assert!(!summary.keep);
}

#[test]
fn redirect_commits_over_smtp_and_cancels_keep() {
    let registry = core_shared();
    let binary = testutil::compile(
        vec![CommandNode::new("redirect", 1).arg(ArgValue::String("other@Example.ORG".into()))],
        registry,
    );

    let message = TestMessage::new();
    let mut result = SieveResult::new();
    testutil::run(&binary, registry, &message, &mut result).expect("run");
    // The literal address was normalized at compile time.
    assert_eq!(result.descriptions(), vec!["redirect message to \"other@example.org\""]);

    let mut env = TestEnvironment::new();
    let summary = result.execute(&mut env);
    assert!(!summary.failed);
    assert!(!summary.keep);
    assert_eq!(env.committed_redirects(), vec!["other@example.org"]);
    // The implicit keep store never ran.
    assert!(env.committed_mailboxes().is_empty());
}

#[test]
fn failed_commit_rolls_back_later_actions_and_preserves_keep() {
    let registry = core_shared();
    // keep merges with the implicit keep; the redirect follows it in result
    // order, so the failing store commit must roll the redirect back.
    let binary = testutil::compile(
        vec![
            CommandNode::new("keep", 1),
            CommandNode::new("redirect", 2).arg(ArgValue::String("next@example.org".into())),
        ],
        registry,
    );

    let message = TestMessage::new();
    let mut result = SieveResult::new();
    testutil::run(&binary, registry, &message, &mut result).expect("run");

    let mut env = TestEnvironment::new().fail_commit_for("INBOX");
    let summary = result.execute(&mut env);
    assert!(summary.failed);
    // Nothing was committed; the implicit keep is still the caller's job.
    assert!(summary.keep);
    assert_eq!(summary.committed, 0);
    assert!(env.committed_redirects().is_empty());
    assert!(env
        .events()
        .iter()
        .any(|e| matches!(e, Event::SmtpRollback { .. })));
    assert!(summary.log.errors().next().is_some());
}

#[test]
fn partial_success_is_preserved_across_a_later_failure() {
    let registry = core_shared();
    // The redirect commits first, then the store to INBOX fails: the
    // redirect must stay committed.
    let binary = testutil::compile(
        vec![
            CommandNode::new("redirect", 1).arg(ArgValue::String("next@example.org".into())),
            CommandNode::new("keep", 2),
        ],
        registry,
    );

    let message = TestMessage::new();
    let mut result = SieveResult::new();
    testutil::run(&binary, registry, &message, &mut result).expect("run");

    let mut env = TestEnvironment::new().fail_commit_for("INBOX");
    let summary = result.execute(&mut env);
    assert!(summary.failed);
    assert_eq!(summary.committed, 1);
    assert_eq!(env.committed_redirects(), vec!["next@example.org"]);
    // The redirect already cancelled the keep before the store failed.
    assert!(!summary.keep);
}

#[test]
fn failed_start_is_local_to_the_action() {
    let registry = core_shared();
    let binary = testutil::compile(
        vec![
            CommandNode::new("keep", 1),
            CommandNode::new("redirect", 2).arg(ArgValue::String("next@example.org".into())),
        ],
        registry,
    );

    let message = TestMessage::new();
    let mut result = SieveResult::new();
    testutil::run(&binary, registry, &message, &mut result).expect("run");

    let mut env = TestEnvironment::new().fail_open_for("INBOX");
    let summary = result.execute(&mut env);
    // The store never started, but the redirect still went through.
    assert_eq!(env.committed_redirects(), vec!["next@example.org"]);
    assert!(!summary.keep);
    assert!(summary
        .log
        .entries()
        .iter()
        .any(|e| e.message.contains("failed to start")));
}
