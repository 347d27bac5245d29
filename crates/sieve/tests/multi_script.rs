mod testutil;

use sieve::ast::{ArgValue, CommandNode};
use sieve::registry::core_shared;
use sieve::result::SieveResult;
use sieve_testing::{TestEnvironment, TestMessage};

fn redirect(addr: &str, line: u32) -> CommandNode {
    CommandNode::new("redirect", line).arg(ArgValue::String(addr.into()))
}

/// Two scripts run back to back against one result: an action that already
/// executed in the first round suppresses a later identical one instead of
/// aborting the chain.
#[test]
fn executed_action_suppresses_identical_addition_in_a_later_script() {
    let registry = core_shared();
    let first = testutil::compile(vec![redirect("a@b.example", 1)], registry);
    let second = testutil::compile(
        vec![redirect("a@b.example", 1), redirect("c@d.example", 2)],
        registry,
    );

    let message = TestMessage::new();
    let mut result = SieveResult::new();
    let mut env = TestEnvironment::new();

    testutil::run(&first, registry, &message, &mut result).expect("first run");
    let summary = result.execute(&mut env);
    assert!(!summary.failed);
    assert_eq!(env.committed_redirects(), vec!["a@b.example"]);

    // Second script: the duplicate is dropped silently, the new address is
    // appended and committed in its own round.
    testutil::run(&second, registry, &message, &mut result).expect("second run");
    assert_eq!(result.action_names(), vec!["redirect", "store", "redirect"]);

    let summary = result.execute(&mut env);
    assert!(!summary.failed);
    assert_eq!(env.committed_redirects(), vec!["a@b.example", "c@d.example"]);
}

/// A fresh duplicate inside one round still aborts, chain or not.
#[test]
fn unexecuted_duplicate_still_aborts_in_the_second_script() {
    let registry = core_shared();
    let second = testutil::compile(
        vec![redirect("x@y.example", 1), redirect("x@y.example", 2)],
        registry,
    );

    let mut result = SieveResult::new();
    let err = testutil::run(&second, registry, &TestMessage::new(), &mut result)
        .expect_err("duplicate in one round aborts");
    assert_eq!(err.kind, sieve::interp::RuntimeErrorKind::Duplicate);
}
