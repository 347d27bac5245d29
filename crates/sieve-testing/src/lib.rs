//! In-memory doubles for the collaborator interfaces.
//!
//! `TestMessage` and `TestEnvironment` implement the message accessor and
//! script environment against plain vectors, recording every backend call
//! as an [`Event`] so tests can assert on exactly what was committed, and
//! in which order. Failures are injected per mailbox or recipient name.

use std::collections::{BTreeMap, BTreeSet};

use sieve::environment::{MailMessage, ScriptEnv};

/// A canned message.
#[derive(Debug, Clone, Default)]
pub struct TestMessage {
    headers: Vec<(String, String)>,
    size: u64,
    sender: Option<String>,
    recipient: Option<String>,
}

impl TestMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn sender(mut self, sender: &str) -> Self {
        self.sender = Some(sender.to_string());
        self
    }

    pub fn recipient(mut self, recipient: &str) -> Self {
        self.recipient = Some(recipient.to_string());
        self
    }
}

impl MailMessage for TestMessage {
    fn header(&self, name: &str) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn sender(&self) -> Option<String> {
        self.sender.clone()
    }

    fn recipient(&self) -> Option<String> {
        self.recipient.clone()
    }
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    MailboxOpen { mailbox: String },
    MailboxSave { mailbox: String, flags: Vec<String> },
    MailboxCommit { mailbox: String },
    MailboxRollback { mailbox: String },
    SmtpOpen { recipient: String },
    SmtpSend { recipient: String },
    SmtpCommit { recipient: String },
    SmtpRollback { recipient: String },
    Reject { reason: String },
    Response { recipient: String, subject: String },
    Notify { method: String, message: String },
    DuplicateMark { id: Vec<u8>, expire_secs: u64 },
}

#[derive(Debug, Clone)]
enum Session {
    Mailbox(String),
    Smtp(String),
}

/// A recording script environment.
#[derive(Debug, Default)]
pub struct TestEnvironment {
    default_mailbox: String,
    events: Vec<Event>,
    sessions: BTreeMap<u64, Session>,
    next_token: u64,
    duplicates: BTreeSet<Vec<u8>>,
    fail_mailbox_commit: BTreeSet<String>,
    fail_mailbox_open: BTreeSet<String>,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            default_mailbox: "INBOX".to_string(),
            ..Self::default()
        }
    }

    /// Makes `mailbox_finish(commit = true)` fail for the named mailbox.
    pub fn fail_commit_for(mut self, mailbox: &str) -> Self {
        self.fail_mailbox_commit.insert(mailbox.to_string());
        self
    }

    /// Makes `mailbox_open` fail for the named mailbox.
    pub fn fail_open_for(mut self, mailbox: &str) -> Self {
        self.fail_mailbox_open.insert(mailbox.to_string());
        self
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Mailboxes that received a committed store, in commit order.
    pub fn committed_mailboxes(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::MailboxCommit { mailbox } => Some(mailbox.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn committed_redirects(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::SmtpCommit { recipient } => Some(recipient.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn rejections(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Reject { reason } => Some(reason.as_str()),
                _ => None,
            })
            .collect()
    }

    fn open(&mut self, session: Session) -> u64 {
        self.next_token += 1;
        self.sessions.insert(self.next_token, session);
        self.next_token
    }
}

impl ScriptEnv for TestEnvironment {
    fn default_mailbox(&self) -> String {
        self.default_mailbox.clone()
    }

    fn mailbox_open(&mut self, mailbox: &str) -> Result<u64, String> {
        if self.fail_mailbox_open.contains(mailbox) {
            return Err(format!("cannot open mailbox {mailbox:?}"));
        }
        self.events.push(Event::MailboxOpen {
            mailbox: mailbox.to_string(),
        });
        Ok(self.open(Session::Mailbox(mailbox.to_string())))
    }

    fn mailbox_save(&mut self, token: u64, flags: &[String]) -> Result<(), String> {
        match self.sessions.get(&token) {
            Some(Session::Mailbox(mailbox)) => {
                let mailbox = mailbox.clone();
                self.events.push(Event::MailboxSave {
                    mailbox,
                    flags: flags.to_vec(),
                });
                Ok(())
            }
            _ => Err("unknown mailbox token".to_string()),
        }
    }

    fn mailbox_finish(&mut self, token: u64, commit: bool) -> Result<(), String> {
        match self.sessions.remove(&token) {
            Some(Session::Mailbox(mailbox)) => {
                if commit {
                    if self.fail_mailbox_commit.contains(&mailbox) {
                        return Err(format!("cannot commit to mailbox {mailbox:?}"));
                    }
                    self.events.push(Event::MailboxCommit { mailbox });
                } else {
                    self.events.push(Event::MailboxRollback { mailbox });
                }
                Ok(())
            }
            _ => Err("unknown mailbox token".to_string()),
        }
    }

    fn smtp_open(&mut self, recipient: &str) -> Result<u64, String> {
        self.events.push(Event::SmtpOpen {
            recipient: recipient.to_string(),
        });
        Ok(self.open(Session::Smtp(recipient.to_string())))
    }

    fn smtp_send(&mut self, token: u64) -> Result<(), String> {
        match self.sessions.get(&token) {
            Some(Session::Smtp(recipient)) => {
                let recipient = recipient.clone();
                self.events.push(Event::SmtpSend { recipient });
                Ok(())
            }
            _ => Err("unknown smtp token".to_string()),
        }
    }

    fn smtp_finish(&mut self, token: u64, commit: bool) -> Result<(), String> {
        match self.sessions.remove(&token) {
            Some(Session::Smtp(recipient)) => {
                if commit {
                    self.events.push(Event::SmtpCommit { recipient });
                } else {
                    self.events.push(Event::SmtpRollback { recipient });
                }
                Ok(())
            }
            _ => Err("unknown smtp token".to_string()),
        }
    }

    fn reject_message(&mut self, reason: &str) -> Result<(), String> {
        self.events.push(Event::Reject {
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn send_response(&mut self, recipient: &str, subject: &str, _body: &str) -> Result<(), String> {
        self.events.push(Event::Response {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
        });
        Ok(())
    }

    fn notify(&mut self, method: &str, message: &str) -> Result<(), String> {
        self.events.push(Event::Notify {
            method: method.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    fn duplicate_seen(&mut self, id: &[u8]) -> bool {
        self.duplicates.contains(id)
    }

    fn duplicate_mark(&mut self, id: &[u8], expire_secs: u64) {
        self.duplicates.insert(id.to_vec());
        self.events.push(Event::DuplicateMark {
            id: id.to_vec(),
            expire_secs,
        });
    }
}

/// A tracer that records executed mnemonics, for control-flow tests.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub operations: Vec<String>,
    pub actions: Vec<String>,
}

impl sieve::interp::Tracer for RecordingTracer {
    fn operation(&mut self, _address: usize, mnemonic: &str) {
        self.operations.push(mnemonic.to_string());
    }

    fn action(&mut self, name: &str, _description: &str) {
        self.actions.push(name.to_string());
    }
}
