//! Collaborator interfaces consumed by the interpreter and the result engine.
//!
//! Concrete backends (mailbox storage, SMTP transport, notification methods,
//! the duplicate-tracking store) live outside this workspace; the engine only
//! ever talks to these traits. Callback failures are plain strings; the
//! result engine decides whether they surface locally or globally.

/// Read-only view of the message a script runs against.
pub trait MailMessage {
    /// All values of the named header, in message order. Header name lookup
    /// is case-insensitive.
    fn header(&self, name: &str) -> Vec<String>;

    /// Message size in bytes.
    fn size(&self) -> u64;

    /// Envelope sender, if any. A missing sender suppresses auto-replies.
    fn sender(&self) -> Option<String>;

    /// Envelope recipient the script runs on behalf of.
    fn recipient(&self) -> Option<String>;
}

/// Mutable script environment: delivery backends and the duplicate store.
///
/// Mailbox and SMTP transactions are token-based so one action can hold a
/// resource across the start/execute/commit phases. `finish` with
/// `commit = false` must release the resource without observable effect.
pub trait ScriptEnv {
    fn default_mailbox(&self) -> String;

    fn mailbox_open(&mut self, mailbox: &str) -> Result<u64, String>;
    fn mailbox_save(&mut self, token: u64, flags: &[String]) -> Result<(), String>;
    fn mailbox_finish(&mut self, token: u64, commit: bool) -> Result<(), String>;

    fn smtp_open(&mut self, recipient: &str) -> Result<u64, String>;
    fn smtp_send(&mut self, token: u64) -> Result<(), String>;
    fn smtp_finish(&mut self, token: u64, commit: bool) -> Result<(), String>;

    /// Refuses delivery of the current message with the given reason.
    fn reject_message(&mut self, reason: &str) -> Result<(), String>;

    /// Sends an auto-generated response (vacation replies).
    fn send_response(&mut self, recipient: &str, subject: &str, body: &str)
        -> Result<(), String>;

    /// Delivers a notification through the given method URI.
    fn notify(&mut self, method: &str, message: &str) -> Result<(), String>;

    /// True if the duplicate store has seen `id` and it has not expired.
    fn duplicate_seen(&mut self, id: &[u8]) -> bool;

    /// Records `id` in the duplicate store with the given expiry.
    fn duplicate_mark(&mut self, id: &[u8], expire_secs: u64);
}
