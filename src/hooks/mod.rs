//! Side effects run after a rotation: remote host bootstrap and notifications

pub mod bootstrap;
pub mod notify;

pub use bootstrap::{PostProcessor, SshPostProcessor};
pub use notify::{create_notifier, format_subject, rotation_body, LogNotifier, Notifier, SendmailNotifier};
