use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::command;
use crate::config::EmailConfig;
use crate::error::{FleetError, Result};
use crate::models::{region_name, RegionId};

/// Best-effort outbound notification
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// Writes notifications to the log instead of delivering them
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        info!(%subject, "Notification (mail disabled):\n{}", body);
        Ok(())
    }
}

/// Pipes an RFC 822 message into `sendmail -t`
pub struct SendmailNotifier {
    binary: String,
    from: String,
    to: Vec<String>,
}

impl SendmailNotifier {
    pub fn new(config: &EmailConfig) -> Self {
        Self {
            binary: config.sendmail.clone(),
            from: config.from.clone(),
            to: config.to.clone(),
        }
    }

    fn message(&self, subject: &str, body: &str) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}\n",
            self.from,
            self.to.join(", "),
            subject,
            body
        )
    }
}

#[async_trait]
impl Notifier for SendmailNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let message = self.message(subject, body);
        command::run_with_input(&self.binary, &["-t".to_string()], Some(&message))
            .await
            .map_err(|e| FleetError::Notify(e.to_string()))?;
        info!(recipients = self.to.len(), "Sent rotation email");
        Ok(())
    }
}

/// Mail when enabled, otherwise log
pub fn create_notifier(config: &EmailConfig) -> Arc<dyn Notifier> {
    if config.send_email {
        Arc::new(SendmailNotifier::new(config))
    } else {
        Arc::new(LogNotifier)
    }
}

/// Fill `{timestamp}` and `{host}` into a subject template
pub fn format_subject(template: &str, at: DateTime<Utc>, host: &str) -> String {
    template
        .replace("{timestamp}", &at.format("%d-%b-%Y %I:%M:%S %p").to_string())
        .replace("{host}", host)
}

/// Name of this machine for notification subjects
pub fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Body describing one switch: which proxy came in, which went out, and where
pub fn rotation_body(
    proxy_in: Ipv4Addr,
    proxy_out: Option<Ipv4Addr>,
    label: Option<&str>,
    region: RegionId,
) -> String {
    let label = label.unwrap_or("-");
    let out = proxy_out
        .map(|a| a.to_string())
        .unwrap_or_else(|| "none".to_string());

    format!(
        "I just switched a proxy node in the proxy infrastructure. Details are below.\n\n\
         In: {label}, {proxy_in}\n\
         Out: {label}, {out}\n\n\
         Region: {region}\n\n\
         -- Proxy Rotator Daemon\n",
        label = label,
        proxy_in = proxy_in,
        out = out,
        region = region_name(region),
    )
}
