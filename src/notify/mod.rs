//! Outbound notifications: signing invitations, reminders, OTP codes,
//! lifecycle updates.
//!
//! Delivery is pluggable behind [`NotificationProvider`]; the service adds
//! message templating and retry-with-backoff. Notification failures are
//! never fatal to a state transition — the engine logs and moves on.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::domain::DeliveryChannel;
use crate::infra::{EngineError, Result, Retry, RetryConfig};

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub channel: DeliveryChannel,
    /// Email address or phone number, depending on channel.
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Transport used to deliver notifications.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// The messages the engine sends. Templating lives here so handler and
/// engine code never concatenates user-facing copy.
#[derive(Debug, Clone)]
pub enum Message<'a> {
    SigningInvitation {
        recipient_name: &'a str,
        document_name: &'a str,
        signing_url: &'a str,
    },
    SigningReminder {
        recipient_name: &'a str,
        document_name: &'a str,
        signing_url: &'a str,
    },
    OtpCode {
        code: &'a str,
        expiry_minutes: u32,
    },
    DelegationNotice {
        delegate_name: &'a str,
        delegated_by: &'a str,
        document_name: &'a str,
        signing_url: &'a str,
    },
    DocumentCompleted {
        document_name: &'a str,
        pdf_url: Option<&'a str>,
    },
    DocumentDeclined {
        document_name: &'a str,
        declined_by: &'a str,
        reason: Option<&'a str>,
    },
}

impl Message<'_> {
    pub fn render(&self, channel: DeliveryChannel, to: &str) -> Notification {
        let (subject, body) = match self {
            Message::SigningInvitation {
                recipient_name,
                document_name,
                signing_url,
            } => (
                format!("Signature requested: {document_name}"),
                format!(
                    "Hello {recipient_name},\n\nYou have been asked to sign \
                     \"{document_name}\".\n\nReview and sign here: {signing_url}\n"
                ),
            ),
            Message::SigningReminder {
                recipient_name,
                document_name,
                signing_url,
            } => (
                format!("Reminder: {document_name} is awaiting your signature"),
                format!(
                    "Hello {recipient_name},\n\n\"{document_name}\" is still waiting \
                     for your signature.\n\nSign here: {signing_url}\n"
                ),
            ),
            Message::OtpCode {
                code,
                expiry_minutes,
            } => (
                "Your verification code".to_string(),
                format!(
                    "Your verification code is {code}. It expires in \
                     {expiry_minutes} minutes."
                ),
            ),
            Message::DelegationNotice {
                delegate_name,
                delegated_by,
                document_name,
                signing_url,
            } => (
                format!("Signature requested: {document_name}"),
                format!(
                    "Hello {delegate_name},\n\n{delegated_by} has delegated the \
                     signing of \"{document_name}\" to you.\n\nSign here: {signing_url}\n"
                ),
            ),
            Message::DocumentCompleted {
                document_name,
                pdf_url,
            } => (
                format!("Completed: {document_name}"),
                match pdf_url {
                    Some(url) => format!(
                        "\"{document_name}\" has been signed by all parties.\n\n\
                         Download the signed document: {url}\n"
                    ),
                    None => format!("\"{document_name}\" has been signed by all parties.\n"),
                },
            ),
            Message::DocumentDeclined {
                document_name,
                declined_by,
                reason,
            } => (
                format!("Declined: {document_name}"),
                match reason {
                    Some(r) => format!("{declined_by} declined to sign \"{document_name}\": {r}\n"),
                    None => format!("{declined_by} declined to sign \"{document_name}\".\n"),
                },
            ),
        };

        Notification {
            channel,
            to: to.to_string(),
            subject,
            body,
        }
    }
}

/// Templating + retrying façade over a provider.
pub struct NotificationService {
    provider: std::sync::Arc<dyn NotificationProvider>,
    retry: Retry,
}

impl NotificationService {
    pub fn new(provider: std::sync::Arc<dyn NotificationProvider>) -> Self {
        Self {
            provider,
            retry: Retry::new(RetryConfig::notification()),
        }
    }

    /// Render and deliver, retrying transient provider failures.
    pub async fn send(&self, message: Message<'_>, channel: DeliveryChannel, to: &str) -> Result<()> {
        let notification = message.render(channel, to);
        self.retry
            .run_with_context("notification", || async {
                self.provider.deliver(&notification).await
            })
            .await
    }
}

/// Delivers by POSTing JSON to a provider endpoint (the usual shape of a
/// transactional email/SMS relay).
pub struct HttpNotificationProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpNotificationProvider {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl NotificationProvider for HttpNotificationProvider {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let mut request = self.client.post(&self.endpoint).json(notification);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Notification(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::Notification(format!(
                "provider returned {}",
                response.status()
            )));
        }

        tracing::info!(to = %notification.to, channel = ?notification.channel, "notification delivered");
        Ok(())
    }
}

/// Logs instead of delivering. Default when no provider is configured.
pub struct LogNotificationProvider;

#[async_trait]
impl NotificationProvider for LogNotificationProvider {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            to = %notification.to,
            channel = ?notification.channel,
            subject = %notification.subject,
            "notification (log-only provider)"
        );
        Ok(())
    }
}

/// Records every delivery; test helper.
#[derive(Default)]
pub struct RecordingProvider {
    pub sent: std::sync::Mutex<Vec<Notification>>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_to(&self, to: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.to == to)
            .count()
    }
}

#[async_trait]
impl NotificationProvider for RecordingProvider {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
