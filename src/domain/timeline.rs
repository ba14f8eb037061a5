//! Document timeline: a presentation-layer view over the audit log.
//!
//! Icon, color and description are derived here, never stored. The audit
//! log remains the single source of truth for what happened.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::infra::{AuditAction, AuditEntry};

/// One rendered timeline row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub icon: &'static str,
    pub color: &'static str,
    pub title: String,
    pub description: String,
    pub actor: String,
    pub at: DateTime<Utc>,
}

/// Derive the timeline for a document from its audit entries, oldest first.
pub fn derive_timeline(entries: &[AuditEntry]) -> Vec<TimelineEntry> {
    let mut rows: Vec<TimelineEntry> = entries.iter().map(render_entry).collect();
    rows.sort_by_key(|r| r.at);
    rows
}

fn render_entry(entry: &AuditEntry) -> TimelineEntry {
    let (icon, color, title) = match entry.action {
        AuditAction::DocumentInitiated => ("file-plus", "blue", "Document created"),
        AuditAction::DocumentDistributed => ("send", "blue", "Signing links sent"),
        AuditAction::PreviewApproved => ("check", "green", "Preview approved"),
        AuditAction::PreviewRejected => ("x", "red", "Preview rejected"),
        AuditAction::SigningPageOpened => ("eye", "gray", "Signing page opened"),
        AuditAction::OtpSent => ("shield", "gray", "Verification code sent"),
        AuditAction::OtpVerified => ("shield-check", "green", "Identity verified"),
        AuditAction::SignatureSubmitted => ("pen", "green", "Signature submitted"),
        AuditAction::SignatureDeclined => ("x-circle", "red", "Signing declined"),
        AuditAction::SigningDelegated => ("user-switch", "orange", "Signing delegated"),
        AuditAction::ScrollCompleted => ("scroll", "gray", "Document read to the end"),
        AuditAction::DocumentCancelled => ("ban", "red", "Document cancelled"),
        AuditAction::DocumentResent => ("refresh", "blue", "Signing links resent"),
        AuditAction::ReminderSent => ("bell", "gray", "Reminder sent"),
        AuditAction::DocumentExpired => ("clock", "orange", "Document expired"),
        AuditAction::DocumentCompleted => ("badge-check", "green", "Document completed"),
        AuditAction::CompletionFailed => ("alert", "orange", "Completion failed"),
        AuditAction::CallbackDelivered => ("webhook", "gray", "Callback delivered"),
        AuditAction::CallbackFailed => ("webhook-off", "orange", "Callback failed"),
        AuditAction::DocumentDeleted => ("trash", "gray", "Document archived"),
    };

    let description = match (&entry.details, entry.success) {
        (Some(details), _) => summarize_details(title, details),
        (None, false) => entry
            .error_message
            .clone()
            .unwrap_or_else(|| title.to_string()),
        (None, true) => title.to_string(),
    };

    TimelineEntry {
        icon,
        color: if entry.success { color } else { "red" },
        title: title.to_string(),
        description,
        actor: entry.actor.label(),
        at: entry.at,
    }
}

fn summarize_details(title: &str, details: &serde_json::Value) -> String {
    if let Some(reason) = details.get("reason").and_then(|v| v.as_str()) {
        return format!("{title}: {reason}");
    }
    if let Some(email) = details.get("delegate_email").and_then(|v| v.as_str()) {
        return format!("{title} to {email}");
    }
    title.to_string()
}
