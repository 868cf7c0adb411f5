//! Notification dispatcher (§4.8), grounded on
//! `cerb_scans/monitoring.py::process_collected_alerts` (digest email) and
//! the per-alert `resolve_existing_alerts`/`create_alert` email sends.

use crate::domain::{AlertKind, DigestAccumulator};

/// An outbound notification the orchestrator hands off to whatever mailer
/// is wired in (§10.3 names this the ambient boundary: this module decides
/// *whether* and *what*, never how SMTP/ticket delivery happens).
#[derive(Debug, Clone)]
pub struct Notification {
    pub subject: String,
    pub body_html: String,
    pub recipients: Vec<String>,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), String>;
}

/// SMTP implementation of `Notifier`, one send per recipient since
/// `lettre::Message` takes a single `To` header per build.
pub struct SmtpNotifier {
    transport: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
    from: lettre::message::Mailbox,
}

impl SmtpNotifier {
    pub fn new(
        relay: &str,
        credentials: Option<lettre::transport::smtp::authentication::Credentials>,
        from: lettre::message::Mailbox,
    ) -> Result<Self, String> {
        let mut builder = lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::relay(relay)
            .map_err(|e| e.to_string())?;
        if let Some(creds) = credentials {
            builder = builder.credentials(creds);
        }
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, notification: Notification) -> Result<(), String> {
        use lettre::AsyncTransport;

        for recipient in &notification.recipients {
            let to: lettre::message::Mailbox = recipient.parse().map_err(|e| format!("{e}"))?;
            let message = lettre::Message::builder()
                .from(self.from.clone())
                .to(to)
                .subject(notification.subject.clone())
                .header(lettre::message::header::ContentType::TEXT_HTML)
                .body(notification.body_html.clone())
                .map_err(|e| e.to_string())?;

            self.transport
                .send(message)
                .await
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

/// Build the run's digest email, or `None` when nothing was affected.
/// Mirrors the severity-tiered subject line from `monitoring.py` lines
/// 270-277: >=50% of platforms affected is `[URGENT]`, >=25% is
/// `[IMPORTANT]`, anything else is unprefixed.
pub fn build_digest(
    digest: &DigestAccumulator,
    total_platforms: usize,
    recipient: &str,
) -> Option<Notification> {
    let affected = digest.total_affected_platforms();
    if affected.is_empty() {
        return None;
    }

    let percentage = if total_platforms == 0 {
        0.0
    } else {
        (affected.len() as f64 / total_platforms as f64) * 100.0
    };

    let prefix = if percentage >= 50.0 {
        "[URGENT] "
    } else if percentage >= 25.0 {
        "[IMPORTANT] "
    } else {
        ""
    };

    let subject = format!(
        "{prefix}Oju Monitoring - {} sites with issues ({:.1}%)",
        affected.len(),
        percentage
    );

    Some(Notification {
        subject,
        body_html: render_digest_body(digest),
        recipients: vec![recipient.to_string()],
    })
}

fn render_digest_body(digest: &DigestAccumulator) -> String {
    let mut out = String::from("<html><body><h1>Oju Monitoring Digest</h1>");
    for (kind, entities) in &digest.by_kind {
        if entities.is_empty() {
            continue;
        }
        out.push_str(&format!("<h2>{}</h2><ul>", alert_kind_label(*kind)));
        for entity_digest in entities.values() {
            out.push_str(&format!(
                "<li>{} ({} platform(s))</li>",
                entity_digest.entity_name,
                entity_digest.platform_urls.len()
            ));
        }
        out.push_str("</ul>");
    }
    out.push_str("</body></html>");
    out
}

fn alert_kind_label(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::Ssl => "SSL Problem",
        AlertKind::SslExpiring => "SSL Certificate Expires Soon",
        AlertKind::DomainUnavailable => "Domain Availability Issue",
        AlertKind::DomainExpiring => "Domain Expires Soon",
        AlertKind::Defacement => "Defacement",
        AlertKind::Availability => "Availability Problem",
        AlertKind::Vt => "Flagged on VirusTotal",
        AlertKind::Other => "Other",
    }
}

/// Per-alert notification sent immediately a new issue is detected (as
/// opposed to the end-of-run digest).
pub fn build_issue_notification(
    kind: AlertKind,
    platform_url: &str,
    details: &str,
    recipient: &str,
) -> Notification {
    Notification {
        subject: format!("Oju Alert: {} - {platform_url}", alert_kind_label(kind)),
        body_html: format!(
            "<html><body><p>{}</p><p>{}</p></body></html>",
            alert_kind_label(kind),
            details
        ),
        recipients: vec![recipient.to_string()],
    }
}

/// Sent when a previously active alert is resolved.
pub fn build_resolved_notification(
    kind: AlertKind,
    platform_url: &str,
    recipient: &str,
) -> Notification {
    Notification {
        subject: format!("Oju Alert: {} - {platform_url} Resolved", alert_kind_label(kind)),
        body_html: format!(
            "<html><body><p>{} resolved for {}</p></body></html>",
            alert_kind_label(kind),
            platform_url
        ),
        recipients: vec![recipient.to_string()],
    }
}
