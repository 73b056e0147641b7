//! Delivery fan-out across a job's alert destinations

use chrono::{DateTime, Utc};
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};

use crate::model::{AlertDestination, AnalysisResult, Job, JobStatus};

use super::dispatcher::AlertKind;

/// Notifier configuration
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Paging events endpoint
    pub pager_url: String,
    /// Incident-management alerts endpoint
    pub incident_url: String,
    /// SMTP relay; email destinations fail when unset
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Sender address, e.g. "Vigil <alerts@example.com>"
    pub from: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            pager_url: "https://events.pagerduty.com/v2/enqueue".to_string(),
            incident_url: "https://api.opsgenie.com/v2/alerts".to_string(),
            smtp: None,
        }
    }
}

/// Composed notification content, identical across channels
#[derive(Debug, Clone, PartialEq)]
pub struct AlertNotice {
    pub subject: String,
    pub body: String,
}

/// Render the notice for a transition
pub fn notice(
    job: &Job,
    kind: AlertKind,
    status: JobStatus,
    result: &AnalysisResult,
    at: DateTime<Utc>,
) -> AlertNotice {
    let heading = match kind {
        AlertKind::Failure => "ALERT",
        AlertKind::Realert => "STILL FAILING",
        AlertKind::Recovery => "RESOLVED",
    };

    let subject = format!("[vigil] {}: {} is {}", heading, job.name, status);

    let mut body = format!(
        "Job: {}\nOwner: {}\nStatus: {}\nAt: {}\n",
        job.name,
        job.owner,
        status,
        at.to_rfc3339()
    );
    if let Some(message) = &result.message {
        body.push_str(&format!("Detail: {}\n", message));
    }
    if !result.output.output.is_empty() {
        body.push_str(&format!("Output: {}\n", result.output.output));
    }

    AlertNotice { subject, body }
}

/// Sends notifications across the supported channels
pub struct Notifier {
    http_client: reqwest::Client,
    config: NotifierConfig,
    smtp: Option<AsyncSmtpTransport<Tokio1Executor>>,
    smtp_from: Option<Mailbox>,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> Self {
        let (smtp, smtp_from) = match &config.smtp {
            Some(settings) => match build_transport(settings) {
                Ok(pair) => (Some(pair.0), Some(pair.1)),
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid SMTP configuration, email disabled");
                    (None, None)
                }
            },
            None => (None, None),
        };

        Self {
            http_client: reqwest::Client::new(),
            config,
            smtp,
            smtp_from,
        }
    }

    /// Fan out to every destination independently; a failed delivery is
    /// logged and never blocks the others. Returns how many deliveries
    /// succeeded.
    pub async fn notify_all(
        &self,
        job: &Job,
        kind: AlertKind,
        status: JobStatus,
        result: &AnalysisResult,
        at: DateTime<Utc>,
    ) -> usize {
        let notice = notice(job, kind, status, result, at);

        let futures: Vec<_> = job
            .destinations
            .iter()
            .map(|dest| self.notify_target(job, dest, kind, &notice))
            .collect();

        let results = futures::future::join_all(futures).await;

        let mut delivered = 0;
        for (dest, outcome) in job.destinations.iter().zip(results) {
            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => {
                    // No automatic retry; the next run cycle is the retry
                    tracing::error!(
                        job_name = %job.name,
                        channel = dest.channel(),
                        label = dest.label(),
                        error = %e,
                        "Alert delivery failed"
                    );
                }
            }
        }
        delivered
    }

    async fn notify_target(
        &self,
        job: &Job,
        destination: &AlertDestination,
        kind: AlertKind,
        notice: &AlertNotice,
    ) -> Result<(), NotifyError> {
        match destination {
            AlertDestination::Email { to, .. } => self.send_email(to, notice).await,
            AlertDestination::Pager { service_key, .. } => {
                self.send_page(job, service_key, kind, notice).await
            }
            AlertDestination::Incident { api_key, .. } => {
                self.send_incident(api_key, notice).await
            }
        }
    }

    async fn send_email(&self, to: &str, notice: &AlertNotice) -> Result<(), NotifyError> {
        let (transport, from) = match (&self.smtp, &self.smtp_from) {
            (Some(t), Some(f)) => (t, f),
            _ => return Err(NotifyError::Config("SMTP relay not configured".to_string())),
        };

        let recipient: Mailbox = to
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

        let email = Message::builder()
            .from(from.clone())
            .to(recipient)
            .subject(&notice.subject)
            .body(notice.body.clone())
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        Ok(())
    }

    async fn send_page(
        &self,
        job: &Job,
        service_key: &str,
        kind: AlertKind,
        notice: &AlertNotice,
    ) -> Result<(), NotifyError> {
        let action = match kind {
            AlertKind::Recovery => "resolve",
            AlertKind::Failure | AlertKind::Realert => "trigger",
        };

        let payload = serde_json::json!({
            "routing_key": service_key,
            "event_action": action,
            "dedup_key": job.id.map(|id| id.to_string()),
            "payload": {
                "summary": notice.subject,
                "source": job.owner,
                "severity": "critical",
            },
        });

        self.post_json(&self.config.pager_url, payload, None).await
    }

    async fn send_incident(&self, api_key: &str, notice: &AlertNotice) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "message": notice.subject,
            "description": notice.body,
        });

        self.post_json(
            &self.config.incident_url,
            payload,
            Some(("Authorization", format!("GenieKey {}", api_key))),
        )
        .await
    }

    async fn post_json(
        &self,
        url: &str,
        payload: serde_json::Value,
        header: Option<(&str, String)>,
    ) -> Result<(), NotifyError> {
        let mut request = self.http_client.post(url).json(&payload);
        if let Some((name, value)) = header {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Http(format!(
                "endpoint returned status {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

fn build_transport(
    settings: &SmtpConfig,
) -> Result<(AsyncSmtpTransport<Tokio1Executor>, Mailbox), NotifyError> {
    let from: Mailbox = settings
        .from
        .parse()
        .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        .map_err(|e| NotifyError::Config(e.to_string()))?
        .port(settings.port);

    // Credentials come from the environment when present
    if let (Ok(username), Ok(password)) =
        (std::env::var("SMTP_USERNAME"), std::env::var("SMTP_PASSWORD"))
    {
        builder = builder.credentials(Credentials::new(username, password));
    }

    Ok((builder.build(), from))
}
