//! SMTP delivery using lettre

use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_duration_secs, env_or_default, env_parse};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::{debug, error};

use super::{ChannelSender, SendError};
use crate::models::{Channel, ChannelSettings, Reminder};

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from_email: String,
    pub from_name: String,
    /// Optional for dev servers like Mailpit
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    /// Bounds every SMTP command, connect included
    pub timeout: Duration,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

impl SmtpConfig {
    pub fn new(host: impl Into<String>, port: u16, from_email: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            from_email: from_email.into(),
            from_name: "Reminders".to_string(),
            username: None,
            password: None,
            use_tls: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }
}

impl FromEnv for SmtpConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_or_default("SMTP_HOST", "localhost"),
            port: env_parse("SMTP_PORT", 1025)?,
            from_email: env_or_default("SMTP_FROM_EMAIL", "reminders@localhost"),
            from_name: env_or_default("SMTP_FROM_NAME", "Reminders"),
            username: std::env::var("SMTP_USERNAME").ok(),
            password: std::env::var("SMTP_PASSWORD").ok(),
            use_tls: env_parse("SMTP_USE_TLS", false)?,
            timeout: env_duration_secs("SMTP_TIMEOUT_SECS", DEFAULT_TIMEOUT)?,
        })
    }
}

pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailSender {
    pub fn new(config: &SmtpConfig) -> Result<Self, SendError> {
        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_email)
            .parse()
            .map_err(|e| SendError::InvalidRecipient(format!("from address: {e}")))?;

        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| SendError::Smtp(format!("failed to create relay: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        }
        .port(config.port)
        .timeout(Some(config.timeout));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, to: &str, reminder: &Reminder) -> Result<Message, SendError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| SendError::InvalidRecipient(format!("{to}: {e}")))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject_line(&reminder.body))
            .header(ContentType::TEXT_PLAIN)
            .body(reminder.body.clone())
            .map_err(|e| SendError::Smtp(format!("failed to build message: {e}")))
    }
}

/// First line of the body, shortened for a subject header.
fn subject_line(body: &str) -> String {
    const MAX: usize = 78;
    let first = body.lines().next().unwrap_or_default().trim();
    if first.chars().count() <= MAX {
        return format!("Reminder: {first}");
    }
    let cut: String = first.chars().take(MAX).collect();
    format!("Reminder: {cut}…")
}

#[async_trait]
impl ChannelSender for EmailSender {
    async fn send(&self, channel: &Channel, reminder: &Reminder) -> Result<(), SendError> {
        let ChannelSettings::Email { email } = &channel.settings else {
            return Err(SendError::WrongChannel {
                sender: "email",
                channel: channel.channel_type(),
            });
        };

        let message = self.build_message(email, reminder)?;
        debug!(reminder_id = reminder.id, channel_id = channel.id, "Sending email");

        self.transport.send(message).await.map_err(|e| {
            error!(reminder_id = reminder.id, channel_id = channel.id, error = %e, "SMTP send failed");
            SendError::Smtp(e.to_string())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_uses_first_line() {
        assert_eq!(subject_line("Pay rent\nto landlord"), "Reminder: Pay rent");
        let long = "x".repeat(100);
        let subject = subject_line(&long);
        assert!(subject.ends_with('…'));
        assert_eq!(subject.chars().count(), "Reminder: ".len() + 78 + 1);
    }

    #[test]
    fn config_defaults_target_local_mailpit() {
        temp_env::with_vars_unset(
            [
                "SMTP_HOST",
                "SMTP_PORT",
                "SMTP_FROM_EMAIL",
                "SMTP_FROM_NAME",
                "SMTP_USERNAME",
                "SMTP_PASSWORD",
                "SMTP_USE_TLS",
                "SMTP_TIMEOUT_SECS",
            ],
            || {
                let config = SmtpConfig::from_env().unwrap();
                assert_eq!(config.host, "localhost");
                assert_eq!(config.port, 1025);
                assert!(!config.use_tls);
                assert!(config.username.is_none());
                assert_eq!(config.timeout, Duration::from_secs(10));
            },
        );
    }

    #[test]
    fn smtp_timeout_is_configurable() {
        temp_env::with_var("SMTP_TIMEOUT_SECS", Some("3"), || {
            assert_eq!(SmtpConfig::from_env().unwrap().timeout, Duration::from_secs(3));
        });
        temp_env::with_var("SMTP_TIMEOUT_SECS", Some("soon"), || {
            assert!(SmtpConfig::from_env().is_err());
        });
    }

    #[tokio::test]
    async fn unreachable_server_fails_within_the_timeout() {
        // Nothing listens on port 9 on loopback; the connect must give up rather than hang
        let config = SmtpConfig::new("127.0.0.1", 9, "reminders@example.com")
            .with_timeout(Duration::from_millis(500));
        let sender = EmailSender::new(&config).unwrap();
        let channel = Channel {
            id: 1,
            created_by: 1,
            settings: ChannelSettings::Email {
                email: "me@example.com".into(),
            },
            created_at: chrono::Utc::now(),
            verification: crate::models::Verification::Verified {
                at: chrono::Utc::now(),
            },
        };
        let reminder = Reminder {
            id: 1,
            created_by: 1,
            at: chrono::Utc::now(),
            every: None,
            body: "x".into(),
            status: crate::models::ReminderStatus::Sending,
            created_at: chrono::Utc::now(),
            scheduled_at: None,
            sent_at: None,
            canceled_at: None,
            channel_ids: vec![1],
        };

        let result = tokio::time::timeout(Duration::from_secs(5), sender.send(&channel, &reminder))
            .await
            .expect("SMTP send outlived its timeout");
        assert!(matches!(result, Err(SendError::Smtp(_))));
    }

    #[test]
    fn bad_port_is_a_config_error() {
        temp_env::with_var("SMTP_PORT", Some("not-a-port"), || {
            assert!(SmtpConfig::from_env().is_err());
        });
    }

    #[tokio::test]
    async fn rejects_other_channel_types() {
        let sender = EmailSender::new(&SmtpConfig::new("localhost", 1025, "reminders@example.com")).unwrap();
        let channel = Channel {
            id: 1,
            created_by: 1,
            settings: ChannelSettings::Internal {},
            created_at: chrono::Utc::now(),
            verification: crate::models::Verification::Verified {
                at: chrono::Utc::now(),
            },
        };
        let reminder = Reminder {
            id: 1,
            created_by: 1,
            at: chrono::Utc::now(),
            every: None,
            body: "x".into(),
            status: crate::models::ReminderStatus::Sending,
            created_at: chrono::Utc::now(),
            scheduled_at: None,
            sent_at: None,
            canceled_at: None,
            channel_ids: vec![1],
        };
        let err = sender.send(&channel, &reminder).await.unwrap_err();
        assert!(matches!(err, SendError::WrongChannel { sender: "email", .. }));
    }
}
