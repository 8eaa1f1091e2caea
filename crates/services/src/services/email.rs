use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::header::ContentType,
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};
use tracing::debug;

use super::collaborators::{
    CollaboratorError, CollaboratorResult, MailMessage, MailSender, SmtpSettings,
};

/// Sends mail straight to an SMTP relay.
///
/// A transport is built per message from the settings it is handed, so
/// configuration changes apply to the next mail without a restart.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmtpMailSender;

impl SmtpMailSender {
    pub fn new() -> Self {
        Self
    }

    fn build_transport(settings: &SmtpSettings) -> CollaboratorResult<AsyncSmtpTransport<Tokio1Executor>> {
        let tls = TlsParameters::builder(settings.host.clone())
            .dangerous_accept_invalid_certs(settings.insecure_skip_verify)
            .build()
            .map_err(|e| CollaboratorError::Failed(format!("SMTP TLS setup failed: {e}")))?;

        // ssl means implicit TLS from the first byte; otherwise STARTTLS when offered.
        let tls = if settings.use_ssl {
            Tls::Wrapper(tls)
        } else {
            Tls::Opportunistic(tls)
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
            .port(settings.port)
            .tls(tls)
            .timeout(Some(settings.timeout));
        if !settings.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ));
        }
        Ok(builder.build())
    }
}

pub(crate) fn build_message(
    settings: &SmtpSettings,
    message: &MailMessage,
) -> CollaboratorResult<Message> {
    let mut builder = Message::builder()
        .from(
            settings
                .from
                .parse()
                .map_err(|e| CollaboratorError::Failed(format!("Invalid from address: {e}")))?,
        )
        .subject(message.subject.clone())
        .header(ContentType::TEXT_PLAIN);

    if message.to.is_empty() {
        return Err(CollaboratorError::Failed("Mail has no recipients".to_string()));
    }
    for recipient in &message.to {
        builder = builder.to(recipient
            .parse()
            .map_err(|e| CollaboratorError::Failed(format!("Invalid to address {recipient}: {e}")))?);
    }

    builder
        .body(message.body.clone())
        .map_err(|e| CollaboratorError::Failed(format!("Failed to build email: {e}")))
}

#[async_trait]
impl MailSender for SmtpMailSender {
    async fn send(&self, settings: &SmtpSettings, message: &MailMessage) -> CollaboratorResult<()> {
        let email = build_message(settings, message)?;
        let transport = Self::build_transport(settings)?;

        debug!(address = %settings.address(), recipients = message.to.len(), "Sending mail");
        tokio::time::timeout(settings.timeout, transport.send(email))
            .await
            .map_err(|_| CollaboratorError::Timeout(settings.timeout))?
            .map_err(|e| CollaboratorError::Failed(format!("Failed to send email: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn settings(from: &str) -> SmtpSettings {
        SmtpSettings {
            host: "localhost".to_string(),
            port: 2525,
            identity: String::new(),
            username: String::new(),
            password: String::new(),
            timeout: Duration::from_secs(5),
            use_ssl: false,
            insecure_skip_verify: false,
            from: from.to_string(),
        }
    }

    fn message(to: &[&str]) -> MailMessage {
        MailMessage {
            to: to.iter().map(|s| s.to_string()).collect(),
            subject: "[HyperRegistry] Approved request".to_string(),
            body: "Hey alice!".to_string(),
        }
    }

    #[test]
    fn test_build_message_sets_headers() {
        let email = build_message(
            &settings("Registry <registry@example.com>"),
            &message(&["alice@example.com"]),
        )
        .unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Subject: [HyperRegistry] Approved request"));
        assert!(raw.contains("To: alice@example.com"));
    }

    #[test]
    fn test_build_message_rejects_bad_addresses() {
        assert!(build_message(&settings("not an address"), &message(&["a@example.com"])).is_err());
        assert!(build_message(&settings("registry@example.com"), &message(&["nope"])).is_err());
        assert!(build_message(&settings("registry@example.com"), &message(&[])).is_err());
    }

    #[tokio::test]
    async fn test_transport_builds_for_both_tls_modes() {
        let mut smtp = settings("registry@example.com");
        assert!(SmtpMailSender::build_transport(&smtp).is_ok());
        smtp.use_ssl = true;
        smtp.insecure_skip_verify = true;
        smtp.username = "mailer".to_string();
        assert!(SmtpMailSender::build_transport(&smtp).is_ok());
    }
}
