use async_trait::async_trait;
use lettre::{
    Message, SmtpTransport, Transport,
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
};
use service_core::error::AppError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_validation_email(
        &self,
        to_email: &str,
        validation_id: &str,
        token: &str,
        base_url: &str,
    ) -> Result<(), AppError>;

    async fn send_invitation_email(
        &self,
        to_email: &str,
        token: &str,
        base_url: &str,
    ) -> Result<(), AppError>;

    async fn send_temporary_password_email(
        &self,
        to_email: &str,
        user_id: &str,
        temporary_password: &str,
    ) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from_email: String,
}

impl EmailService {
    pub fn new(config: &crate::config::SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(587)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "Email service initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        plain_body: &str,
        html_body: &str,
    ) -> Result<(), AppError> {
        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?,
            )
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?)
            .subject(subject)
            .multipart(
                lettre::message::MultiPart::alternative()
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body.to_string()),
                    )
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )
            .map_err(|e| AppError::InternalError(e.into()))?;

        // SMTP is blocking
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, subject = %subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e.to_string(), to = %to_email, "Failed to send email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_validation_email(
        &self,
        to_email: &str,
        validation_id: &str,
        token: &str,
        base_url: &str,
    ) -> Result<(), AppError> {
        let link = format!(
            "{}/validate?reference={}&token={}",
            base_url, validation_id, token
        );

        let html_body = format!(
            r###"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>Please confirm your email address</h2>
        <p>Click the link below to confirm that this address belongs to you:</p>
        <p><a href="{link}">Confirm email address</a></p>
        <p>Or enter reference <code>{validation_id}</code> with token <code>{token}</code>.</p>
    </body>
</html>"###
        );

        let plain_body = format!(
            "Please confirm your email address\n\n\
             Visit {link}\n\n\
             or enter reference {validation_id} with token {token}."
        );

        self.send_email(to_email, "Confirm your email address", &plain_body, &html_body)
            .await
    }

    async fn send_invitation_email(
        &self,
        to_email: &str,
        token: &str,
        base_url: &str,
    ) -> Result<(), AppError> {
        let link = format!("{}/register?invitation_token={}", base_url, token);

        let html_body = format!(
            r###"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>You have been invited</h2>
        <p>You have been invited to create an account.</p>
        <p><a href="{link}">Register</a></p>
    </body>
</html>"###
        );

        let plain_body = format!(
            "You have been invited to create an account.\n\nRegister at {link}"
        );

        self.send_email(to_email, "Your invitation", &plain_body, &html_body)
            .await
    }

    async fn send_temporary_password_email(
        &self,
        to_email: &str,
        user_id: &str,
        temporary_password: &str,
    ) -> Result<(), AppError> {
        let html_body = format!(
            r###"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>Temporary password</h2>
        <p>A temporary password was requested for user <b>{user_id}</b>:</p>
        <p><code>{temporary_password}</code></p>
        <p style="color: #666; font-size: 12px;">It expires in one hour and must be changed after login.</p>
    </body>
</html>"###
        );

        let plain_body = format!(
            "A temporary password was requested for user {user_id}:\n\n\
             {temporary_password}\n\n\
             It expires in one hour and must be changed after login."
        );

        self.send_email(to_email, "Your temporary password", &plain_body, &html_body)
            .await
    }
}

/// Message recorded by [`MockEmailService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentEmail {
    Validation {
        to: String,
        validation_id: String,
        token: String,
    },
    Invitation {
        to: String,
        token: String,
    },
    TemporaryPassword {
        to: String,
        user_id: String,
        password: String,
    },
}

#[derive(Clone, Default)]
pub struct MockEmailService {
    sent: Arc<Mutex<Vec<SentEmail>>>,
    notify: Arc<Notify>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Waits until at least `count` messages were recorded.
    pub async fn wait_for(&self, count: usize) -> Vec<SentEmail> {
        loop {
            let notified = self.notify.notified();
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            notified.await;
        }
    }

    fn record(&self, email: SentEmail) -> Result<(), AppError> {
        self.sent
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Mock mailbox poisoned: {}", e)))?
            .push(email);
        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_validation_email(
        &self,
        to_email: &str,
        validation_id: &str,
        token: &str,
        _base_url: &str,
    ) -> Result<(), AppError> {
        self.record(SentEmail::Validation {
            to: to_email.to_string(),
            validation_id: validation_id.to_string(),
            token: token.to_string(),
        })
    }

    async fn send_invitation_email(
        &self,
        to_email: &str,
        token: &str,
        _base_url: &str,
    ) -> Result<(), AppError> {
        self.record(SentEmail::Invitation {
            to: to_email.to_string(),
            token: token.to_string(),
        })
    }

    async fn send_temporary_password_email(
        &self,
        to_email: &str,
        user_id: &str,
        temporary_password: &str,
    ) -> Result<(), AppError> {
        self.record(SentEmail::TemporaryPassword {
            to: to_email.to_string(),
            user_id: user_id.to_string(),
            password: temporary_password.to_string(),
        })
    }
}

/// Email waiting for delivery.
#[derive(Clone)]
pub enum EmailJob {
    Validation {
        to: String,
        validation_id: String,
        token: String,
    },
    Invitation {
        to: String,
        token: String,
    },
    TemporaryPassword {
        to: String,
        user_id: String,
        password: String,
    },
}

impl EmailJob {
    fn recipient(&self) -> &str {
        match self {
            EmailJob::Validation { to, .. }
            | EmailJob::Invitation { to, .. }
            | EmailJob::TemporaryPassword { to, .. } => to,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            EmailJob::Validation { .. } => "validation",
            EmailJob::Invitation { .. } => "invitation",
            EmailJob::TemporaryPassword { .. } => "temporary_password",
        }
    }
}

/// Bounded queue drained by a background sender. Submitting never blocks;
/// a full queue drops the message.
#[derive(Clone)]
pub struct EmailQueue {
    sender: mpsc::Sender<EmailJob>,
}

impl EmailQueue {
    pub fn start(
        provider: Arc<dyn EmailProvider>,
        capacity: usize,
        base_url: String,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<EmailJob>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                let result = match &job {
                    EmailJob::Validation {
                        to,
                        validation_id,
                        token,
                    } => {
                        provider
                            .send_validation_email(to, validation_id, token, &base_url)
                            .await
                    }
                    EmailJob::Invitation { to, token } => {
                        provider.send_invitation_email(to, token, &base_url).await
                    }
                    EmailJob::TemporaryPassword {
                        to,
                        user_id,
                        password,
                    } => {
                        provider
                            .send_temporary_password_email(to, user_id, password)
                            .await
                    }
                };
                if let Err(e) = result {
                    tracing::warn!(error = %e, kind = job.kind(), to = %job.recipient(), "Email delivery failed");
                }
            }
            tracing::debug!("Email queue closed");
        });
        (Self { sender }, handle)
    }

    pub fn submit(&self, job: EmailJob) {
        let kind = job.kind();
        match self.sender.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(kind, to = %job.recipient(), "Email queue full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(kind, to = %job.recipient(), "Email queue closed, dropping message");
            }
        }
    }
}
