use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{Email, Notifier, NotifyError};

/// Transactional email API settings (Brevo-compatible).
#[derive(Debug, Clone)]
pub struct HttpNotifierSettings {
    pub endpoint: String,
    pub api_key: String,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailBody<'a> {
    sender: EmailAddress<'a>,
    to: Vec<EmailAddress<'a>>,
    subject: &'a str,
    text_content: &'a str,
}

/// Sends emails through an HTTP transactional email provider.
#[derive(Clone)]
pub struct HttpNotifier {
    client: Client,
    endpoint: Url,
    api_key: String,
    sender_email: String,
    sender_name: Option<String>,
}

impl HttpNotifier {
    pub fn new(settings: HttpNotifierSettings) -> Result<Self, NotifyError> {
        let endpoint = Url::parse(&settings.endpoint)
            .map_err(|e| NotifyError::Config(format!("invalid endpoint: {}", e)))?;
        if endpoint.scheme() != "https" {
            warn!(endpoint = %endpoint, "Email endpoint is not HTTPS");
        }
        if settings.api_key.trim().is_empty() || settings.sender_email.trim().is_empty() {
            return Err(NotifyError::Config("api key and sender email are required".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent("CivicLedger/0.1")
            .build()
            .map_err(|e| NotifyError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key: settings.api_key,
            sender_email: settings.sender_email,
            sender_name: settings.sender_name,
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, email: &Email) -> Result<(), NotifyError> {
        let body = SendEmailBody {
            sender: EmailAddress {
                email: &self.sender_email,
                name: self.sender_name.as_deref(),
            },
            to: vec![EmailAddress { email: &email.to, name: None }],
            subject: &email.subject,
            text_content: &email.body,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("api-key", &self.api_key)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(subject = %email.subject, "Email accepted by provider");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Rejected { status: status.as_u16(), body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> HttpNotifierSettings {
        HttpNotifierSettings {
            endpoint: "https://api.brevo.com/v3/smtp/email".to_string(),
            api_key: "key".to_string(),
            sender_email: "noreply@civic.example".to_string(),
            sender_name: Some("Civic".to_string()),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_rejects_missing_credentials() {
        let mut s = settings();
        s.api_key = " ".to_string();
        assert!(matches!(HttpNotifier::new(s), Err(NotifyError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        let mut s = settings();
        s.endpoint = "not a url".to_string();
        assert!(HttpNotifier::new(s).is_err());
    }

    #[test]
    fn test_payload_shape() {
        let body = SendEmailBody {
            sender: EmailAddress { email: "noreply@civic.example", name: None },
            to: vec![EmailAddress { email: "ada@example.org", name: None }],
            subject: "Welcome",
            text_content: "Hello",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["textContent"], "Hello");
        assert_eq!(json["to"][0]["email"], "ada@example.org");
        assert!(json["sender"].get("name").is_none());
    }
}
