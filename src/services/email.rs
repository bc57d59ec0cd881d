use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

use crate::config::Config;
use crate::error::{AppError, AppResult};

const RESEND_URL: &str = "https://api.resend.com/emails";

/// Sends transactional email through Resend. Without an API key every
/// message is written to the log instead.
#[derive(Debug, Clone)]
pub struct Mailer {
    client: Client,
    api_key: Option<String>,
    from: String,
    app_url: String,
}

#[derive(Debug, Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

impl Mailer {
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            api_key: config.email.resend_api_key.clone(),
            from: config.email.from.clone(),
            app_url: config.server.app_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn verification_link(&self, token: &str) -> String {
        format!(
            "{}/verify-email?token={}",
            self.app_url,
            urlencoding::encode(token)
        )
    }

    pub fn reset_link(&self, token: &str) -> String {
        format!(
            "{}/reset-password?token={}",
            self.app_url,
            urlencoding::encode(token)
        )
    }

    pub async fn send_verification(&self, to: &str, name: &str, token: &str) -> AppResult<()> {
        let link = self.verification_link(token);
        let html = format!(
            "<p>Olá {},</p>\
             <p>Confirme seu email para ativar sua conta ViralCuts:</p>\
             <p><a href=\"{link}\">{link}</a></p>\
             <p>O link expira em 24 horas.</p>",
            name,
            link = link
        );
        self.send(to, "Verifique seu email - ViralCuts", &html).await
    }

    pub async fn send_password_reset(&self, to: &str, token: &str) -> AppResult<()> {
        let link = self.reset_link(token);
        let html = format!(
            "<p>Recebemos um pedido para redefinir sua senha.</p>\
             <p><a href=\"{link}\">{link}</a></p>\
             <p>O link expira em 1 hora. Se não foi você, ignore este email.</p>",
            link = link
        );
        self.send(to, "Reset de Senha - ViralCuts", &html).await
    }

    async fn send(&self, to: &str, subject: &str, html: &str) -> AppResult<()> {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::info!(to = %to, subject = %subject, "Email delivery disabled, logging instead:\n{}", html);
            return Ok(());
        };

        let response = self
            .client
            .post(RESEND_URL)
            .bearer_auth(api_key)
            .json(&ResendEmail {
                from: &self.from,
                to: [to],
                subject,
                html,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Email(format!("{}: {}", status, error_text)));
        }

        tracing::info!("Sent '{}' email to {}", subject, to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_point_at_the_app_and_encode_the_token() {
        let mut config = Config::default();
        config.server.app_url = "https://viralcuts.app/".to_string();
        let mailer = Mailer::new(&config).unwrap();

        assert_eq!(
            mailer.verification_link("a+b/c"),
            "https://viralcuts.app/verify-email?token=a%2Bb%2Fc"
        );
        assert_eq!(
            mailer.reset_link("tok"),
            "https://viralcuts.app/reset-password?token=tok"
        );
    }

    #[tokio::test]
    async fn without_api_key_mail_is_only_logged() {
        let mailer = Mailer::new(&Config::default()).unwrap();
        mailer
            .send_password_reset("ana@example.com", "tok")
            .await
            .unwrap();
    }
}
