use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{info, warn};

use crate::config::SmtpConfig;
use crate::processed_mail::{ProcessedMail, HASHID_HEADER, INITIAL_REPLY_HEADER};
use crate::ticket_id::TicketIdentity;

/// Header contenant le jeton du ticket, relu tel quel au cycle suivant
#[derive(Debug, Clone, PartialEq)]
struct HashIdHeader(String);

impl Header for HashIdHeader {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str(HASHID_HEADER)
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(HashIdHeader(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// Header égal au Message-ID du mail d'origine ; sa coïncidence avec
/// In-Reply-To signe nos propres confirmations lors du re-fetch
#[derive(Debug, Clone, PartialEq)]
struct InitialReplyIdHeader(String);

impl Header for InitialReplyIdHeader {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str(INITIAL_REPLY_HEADER)
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(InitialReplyIdHeader(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// Envoie les mails de confirmation (threadstarter) via SMTP.
pub struct MailExporter {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    ticket_address: String,
    template: String,
}

impl MailExporter {
    pub fn new(config: &SmtpConfig, ticket_address: &str, template_path: &Path) -> Result<Self> {
        // Le template est lu une fois au démarrage, un fichier illisible est fatal
        let template = fs::read_to_string(template_path).with_context(|| {
            format!(
                "Impossible de lire le template de confirmation {:?}",
                template_path
            )
        })?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .with_context(|| format!("Hôte SMTP invalide '{}'", config.host))?
            .port(config.port)
            .credentials(Credentials::new(config.user.clone(), config.pass.clone()))
            .build();

        Ok(MailExporter {
            transport,
            ticket_address: ticket_address.to_string(),
            template,
        })
    }

    /// Envoie le mail qui démarre le fil de discussion d'un nouveau ticket.
    ///
    /// Le mail porte le jeton en header et dans l'objet, et In-Reply-To égal
    /// au Message-ID du mail d'origine pour que les clients mail raccrochent
    /// la confirmation au fil existant.
    pub async fn send_threadstarter(
        &self,
        mail: &ProcessedMail,
        identity: &TicketIdentity,
    ) -> Result<()> {
        let html = self
            .template
            .replace("{ticketid}", &identity.token)
            .replace("{subject}", &mail.subject);

        let ticket_mailbox: Mailbox = self
            .ticket_address
            .parse()
            .with_context(|| format!("Adresse de tickets invalide '{}'", self.ticket_address))?;

        let sender_mailbox: Mailbox = mail
            .from_display
            .parse()
            .or_else(|_| mail.from_addr.parse())
            .with_context(|| format!("Adresse d'expéditeur invalide '{}'", mail.from_display))?;

        let mut builder = Message::builder()
            .from(ticket_mailbox.clone())
            .to(sender_mailbox)
            .to(ticket_mailbox)
            .subject(format!("[#{}] {}", identity.prefixed, mail.subject))
            .header(HashIdHeader(identity.token.clone()));

        for cc in &mail.cc_addrs {
            match cc.parse::<Mailbox>() {
                Ok(mailbox) => builder = builder.cc(mailbox),
                Err(_) => warn!("Adresse CC ignorée car invalide: {}", cc),
            }
        }

        match &mail.message_id {
            Some(message_id) => {
                builder = builder
                    .in_reply_to(message_id.clone())
                    .header(InitialReplyIdHeader(message_id.clone()));
            }
            None => {
                // Sans Message-ID d'origine, la détection d'écho retombera
                // sur l'heuristique d'expéditeur
                warn!(
                    "Email {} sans Message-ID, confirmation envoyée sans headers de fil",
                    mail.uid
                );
            }
        }

        let message = builder
            .header(ContentType::TEXT_HTML)
            .body(html)
            .context("Impossible de construire le mail de confirmation")?;

        self.transport
            .send(message)
            .await
            .context("Echec de l'envoi SMTP du mail de confirmation")?;

        info!(
            "✅ Confirmation envoyée pour le ticket #{} ({})",
            identity.prefixed, mail.from_addr
        );
        Ok(())
    }
}
