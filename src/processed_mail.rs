use std::collections::BTreeMap;

use log::warn;
use mail_parser::MessageParser;

use crate::body_extractor;
use crate::error::DecodeError;
use crate::ticket_id::{TicketIdCodec, TicketIdentity};

/// Header porté par nos mails de confirmation, contient le jeton du ticket
pub const HASHID_HEADER: &str = "X-Jicket-HashID";
/// Header porté par nos mails de confirmation, égal au Message-ID du mail d'origine
pub const INITIAL_REPLY_HEADER: &str = "X-Jicket-Initial-ReplyID";

/// Classification d'un email entrant vis-à-vis du cycle de tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// Aucun jeton retrouvé : le mail ouvre un nouveau ticket
    NewTicket,
    /// Jeton retrouvé (header ou objet) : réponse à un ticket existant
    Reply,
    /// Echo de notre propre mail de confirmation : à archiver sans aucune
    /// interaction avec le tracker
    Threadstarter,
}

/// Email parsé, avec les champs dérivés copiés hors de la vue mail-parser.
///
/// Immuable après construction. Les octets bruts sont abandonnés une fois le
/// parsing terminé, seuls les champs nécessaires à la corrélation, au filtre
/// et à la synchronisation sont conservés.
#[derive(Debug, Clone)]
pub struct ProcessedMail {
    /// UID attribué par la mailbox (unique au moment du fetch, RFC 3501)
    pub uid: u32,
    pub subject: String,
    /// Header From complet ("Nom <adresse>"), utilisé par l'heuristique d'écho
    pub from_display: String,
    /// Adresse seule, utilisée par les règles de filtrage
    pub from_addr: String,
    pub cc_addrs: Vec<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub initial_reply_id: Option<String>,
    pub token_header: Option<String>,
    /// Table sous-type -> texte décodé, remplie par l'extracteur de corps
    pub bodies: BTreeMap<String, String>,
}

impl ProcessedMail {
    /// Parse un email brut et copie les champs dérivés.
    ///
    /// Un contenu MIME inexploitable ne fait pas échouer le cycle : le mail
    /// est traité comme n'ayant ni headers utiles ni corps textuel.
    pub fn parse(uid: u32, raw: &[u8]) -> Self {
        let parsed = MessageParser::default().parse(raw);

        let parsed = match parsed {
            Some(parsed) => parsed,
            None => {
                warn!("Email {} non parsable, traité sans corps textuel", uid);
                return ProcessedMail {
                    uid,
                    subject: String::new(),
                    from_display: String::new(),
                    from_addr: String::new(),
                    cc_addrs: Vec::new(),
                    message_id: None,
                    in_reply_to: None,
                    initial_reply_id: None,
                    token_header: None,
                    bodies: BTreeMap::new(),
                };
            }
        };

        let subject = parsed.subject().unwrap_or("").to_string();

        let (from_display, from_addr) = parsed
            .from()
            .and_then(|address| address.first())
            .map(|addr| {
                let email = addr
                    .address
                    .as_ref()
                    .map(|a| a.to_string())
                    .unwrap_or_default();
                let display = match (&addr.name, &addr.address) {
                    (Some(name), Some(address)) => format!("{} <{}>", name, address),
                    (None, Some(address)) => address.to_string(),
                    _ => String::new(),
                };
                (display, email)
            })
            .unwrap_or_default();

        let cc_addrs = parsed
            .cc()
            .map(|address| {
                address
                    .iter()
                    .filter_map(|addr| {
                        addr.address.as_ref().map(|email| match &addr.name {
                            Some(name) => format!("{} <{}>", name, email),
                            None => email.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let header_text = |name: &str| -> Option<String> {
            parsed
                .headers()
                .iter()
                .find(|header| header.name.as_str().eq_ignore_ascii_case(name))
                .and_then(|header| header.value.as_text())
                .map(|value| value.trim().to_string())
        };

        let bodies = body_extractor::extract(&parsed);

        ProcessedMail {
            uid,
            subject,
            from_display,
            from_addr,
            cc_addrs,
            message_id: parsed.message_id().map(|id| id.trim().to_string()),
            in_reply_to: parsed
                .in_reply_to()
                .as_text()
                .map(|id| id.trim().to_string()),
            initial_reply_id: header_text(INITIAL_REPLY_HEADER),
            token_header: header_text(HASHID_HEADER),
            bodies,
        }
    }

    /// Texte du corps tel qu'il part vers le tracker.
    pub fn body_text(&self) -> String {
        body_extractor::render(&self.bodies)
    }

    /// Détermine l'identité du ticket et la classification du mail.
    ///
    /// Ordre strict :
    /// 1. détection d'écho (notre propre confirmation revenue en boîte) ;
    /// 2. jeton dans le header dédié, le plus fiable car posé par nous ;
    /// 3. jeton dans la ligne d'objet `[#<prefix><token>]` ;
    /// 4. sinon identité neuve frappée depuis l'UID mailbox.
    ///
    /// Un jeton présent mais indéchiffrable est une erreur pour ce mail :
    /// mieux vaut le laisser en boîte qu'ouvrir un ticket en double.
    pub fn correlate(
        &self,
        ticket_address: &str,
        codec: &TicketIdCodec,
    ) -> Result<(TicketIdentity, Correlation), DecodeError> {
        let threadstarter = self.is_threadstarter(ticket_address);

        let (identity, recovered) = if let Some(token) = &self.token_header {
            (codec.identity_from_token(token)?, true)
        } else if let Some(token) = codec.find_token_in_subject(&self.subject) {
            (codec.identity_from_token(&token)?, true)
        } else {
            (codec.identity_from_sequence(u64::from(self.uid)), false)
        };

        let correlation = if threadstarter {
            Correlation::Threadstarter
        } else if recovered {
            Correlation::Reply
        } else {
            Correlation::NewTicket
        };

        Ok((identity, correlation))
    }

    fn is_threadstarter(&self, ticket_address: &str) -> bool {
        if let (Some(initial), Some(in_reply_to)) = (&self.initial_reply_id, &self.in_reply_to) {
            if normalize_message_id(initial) == normalize_message_id(in_reply_to) {
                return true;
            }
        }
        // Approche heuristique : la confirmation revient parfois d'une boîte
        // en copie, mais elle porte toujours notre adresse en expéditeur
        !ticket_address.is_empty() && self.from_display.contains(ticket_address)
    }
}

/// Supprime espaces et chevrons autour d'un Message-ID.
///
/// mail-parser retire les chevrons des headers structurés (In-Reply-To) mais
/// pas des headers libres (le nôtre), la comparaison se fait donc normalisée.
fn normalize_message_id(value: &str) -> &str {
    value
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
}
