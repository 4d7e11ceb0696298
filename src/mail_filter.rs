use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::processed_mail::ProcessedMail;

/// Règle telle qu'elle apparaît dans le fichier JSON.
#[derive(Debug, Deserialize)]
struct RuleConfig {
    addresspattern: Option<String>,
    subjectpattern: Option<String>,
    #[serde(default)]
    ignorecase: bool,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FilterFile {
    #[serde(default)]
    blacklist: Vec<RuleConfig>,
    #[serde(default)]
    whitelist: Vec<RuleConfig>,
}

/// Règle compilée : un motif absent ne matche jamais.
#[derive(Debug)]
struct FilterRule {
    address: Option<Regex>,
    subject: Option<Regex>,
    description: String,
}

impl FilterRule {
    fn compile(config: &RuleConfig) -> Result<Self> {
        let build = |pattern: &Option<String>| -> Result<Option<Regex>> {
            match pattern {
                Some(pattern) => {
                    let regex = RegexBuilder::new(pattern)
                        .case_insensitive(config.ignorecase)
                        .build()
                        .with_context(|| format!("Motif de filtre invalide: {}", pattern))?;
                    Ok(Some(regex))
                }
                None => Ok(None),
            }
        };

        Ok(FilterRule {
            address: build(&config.addresspattern)?,
            subject: build(&config.subjectpattern)?,
            description: config
                .description
                .clone()
                .unwrap_or_else(|| "NO DESCRIPTION GIVEN".to_string()),
        })
    }

    fn matches(&self, mail: &ProcessedMail) -> bool {
        if let Some(regex) = &self.subject {
            if regex.is_match(&mail.subject) {
                return true;
            }
        }
        if let Some(regex) = &self.address {
            if regex.is_match(&mail.from_addr) {
                return true;
            }
        }
        false
    }
}

/// Filtre blacklist/whitelist chargé une fois au démarrage, immuable ensuite.
#[derive(Debug, Default)]
pub struct MailFilter {
    blacklist: Vec<FilterRule>,
    whitelist: Vec<FilterRule>,
}

impl MailFilter {
    /// Filtre vide : aucun mail n'est refusé.
    pub fn empty() -> Self {
        MailFilter::default()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Impossible de lire le fichier de filtres {:?}", path))?;
        let filter = Self::from_json(&content)
            .with_context(|| format!("Fichier de filtres invalide {:?}", path))?;
        info!(
            "Filtres chargés: {} règle(s) blacklist, {} règle(s) whitelist",
            filter.blacklist.len(),
            filter.whitelist.len()
        );
        Ok(filter)
    }

    fn from_json(content: &str) -> Result<Self> {
        let parsed: FilterFile =
            serde_json::from_str(content).context("JSON de filtres invalide")?;

        let compile_all = |configs: &[RuleConfig]| -> Result<Vec<FilterRule>> {
            configs.iter().map(FilterRule::compile).collect()
        };

        Ok(MailFilter {
            blacklist: compile_all(&parsed.blacklist)?,
            whitelist: compile_all(&parsed.whitelist)?,
        })
    }

    /// Evalue un mail contre les règles, dans l'ordre du fichier.
    ///
    /// Toutes les règles blacklist sont évaluées et leurs raisons collectées.
    /// Les règles whitelist ne sont consultées que pour annuler un refus :
    /// un expéditeur whitelisté jamais blacklisté ne produit aucune raison.
    pub fn evaluate(&self, mail: &ProcessedMail) -> (bool, Vec<String>) {
        let mut filtered = false;
        let mut reasons = Vec::new();

        for rule in &self.blacklist {
            if rule.matches(mail) {
                filtered = true;
                reasons.push(format!("BLACKLISTED: {}", rule.description));
            }
        }

        if filtered {
            for rule in &self.whitelist {
                if rule.matches(mail) {
                    filtered = false;
                    reasons.push(format!("WHITELISTED: {}", rule.description));
                }
            }
        }

        (filtered, reasons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"{
        "blacklist": [
            { "subjectpattern": "spam", "ignorecase": true, "description": "No spam wanted" },
            { "addresspattern": "noreply@", "description": "Machines cannot open tickets" }
        ],
        "whitelist": [
            { "addresspattern": "boss@co", "description": "The boss is never spam" }
        ]
    }"#;

    fn mail_from(from: &str, subject: &str) -> ProcessedMail {
        let raw = format!(
            "Message-ID: <t@x>\r\nFrom: {}\r\nSubject: {}\r\nContent-Type: text/plain\r\n\r\nbody\r\n",
            from, subject
        );
        ProcessedMail::parse(1, raw.as_bytes())
    }

    #[test]
    fn test_allow_overrides_deny() {
        let filter = MailFilter::from_json(RULES).unwrap();

        let (filtered, reasons) = filter.evaluate(&mail_from("boss@co", "spam sale"));
        assert!(!filtered, "whitelisted sender must pass: {:?}", reasons);
        assert_eq!(reasons.len(), 2);

        let (filtered, reasons) = filter.evaluate(&mail_from("other@co", "spam sale"));
        assert!(filtered);
        assert_eq!(reasons, vec!["BLACKLISTED: No spam wanted".to_string()]);
    }

    #[test]
    fn test_whitelist_without_deny_is_silent() {
        let filter = MailFilter::from_json(RULES).unwrap();
        let (filtered, reasons) = filter.evaluate(&mail_from("boss@co", "quarterly report"));
        assert!(!filtered);
        assert!(reasons.is_empty(), "no allow reason without a deny: {:?}", reasons);
    }

    #[test]
    fn test_case_insensitive_flag() {
        let filter = MailFilter::from_json(RULES).unwrap();
        let (filtered, _) = filter.evaluate(&mail_from("other@co", "SPAM SALE"));
        assert!(filtered, "ignorecase rule must match uppercase subject");

        // The address rule is case sensitive
        let (filtered, _) = filter.evaluate(&mail_from("NOREPLY@machine.example", "status"));
        assert!(!filtered);
    }

    #[test]
    fn test_reasons_keep_configured_order() {
        let filter = MailFilter::from_json(RULES).unwrap();
        let (filtered, reasons) = filter.evaluate(&mail_from("noreply@machine.example", "spam spam"));
        assert!(filtered);
        assert_eq!(
            reasons,
            vec![
                "BLACKLISTED: No spam wanted".to_string(),
                "BLACKLISTED: Machines cannot open tickets".to_string(),
            ]
        );
    }

    #[test]
    fn test_empty_filter_denies_nothing() {
        let filter = MailFilter::empty();
        let (filtered, reasons) = filter.evaluate(&mail_from("anyone@anywhere", "anything"));
        assert!(!filtered);
        assert!(reasons.is_empty());
    }

    #[test]
    fn test_invalid_pattern_is_a_config_error() {
        let bad = r#"{ "blacklist": [ { "subjectpattern": "(" } ], "whitelist": [] }"#;
        assert!(MailFilter::from_json(bad).is_err());
    }
}
