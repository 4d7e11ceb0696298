use anyhow::Result;
use regex::Regex;

#[derive(Debug, Clone)]
pub struct Config {
    pub imap: ImapConfig,
    pub smtp: SmtpConfig,
    pub jira: JiraConfig,
    pub ticket: TicketConfig,
    pub folder_inbox: String,
    pub folder_success: String,
    pub thread_template: String,
    pub filter_file: Option<String>,
    pub loop_mode: String,
    pub loop_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Clone)]
pub struct JiraConfig {
    pub url: String,
    pub user: String,
    pub pass: String,
    pub project: String,
}

#[derive(Debug, Clone)]
pub struct TicketConfig {
    /// Adresse de la boîte de tickets (From des confirmations)
    pub address: String,
    pub id_prefix: String,
    pub id_salt: String,
    pub id_alphabet: String,
    pub id_min_length: usize,
}

impl Config {
    pub fn new() -> Result<Self> {
        // Vérifier que les variables essentielles sont définies
        Self::check_required_env_vars()?;

        let imap_user = env_var("JICKET_IMAP_USER");
        let imap_pass = env_var("JICKET_IMAP_PASS");

        // Configuration chargée depuis les variables d'environnement
        let config = Config {
            imap: ImapConfig {
                host: env_var("JICKET_IMAP_HOST"),
                port: env_var_or("JICKET_IMAP_PORT", "993").parse().unwrap_or(993),
                user: imap_user.clone(),
                pass: imap_pass.clone(),
            },
            smtp: SmtpConfig {
                host: env_var("JICKET_SMTP_HOST"),
                port: env_var_or("JICKET_SMTP_PORT", "587").parse().unwrap_or(587),
                // Si l'utilisateur SMTP n'est pas défini, celui d'IMAP est repris
                user: env_var_or("JICKET_SMTP_USER", &imap_user),
                pass: env_var_or("JICKET_SMTP_PASS", &imap_pass),
            },
            jira: JiraConfig {
                url: env_var("JICKET_JIRA_URL"),
                user: env_var("JICKET_JIRA_USER"),
                pass: env_var("JICKET_JIRA_PASS"),
                project: env_var("JICKET_JIRA_PROJECT"),
            },
            ticket: TicketConfig {
                address: env_var("JICKET_TICKET_ADDRESS"),
                id_prefix: env_var_or("JICKET_ID_PREFIX", "JI-"),
                id_salt: env_var_or("JICKET_ID_SALT", "JicketSalt"),
                id_alphabet: env_var_or(
                    "JICKET_ID_ALPHABET",
                    "ABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890",
                ),
                id_min_length: env_var_or("JICKET_ID_MINLEN", "6").parse().unwrap_or(6),
            },
            folder_inbox: env_var_or("JICKET_FOLDER_INBOX", "INBOX"),
            folder_success: env_var_or("JICKET_FOLDER_SUCCESS", "jicket"),
            thread_template: env_var("JICKET_THREAD_TEMPLATE"),
            filter_file: std::env::var("JICKET_FILTER_FILE").ok(),
            loop_mode: env_var_or("JICKET_LOOPMODE", "dynamic"),
            loop_seconds: env_var_or("JICKET_LOOPTIME", "60").parse().unwrap_or(60),
        };

        config.check_validity()?;
        Ok(config)
    }

    /// Vérifie les paramètres qui ne dépendent d'aucune connexion réseau.
    pub fn check_validity(&self) -> Result<()> {
        let address_format = Regex::new(r"[^@\s]+@[^@\s]+\.[^@\s]+")?;
        if !address_format.is_match(&self.ticket.address) {
            anyhow::bail!(
                "Ticket address must be in format: aaaa@bbbb.cc (is: {})",
                self.ticket.address
            );
        }

        let allowed_modes = ["dynamic", "interval", "once"];
        if !allowed_modes.contains(&self.loop_mode.as_str()) {
            anyhow::bail!(
                "Invalid loopmode: {} (Allowed values: {:?})",
                self.loop_mode,
                allowed_modes
            );
        }

        Ok(())
    }

    fn check_required_env_vars() -> Result<()> {
        let required_vars = [
            "JICKET_IMAP_HOST",
            "JICKET_IMAP_USER",
            "JICKET_IMAP_PASS",
            "JICKET_SMTP_HOST",
            "JICKET_JIRA_URL",
            "JICKET_JIRA_USER",
            "JICKET_JIRA_PASS",
            "JICKET_JIRA_PROJECT",
            "JICKET_TICKET_ADDRESS",
            "JICKET_THREAD_TEMPLATE",
        ];

        let mut missing_vars = Vec::new();

        for var in &required_vars {
            if std::env::var(var).is_err() {
                missing_vars.push(*var);
            }
        }

        if !missing_vars.is_empty() {
            anyhow::bail!(
                "Variables d'environnement manquantes: {}\n\
                 \n\
                 💡 Solutions :\n\
                 1. Créer un fichier .env avec vos credentials :\n\
                    cp .env.example .env\n\
                    # Puis éditer .env avec vos valeurs\n\
                 \n\
                 2. Ou définir les variables manuellement :\n\
                    export JICKET_IMAP_HOST=outlook.office365.com\n\
                    export JICKET_TICKET_ADDRESS=tickets@example.com\n\
                    cargo run -- --check-config",
                missing_vars.join(", ")
            );
        }

        Ok(())
    }
}

fn env_var(name: &str) -> String {
    // check_required_env_vars garantit la présence des variables obligatoires
    std::env::var(name).unwrap_or_default()
}

fn env_var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
