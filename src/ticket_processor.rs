use anyhow::{Context, Result};
use log::{debug, error, info, warn};

use crate::config::Config;
use crate::imap_client::ImapClient;
use crate::jira_client::JiraClient;
use crate::mail_filter::MailFilter;
use crate::processed_mail::{Correlation, ProcessedMail};
use crate::smtp_client::MailExporter;
use crate::ticket_id::TicketIdCodec;

/// Compteurs d'un cycle, journalisés à la fin.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub fetched: usize,
    pub filtered: usize,
    pub synced: usize,
    pub created: usize,
    pub left_for_retry: usize,
    pub echoes_archived: usize,
}

/// Orchestrateur d'un cycle fetch → filtre → corrélation → sync → confirmation → archivage.
///
/// Seul détenteur des effets de bord : les autres composants sont des
/// fonctions pures de leurs entrées, à l'exception du client Jira.
pub struct TicketProcessor {
    config: Config,
    codec: TicketIdCodec,
    filter: MailFilter,
    jira: JiraClient,
    exporter: MailExporter,
}

impl TicketProcessor {
    pub fn new(config: Config) -> Result<Self> {
        info!("Initialisation du processeur de tickets");

        let codec = TicketIdCodec::new(
            &config.ticket.id_salt,
            &config.ticket.id_alphabet,
            config.ticket.id_min_length,
            &config.ticket.id_prefix,
        )
        .context("Configuration des jetons de ticket invalide")?;

        let filter = match &config.filter_file {
            Some(path) => MailFilter::from_file(std::path::Path::new(path))
                .context("Impossible de charger le fichier de filtres")?,
            None => {
                debug!("Aucun fichier de filtres configuré, aucun mail ne sera refusé");
                MailFilter::empty()
            }
        };

        let jira = JiraClient::new(&config.jira)?;
        let exporter = MailExporter::new(
            &config.smtp,
            &config.ticket.address,
            std::path::Path::new(&config.thread_template),
        )?;

        Ok(TicketProcessor {
            config,
            codec,
            filter,
            jira,
            exporter,
        })
    }

    /// Contrôles de démarrage : répertoires IMAP et accès Jira.
    ///
    /// Toute erreur ici est fatale, le process doit s'arrêter avant la boucle.
    pub async fn startup_checks(&self) -> Result<()> {
        let mut imap = ImapClient::connect(&self.config.imap).await?;
        imap.check_folders(&[&self.config.folder_inbox, &self.config.folder_success])
            .await?;
        imap.logout().await?;

        self.jira.check_connection().await?;
        Ok(())
    }

    /// Exécute un cycle complet.
    ///
    /// Les erreurs propres à un mail (jeton corrompu, échec tracker) laissent
    /// le mail en boîte sans interrompre les autres ; seul un échec de login
    /// remonte à l'appelant.
    pub async fn run_cycle(&self, limit: Option<usize>, dry_run: bool) -> Result<CycleStats> {
        let mut stats = CycleStats::default();

        let mut imap = ImapClient::connect(&self.config.imap).await?;

        let uids = imap.fetch_inbox_uids(&self.config.folder_inbox).await?;
        if uids.is_empty() {
            info!("Aucun email en boîte, fin du cycle");
            imap.logout().await?;
            return Ok(stats);
        }

        let uids: Vec<u32> = match limit {
            Some(limit) => uids.into_iter().take(limit).collect(),
            None => uids,
        };

        let mut new_tickets = false;

        for &uid in &uids {
            stats.fetched += 1;
            match self
                .process_single_mail(&mut imap, uid, dry_run, &mut stats)
                .await
            {
                Ok(created) => {
                    if created {
                        new_tickets = true;
                    }
                }
                Err(e) => {
                    // Mail laissé en boîte, il sera retenté au cycle suivant
                    error!("Erreur lors du traitement de l'email {}: {:#}", uid, e);
                    stats.left_for_retry += 1;
                }
            }
        }

        // Deuxième passe obligatoire : les confirmations tout juste envoyées
        // reviennent en boîte et doivent être archivées avant le prochain
        // cycle, sinon elles seraient prises pour des réponses
        if new_tickets && !dry_run {
            info!("Importing again to move confirmation mails");
            self.archive_echoes(&mut imap, &mut stats).await?;
        }

        imap.logout().await?;

        info!(
            "Cycle terminé: {} email(s) lus, {} filtrés, {} synchronisés ({} nouveaux tickets), {} laissés pour retry, {} échos archivés",
            stats.fetched,
            stats.filtered,
            stats.synced,
            stats.created,
            stats.left_for_retry,
            stats.echoes_archived
        );

        Ok(stats)
    }

    /// Traite un email : retourne true si un nouveau ticket a été créé.
    async fn process_single_mail(
        &self,
        imap: &mut ImapClient,
        uid: u32,
        dry_run: bool,
        stats: &mut CycleStats,
    ) -> Result<bool> {
        let raw = imap
            .fetch_raw(uid)
            .await
            .context("Impossible de récupérer l'email complet")?;

        let mail = ProcessedMail::parse(uid, &raw);

        // 1. Filtrage : un mail refusé est archivé sans toucher au tracker
        let (filtered, reasons) = self.filter.evaluate(&mail);
        if filtered {
            for reason in &reasons {
                info!("Email {} filtré ({})", uid, reason);
            }
            stats.filtered += 1;
            if !dry_run {
                self.archive(imap, uid).await;
            }
            return Ok(false);
        }

        // 2. Corrélation : un jeton corrompu est fatal pour ce mail seulement,
        // il reste en boîte pour inspection manuelle
        let (identity, correlation) = match mail.correlate(&self.config.ticket.address, &self.codec)
        {
            Ok(result) => result,
            Err(e) => {
                error!(
                    "Jeton de ticket indéchiffrable sur l'email {} (laissé en boîte): {}",
                    uid, e
                );
                stats.left_for_retry += 1;
                return Ok(false);
            }
        };

        if dry_run {
            print_dry_run_analysis(&mail, &identity.token, correlation);
            return Ok(false);
        }

        // 3. Echo de notre propre confirmation : archivage seul
        if correlation == Correlation::Threadstarter {
            debug!("Email {} est un threadstarter, archivage direct", uid);
            self.archive(imap, uid).await;
            return Ok(false);
        }

        // 4. Synchronisation tracker
        let outcome = self.jira.sync_mail(&mail, &identity).await;
        if !outcome.success {
            warn!(
                "Synchronisation en échec pour l'email {} (#{}), laissé en boîte pour retry",
                uid, identity.prefixed
            );
            stats.left_for_retry += 1;
            return Ok(false);
        }
        stats.synced += 1;

        // 5. Nouveau ticket : démarrer le fil par un mail de confirmation
        if outcome.created_new {
            stats.created += 1;
            if let Err(e) = self.exporter.send_threadstarter(&mail, &identity).await {
                // Le ticket existe déjà côté tracker, on archive quand même :
                // re-synchroniser le mail n'ajouterait qu'un commentaire en double
                error!(
                    "Ticket #{} créé mais confirmation non envoyée: {:#}",
                    identity.prefixed, e
                );
            }
        }

        // 6. Archivage du mail d'origine
        self.archive(imap, uid).await;
        Ok(outcome.created_new)
    }

    /// Passe d'archivage seul : seuls la détection d'écho et l'archivage
    /// s'appliquent, aucune synchronisation ni confirmation.
    async fn archive_echoes(&self, imap: &mut ImapClient, stats: &mut CycleStats) -> Result<()> {
        let uids = imap.fetch_inbox_uids(&self.config.folder_inbox).await?;

        for uid in uids {
            let raw = match imap.fetch_raw(uid).await {
                Ok(raw) => raw,
                Err(e) => {
                    error!("Erreur lors de la relecture de l'email {}: {:#}", uid, e);
                    continue;
                }
            };

            let mail = ProcessedMail::parse(uid, &raw);
            let correlation = mail
                .correlate(&self.config.ticket.address, &self.codec)
                .map(|(_, correlation)| correlation);

            if correlation == Ok(Correlation::Threadstarter) {
                self.archive(imap, uid).await;
                stats.echoes_archived += 1;
            }
        }

        Ok(())
    }

    /// Archive en journalisant l'échec : un mail non archivé sera revu au
    /// cycle suivant, ce qui au pire ajoute un commentaire en double.
    async fn archive(&self, imap: &mut ImapClient, uid: u32) {
        if let Err(e) = imap
            .archive(uid, &self.config.folder_inbox, &self.config.folder_success)
            .await
        {
            error!("Impossible d'archiver l'email {}: {:#}", uid, e);
        }
    }
}

fn print_dry_run_analysis(mail: &ProcessedMail, token: &str, correlation: Correlation) {
    println!("📧 Email UID {}", mail.uid);
    println!("{}", "-".repeat(60));
    println!("   De: {}", mail.from_display);
    println!("   Objet: {}", mail.subject);
    println!("   Jeton: {}", token);
    println!(
        "   Classification: {}",
        match correlation {
            Correlation::NewTicket => "nouveau ticket",
            Correlation::Reply => "réponse à un ticket existant",
            Correlation::Threadstarter => "écho de confirmation (serait archivé)",
        }
    );

    let body = mail.body_text();
    let lines: Vec<&str> = body.lines().collect();
    let preview_lines = std::cmp::min(10, lines.len());
    println!("   Aperçu du corps (premières {} lignes):", preview_lines);
    for (i, line) in lines.iter().take(preview_lines).enumerate() {
        let preview_line = if line.len() > 80 {
            format!("{}...", &line[..77])
        } else {
            line.to_string()
        };
        println!("   {:2}: {}", i + 1, preview_line);
    }
    if lines.len() > preview_lines {
        println!("   ... ({} lignes supplémentaires)", lines.len() - preview_lines);
    }
    println!();
}
