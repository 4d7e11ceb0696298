use anyhow::Result;
use clap::Parser;
use log::{error, info};

mod body_extractor;
mod config;
mod error;
mod imap_client;
mod jira_client;
mod loop_handler;
mod mail_filter;
mod processed_mail;
mod smtp_client;
mod ticket_id;
mod ticket_processor;

use config::Config;
use loop_handler::LoopPolicy;
use ticket_processor::TicketProcessor;

#[derive(Parser)]
#[command(name = "jicket")]
#[command(about = "Jicket - Jira Email Ticket System")]
#[command(version = "0.1.0")]
struct Args {
    /// Mode dry-run : analyse les emails sans ticket, sans envoi ni archivage
    #[arg(short, long)]
    dry_run: bool,

    /// Limite du nombre d'emails traités par cycle (par défaut: illimité)
    #[arg(short = 'l', long)]
    limit: Option<usize>,

    /// Vérifier la configuration sans se connecter
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Charger le fichier .env s'il existe
    dotenv::dotenv().ok();

    // Parser les arguments CLI
    let args = Args::parse();

    // Initialiser le logging
    env_logger::init();

    if args.dry_run {
        info!("🧪 Démarrage de jicket en mode DRY-RUN");
    } else {
        info!("🚀 Démarrage de jicket");
    }

    // Charger la configuration
    let config = Config::new()?;

    // Si demandé, vérifier seulement la configuration
    if args.check_config {
        println!("✅ Configuration valide !");
        println!("📧 IMAP: {}@{}:{}", config.imap.user, config.imap.host, config.imap.port);
        println!("📤 SMTP: {}@{}:{}", config.smtp.user, config.smtp.host, config.smtp.port);
        println!("🎫 Jira: {} (projet {})", config.jira.url, config.jira.project);
        println!("📬 Adresse de tickets: {}", config.ticket.address);
        println!(
            "🔑 Jetons: préfixe '{}', longueur minimale {}",
            config.ticket.id_prefix, config.ticket.id_min_length
        );
        println!(
            "📁 Répertoires: {} -> {}",
            config.folder_inbox, config.folder_success
        );
        println!(
            "🔁 Boucle: mode '{}', {} secondes",
            config.loop_mode, config.loop_seconds
        );
        return Ok(());
    }

    // Construire le processeur (codec, filtres, template, clients)
    let processor = TicketProcessor::new(config.clone())?;

    // Contrôles de démarrage : une mailbox ou un Jira injoignable arrête le
    // process avant d'entrer dans la boucle
    processor.startup_checks().await?;
    info!("✅ Initialization successful");

    // En dry-run, un seul cycle quel que soit le mode configuré
    let mut policy = if args.dry_run {
        LoopPolicy::from_config("once", 0)?
    } else {
        LoopPolicy::from_config(&config.loop_mode, config.loop_seconds)?
    };

    info!("Beginning main loop");
    loop {
        if policy.should_run_now().await {
            match processor.run_cycle(args.limit, args.dry_run).await {
                Ok(stats) => {
                    if stats.created > 0 {
                        info!("✅ {} nouveau(x) ticket(s) créé(s) ce cycle", stats.created);
                    }
                }
                Err(e) => {
                    // Fatal pour ce cycle seulement, le suivant retentera
                    error!("❌ Erreur lors du cycle: {:#}", e);
                }
            }

            if policy.finished() {
                break;
            }
        } else {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }

    Ok(())
}
