use anyhow::{Context, Result};
use async_imap::Session;
use async_native_tls::{TlsConnector, TlsStream};
use futures::stream::StreamExt;
use log::{debug, info};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};

use crate::config::ImapConfig;

/// Client IMAP de la boîte de tickets.
///
/// La connexion est ouverte en début de cycle et fermée (logout) à la fin ;
/// un échec de login est fatal pour le cycle et remonte à l'appelant.
pub struct ImapClient {
    session: Session<Compat<TlsStream<Compat<TcpStream>>>>,
}

impl ImapClient {
    pub async fn connect(config: &ImapConfig) -> Result<Self> {
        info!("Connexion au serveur IMAP {}:{}", config.host, config.port);

        // Créer une connexion TCP
        let tcp_stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .context("Impossible de se connecter au serveur IMAP")?;

        // Wrapper pour compatibilité futures
        let tcp_stream_compat = tcp_stream.compat();

        // Créer une connexion TLS
        let tls = TlsConnector::new();
        let tls_stream = tls
            .connect(&config.host, tcp_stream_compat)
            .await
            .context("Impossible d'établir la connexion TLS")?;

        // Adapter le flux TLS (io futures) vers les traits io de tokio
        let tls_stream = tls_stream.compat();

        // Créer le client IMAP avec async-imap
        let client = async_imap::Client::new(tls_stream);

        // Authentification
        let session = client.login(&config.user, &config.pass).await.map_err(|e| {
            anyhow::anyhow!(
                "IMAP login failed. Are your login credentials correct? ({:?})",
                e.0
            )
        })?;

        info!("Connexion IMAP établie avec succès");

        Ok(ImapClient { session })
    }

    /// Vérifie que les répertoires configurés existent.
    ///
    /// Un répertoire manquant est une erreur fatale au démarrage.
    pub async fn check_folders(&mut self, folders: &[&str]) -> Result<()> {
        info!("Vérification des répertoires configurés");
        for folder in folders {
            self.session
                .select(folder)
                .await
                .with_context(|| format!("Error accessing folder '{}'", folder))?;
        }
        Ok(())
    }

    /// Liste les UID présents dans le répertoire d'entrée, ordre croissant.
    pub async fn fetch_inbox_uids(&mut self, inbox: &str) -> Result<Vec<u32>> {
        let mailbox = self
            .session
            .select(inbox)
            .await
            .with_context(|| format!("Error accessing folder '{}'", inbox))?;

        if mailbox.exists == 0 {
            return Ok(Vec::new());
        }
        info!("{} email(s) in inbox", mailbox.exists);

        let uids = self
            .session
            .uid_search("ALL")
            .await
            .context("Failed to retrieve mails from inbox")?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    /// Récupère le contenu RFC822 complet d'un email.
    pub async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>> {
        debug!("Récupération de l'email UID: {}", uid);

        let messages_stream = self
            .session
            .uid_fetch(uid.to_string(), "RFC822")
            .await
            .context("Impossible de récupérer l'email")?;

        let messages: Vec<_> = messages_stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .filter_map(|r| r.ok())
            .collect();

        let body = messages
            .first()
            .and_then(|message| message.body())
            .map(|body| body.to_vec());

        match body {
            Some(body) => {
                debug!("Email récupéré, taille: {} bytes", body.len());
                Ok(body)
            }
            None => anyhow::bail!("Email introuvable ou vide pour l'UID: {}", uid),
        }
    }

    /// Archive un email : copie vers le répertoire cible, marquage \Deleted,
    /// expunge. Le mail n'est plus jamais re-fetché ensuite.
    pub async fn archive(&mut self, uid: u32, inbox: &str, target_folder: &str) -> Result<()> {
        debug!("Déplacement de l'email {} vers {}", uid, target_folder);

        self.session
            .select(inbox)
            .await
            .with_context(|| format!("Error accessing folder '{}'", inbox))?;

        self.session
            .uid_copy(uid.to_string(), target_folder)
            .await
            .with_context(|| format!("Impossible de copier l'email vers {}", target_folder))?;

        let store_stream = self
            .session
            .uid_store(uid.to_string(), "+FLAGS (\\Deleted)")
            .await
            .context("Impossible de marquer l'email comme supprimé")?;

        // Consommer le stream (nécessaire pour que l'opération soit effectuée)
        let _store_results: Vec<_> = store_stream.collect::<Vec<_>>().await;

        let expunge_stream = self
            .session
            .expunge()
            .await
            .context("Impossible d'expunge les emails supprimés")?;
        let _expunged: Vec<_> = expunge_stream.collect::<Vec<_>>().await;

        info!("✅ Email {} archivé dans {}", uid, target_folder);
        Ok(())
    }

    pub async fn logout(mut self) -> Result<()> {
        info!("Déconnexion du serveur IMAP");
        self.session
            .logout()
            .await
            .context("Erreur lors de la déconnexion IMAP")?;
        Ok(())
    }
}
