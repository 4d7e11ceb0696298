use anyhow::{Context, Result};
use log::{error, info};
use serde::Deserialize;
use serde_json::json;

use crate::config::JiraConfig;
use crate::processed_mail::ProcessedMail;
use crate::ticket_id::TicketIdentity;

/// Résultat d'une synchronisation, consommé immédiatement par l'orchestrateur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub success: bool,
    pub created_new: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(default)]
    issues: Vec<IssueRef>,
}

#[derive(Debug, Deserialize)]
struct IssueRef {
    key: String,
}

/// Client REST Jira (API v2, authentification basic).
pub struct JiraClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    pass: String,
    project: String,
}

impl JiraClient {
    pub fn new(config: &JiraConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Impossible de construire le client HTTP Jira")?;

        Ok(JiraClient {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            pass: config.pass.clone(),
            project: config.project.clone(),
        })
    }

    /// Vérifie l'accès et l'authentification, fatal au démarrage en cas d'échec.
    pub async fn check_connection(&self) -> Result<()> {
        self.http
            .get(format!("{}/rest/api/2/myself", self.base_url))
            .basic_auth(&self.user, Some(&self.pass))
            .send()
            .await
            .context("Instance Jira injoignable")?
            .error_for_status()
            .context("Authentification Jira refusée")?;
        Ok(())
    }

    /// Cherche les issues dont le résumé contient le jeton littéral `[#...]`.
    async fn search_issues(&self, prefixed_token: &str) -> Result<Vec<String>> {
        let jql = format!(
            "project = {} AND summary ~ \"\\\\[#{}\\\\]\"",
            self.project, prefixed_token
        );

        let results: SearchResults = self
            .http
            .get(format!("{}/rest/api/2/search", self.base_url))
            .basic_auth(&self.user, Some(&self.pass))
            .query(&[("jql", jql.as_str()), ("fields", "key")])
            .send()
            .await
            .context("Echec de la recherche Jira")?
            .error_for_status()
            .context("La recherche Jira a été refusée")?
            .json()
            .await
            .context("Réponse de recherche Jira illisible")?;

        Ok(results.issues.into_iter().map(|issue| issue.key).collect())
    }

    async fn create_issue(&self, summary: &str, description: &str) -> Result<String> {
        let payload = json!({
            "fields": {
                "project": { "key": self.project },
                "summary": summary,
                "description": description,
                "issuetype": { "name": "Task" }
            }
        });

        let created: IssueRef = self
            .http
            .post(format!("{}/rest/api/2/issue", self.base_url))
            .basic_auth(&self.user, Some(&self.pass))
            .json(&payload)
            .send()
            .await
            .context("Echec de la création d'issue Jira")?
            .error_for_status()
            .context("La création d'issue Jira a été refusée")?
            .json()
            .await
            .context("Réponse de création Jira illisible")?;

        Ok(created.key)
    }

    async fn add_comment(&self, issue_key: &str, text: &str) -> Result<()> {
        self.http
            .post(format!(
                "{}/rest/api/2/issue/{}/comment",
                self.base_url, issue_key
            ))
            .basic_auth(&self.user, Some(&self.pass))
            .json(&json!({ "body": text }))
            .send()
            .await
            .context("Echec de l'ajout de commentaire Jira")?
            .error_for_status()
            .context("L'ajout de commentaire Jira a été refusé")?;
        Ok(())
    }

    /// Synchronise un email vers le tracker : commentaire sur les issues
    /// existantes portant le jeton, sinon création d'une nouvelle issue.
    ///
    /// Tout échec d'appel Jira est intercepté et rapporté dans le résultat,
    /// jamais propagé : un mail en échec reste en boîte et sera retenté au
    /// cycle suivant sans interrompre les autres mails.
    ///
    /// Limitation connue : recherche puis création ne sont pas atomiques.
    /// Un index de recherche Jira à cohérence différée peut rater une issue
    /// tout juste créée et provoquer un doublon. Risque accepté.
    pub async fn sync_mail(&self, mail: &ProcessedMail, identity: &TicketIdentity) -> SyncOutcome {
        let text = format!(
            "Imported by Jicket (SequentialID: {})\nFrom: {}\n\n{}",
            identity.sequence,
            mail.from_display,
            mail.body_text()
        );

        let issues = match self.search_issues(&identity.prefixed).await {
            Ok(issues) => issues,
            Err(e) => {
                error!("Recherche Jira en échec pour #{}: {:#}", identity.prefixed, e);
                return SyncOutcome {
                    success: false,
                    created_new: false,
                };
            }
        };

        if issues.is_empty() {
            info!(
                "Creating new Issue for #{} in project {}",
                identity.prefixed, self.project
            );
            let summary = format!("[#{}] {}", identity.prefixed, mail.subject);
            match self.create_issue(&summary, &text).await {
                Ok(key) => {
                    info!("✅ Issue {} créée pour #{}", key, identity.prefixed);
                    SyncOutcome {
                        success: true,
                        created_new: true,
                    }
                }
                Err(e) => {
                    error!("Création Jira en échec pour #{}: {:#}", identity.prefixed, e);
                    SyncOutcome {
                        success: false,
                        created_new: false,
                    }
                }
            }
        } else {
            info!(
                "Updating Issue for #{} in project {}",
                identity.prefixed, self.project
            );
            let mut success = true;
            for key in &issues {
                if let Err(e) = self.add_comment(key, &text).await {
                    error!("Commentaire Jira en échec sur {}: {:#}", key, e);
                    success = false;
                }
            }
            SyncOutcome {
                success,
                created_new: false,
            }
        }
    }
}
