use std::time::{Duration, Instant};

use anyhow::Result;

/// Politique de cadencement des cycles, choisie par configuration.
///
/// Une seule horloge interne, pas d'état partagé entre cycles : le variant
/// est interrogé entre chaque cycle et décide si le suivant démarre.
#[derive(Debug)]
pub enum LoopPolicy {
    /// Premier cycle immédiat, puis attente du délai avant chaque cycle
    Continuous { delay: Duration, first: bool },
    /// Un cycle au plus par intervalle écoulé, sans blocage long
    Interval {
        interval: Duration,
        last_run: Option<Instant>,
    },
    /// Exactement un cycle, puis arrêt propre de la boucle hôte
    RunOnce { done: bool },
}

impl LoopPolicy {
    pub fn from_config(mode: &str, seconds: u64) -> Result<Self> {
        match mode {
            "dynamic" => Ok(LoopPolicy::Continuous {
                delay: Duration::from_secs(seconds),
                first: true,
            }),
            "interval" => Ok(LoopPolicy::Interval {
                interval: Duration::from_secs(seconds),
                last_run: None,
            }),
            "once" => Ok(LoopPolicy::RunOnce { done: false }),
            other => anyhow::bail!(
                "Invalid loopmode: {} (Allowed values: [\"dynamic\", \"interval\", \"once\"])",
                other
            ),
        }
    }

    /// Décide si le prochain cycle démarre maintenant, en mettant à jour
    /// l'horloge interne du variant.
    pub async fn should_run_now(&mut self) -> bool {
        match self {
            LoopPolicy::Continuous { delay, first } => {
                if *first {
                    // Pas d'attente au premier cycle
                    *first = false;
                    return true;
                }
                tokio::time::sleep(*delay).await;
                true
            }
            LoopPolicy::Interval { interval, last_run } => {
                let now = Instant::now();
                match last_run {
                    Some(last) if now.duration_since(*last) < *interval => false,
                    _ => {
                        *last_run = Some(now);
                        true
                    }
                }
            }
            LoopPolicy::RunOnce { done } => {
                if *done {
                    false
                } else {
                    *done = true;
                    true
                }
            }
        }
    }

    /// Vrai quand la politique demande l'arrêt de la boucle hôte.
    pub fn finished(&self) -> bool {
        matches!(self, LoopPolicy::RunOnce { done: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_once_fires_exactly_once() {
        let mut policy = LoopPolicy::from_config("once", 0).unwrap();
        assert!(!policy.finished());
        assert!(policy.should_run_now().await);
        assert!(policy.finished());
        assert!(!policy.should_run_now().await);
        assert!(policy.finished());
    }

    #[tokio::test]
    async fn test_interval_waits_between_runs() {
        let mut policy = LoopPolicy::from_config("interval", 3600).unwrap();
        assert!(policy.should_run_now().await);
        assert!(!policy.should_run_now().await);
        assert!(!policy.finished());
    }

    #[tokio::test]
    async fn test_interval_elapsed_runs_again() {
        let mut policy = LoopPolicy::from_config("interval", 0).unwrap();
        assert!(policy.should_run_now().await);
        assert!(policy.should_run_now().await);
    }

    #[tokio::test]
    async fn test_continuous_first_run_is_immediate() {
        let mut policy = LoopPolicy::from_config("dynamic", 3600).unwrap();
        let start = Instant::now();
        assert!(policy.should_run_now().await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_continuous_then_waits_delay() {
        tokio::time::pause();
        let mut policy = LoopPolicy::from_config("dynamic", 60).unwrap();
        assert!(policy.should_run_now().await);

        let before = tokio::time::Instant::now();
        assert!(policy.should_run_now().await);
        assert!(before.elapsed() >= Duration::from_secs(60));
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        assert!(LoopPolicy::from_config("warp", 10).is_err());
    }
}
