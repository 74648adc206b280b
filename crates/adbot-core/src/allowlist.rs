use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{store::Store, Result};

/// In-memory snapshot of the allowed domains consulted by the detector.
///
/// Refreshes replace the whole list; readers hold an `Arc` to the snapshot they
/// started with and never observe a partial update.
#[derive(Default)]
pub struct AllowList {
    snapshot: RwLock<Arc<Vec<String>>>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let list = Self::new();
        list.replace(normalize(domains));
        list
    }

    pub fn snapshot(&self) -> Arc<Vec<String>> {
        match self.snapshot.read() {
            Ok(g) => (*g).clone(),
            Err(poisoned) => (*poisoned.into_inner()).clone(),
        }
    }

    fn replace(&self, domains: Vec<String>) {
        let next = Arc::new(domains);
        match self.snapshot.write() {
            Ok(mut g) => *g = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Reload active domains from the store. On failure the previous snapshot stays.
    pub async fn refresh(&self, store: &dyn Store) -> Result<usize> {
        let rows = store.allowed_domains().await?;
        let domains = normalize(rows.into_iter().filter(|d| d.active).map(|d| d.domain));
        let n = domains.len();
        self.replace(domains);
        Ok(n)
    }

    /// Periodic refresh until `shutdown` fires. The first tick runs immediately.
    pub async fn run_refresh(
        self: Arc<Self>,
        store: Arc<dyn Store>,
        every: Duration,
        shutdown: CancellationToken,
    ) {
        let mut tick = tokio::time::interval(every);
        loop {
            tokio::select! {
              _ = shutdown.cancelled() => break,
              _ = tick.tick() => {
                match self.refresh(store.as_ref()).await {
                  Ok(n) => info!(domains = n, "allow-list refreshed"),
                  Err(e) => warn!(error = %e, "allow-list refresh failed; keeping previous snapshot"),
                }
              }
            }
        }
    }
}

fn normalize<I, S>(domains: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = domains
        .into_iter()
        .map(|d| d.as_ref().trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::AllowedDomain, store::memory::InMemoryStore};

    #[tokio::test]
    async fn refresh_keeps_only_active_normalized_domains() {
        let store = InMemoryStore::new();
        store
            .set_allowed_domains(vec![
                AllowedDomain {
                    domain: " VK.com ".into(),
                    active: true,
                },
                AllowedDomain {
                    domain: "spam.ru".into(),
                    active: false,
                },
            ])
            .await;

        let list = AllowList::new();
        let n = list.refresh(&store).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(*list.snapshot(), vec!["vk.com".to_string()]);
    }

    #[tokio::test]
    async fn readers_keep_their_snapshot_across_refresh() {
        let list = AllowList::with_domains(["a.com"]);
        let before = list.snapshot();

        let store = InMemoryStore::new();
        store
            .set_allowed_domains(vec![AllowedDomain {
                domain: "b.com".into(),
                active: true,
            }])
            .await;
        list.refresh(&store).await.unwrap();

        assert_eq!(*before, vec!["a.com".to_string()]);
        assert_eq!(*list.snapshot(), vec!["b.com".to_string()]);
    }
}
