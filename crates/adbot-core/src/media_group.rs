//! Media-group aggregation.
//!
//! Photos sent together arrive as separate updates sharing a group id. Each item
//! restarts a debounce timer; once the group is quiet for the window it is sealed,
//! sorted by message id and handed to the sink exactly once. Sealed ids are kept
//! for a grace period so redelivered items are dropped instead of reopening the
//! group.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{MessageId, UserId};

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(1500);
pub const SEALED_GRACE: Duration = Duration::from_secs(60);

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type SealFn = Arc<dyn Fn(SealedGroup) -> BoxFuture + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaItem {
    pub message_id: MessageId,
    pub file_id: String,
    pub caption: Option<String>,
}

/// A quiescent group, photos in message order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedGroup {
    pub group_id: String,
    pub owner: UserId,
    pub photos: Vec<String>,
    pub caption: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Opened,
    Appended,
    Duplicate,
}

struct Accumulator {
    owner: UserId,
    items: Vec<(MessageId, String)>,
    caption: Option<String>,
    cancel: CancellationToken,
    generation: u64,
}

struct Sealed {
    ids: HashSet<MessageId>,
    sealed_at: Instant,
}

#[derive(Default)]
struct Groups {
    open: HashMap<String, Accumulator>,
    sealed: HashMap<String, Sealed>,
    generation: u64,
}

pub struct MediaGroupAggregator {
    window: Duration,
    grace: Duration,
    sink: SealFn,
    groups: Mutex<Groups>,
    shutdown: CancellationToken,
}

impl MediaGroupAggregator {
    pub fn new(window: Duration, sink: SealFn, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            window,
            grace: SEALED_GRACE,
            sink,
            groups: Mutex::new(Groups::default()),
            shutdown,
        })
    }

    pub async fn push(
        self: &Arc<Self>,
        group_id: &str,
        owner: UserId,
        item: MediaItem,
    ) -> PushOutcome {
        let mut groups = self.groups.lock().await;

        let already_sealed = groups
            .sealed
            .get(group_id)
            .is_some_and(|s| s.ids.contains(&item.message_id));
        if already_sealed {
            debug!(group_id, message_id = item.message_id.0, "duplicate media item after seal");
            return PushOutcome::Duplicate;
        }

        groups.generation += 1;
        let generation = groups.generation;
        let cancel = self.shutdown.child_token();

        let outcome = match groups.open.get_mut(group_id) {
            Some(acc) => {
                if acc.items.iter().any(|(id, _)| *id == item.message_id) {
                    return PushOutcome::Duplicate;
                }
                acc.items.push((item.message_id, item.file_id));
                if acc.caption.is_none() {
                    acc.caption = item.caption.filter(|c| !c.is_empty());
                }
                // Restart the debounce under the same lock the seal takes.
                acc.cancel.cancel();
                acc.cancel = cancel.clone();
                acc.generation = generation;
                PushOutcome::Appended
            }
            None => {
                groups.open.insert(
                    group_id.to_string(),
                    Accumulator {
                        owner,
                        items: vec![(item.message_id, item.file_id)],
                        caption: item.caption.filter(|c| !c.is_empty()),
                        cancel: cancel.clone(),
                        generation,
                    },
                );
                PushOutcome::Opened
            }
        };
        drop(groups);

        self.spawn_timer(group_id.to_string(), generation, cancel);
        outcome
    }

    /// Number of groups still collecting items.
    pub async fn open_groups(&self) -> usize {
        self.groups.lock().await.open.len()
    }

    fn spawn_timer(self: &Arc<Self>, group_id: String, generation: u64, cancel: CancellationToken) {
        let aggregator = Arc::clone(self);
        let window = self.window;
        tokio::spawn(async move {
            tokio::select! {
              _ = cancel.cancelled() => {}
              _ = tokio::time::sleep(window) => {
                aggregator.seal(&group_id, generation).await;
              }
            }
        });
    }

    async fn seal(self: &Arc<Self>, group_id: &str, generation: u64) {
        let sealed = {
            let mut groups = self.groups.lock().await;
            let current = groups
                .open
                .get(group_id)
                .is_some_and(|acc| acc.generation == generation);
            if !current {
                return;
            }
            let Some(acc) = groups.open.remove(group_id) else {
                return;
            };

            let mut items = acc.items;
            items.sort_by_key(|(id, _)| *id);

            let now = Instant::now();
            let entry = groups.sealed.entry(group_id.to_string()).or_insert(Sealed {
                ids: HashSet::new(),
                sealed_at: now,
            });
            entry.ids.extend(items.iter().map(|(id, _)| *id));
            entry.sealed_at = now;

            SealedGroup {
                group_id: group_id.to_string(),
                owner: acc.owner,
                photos: items.into_iter().map(|(_, file)| file).collect(),
                caption: acc.caption,
            }
        };

        self.spawn_purge(group_id.to_string());
        (self.sink)(sealed).await;
    }

    fn spawn_purge(self: &Arc<Self>, group_id: String) {
        let aggregator = Arc::clone(self);
        let grace = self.grace;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
              _ = shutdown.cancelled() => {}
              _ = tokio::time::sleep(grace) => {
                let mut groups = aggregator.groups.lock().await;
                let expired = groups
                    .sealed
                    .get(&group_id)
                    .is_some_and(|s| s.sealed_at.elapsed() >= grace);
                if expired {
                    groups.sealed.remove(&group_id);
                }
              }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use tokio::time::{advance, sleep};

    use super::*;

    fn collecting() -> (SealFn, Arc<StdMutex<Vec<SealedGroup>>>) {
        let out = Arc::new(StdMutex::new(Vec::new()));
        let sink_out = Arc::clone(&out);
        let sink: SealFn = Arc::new(move |g| {
            let out = Arc::clone(&sink_out);
            Box::pin(async move {
                out.lock().unwrap().push(g);
            })
        });
        (sink, out)
    }

    fn item(id: i32, caption: Option<&str>) -> MediaItem {
        MediaItem {
            message_id: MessageId(id),
            file_id: format!("photo-{id}"),
            caption: caption.map(str::to_string),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_group_seals_once_in_message_order() {
        let (sink, out) = collecting();
        let agg = MediaGroupAggregator::new(DEFAULT_WINDOW, sink, CancellationToken::new());
        let owner = UserId(1);

        // Delivered out of order at 0 / 300 / 900 ms.
        assert_eq!(agg.push("G", owner, item(12, None)).await, PushOutcome::Opened);
        advance(Duration::from_millis(300)).await;
        assert_eq!(
            agg.push("G", owner, item(10, Some("Lawn mowing"))).await,
            PushOutcome::Appended
        );
        advance(Duration::from_millis(600)).await;
        agg.push("G", owner, item(11, None)).await;

        // 1.4 s after the last item: still open.
        sleep(Duration::from_millis(1400)).await;
        assert!(out.lock().unwrap().is_empty());

        sleep(Duration::from_millis(200)).await;
        let sealed = out.lock().unwrap().clone();
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].photos, vec!["photo-10", "photo-11", "photo-12"]);
        assert_eq!(sealed[0].caption.as_deref(), Some("Lawn mowing"));
        assert_eq!(agg.open_groups().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_item_starts_a_new_group() {
        let (sink, out) = collecting();
        let agg = MediaGroupAggregator::new(DEFAULT_WINDOW, sink, CancellationToken::new());

        agg.push("G", UserId(1), item(1, None)).await;
        agg.push("G", UserId(1), item(2, None)).await;
        sleep(Duration::from_millis(2500)).await;
        assert_eq!(
            agg.push("G", UserId(1), item(3, None)).await,
            PushOutcome::Opened
        );
        sleep(Duration::from_millis(1600)).await;

        let sealed = out.lock().unwrap().clone();
        assert_eq!(sealed.len(), 2);
        assert_eq!(sealed[0].photos, vec!["photo-1", "photo-2"]);
        assert_eq!(sealed[1].photos, vec!["photo-3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn redelivered_items_are_ignored_until_grace_expires() {
        let (sink, out) = collecting();
        let agg = MediaGroupAggregator::new(DEFAULT_WINDOW, sink, CancellationToken::new());

        agg.push("G", UserId(1), item(1, None)).await;
        assert_eq!(
            agg.push("G", UserId(1), item(1, None)).await,
            PushOutcome::Duplicate
        );
        sleep(Duration::from_millis(1600)).await;
        assert_eq!(
            agg.push("G", UserId(1), item(1, None)).await,
            PushOutcome::Duplicate
        );

        sleep(SEALED_GRACE + Duration::from_secs(1)).await;
        assert_eq!(
            agg.push("G", UserId(1), item(1, None)).await,
            PushOutcome::Opened
        );
        assert_eq!(out.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_open_groups() {
        let (sink, out) = collecting();
        let shutdown = CancellationToken::new();
        let agg = MediaGroupAggregator::new(DEFAULT_WINDOW, sink, shutdown.clone());

        agg.push("G", UserId(1), item(1, None)).await;
        shutdown.cancel();
        sleep(Duration::from_secs(3)).await;
        assert!(out.lock().unwrap().is_empty());
    }
}
