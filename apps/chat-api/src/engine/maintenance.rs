//! Scheduled eviction and retention sweep.

use std::time::Duration;

use tokio::task::JoinHandle;

use super::ChatEngine;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub rooms: usize,
    pub evicted: usize,
    pub purged: usize,
    pub failures: usize,
}

#[derive(Clone)]
pub struct Maintenance {
    engine: ChatEngine,
}

impl Maintenance {
    pub fn new(engine: ChatEngine) -> Self {
        Self { engine }
    }

    /// Evict stale presence and purge expired history in every room.
    /// A failing room is logged and skipped.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let rooms = match self.engine.rooms().await {
            Ok(rooms) => rooms,
            Err(err) => {
                tracing::warn!(%err, "maintenance could not list rooms");
                report.failures += 1;
                return report;
            }
        };

        for room in rooms {
            report.rooms += 1;

            match self.engine.presence().evict_stale(&room).await {
                Ok(evicted) => report.evicted += evicted.len(),
                Err(err) => {
                    tracing::warn!(room_id = room.id, %err, "maintenance eviction failed");
                    report.failures += 1;
                }
            }

            match self.engine.log().purge_older_than(room.id, room.keep_days).await {
                Ok(purged) => report.purged += purged,
                Err(err) => {
                    tracing::warn!(room_id = room.id, %err, "maintenance purge failed");
                    report.failures += 1;
                }
            }
        }

        tracing::debug!(
            rooms = report.rooms,
            evicted = report.evicted,
            purged = report.purged,
            failures = report.failures,
            "maintenance sweep finished"
        );
        report
    }

    /// Run [`Maintenance::sweep_once`] every `every` until the task is aborted.
    pub fn spawn(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.sweep_once().await;
            }
        })
    }
}
