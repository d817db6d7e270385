use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::{TramError, ValidationError};
use crate::outbox::OutboxStore;
use crate::store::{Store, Transaction};
use crate::transport::Transport;

use super::stats::{RelayCycle, RelayStats};

struct RelayInner<S> {
    store: S,
    transport: Arc<dyn Transport>,
    batch_size: usize,
    poll_interval: Duration,
    stats: Mutex<RelayStats>,
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Background publisher of pending outbox rows.
pub struct MessageRelay<S> {
    inner: Arc<RelayInner<S>>,
    running: AsyncMutex<Option<Running>>,
    active: AtomicBool,
}

impl<S> MessageRelay<S>
where
    S: Store + 'static,
    S::Tx: OutboxStore + 'static,
{
    pub fn new(
        store: S,
        transport: Arc<dyn Transport>,
        config: RelayConfig,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        let poll_interval = config.poll_interval()?;
        Ok(Self {
            inner: Arc::new(RelayInner {
                store,
                transport,
                batch_size: config.batch_size,
                poll_interval,
                stats: Mutex::new(RelayStats::default()),
            }),
            running: AsyncMutex::new(None),
            active: AtomicBool::new(false),
        })
    }

    /// Run one fetch / publish / commit cycle.
    ///
    /// Publish failures are recorded on the rows and do not fail the cycle;
    /// store failures do, and leave every row of the batch untouched.
    pub async fn process_outbox(&self) -> Result<RelayCycle, TramError> {
        self.inner.process_outbox().await
    }

    /// Connect the transport and start the polling task. No-op when running.
    pub async fn start(&self) -> Result<(), TramError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        self.inner.transport.connect().await?;

        let (shutdown, stop_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run(stop_rx).await });

        *running = Some(Running { shutdown, handle });
        self.active.store(true, Ordering::Release);
        info!(
            batch_size = self.inner.batch_size,
            poll_interval_ms = self.inner.poll_interval.as_millis() as u64,
            "message relay started"
        );
        Ok(())
    }

    /// Stop polling, wait for the current cycle to finish, then close the
    /// transport. No-op when not running.
    pub async fn stop(&self) -> Result<(), TramError> {
        let mut running = self.running.lock().await;
        let Some(Running { shutdown, handle }) = running.take() else {
            return Ok(());
        };

        let _ = shutdown.send(true);
        if let Err(err) = handle.await {
            error!(error = %err, "relay task ended abnormally");
        }
        self.active.store(false, Ordering::Release);

        self.inner.transport.close().await?;
        info!("message relay stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Cumulative statistics since the relay was created.
    pub fn stats(&self) -> RelayStats {
        self.inner
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl<S> Drop for MessageRelay<S> {
    fn drop(&mut self) {
        // Signal without waiting; the task exits after its current cycle.
        if let Ok(mut running) = self.running.try_lock() {
            if let Some(running) = running.take() {
                let _ = running.shutdown.send(true);
            }
        }
    }
}

impl<S> RelayInner<S>
where
    S: Store,
    S::Tx: OutboxStore,
{
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(err) = self.process_outbox().await {
                error!(error = %err, "relay cycle failed");
                self.stats.lock().unwrap_or_else(|e| e.into_inner()).errors += 1;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        debug!("relay loop exited");
    }

    async fn process_outbox(&self) -> Result<RelayCycle, TramError> {
        let mut tx = self.store.begin().await?;
        let batch = tx.lock_pending_outbox(self.batch_size).await?;

        let mut cycle = RelayCycle {
            fetched: batch.len(),
            ..RelayCycle::default()
        };

        if batch.is_empty() {
            tx.rollback().await?;
            self.record(&cycle);
            return Ok(cycle);
        }

        for mut record in batch {
            record.stamp_message_id();
            match self
                .transport
                .publish(&record.channel, &record.payload, &record.headers)
                .await
            {
                Ok(()) => {
                    record.mark_published();
                    cycle.published += 1;
                    debug!(message_id = %record.id, channel = %record.channel, "published");
                }
                Err(err) => {
                    error!(
                        message_id = %record.id,
                        channel = %record.channel,
                        error = %err,
                        "publish failed"
                    );
                    record.mark_failed(err.to_string());
                    cycle.failed += 1;
                }
            }
            tx.update_outbox(&record).await?;
        }

        tx.commit().await?;
        if cycle.failed > 0 {
            warn!(
                fetched = cycle.fetched,
                failed = cycle.failed,
                "relay cycle finished with failures"
            );
        } else {
            debug!(fetched = cycle.fetched, "relay cycle finished");
        }
        self.record(&cycle);
        Ok(cycle)
    }

    fn record(&self, cycle: &RelayCycle) {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(cycle);
    }
}
