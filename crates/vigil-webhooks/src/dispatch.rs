//! Ordered event dispatch.
//!
//! Consumes [`TransitionEvent`]s from the poller's queue and hands them to
//! the [`DeliveryEngine`]. Each service slug gets its own worker, so events
//! for one service are delivered strictly in submission order while
//! different services proceed independently.

use std::collections::HashMap;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use vigil_state::TransitionEvent;

use crate::delivery::DeliveryEngine;

pub struct EventDispatcher {
    engine: DeliveryEngine,
    /// slug → queue feeding that slug's worker.
    queues: HashMap<String, mpsc::UnboundedSender<TransitionEvent>>,
    workers: JoinSet<()>,
}

impl EventDispatcher {
    pub fn new(engine: DeliveryEngine) -> Self {
        Self {
            engine,
            queues: HashMap::new(),
            workers: JoinSet::new(),
        }
    }

    /// Dispatch events until `events` closes or `shutdown` fires.
    ///
    /// Either way, events already queued are handed to their workers and
    /// delivered. A shutdown signal that arrives while those deliveries are
    /// draining aborts whatever is still outstanding.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TransitionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("event dispatcher started");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.submit(event),
                    None => {
                        debug!("transition event queue closed");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    debug!("event dispatcher shutting down");
                    events.close();
                    while let Some(event) = events.recv().await {
                        self.submit(event);
                    }
                    break;
                }
            }
        }

        // Closing every queue lets each worker drain and exit.
        self.queues.clear();
        self.drain(&mut shutdown).await;
        info!("event dispatcher stopped");
    }

    async fn drain(&mut self, shutdown: &mut watch::Receiver<bool>) {
        let mut signal_open = true;
        loop {
            tokio::select! {
                joined = self.workers.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) => warn!(error = %e, "webhook worker exited abnormally"),
                    None => return,
                },
                changed = shutdown.changed(), if signal_open => {
                    if changed.is_err() {
                        signal_open = false;
                        continue;
                    }
                    warn!(
                        workers = self.workers.len(),
                        "shutdown during drain; abandoning pending webhook deliveries"
                    );
                    self.workers.abort_all();
                    while self.workers.join_next().await.is_some() {}
                    return;
                }
            }
        }
    }

    fn submit(&mut self, event: TransitionEvent) {
        let queue = self.queues.entry(event.slug.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            self.workers
                .spawn(run_service_queue(self.engine.clone(), event.slug.clone(), rx));
            tx
        });
        if let Err(e) = queue.send(event) {
            warn!(slug = %e.0.slug, "webhook worker gone; event dropped");
        }
    }
}

async fn run_service_queue(
    engine: DeliveryEngine,
    slug: String,
    mut rx: mpsc::UnboundedReceiver<TransitionEvent>,
) {
    debug!(%slug, "webhook worker started");
    while let Some(event) = rx.recv().await {
        let results = engine
            .trigger_event(&event.slug, event.event.as_str(), event.data())
            .await;
        debug!(
            %slug,
            event = %event.event,
            deliveries = results.len(),
            "transition event processed"
        );
    }
    debug!(%slug, "webhook worker finished");
}
