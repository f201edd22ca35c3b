//! Async driver: timers, mutation feed and navigation around one [`Engine`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use recast_common::NodeId;
use recast_tree::{HostTree, Subscription};
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument};

use crate::engine::{Engine, PassReport};

/// Host tree shared between the host and the pipeline.
pub type SharedTree<T> = Arc<Mutex<T>>;

/// Drives an [`Engine`] against a live tree until shut down.
///
/// Activation loads the rate, waits the initial delay and runs a full pass.
/// Afterwards changed roots are reconciled once their debounce window elapses,
/// annotation follows each productive pass after the settle delay, the rate is
/// refreshed periodically (a changed value resets and re-runs a full pass) and a
/// new navigation key resets and restarts activation.
pub struct Pipeline<T> {
    engine: Engine,
    tree: SharedTree<T>,
    navigation: watch::Receiver<String>,
}

impl<T> Pipeline<T>
where
    T: HostTree + Send + 'static,
{
    pub fn new(engine: Engine, tree: SharedTree<T>, navigation: watch::Receiver<String>) -> Self {
        Self {
            engine,
            tree,
            navigation,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run until `shutdown` turns true or its sender is dropped. Returns the engine.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Engine {
        let mut subscription = self.tree.lock().subscribe();
        let timing = self.engine.config().timing.clone();

        let outcome = self.engine.refresh_rate().await;
        info!(rate = %outcome.current, source = ?outcome.source, "Pipeline activated");

        let key = self.navigation.borrow_and_update().clone();
        {
            let mut tree = self.tree.lock();
            self.engine.navigate(&mut *tree, &key);
        }

        let mut scan_at = Some(Instant::now() + timing.initial_delay);
        let mut annotate_at: Option<Instant> = None;
        let mut refresh = time::interval_at(
            Instant::now() + timing.refresh_interval,
            timing.refresh_interval,
        );
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut navigation_open = true;

        loop {
            let debounce_at = self.engine.watcher().deadline();

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                batch = subscription.recv() => {
                    let Some(batch) = batch else {
                        info!("Host mutation feed closed");
                        break;
                    };
                    let tree = self.tree.lock();
                    self.engine.ingest(&*tree, &batch, Instant::now());
                }

                changed = self.navigation.changed(), if navigation_open => {
                    if changed.is_err() {
                        navigation_open = false;
                        continue;
                    }
                    let key = self.navigation.borrow_and_update().clone();
                    let reset = {
                        let mut tree = self.tree.lock();
                        self.engine.navigate(&mut *tree, &key)
                    };
                    if reset {
                        drain(&mut subscription);
                        annotate_at = None;
                        scan_at = Some(Instant::now() + timing.initial_delay);
                    }
                }

                _ = sleep_until(scan_at) => {
                    scan_at = None;
                    let report = self.full_pass(&mut subscription);
                    annotate_at = Some(Instant::now() + timing.settle);
                    debug!(amounts = report.amounts_converted, "Initial pass done");
                }

                _ = sleep_until(debounce_at) => {
                    let now = Instant::now();
                    if let Some(roots) = self.engine.take_due(now) {
                        let report = self.pass(&roots, &mut subscription);
                        if report.roots_reconciled > 0 {
                            annotate_at = Some(Instant::now() + timing.settle);
                        }
                    }
                }

                _ = sleep_until(annotate_at) => {
                    annotate_at = None;
                    let mut tree = self.tree.lock();
                    self.engine.annotate(&mut *tree);
                }

                _ = refresh.tick() => {
                    let outcome = self.engine.refresh_rate().await;
                    self.engine.requeue_deferred(Instant::now());
                    if outcome.changed() {
                        info!(
                            previous = ?outcome.previous,
                            current = %outcome.current,
                            "Exchange rate changed, reconverting"
                        );
                        {
                            let mut tree = self.tree.lock();
                            self.engine.reset(&mut *tree);
                        }
                        self.full_pass(&mut subscription);
                        annotate_at = Some(Instant::now() + timing.settle);
                    }
                }
            }
        }

        self.tree.lock().unsubscribe(subscription.id());
        info!(metrics = ?self.engine.metrics().snapshot(), "Pipeline stopped");
        self.engine
    }

    fn full_pass(&mut self, subscription: &mut Subscription) -> PassReport {
        let roots = {
            let tree = self.tree.lock();
            self.engine.begin_full_scan(&*tree, Instant::now())
        };
        self.pass(&roots, subscription)
    }

    /// Reconcile `roots`, feeding records raised meanwhile into the next batch.
    fn pass(&mut self, roots: &[NodeId], subscription: &mut Subscription) -> PassReport {
        let mut tree = self.tree.lock();
        let report = self.engine.reconcile(&mut *tree, roots);

        let now = Instant::now();
        while let Some(batch) = subscription.try_recv() {
            self.engine.ingest(&*tree, &batch, now);
        }
        self.engine.finish_pass(now);
        report
    }
}

/// Discard queued notifications.
fn drain(subscription: &mut Subscription) {
    let mut dropped = 0;
    while subscription.try_recv().is_some() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!(batches = dropped, "Discarded notifications from before navigation");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Handle used by the host to steer a spawned pipeline.
pub struct PipelineHandle {
    navigation: watch::Sender<String>,
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<Engine>,
}

impl PipelineHandle {
    /// Spawn `engine` against `tree` on the current runtime.
    pub fn spawn<T>(engine: Engine, tree: SharedTree<T>, initial_key: impl Into<String>) -> Self
    where
        T: HostTree + Send + 'static,
    {
        let (navigation, navigation_rx) = watch::channel(initial_key.into());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let pipeline = Pipeline::new(engine, tree, navigation_rx);
        let task = tokio::spawn(pipeline.run(shutdown_rx));
        Self {
            navigation,
            shutdown,
            task,
        }
    }

    /// Report the page key the host is now showing.
    pub fn navigate(&self, key: impl Into<String>) {
        self.navigation.send_replace(key.into());
    }

    /// Stop the pipeline and hand back its engine.
    pub async fn shutdown(self) -> Result<Engine, tokio::task::JoinError> {
        self.shutdown.send_replace(true);
        self.task.await
    }

    /// Stop after `grace`, giving pending timers a chance to fire.
    pub async fn shutdown_after(self, grace: Duration) -> Result<Engine, tokio::task::JoinError> {
        time::sleep(grace).await;
        self.shutdown().await
    }
}
