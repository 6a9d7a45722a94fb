//! Controller - wires the watcher, dispatcher and reconciler together.

use crate::dispatch::Dispatcher;
use crate::launcher::Launcher;
use crate::reconciler::Reconciler;
use crate::watcher::QueueWatcher;
use kubekite_config::{ControllerConfig, WorkloadTemplate};
use kubekite_core::{Cluster, JobSource};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The three controller loops and the state they share.
pub struct Controller {
    launcher: Arc<Launcher>,
    watcher: QueueWatcher,
    dispatcher: Dispatcher,
    reconciler: Reconciler,
    channel_capacity: usize,
    cancel: CancellationToken,
}

impl Controller {
    pub fn new(
        config: &ControllerConfig,
        template: WorkloadTemplate,
        cluster: Arc<dyn Cluster>,
        source: Arc<dyn JobSource>,
    ) -> Self {
        let launcher = Arc::new(Launcher::new(
            Arc::clone(&cluster),
            Arc::new(template),
            config,
        ));

        Self {
            watcher: QueueWatcher::new(source, config.poll_interval),
            dispatcher: Dispatcher::new(Arc::clone(&launcher), config.shutdown_timeout),
            reconciler: Reconciler::new(cluster, config),
            launcher,
            channel_capacity: config.channel_capacity,
            cancel: CancellationToken::new(),
        }
    }

    /// The launcher, for inspecting the registry.
    pub fn launcher(&self) -> &Arc<Launcher> {
        &self.launcher
    }

    /// Token that stops every loop when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run all loops until `shutdown` resolves or the token is cancelled,
    /// then wait for each loop to stop.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let Self {
            launcher,
            watcher,
            dispatcher,
            reconciler,
            channel_capacity,
            cancel,
        } = self;

        let (tx, rx) = mpsc::channel(channel_capacity);

        let watcher = tokio::spawn({
            let cancel = cancel.clone();
            async move { watcher.run(tx, cancel).await }
        });
        let dispatcher = tokio::spawn({
            let cancel = cancel.clone();
            async move { dispatcher.run(rx, cancel).await }
        });
        let reconciler = tokio::spawn({
            let cancel = cancel.clone();
            async move { reconciler.run(cancel).await }
        });

        info!("Controller started");

        tokio::select! {
            _ = shutdown => info!("Shutdown requested"),
            _ = cancel.cancelled() => {}
        }
        cancel.cancel();

        let (watcher, dispatcher, reconciler) = tokio::join!(watcher, dispatcher, reconciler);
        for (name, result) in [
            ("watcher", watcher.map(|_| ())),
            ("dispatcher", dispatcher.map(|_| ())),
            ("reconciler", reconciler),
        ] {
            if let Err(e) = result {
                warn!(task = name, error = %e, "Controller task failed");
            }
        }

        info!(
            launched = launcher.registered_count(),
            "Controller stopped"
        );
    }
}
