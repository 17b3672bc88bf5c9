use std::time::Duration;

use tokio::{
    sync::{mpsc, oneshot, watch},
    time::sleep,
};
use tracing::{debug, error, info, span, warn, Instrument, Level};
use typed_builder::TypedBuilder;

use super::{Reconcile, ReconcileError};
use crate::common::ResourceKey;

/// Serializes the reconciliation passes of one gateway.
#[derive(TypedBuilder)]
pub struct GatewayWorker {
    gateway_key: ResourceKey,
    reconciler: Box<dyn Reconcile>,
    signal_sender: mpsc::Sender<()>,
    signal_receiver: mpsc::Receiver<()>,
    stop_receiver: oneshot::Receiver<()>,
    shutdown_receiver: watch::Receiver<bool>,
    retry_delay: Duration,
}

enum Exit {
    Stopped,
    Shutdown,
}

impl GatewayWorker {
    fn stop_requested(stop_receiver: &mut oneshot::Receiver<()>) -> Option<Exit> {
        match stop_receiver.try_recv() {
            Ok(()) => Some(Exit::Stopped),
            Err(oneshot::error::TryRecvError::Closed) => Some(Exit::Shutdown),
            Err(oneshot::error::TryRecvError::Empty) => None,
        }
    }

    fn schedule_retry(&self) {
        let sender = self.signal_sender.clone();
        let delay = self.retry_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = sender.try_send(());
        });
    }

    async fn wait(&mut self) -> Option<Exit> {
        if let Some(exit) = Self::stop_requested(&mut self.stop_receiver) {
            return Some(exit);
        }
        if *self.shutdown_receiver.borrow() {
            return Some(Exit::Shutdown);
        }

        tokio::select! {
            stop = &mut self.stop_receiver => {
                return Some(if stop.is_ok() { Exit::Stopped } else { Exit::Shutdown });
            },
            _ = self.shutdown_receiver.changed() => return Some(Exit::Shutdown),
            Some(()) = self.signal_receiver.recv() => {},
            else => return Some(Exit::Shutdown),
        }
        Self::stop_requested(&mut self.stop_receiver)
    }

    pub async fn run(mut self) {
        let span = span!(Level::INFO, "GatewayWorker", id = %self.gateway_key);
        span.in_scope(|| info!("Worker started"));

        let exit = loop {
            if let Some(exit) = self.wait().instrument(span.clone()).await {
                break exit;
            }
            match self.reconciler.reconcile().instrument(span.clone()).await {
                Ok(()) => {},
                Err(ReconcileError::Sync(e)) => {
                    span.in_scope(|| warn!("Synchronization failed, retrying in {:?} {e}", self.retry_delay));
                    self.schedule_retry();
                },
                Err(ReconcileError::Internal(e)) => span.in_scope(|| error!("Reconciliation aborted {e}")),
            }
        };

        match exit {
            Exit::Stopped => {
                span.in_scope(|| debug!("Worker stopping, removing gateway resources"));
                if let Err(e) = self.reconciler.teardown().instrument(span.clone()).await {
                    span.in_scope(|| warn!("Teardown incomplete {e}"));
                }
                span.in_scope(|| info!("Worker stopped"));
            },
            Exit::Shutdown => span.in_scope(|| info!("Worker shut down")),
        }
    }
}
