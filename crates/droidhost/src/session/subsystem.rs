//! Supervised subsystem handles.
//!
//! Each subsystem is a named tokio task with its own child cancellation
//! token. Stop order is the reverse of start order.

use log::{debug, error, info};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Subsystem {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Subsystem {
    /// Spawn a named subsystem. The future must exit promptly once its
    /// token fires.
    pub fn spawn<F, Fut>(name: &'static str, parent: &CancellationToken, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = parent.child_token();
        let handle = tokio::spawn(f(cancel.clone()));
        info!("started subsystem {name}");
        Self {
            name,
            cancel,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn stop(self) {
        debug!("stopping subsystem {}", self.name);
        self.cancel.cancel();
        match tokio::time::timeout(STOP_TIMEOUT, self.handle).await {
            Ok(Ok(())) => debug!("subsystem {} stopped", self.name),
            Ok(Err(e)) => error!("subsystem {} panicked: {e}", self.name),
            Err(_) => error!("subsystem {} did not stop in time", self.name),
        }
    }
}

#[derive(Default)]
pub struct SubsystemSet {
    subsystems: Vec<Subsystem>,
}

impl SubsystemSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, subsystem: Subsystem) {
        self.subsystems.push(subsystem);
    }

    pub fn len(&self) -> usize {
        self.subsystems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subsystems.is_empty()
    }

    /// Stop every subsystem in reverse start order. Safe to call again
    /// on an already-drained set.
    pub async fn stop_all(&mut self) {
        while let Some(subsystem) = self.subsystems.pop() {
            subsystem.stop().await;
        }
    }
}
