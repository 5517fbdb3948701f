//! Composable cancellation.
//!
//! An engine owns a root [`Shutdown`]; each connection gets a child of it.
//! Triggering the child stops that connection only, triggering the root
//! stops every connection plus the worker and sweep loops.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    parent: Option<Arc<Shutdown>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            parent: None,
        }
    }

    /// A signal that fires on its own trigger or on any ancestor's.
    pub fn child(&self) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow() || self.parent.as_ref().is_some_and(|p| p.is_triggered())
    }

    /// Resolves once this signal or an ancestor is triggered.
    pub fn triggered(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut rx = self.tx.subscribe();
            let own = async move {
                // The sender lives as long as `self`, so this only returns on trigger.
                let _ = rx.wait_for(|v| *v).await;
            };
            match &self.parent {
                None => own.await,
                Some(parent) => {
                    tokio::select! {
                        _ = own => {}
                        _ = parent.triggered() => {}
                    }
                }
            }
        })
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn child_trigger_does_not_reach_parent() {
        let root = Shutdown::new();
        let child = root.child();
        child.trigger();
        assert!(child.is_triggered());
        assert!(!root.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), child.triggered())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn root_trigger_wakes_waiting_children() {
        let root = Shutdown::new();
        let children: Vec<_> = (0..4).map(|_| root.child()).collect();
        let waits: Vec<_> = children
            .iter()
            .cloned()
            .map(|c| tokio::spawn(async move { c.triggered().await }))
            .collect();
        tokio::task::yield_now().await;
        root.trigger();
        for w in waits {
            tokio::time::timeout(Duration::from_secs(1), w)
                .await
                .unwrap()
                .unwrap();
        }
        assert!(children.iter().all(Shutdown::is_triggered));
    }

    #[tokio::test]
    async fn untriggered_signal_stays_pending() {
        let root = Shutdown::new();
        let child = root.child();
        assert!(
            tokio::time::timeout(Duration::from_millis(20), child.triggered())
                .await
                .is_err()
        );
    }
}
