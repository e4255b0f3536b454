use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;

use crate::{
    engine::Handle,
    error::Error,
    peer::PeerId,
    registry::PeerRegistry,
};

/// Outcome of closing one group of resources.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CloseLedger {
    pub attempted: Vec<String>,
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl CloseLedger {
    fn record(&mut self, id: String, result: Result<(), Error>) {
        self.attempted.push(id.clone());
        match result {
            Ok(()) => self.succeeded.push(id),
            Err(err) => self.failed.push((id, err.to_string())),
        }
    }
}

/// What [`CleanupProtocol::cleanup_peer`] did.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub peer_id: PeerId,
    /// False when the peer was not registered and nothing was done.
    pub removed: bool,
    pub producers: CloseLedger,
    pub transports: CloseLedger,
}

impl CleanupReport {
    fn skipped(peer_id: &PeerId) -> Self {
        Self {
            peer_id: peer_id.clone(),
            removed: false,
            producers: CloseLedger::default(),
            transports: CloseLedger::default(),
        }
    }

    pub fn close_attempts(&self) -> usize {
        self.producers.attempted.len() + self.transports.attempted.len()
    }

    pub fn close_failures(&self) -> usize {
        self.producers.failed.len() + self.transports.failed.len()
    }
}

/// Tears a peer down: every producer, then every transport, then the registry entry.
#[derive(Debug, Clone)]
pub struct CleanupProtocol {
    registry: Arc<PeerRegistry>,
}

impl CleanupProtocol {
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        Self { registry }
    }

    /// Best effort: a failing close is logged and recorded, and the peer is removed regardless.
    pub async fn cleanup_peer(&self, peer_id: &PeerId) -> CleanupReport {
        tracing::debug!("Cleaning up peer {}", peer_id);
        let Some(peer) = self.registry.get_peer(peer_id).await else {
            tracing::debug!("Peer {} is not found during cleanup", peer_id);
            return CleanupReport::skipped(peer_id);
        };

        let mut guard = peer.lock().await;
        if guard.is_detached() {
            tracing::debug!("Peer {} was already removed", peer_id);
            return CleanupReport::skipped(peer_id);
        }

        let producers: Vec<_> = guard
            .producers()
            .map(|p| (p.id.clone(), p.handle().clone()))
            .collect();
        tracing::debug!("Closing {} producers of peer {}", producers.len(), peer_id);
        let producers = close_all("producer", producers).await;

        let transports: Vec<_> = guard
            .transports()
            .map(|t| (t.id.clone(), t.handle().clone()))
            .collect();
        tracing::debug!("Closing {} transports of peer {}", transports.len(), peer_id);
        let transports = close_all("transport", transports).await;

        guard.detach();
        let removed = self.registry.remove_entry(peer_id, &peer).await;
        drop(guard);

        tracing::info!(
            "Peer {} is cleaned up, closed {}/{} producers and {}/{} transports",
            peer_id,
            producers.succeeded.len(),
            producers.attempted.len(),
            transports.succeeded.len(),
            transports.attempted.len()
        );
        CleanupReport {
            peer_id: peer_id.clone(),
            removed,
            producers,
            transports,
        }
    }
}

/// Closes every handle concurrently and waits for all of them.
async fn close_all<H>(label: &str, handles: Vec<(String, Arc<H>)>) -> CloseLedger
where
    H: Handle + ?Sized,
{
    let results = join_all(handles.into_iter().map(|(id, handle)| async move {
        let result = handle.close().await;
        (id, result)
    }))
    .await;

    let mut ledger = CloseLedger::default();
    for (id, result) in results {
        if let Err(err) = &result {
            tracing::error!("Failed to close {} {}: {}", label, id, err);
        }
        ledger.record(id, result);
    }
    ledger
}
