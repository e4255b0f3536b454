use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    error::Error,
    peer::{Peer, PeerId, ProducerInfo},
};

/// Shared handle to one peer. Holding its lock serializes every mutation of the peer's resources.
pub type SharedPeer = Arc<Mutex<Peer>>;

/// Peer Registry maps peer ids to peer state. The map is the only process-wide mutable state;
/// everything else is reached through a peer and guarded by that peer's lock.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<PeerId, SharedPeer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an empty peer unless one with this id already exists. Returns the registered entry either way.
    pub async fn create_peer(&self, peer_id: &PeerId) -> SharedPeer {
        let mut peers = self.peers.lock().await;
        if let Some(peer) = peers.get(peer_id) {
            tracing::debug!("Peer {} already exists", peer_id);
            return peer.clone();
        }
        let peer = Arc::new(Mutex::new(Peer::new(peer_id.clone())));
        peers.insert(peer_id.clone(), peer.clone());
        tracing::info!("Peer {} is created, total peers={}", peer_id, peers.len());
        peer
    }

    pub async fn get_peer(&self, peer_id: &PeerId) -> Option<SharedPeer> {
        self.peers.lock().await.get(peer_id).cloned()
    }

    pub async fn require_peer(&self, peer_id: &PeerId) -> Result<SharedPeer, Error> {
        self.get_peer(peer_id).await.ok_or_else(|| {
            tracing::warn!("Peer {} is not found", peer_id);
            Error::peer_not_found(peer_id.as_str())
        })
    }

    /// Removes the peer from the registry without closing any of its resources.
    /// Operations still waiting on the peer see it as gone once they acquire its lock.
    pub async fn delete_peer(&self, peer_id: &PeerId) -> bool {
        let removed = {
            let mut peers = self.peers.lock().await;
            let removed = peers.remove(peer_id);
            tracing::debug!(
                "Peer {} is deleted, remaining peers={}",
                peer_id,
                peers.len()
            );
            removed
        };
        match removed {
            Some(peer) => {
                peer.lock().await.detach();
                true
            }
            None => false,
        }
    }

    /// A copy of the current map. Adding or removing entries in it does not affect the registry.
    pub async fn list_peers(&self) -> HashMap<PeerId, SharedPeer> {
        self.peers.lock().await.clone()
    }

    pub async fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.lock().await.keys().cloned().collect()
    }

    /// Producers of the peer, or an empty list when the peer is unknown.
    pub async fn list_producers(&self, peer_id: &PeerId) -> Vec<ProducerInfo> {
        let Some(peer) = self.get_peer(peer_id).await else {
            tracing::debug!("Peer {} is not found, returning no producers", peer_id);
            return vec![];
        };
        let peer = peer.lock().await;
        if peer.is_detached() {
            return vec![];
        }
        peer.producer_infos()
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.lock().await.is_empty()
    }

    /// Locks a peer that is still registered. With `create`, a missing peer is created first,
    /// and a peer torn down while this call waited for its lock is replaced by a fresh one.
    pub(crate) async fn lock_peer(
        &self,
        peer_id: &PeerId,
        create: bool,
    ) -> Result<OwnedMutexGuard<Peer>, Error> {
        loop {
            let peer = if create {
                self.create_peer(peer_id).await
            } else {
                self.require_peer(peer_id).await?
            };
            let guard = peer.lock_owned().await;
            if !guard.is_detached() {
                return Ok(guard);
            }
            if !create {
                return Err(Error::peer_not_found(peer_id.as_str()));
            }
            tracing::debug!("Peer {} was removed while waiting, retrying", peer_id);
        }
    }

    /// Removes `peer` only if it is still the registered entry for its id.
    pub(crate) async fn remove_entry(&self, peer_id: &PeerId, peer: &SharedPeer) -> bool {
        let mut peers = self.peers.lock().await;
        match peers.get(peer_id) {
            Some(current) if Arc::ptr_eq(current, peer) => {
                peers.remove(peer_id);
                tracing::debug!(
                    "Peer {} is deleted, remaining peers={}",
                    peer_id,
                    peers.len()
                );
                true
            }
            _ => false,
        }
    }
}
