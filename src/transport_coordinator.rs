use std::sync::Arc;

use derivative::Derivative;

use crate::{
    config::WebRTCTransportConfig,
    engine::{DTLSParameters, MediaEngine, ProducerHandle, TransportOptions},
    error::{ClosedKind, Error},
    peer::{ConnectionState, Peer, PeerId, Transport, TransportDescriptor},
    registry::PeerRegistry,
};

/// Creates, resolves and connects transports. A transport is only ever resolved through the peer that owns it.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct TransportCoordinator {
    registry: Arc<PeerRegistry>,
    #[derivative(Debug = "ignore")]
    engine: Arc<dyn MediaEngine>,
    transport_config: WebRTCTransportConfig,
}

impl TransportCoordinator {
    pub fn new(
        registry: Arc<PeerRegistry>,
        engine: Arc<dyn MediaEngine>,
        transport_config: WebRTCTransportConfig,
    ) -> Self {
        Self {
            registry,
            engine,
            transport_config,
        }
    }

    /// Creates a transport for the peer, registering the peer first if it is unknown.
    pub async fn create_transport(&self, peer_id: &PeerId) -> Result<TransportDescriptor, Error> {
        let mut peer = self.registry.lock_peer(peer_id, true).await?;

        let options = TransportOptions::new(peer_id.clone(), &self.transport_config);
        let handle = self.engine.create_transport(options).await.map_err(|err| {
            tracing::error!("Failed to create transport for peer {}: {}", peer_id, err);
            err
        })?;

        let transport = Transport::new(peer_id.clone(), handle.clone());
        let descriptor = transport.descriptor();
        if let Err(err) = peer.add_transport(transport) {
            tracing::warn!(
                "Transport {} could not be attached to peer {}: {}",
                descriptor.id,
                peer_id,
                err
            );
            if let Err(close_err) = handle.close().await {
                tracing::error!(
                    "Failed to close orphaned transport {}: {}",
                    descriptor.id,
                    close_err
                );
            }
            return Err(err);
        }

        tracing::info!(
            "Transport {} is created for peer {}, transports={}",
            descriptor.id,
            peer_id,
            peer.transports().count()
        );
        Ok(descriptor)
    }

    /// Runs the DTLS handshake. The transport must belong to `peer_id`.
    pub async fn connect_transport(
        &self,
        peer_id: &PeerId,
        transport_id: &str,
        dtls_parameters: DTLSParameters,
    ) -> Result<(), Error> {
        let mut peer = self.registry.lock_peer(peer_id, false).await?;
        let transport = peer
            .transport_mut(transport_id)
            .ok_or_else(|| Error::transport_not_found(transport_id))?;
        ensure_open(transport)?;

        transport.handle().connect(dtls_parameters).await?;
        if transport.mark_connected() {
            tracing::info!("Transport {} of peer {} is connected", transport_id, peer_id);
        }
        Ok(())
    }

    /// Looks the transport up within the peer's own transports. Fails only when the peer is unknown.
    pub async fn get_transport(
        &self,
        peer_id: &PeerId,
        transport_id: &str,
    ) -> Result<Option<Transport>, Error> {
        let peer = self.registry.lock_peer(peer_id, false).await?;
        Ok(peer.transport(transport_id).cloned())
    }

    pub async fn require_transport(
        &self,
        peer_id: &PeerId,
        transport_id: &str,
    ) -> Result<Transport, Error> {
        self.get_transport(peer_id, transport_id)
            .await?
            .ok_or_else(|| Error::transport_not_found(transport_id))
    }

    /// Closes a transport and every producer bound to it, producers first, then forgets it.
    ///
    /// A resource is only forgotten once the engine closed it. On a failed close the error is returned
    /// and the resource stays with the peer, so a retry or the peer's cleanup can still reach it.
    pub async fn close_transport(&self, peer_id: &PeerId, transport_id: &str) -> Result<(), Error> {
        let mut peer = self.registry.lock_peer(peer_id, false).await?;
        let handle = peer
            .transport(transport_id)
            .map(|t| t.handle().clone())
            .ok_or_else(|| Error::transport_not_found(transport_id))?;
        close_bound_producers(&mut peer, transport_id).await?;

        handle.close().await.map_err(|err| {
            tracing::error!("Failed to close transport {}: {}", transport_id, err);
            err
        })?;
        peer.remove_transport(transport_id);
        tracing::info!("Transport {} of peer {} is closed", transport_id, peer_id);
        Ok(())
    }
}

pub(crate) fn ensure_open(transport: &Transport) -> Result<(), Error> {
    if transport.connection_state() == ConnectionState::Closed {
        return Err(Error::new_already_closed(
            format!("Transport {} is closed", transport.id),
            ClosedKind::Transport,
        ));
    }
    Ok(())
}

// Every bound producer gets a close attempt. Those that fail stay with the peer and the first error is returned.
async fn close_bound_producers(peer: &mut Peer, transport_id: &str) -> Result<(), Error> {
    let bound: Vec<(String, Arc<dyn ProducerHandle>)> = peer
        .producers()
        .filter(|p| p.transport_id == transport_id)
        .map(|p| (p.id.clone(), p.handle().clone()))
        .collect();
    let mut first_err = None;
    for (producer_id, handle) in bound {
        match handle.close().await {
            Ok(()) => {
                peer.remove_producer(&producer_id);
            }
            Err(err) => {
                tracing::error!("Failed to close producer {}: {}", producer_id, err);
                first_err.get_or_insert(err);
            }
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
