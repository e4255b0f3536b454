use std::sync::Arc;

use derivative::Derivative;
use futures_util::future::join_all;

use crate::{
    cleanup::{CleanupProtocol, CleanupReport},
    config::WebRTCTransportConfig,
    consumer_coordinator::{ConsumerCoordinator, ConsumerDescriptor},
    engine::{DTLSParameters, MediaEngine},
    error::Error,
    peer::{PeerId, ProducerInfo, Transport, TransportDescriptor},
    producer_coordinator::ProducerCoordinator,
    registry::{PeerRegistry, SharedPeer},
    rtp_parameters::{MediaKind, RtpCapabilities, RtpParameters},
    transport_coordinator::TransportCoordinator,
};

/// Relay owns one media engine and one peer registry for the lifetime of the process, and exposes
/// every coordination operation on top of them. Create it at startup and call [`Relay::close`] at shutdown.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Relay {
    #[derivative(Debug = "ignore")]
    engine: Arc<dyn MediaEngine>,
    registry: Arc<PeerRegistry>,
    transports: TransportCoordinator,
    producers: ProducerCoordinator,
    consumers: ConsumerCoordinator,
    cleanup: CleanupProtocol,
}

impl Relay {
    pub fn new(engine: Arc<dyn MediaEngine>, transport_config: WebRTCTransportConfig) -> Self {
        let registry = Arc::new(PeerRegistry::new());
        tracing::debug!("Relay is created");
        Self {
            transports: TransportCoordinator::new(
                registry.clone(),
                engine.clone(),
                transport_config,
            ),
            producers: ProducerCoordinator::new(registry.clone()),
            consumers: ConsumerCoordinator::new(registry.clone(), engine.clone()),
            cleanup: CleanupProtocol::new(registry.clone()),
            registry,
            engine,
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn transport_coordinator(&self) -> &TransportCoordinator {
        &self.transports
    }

    pub fn producer_coordinator(&self) -> &ProducerCoordinator {
        &self.producers
    }

    pub fn consumer_coordinator(&self) -> &ConsumerCoordinator {
        &self.consumers
    }

    pub fn cleanup_protocol(&self) -> &CleanupProtocol {
        &self.cleanup
    }

    /// The codec set every client negotiates against.
    pub fn rtp_capabilities(&self) -> RtpCapabilities {
        self.engine.rtp_capabilities()
    }

    pub async fn create_peer(&self, peer_id: &PeerId) -> SharedPeer {
        self.registry.create_peer(peer_id).await
    }

    pub async fn create_transport(&self, peer_id: &PeerId) -> Result<TransportDescriptor, Error> {
        self.transports.create_transport(peer_id).await
    }

    pub async fn connect_transport(
        &self,
        peer_id: &PeerId,
        transport_id: &str,
        dtls_parameters: DTLSParameters,
    ) -> Result<(), Error> {
        self.transports
            .connect_transport(peer_id, transport_id, dtls_parameters)
            .await
    }

    pub async fn require_transport(
        &self,
        peer_id: &PeerId,
        transport_id: &str,
    ) -> Result<Transport, Error> {
        self.transports.require_transport(peer_id, transport_id).await
    }

    pub async fn close_transport(&self, peer_id: &PeerId, transport_id: &str) -> Result<(), Error> {
        self.transports.close_transport(peer_id, transport_id).await
    }

    pub async fn create_producer(
        &self,
        peer_id: &PeerId,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<String, Error> {
        self.producers
            .create_producer(peer_id, transport_id, kind, rtp_parameters)
            .await
    }

    pub async fn close_producer(&self, peer_id: &PeerId, producer_id: &str) -> Result<(), Error> {
        self.producers.close_producer(peer_id, producer_id).await
    }

    /// Strict listing: fails with not found when the peer is unknown.
    pub async fn list_producers(&self, peer_id: &PeerId) -> Result<Vec<ProducerInfo>, Error> {
        self.producers.list_producers(peer_id).await
    }

    /// Lenient listing for polling clients: an unknown peer has no producers.
    pub async fn peer_producers(&self, peer_id: &PeerId) -> Vec<ProducerInfo> {
        self.registry.list_producers(peer_id).await
    }

    pub async fn create_consumer(
        &self,
        peer_id: &PeerId,
        transport_id: &str,
        producer_id: &str,
        kind: MediaKind,
    ) -> Result<ConsumerDescriptor, Error> {
        self.consumers
            .create_consumer(peer_id, transport_id, producer_id, kind)
            .await
    }

    pub async fn cleanup_peer(&self, peer_id: &PeerId) -> CleanupReport {
        self.cleanup.cleanup_peer(peer_id).await
    }

    /// Cleans up every registered peer, then stops the engine.
    pub async fn close(&self) -> Vec<CleanupReport> {
        let peer_ids = self.registry.peer_ids().await;
        tracing::info!("Relay is closing, peers={}", peer_ids.len());
        let reports = join_all(peer_ids.iter().map(|id| self.cleanup.cleanup_peer(id))).await;
        self.engine.close().await;
        tracing::debug!("Relay is closed");
        reports
    }
}
