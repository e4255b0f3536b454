use std::sync::Arc;

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::{
    engine::MediaEngine,
    error::Error,
    peer::PeerId,
    registry::PeerRegistry,
    rtp_parameters::{MediaKind, RtpParameters},
    transport_coordinator::ensure_open,
};

/// What the receiving peer needs to decode a consumed stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerDescriptor {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

/// Relays a producer, possibly owned by another peer, to one of the caller's transports.
/// Consumers are handed back to the caller and not tracked afterwards.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct ConsumerCoordinator {
    registry: Arc<PeerRegistry>,
    #[derivative(Debug = "ignore")]
    engine: Arc<dyn MediaEngine>,
}

impl ConsumerCoordinator {
    pub fn new(registry: Arc<PeerRegistry>, engine: Arc<dyn MediaEngine>) -> Self {
        Self { registry, engine }
    }

    /// The producer id is not checked here; an unknown producer surfaces as the engine's rejection.
    pub async fn create_consumer(
        &self,
        peer_id: &PeerId,
        transport_id: &str,
        producer_id: &str,
        kind: MediaKind,
    ) -> Result<ConsumerDescriptor, Error> {
        tracing::debug!(
            "create_consumer called for peer {}, transport {}, producer {}, kind={}",
            peer_id,
            transport_id,
            producer_id,
            kind
        );
        let peer = self.registry.lock_peer(peer_id, false).await?;
        let transport = peer
            .transport(transport_id)
            .ok_or_else(|| Error::transport_not_found(transport_id))?;
        ensure_open(transport)?;

        let consumer = transport
            .handle()
            .consume(producer_id, self.engine.rtp_capabilities())
            .await
            .map_err(|err| {
                tracing::error!(
                    "Failed to consume producer {} on transport {}: {}",
                    producer_id,
                    transport_id,
                    err
                );
                err
            })?;

        if consumer.kind() != kind {
            tracing::warn!(
                "Consumer {} carries {} media while {} was requested",
                consumer.id(),
                consumer.kind(),
                kind
            );
        }
        tracing::info!(
            "Consumer {} is created for peer {}, producer={}",
            consumer.id(),
            peer_id,
            consumer.producer_id()
        );
        Ok(ConsumerDescriptor {
            id: consumer.id(),
            producer_id: consumer.producer_id(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{
        config::WebRTCTransportConfig, engine::loopback::LoopbackEngine, error::NotFoundKind,
        producer_coordinator::ProducerCoordinator, rtp_parameters::RtpCodecParameters,
        transport_coordinator::TransportCoordinator,
    };

    struct Fixture {
        registry: Arc<PeerRegistry>,
        transports: TransportCoordinator,
        producers: ProducerCoordinator,
        consumers: ConsumerCoordinator,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(PeerRegistry::new());
        let engine: Arc<dyn MediaEngine> = Arc::new(LoopbackEngine::default());
        Fixture {
            transports: TransportCoordinator::new(
                registry.clone(),
                engine.clone(),
                WebRTCTransportConfig::default(),
            ),
            producers: ProducerCoordinator::new(registry.clone()),
            consumers: ConsumerCoordinator::new(registry.clone(), engine),
            registry,
        }
    }

    fn vp8() -> RtpParameters {
        RtpParameters {
            mid: Some("1".to_string()),
            codecs: vec![RtpCodecParameters {
                mime_type: "video/VP8".to_string(),
                payload_type: 96,
                clock_rate: 90000,
                channels: None,
                parameters: BTreeMap::new(),
            }],
            encodings: vec![],
        }
    }

    #[tokio::test]
    async fn consumes_another_peers_producer() {
        let f = fixture();
        let alice = PeerId::from("alice");
        let bob = PeerId::from("bob");
        let t1 = f.transports.create_transport(&alice).await.unwrap();
        let p1 = f
            .producers
            .create_producer(&alice, &t1.id, MediaKind::Video, vp8())
            .await
            .unwrap();
        let t2 = f.transports.create_transport(&bob).await.unwrap();

        let consumer = f
            .consumers
            .create_consumer(&bob, &t2.id, &p1, MediaKind::Video)
            .await
            .unwrap();
        assert_eq!(consumer.producer_id, p1);
        assert_eq!(consumer.kind, MediaKind::Video);
        assert_eq!(consumer.rtp_parameters.codecs[0].mime_type, "video/VP8");
        assert_ne!(consumer.id, p1);

        // Consumers are not recorded under the consuming peer.
        assert!(f.registry.list_producers(&bob).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_producer_is_engine_rejected() {
        let f = fixture();
        let bob = PeerId::from("bob");
        let t2 = f.transports.create_transport(&bob).await.unwrap();
        let err = f
            .consumers
            .create_consumer(&bob, &t2.id, "no-such-producer", MediaKind::Audio)
            .await
            .unwrap_err();
        assert!(err.is_engine_rejected());
    }

    #[tokio::test]
    async fn consuming_through_foreign_transport_fails() {
        let f = fixture();
        let alice = PeerId::from("alice");
        let bob = PeerId::from("bob");
        let t1 = f.transports.create_transport(&alice).await.unwrap();
        let p1 = f
            .producers
            .create_producer(&alice, &t1.id, MediaKind::Video, vp8())
            .await
            .unwrap();
        f.registry.create_peer(&bob).await;

        let err = f
            .consumers
            .create_consumer(&bob, &t1.id, &p1, MediaKind::Video)
            .await
            .unwrap_err();
        assert!(err.is_not_found(NotFoundKind::Transport));

        let err = f
            .consumers
            .create_consumer(&PeerId::from("carol"), &t1.id, &p1, MediaKind::Video)
            .await
            .unwrap_err();
        assert!(err.is_not_found(NotFoundKind::Peer));
    }

    #[tokio::test]
    async fn closed_producer_can_no_longer_be_consumed() {
        let f = fixture();
        let alice = PeerId::from("alice");
        let bob = PeerId::from("bob");
        let t1 = f.transports.create_transport(&alice).await.unwrap();
        let p1 = f
            .producers
            .create_producer(&alice, &t1.id, MediaKind::Video, vp8())
            .await
            .unwrap();
        let t2 = f.transports.create_transport(&bob).await.unwrap();
        f.producers.close_producer(&alice, &p1).await.unwrap();

        let err = f
            .consumers
            .create_consumer(&bob, &t2.id, &p1, MediaKind::Video)
            .await
            .unwrap_err();
        assert!(err.is_engine_rejected());
    }
}
