use std::sync::Arc;

use crate::{
    error::Error,
    peer::{PeerId, Producer, ProducerInfo},
    registry::PeerRegistry,
    rtp_parameters::{MediaKind, RtpParameters},
    transport_coordinator::ensure_open,
};

/// Binds inbound media to a peer's transport and keeps the resulting producers under that peer.
#[derive(Debug, Clone)]
pub struct ProducerCoordinator {
    registry: Arc<PeerRegistry>,
}

impl ProducerCoordinator {
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        Self { registry }
    }

    /// Starts accepting `kind` media on one of the peer's transports and returns the producer id.
    ///
    /// The transport does not have to be connected yet; the engine accepts media once DTLS completes.
    pub async fn create_producer(
        &self,
        peer_id: &PeerId,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<String, Error> {
        tracing::debug!(
            "create_producer called for peer {}, transport {}, kind={}",
            peer_id,
            transport_id,
            kind
        );
        let mut peer = self.registry.lock_peer(peer_id, false).await?;
        let transport = peer
            .transport(transport_id)
            .ok_or_else(|| Error::transport_not_found(transport_id))?;
        ensure_open(transport)?;

        let handle = transport
            .handle()
            .produce(kind, rtp_parameters)
            .await
            .map_err(|err| {
                tracing::error!(
                    "Failed to produce {} on transport {}: {}",
                    kind,
                    transport_id,
                    err
                );
                err
            })?;

        let producer = Producer::new(peer_id.clone(), transport_id.to_string(), handle.clone());
        let producer_id = producer.id.clone();
        if let Err(err) = peer.add_producer(producer) {
            tracing::warn!(
                "Producer {} could not be attached to peer {}: {}",
                producer_id,
                peer_id,
                err
            );
            if let Err(close_err) = handle.close().await {
                tracing::error!(
                    "Failed to close orphaned producer {}: {}",
                    producer_id,
                    close_err
                );
            }
            return Err(err);
        }

        tracing::info!(
            "Producer {} is created for peer {}, producers={}",
            producer_id,
            peer_id,
            peer.producers().count()
        );
        Ok(producer_id)
    }

    /// Producers of the peer. Unlike [`PeerRegistry::list_producers`], an unknown peer is an error.
    pub async fn list_producers(&self, peer_id: &PeerId) -> Result<Vec<ProducerInfo>, Error> {
        let peer = self.registry.lock_peer(peer_id, false).await?;
        let producers = peer.producer_infos();
        tracing::debug!(
            "Retrieved {} producers for peer {}",
            producers.len(),
            peer_id
        );
        Ok(producers)
    }

    /// Closes one producer of the peer and forgets it. If the engine fails to close it, the producer stays listed.
    pub async fn close_producer(&self, peer_id: &PeerId, producer_id: &str) -> Result<(), Error> {
        let mut peer = self.registry.lock_peer(peer_id, false).await?;
        let handle = peer
            .producer(producer_id)
            .map(|p| p.handle().clone())
            .ok_or_else(|| Error::producer_not_found(producer_id))?;
        handle.close().await.map_err(|err| {
            tracing::error!("Failed to close producer {}: {}", producer_id, err);
            err
        })?;
        peer.remove_producer(producer_id);
        tracing::info!("Producer {} of peer {} is closed", producer_id, peer_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::atomic::Ordering};

    use super::*;
    use crate::{
        config::WebRTCTransportConfig,
        engine::{loopback::LoopbackEngine, testing::FaultyEngine},
        error::NotFoundKind,
        rtp_parameters::RtpCodecParameters,
        transport_coordinator::TransportCoordinator,
    };

    struct Fixture {
        registry: Arc<PeerRegistry>,
        engine: Arc<LoopbackEngine>,
        transports: TransportCoordinator,
        producers: ProducerCoordinator,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(PeerRegistry::new());
        let engine = Arc::new(LoopbackEngine::default());
        let transports = TransportCoordinator::new(
            registry.clone(),
            engine.clone(),
            WebRTCTransportConfig::default(),
        );
        let producers = ProducerCoordinator::new(registry.clone());
        Fixture {
            registry,
            engine,
            transports,
            producers,
        }
    }

    fn opus() -> RtpParameters {
        RtpParameters {
            mid: Some("0".to_string()),
            codecs: vec![RtpCodecParameters {
                mime_type: "audio/opus".to_string(),
                payload_type: 111,
                clock_rate: 48000,
                channels: Some(2),
                parameters: BTreeMap::new(),
            }],
            encodings: vec![],
        }
    }

    #[tokio::test]
    async fn producer_is_listed_under_its_peer() {
        let f = fixture();
        let alice = PeerId::from("alice");
        let transport = f.transports.create_transport(&alice).await.unwrap();

        // No connect first: producing on a fresh transport is accepted.
        let producer_id = f
            .producers
            .create_producer(&alice, &transport.id, MediaKind::Audio, opus())
            .await
            .unwrap();

        let expected = vec![ProducerInfo {
            id: producer_id,
            kind: MediaKind::Audio,
        }];
        assert_eq!(f.producers.list_producers(&alice).await.unwrap(), expected);
        assert_eq!(f.registry.list_producers(&alice).await, expected);
    }

    #[tokio::test]
    async fn strict_listing_fails_for_unknown_peer() {
        let f = fixture();
        let bob = PeerId::from("bob");
        let err = f.producers.list_producers(&bob).await.unwrap_err();
        assert!(err.is_not_found(NotFoundKind::Peer));
        assert!(f.registry.list_producers(&bob).await.is_empty());
    }

    #[tokio::test]
    async fn producing_on_foreign_transport_fails() {
        let f = fixture();
        let alice = PeerId::from("alice");
        let bob = PeerId::from("bob");
        let transport = f.transports.create_transport(&alice).await.unwrap();
        f.registry.create_peer(&bob).await;

        let err = f
            .producers
            .create_producer(&bob, &transport.id, MediaKind::Audio, opus())
            .await
            .unwrap_err();
        assert!(err.is_not_found(NotFoundKind::Transport));
        assert!(f.registry.list_producers(&alice).await.is_empty());
    }

    #[tokio::test]
    async fn negotiation_failure_is_engine_rejected() {
        let f = fixture();
        let alice = PeerId::from("alice");
        let transport = f.transports.create_transport(&alice).await.unwrap();
        let mut params = opus();
        params.codecs[0].mime_type = "audio/PCMU".to_string();
        params.codecs[0].clock_rate = 8000;

        let err = f
            .producers
            .create_producer(&alice, &transport.id, MediaKind::Audio, params)
            .await
            .unwrap_err();
        assert!(err.is_engine_rejected());
        assert!(err.message.contains("audio/PCMU"));
        assert!(f.producers.list_producers(&alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn producing_on_closed_transport_is_already_closed() {
        let f = fixture();
        let alice = PeerId::from("alice");
        let transport = f.transports.create_transport(&alice).await.unwrap();
        {
            let peer = f.registry.require_peer(&alice).await.unwrap();
            let peer = peer.lock().await;
            let handle = peer.transport(&transport.id).unwrap().handle().clone();
            handle.close().await.unwrap();
        }
        let err = f
            .producers
            .create_producer(&alice, &transport.id, MediaKind::Audio, opus())
            .await
            .unwrap_err();
        assert!(err.is_already_closed());
    }

    #[tokio::test]
    async fn close_producer_removes_it() {
        let f = fixture();
        let alice = PeerId::from("alice");
        let transport = f.transports.create_transport(&alice).await.unwrap();
        let producer_id = f
            .producers
            .create_producer(&alice, &transport.id, MediaKind::Audio, opus())
            .await
            .unwrap();

        f.producers
            .close_producer(&alice, &producer_id)
            .await
            .unwrap();
        assert!(f.producers.list_producers(&alice).await.unwrap().is_empty());
        assert!(!f.engine.has_producer(&producer_id).await);

        let err = f
            .producers
            .close_producer(&alice, &producer_id)
            .await
            .unwrap_err();
        assert!(err.is_not_found(NotFoundKind::Producer));
    }

    #[tokio::test]
    async fn closing_transport_drops_its_producers() {
        let f = fixture();
        let alice = PeerId::from("alice");
        let first = f.transports.create_transport(&alice).await.unwrap();
        let second = f.transports.create_transport(&alice).await.unwrap();
        let on_first = f
            .producers
            .create_producer(&alice, &first.id, MediaKind::Audio, opus())
            .await
            .unwrap();
        let on_second = f
            .producers
            .create_producer(&alice, &second.id, MediaKind::Audio, opus())
            .await
            .unwrap();

        f.transports
            .close_transport(&alice, &first.id)
            .await
            .unwrap();
        let remaining: Vec<String> = f
            .producers
            .list_producers(&alice)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(remaining, vec![on_second]);
        assert!(!f.engine.has_producer(&on_first).await);
    }

    #[tokio::test]
    async fn failed_closes_keep_producers_listed() {
        let engine = FaultyEngine::new();
        let registry = Arc::new(PeerRegistry::new());
        let transports = TransportCoordinator::new(
            registry.clone(),
            engine.clone(),
            WebRTCTransportConfig::default(),
        );
        let producers = ProducerCoordinator::new(registry.clone());
        let alice = PeerId::from("alice");
        let transport = transports.create_transport(&alice).await.unwrap();
        let producer_id = producers
            .create_producer(&alice, &transport.id, MediaKind::Audio, opus())
            .await
            .unwrap();
        engine.faults.fail_producer_close.store(true, Ordering::SeqCst);

        let err = producers
            .close_producer(&alice, &producer_id)
            .await
            .unwrap_err();
        assert!(err.is_engine_rejected());
        assert_eq!(producers.list_producers(&alice).await.unwrap().len(), 1);

        // The transport is not closed while one of its producers is still open.
        let err = transports
            .close_transport(&alice, &transport.id)
            .await
            .unwrap_err();
        assert!(err.is_engine_rejected());
        assert_eq!(producers.list_producers(&alice).await.unwrap().len(), 1);
        assert_eq!(engine.faults.open_transport_count(), 1);

        engine.faults.fail_producer_close.store(false, Ordering::SeqCst);
        transports
            .close_transport(&alice, &transport.id)
            .await
            .unwrap();
        assert!(producers.list_producers(&alice).await.unwrap().is_empty());
        assert_eq!(engine.faults.open_transport_count(), 0);
    }
}
