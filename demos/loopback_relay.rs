use std::collections::BTreeMap;
use std::sync::Arc;

use relaymesh::config::{MediaConfig, WebRTCTransportConfig, WorkerConfig};
use relaymesh::engine::loopback::LoopbackEngine;
use relaymesh::engine::{DTLSParameters, DTLSRole, DtlsFingerprint};
use relaymesh::error::Error;
use relaymesh::peer::PeerId;
use relaymesh::relay::Relay;
use relaymesh::rtp_parameters::{MediaKind, RtpCodecParameters, RtpParameters};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let engine = LoopbackEngine::new(MediaConfig::default(), WorkerConfig::default());
    let relay = Relay::new(Arc::new(engine), WebRTCTransportConfig::default());

    let alice = PeerId::from("alice");
    let bob = PeerId::from("bob");

    let send_transport = relay.create_transport(&alice).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&send_transport).expect("descriptor is serializable")
    );
    let dtls = DTLSParameters {
        role: DTLSRole::Client,
        fingerprints: vec![DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value: "D2:FA:0E:C3:22:59:5E:14:95:69:92:3D:13:B4:84:24".to_string(),
        }],
    };
    relay
        .connect_transport(&alice, &send_transport.id, dtls)
        .await?;

    let audio = RtpParameters {
        mid: Some("0".to_string()),
        codecs: vec![RtpCodecParameters {
            mime_type: "audio/opus".to_string(),
            payload_type: 111,
            clock_rate: 48000,
            channels: Some(2),
            parameters: BTreeMap::new(),
        }],
        encodings: vec![],
    };
    let producer_id = relay
        .create_producer(&alice, &send_transport.id, MediaKind::Audio, audio)
        .await?;
    tracing::info!("alice publishes {:?}", relay.peer_producers(&alice).await);

    let recv_transport = relay.create_transport(&bob).await?;
    let consumer = relay
        .create_consumer(&bob, &recv_transport.id, &producer_id, MediaKind::Audio)
        .await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&consumer).expect("descriptor is serializable")
    );

    let report = relay.cleanup_peer(&alice).await;
    tracing::info!(
        "alice left, {} close attempts, {} failures",
        report.close_attempts(),
        report.close_failures()
    );

    relay.close().await;
    Ok(())
}
