#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Relaymesh
//! Relaymesh is the control plane of a WebRTC SFU. It keeps track of which peers are connected, which transports each peer
//! has opened and which producers are bound to those transports, and it tears all of that down in dependency order when a
//! peer leaves. Sockets, ICE/DTLS/SRTP and RTP forwarding belong to a media engine that is plugged in through
//! [`engine::MediaEngine`]. Signaling and the request API are left to the application.
//!
//! ## Usage
//! ```rust,ignore
//! let engine = Arc::new(LoopbackEngine::new(MediaConfig::default(), WorkerConfig::default()));
//! let relay = Relay::new(engine, WebRTCTransportConfig::default());
//! let transport = relay.create_transport(&PeerId::from("alice")).await?;
//! ```

/// Cleanup Protocol which tears down a peer's resources in dependency order.
pub mod cleanup;
/// Configuration for the media engine and the transports created through it.
pub mod config;
/// Consumer Coordinator.
pub mod consumer_coordinator;
/// Media engine contract and the handles it issues.
pub mod engine;
pub mod error;
/// Peer, transport and producer records.
pub mod peer;
/// Producer Coordinator.
pub mod producer_coordinator;
/// Peer Registry.
pub mod registry;
/// Relay wires one engine, one registry and the coordinators together.
pub mod relay;
pub mod rtp_parameters;
/// Transport Coordinator.
pub mod transport_coordinator;
