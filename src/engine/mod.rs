use std::{fmt, net::IpAddr, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use webrtc::dtls_transport::{
    dtls_fingerprint::RTCDtlsFingerprint as DtlsFingerprint, dtls_parameters::DTLSParameters,
    dtls_role::DTLSRole,
};
pub use webrtc::ice_transport::{
    ice_candidate::RTCIceCandidate as IceCandidate,
    ice_parameters::RTCIceParameters as IceParameters,
};

use crate::{
    config::WebRTCTransportConfig,
    error::Error,
    peer::PeerId,
    rtp_parameters::{MediaKind, RtpCapabilities, RtpParameters},
};

/// In-process reference engine.
pub mod loopback;
#[cfg(test)]
pub(crate) mod testing;

/// A resource issued by the media engine. Only the identifier and the close operation are visible to the coordination layer.
///
/// Dropping a handle does not close the underlying resource; only [`Handle::close`] does.
#[async_trait]
pub trait Handle: Send + Sync + fmt::Debug {
    fn id(&self) -> String;
    /// Whether the engine has already closed this resource.
    fn closed(&self) -> bool;
    /// Closes the resource. Closing an already closed resource succeeds.
    async fn close(&self) -> Result<(), Error>;
}

/// A network-facing transport created by [`MediaEngine::create_transport`].
#[async_trait]
pub trait TransportHandle: Handle {
    fn ice_parameters(&self) -> IceParameters;
    fn ice_candidates(&self) -> Vec<IceCandidate>;
    fn dtls_parameters(&self) -> DTLSParameters;
    /// Runs the DTLS handshake with the remote parameters.
    async fn connect(&self, dtls_parameters: DTLSParameters) -> Result<(), Error>;
    /// Starts accepting inbound media of `kind` on this transport.
    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<dyn ProducerHandle>, Error>;
    /// Starts relaying the media of `producer_id` to this transport.
    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<Arc<dyn ConsumerHandle>, Error>;
}

pub trait ProducerHandle: Handle {
    fn kind(&self) -> MediaKind;
    fn rtp_parameters(&self) -> RtpParameters;
}

pub trait ConsumerHandle: Handle {
    fn producer_id(&self) -> String;
    fn kind(&self) -> MediaKind;
    fn rtp_parameters(&self) -> RtpParameters;
}

/// The media engine that owns sockets, ICE/DTLS/SRTP and RTP forwarding.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_transport(
        &self,
        options: TransportOptions,
    ) -> Result<Arc<dyn TransportHandle>, Error>;
    /// Codecs and parameters the relay supports.
    fn rtp_capabilities(&self) -> RtpCapabilities;
    /// Stops the engine. Resources still open are closed by the engine itself.
    async fn close(&self);
}

/// Creation policy handed to the engine for a single transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportOptions {
    pub peer_id: PeerId,
    pub listen_ips: Vec<IpAddr>,
    pub announced_ips: Vec<IpAddr>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
}

impl TransportOptions {
    pub fn new(peer_id: PeerId, config: &WebRTCTransportConfig) -> Self {
        Self {
            peer_id,
            listen_ips: config.listen_ips.clone(),
            announced_ips: config.announced_ips.clone(),
            enable_udp: config.enable_udp,
            enable_tcp: config.enable_tcp,
            prefer_udp: config.prefer_udp,
        }
    }

    /// Addresses that go into ICE candidates.
    pub fn candidate_ips(&self) -> &[IpAddr] {
        if self.announced_ips.is_empty() {
            &self.listen_ips
        } else {
            &self.announced_ips
        }
    }
}
