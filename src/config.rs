use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};

use crate::rtp_parameters::{MediaKind, RtpCapabilities, RtpCodecCapability};

/// Codecs accepted by the relay. This becomes the global capability set every consumer is created against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub codecs: Vec<RtpCodecCapability>,
}

impl MediaConfig {
    pub fn rtp_capabilities(&self) -> RtpCapabilities {
        RtpCapabilities {
            codecs: self.codecs.clone(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            codecs: vec![
                RtpCodecCapability {
                    kind: MediaKind::Audio,
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: Some(2),
                    parameters: Default::default(),
                    preferred_payload_type: Some(111),
                },
                RtpCodecCapability {
                    kind: MediaKind::Video,
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    channels: None,
                    parameters: Default::default(),
                    preferred_payload_type: Some(96),
                },
            ],
        }
    }
}

/// Policy every transport is created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRTCTransportConfig {
    /// Local addresses the engine binds to.
    pub listen_ips: Vec<IpAddr>,
    /// Addresses advertised in ICE candidates. When empty, `listen_ips` are announced as-is.
    pub announced_ips: Vec<IpAddr>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
}

impl Default for WebRTCTransportConfig {
    fn default() -> Self {
        Self {
            listen_ips: vec![IpAddr::V4(Ipv4Addr::UNSPECIFIED)],
            announced_ips: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
        }
    }
}

/// Settings for the media engine process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            rtc_min_port: 40000,
            rtc_max_port: 49999,
        }
    }
}
