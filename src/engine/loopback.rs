use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;
use webrtc::ice_transport::{
    ice_candidate_type::RTCIceCandidateType, ice_protocol::RTCIceProtocol,
};

use super::{
    ConsumerHandle, DTLSParameters, DTLSRole, DtlsFingerprint, Handle, IceCandidate,
    IceParameters, MediaEngine, ProducerHandle, TransportHandle, TransportOptions,
};
use crate::{
    config::{MediaConfig, WorkerConfig},
    error::{ClosedKind, Error},
    peer::PeerId,
    rtp_parameters::{MediaKind, RtpCapabilities, RtpParameters},
};

const UDP_PREFERRED_PRIORITY: u32 = 1076302079;
const TCP_PREFERRED_PRIORITY: u32 = 1076276479;

/// A media engine that keeps every resource in memory.
///
/// It allocates ports from the configured range without binding them, validates DTLS parameters,
/// negotiated codecs and producer ids the way a real engine does, and never moves any packet.
#[derive(Debug, Clone)]
pub struct LoopbackEngine {
    state: Arc<EngineState>,
}

#[derive(Debug)]
struct EngineState {
    capabilities: RtpCapabilities,
    min_port: u16,
    port_span: u32,
    next_port: AtomicU32,
    producers: Mutex<HashMap<String, Arc<LoopbackProducer>>>,
    closed: AtomicBool,
}

impl LoopbackEngine {
    pub fn new(media_config: MediaConfig, worker_config: WorkerConfig) -> Self {
        let min_port = worker_config.rtc_min_port.min(worker_config.rtc_max_port);
        let max_port = worker_config.rtc_min_port.max(worker_config.rtc_max_port);
        let state = EngineState {
            capabilities: media_config.rtp_capabilities(),
            min_port,
            port_span: u32::from(max_port - min_port) + 1,
            next_port: AtomicU32::new(0),
            producers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        };
        tracing::debug!(
            "LoopbackEngine is created, ports={}-{}",
            min_port,
            max_port
        );
        Self {
            state: Arc::new(state),
        }
    }

    /// Whether a producer with this id is currently open in the engine.
    pub async fn has_producer(&self, producer_id: &str) -> bool {
        self.state.producers.lock().await.contains_key(producer_id)
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new(MediaConfig::default(), WorkerConfig::default())
    }
}

impl EngineState {
    fn allocate_port(&self) -> u16 {
        let offset = self.next_port.fetch_add(1, Ordering::Relaxed) % self.port_span;
        // offset < port_span <= u16::MAX + 1, so the sum stays in range.
        (u32::from(self.min_port) + offset) as u16
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    async fn create_transport(
        &self,
        options: TransportOptions,
    ) -> Result<Arc<dyn TransportHandle>, Error> {
        let transport = self.new_transport(options)?;
        Ok(transport)
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.state.capabilities.clone()
    }

    async fn close(&self) {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let producers: Vec<Arc<LoopbackProducer>> = {
            let mut producers = self.state.producers.lock().await;
            producers.drain().map(|(_, p)| p).collect()
        };
        for producer in producers {
            producer.closed.store(true, Ordering::Release);
        }
        tracing::debug!("LoopbackEngine is closed");
    }
}

impl LoopbackEngine {
    fn new_transport(&self, options: TransportOptions) -> Result<Arc<LoopbackTransport>, Error> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(Error::new_engine("Worker closed".to_string()));
        }
        if !options.enable_udp && !options.enable_tcp {
            return Err(Error::new_engine(
                "At least one of enable_udp and enable_tcp must be true".to_string(),
            ));
        }
        if options.candidate_ips().is_empty() {
            return Err(Error::new_engine("No listen address given".to_string()));
        }

        let port = self.state.allocate_port();
        let ice_candidates = ice_candidates(&options, port);
        let transport = LoopbackTransport {
            id: Uuid::new_v4().to_string(),
            peer_id: options.peer_id,
            ice_parameters: IceParameters {
                username_fragment: Uuid::new_v4().simple().to_string()[..16].to_string(),
                password: Uuid::new_v4().simple().to_string(),
                ice_lite: true,
            },
            ice_candidates,
            dtls_parameters: DTLSParameters {
                role: DTLSRole::Auto,
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: fingerprint(),
                }],
            },
            engine: self.state.clone(),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            next_mid: AtomicU32::new(0),
        };
        tracing::debug!(
            "LoopbackTransport {} is created for peer {}, port={}",
            transport.id,
            transport.peer_id,
            port
        );
        Ok(Arc::new(transport))
    }
}

fn ice_candidates(options: &TransportOptions, port: u16) -> Vec<IceCandidate> {
    let (udp_priority, tcp_priority) = if options.prefer_udp {
        (UDP_PREFERRED_PRIORITY, TCP_PREFERRED_PRIORITY)
    } else {
        (TCP_PREFERRED_PRIORITY, UDP_PREFERRED_PRIORITY)
    };
    let mut candidates = Vec::new();
    for ip in options.candidate_ips() {
        if options.enable_udp {
            candidates.push(IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: udp_priority,
                address: ip.to_string(),
                protocol: RTCIceProtocol::Udp,
                port,
                typ: RTCIceCandidateType::Host,
                component: 1,
                ..Default::default()
            });
        }
        if options.enable_tcp {
            candidates.push(IceCandidate {
                foundation: "tcpcandidate".to_string(),
                priority: tcp_priority,
                address: ip.to_string(),
                protocol: RTCIceProtocol::Tcp,
                port,
                typ: RTCIceCandidateType::Host,
                component: 1,
                tcp_type: "passive".to_string(),
                ..Default::default()
            });
        }
    }
    candidates
}

fn fingerprint() -> String {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<String>>()
        .join(":")
}

#[derive(Debug)]
struct LoopbackTransport {
    id: String,
    peer_id: PeerId,
    ice_parameters: IceParameters,
    ice_candidates: Vec<IceCandidate>,
    dtls_parameters: DTLSParameters,
    engine: Arc<EngineState>,
    connected: AtomicBool,
    closed: AtomicBool,
    // Open producers and consumers only; closed ones are pruned on the next insertion.
    producers: Mutex<Vec<Arc<LoopbackProducer>>>,
    consumers: Mutex<Vec<Arc<LoopbackConsumer>>>,
    next_mid: AtomicU32,
}

impl LoopbackTransport {
    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed() {
            return Err(Error::new_already_closed(
                format!("Transport {} is closed", self.id),
                ClosedKind::Transport,
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Handle for LoopbackTransport {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.engine.closed.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let producers: Vec<Arc<LoopbackProducer>> =
            self.producers.lock().await.drain(..).collect();
        for producer in producers {
            producer.close().await?;
        }
        for consumer in self.consumers.lock().await.drain(..) {
            consumer.closed.store(true, Ordering::Release);
        }
        tracing::debug!("LoopbackTransport {} is closed", self.id);
        Ok(())
    }
}

#[async_trait]
impl TransportHandle for LoopbackTransport {
    fn ice_parameters(&self) -> IceParameters {
        self.ice_parameters.clone()
    }

    fn ice_candidates(&self) -> Vec<IceCandidate> {
        self.ice_candidates.clone()
    }

    fn dtls_parameters(&self) -> DTLSParameters {
        self.dtls_parameters.clone()
    }

    async fn connect(&self, dtls_parameters: DTLSParameters) -> Result<(), Error> {
        self.ensure_open()?;
        if dtls_parameters.fingerprints.is_empty() {
            return Err(Error::new_engine(
                "DTLS parameters contain no fingerprint".to_string(),
            ));
        }
        if dtls_parameters
            .fingerprints
            .iter()
            .any(|f| f.algorithm.is_empty() || f.value.is_empty())
        {
            return Err(Error::new_engine("Invalid DTLS fingerprint".to_string()));
        }
        if self.connected.swap(true, Ordering::AcqRel) {
            return Err(Error::new_engine(format!(
                "connect() already called on transport {}",
                self.id
            )));
        }
        tracing::debug!(
            "LoopbackTransport {} is connected, remote role={:?}",
            self.id,
            dtls_parameters.role
        );
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<dyn ProducerHandle>, Error> {
        self.ensure_open()?;
        if rtp_parameters.codecs.is_empty() {
            return Err(Error::new_engine(
                "RTP parameters contain no codec".to_string(),
            ));
        }
        for codec in rtp_parameters.codecs.iter() {
            match self.engine.capabilities.find(codec) {
                Some(capability) if capability.kind == kind => {}
                Some(_) => {
                    return Err(Error::new_engine(format!(
                        "Codec {} does not carry {} media",
                        codec.mime_type, kind
                    )));
                }
                None => {
                    return Err(Error::new_engine(format!(
                        "Unsupported codec {}/{}",
                        codec.mime_type, codec.clock_rate
                    )));
                }
            }
        }

        let producer = Arc::new(LoopbackProducer {
            id: Uuid::new_v4().to_string(),
            kind,
            rtp_parameters,
            engine: self.engine.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        });
        self.engine
            .producers
            .lock()
            .await
            .insert(producer.id.clone(), producer.clone());
        let mut producers = self.producers.lock().await;
        producers.retain(|p| !p.closed());
        producers.push(producer.clone());
        tracing::debug!(
            "LoopbackProducer {} is created on transport {}, kind={}",
            producer.id,
            self.id,
            kind
        );
        Ok(producer)
    }

    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<Arc<dyn ConsumerHandle>, Error> {
        self.ensure_open()?;
        let producer = self
            .engine
            .producers
            .lock()
            .await
            .get(producer_id)
            .cloned()
            .ok_or_else(|| {
                Error::new_engine(format!("Producer with id \"{}\" not found", producer_id))
            })?;

        let codecs: Vec<_> = producer
            .rtp_parameters
            .codecs
            .iter()
            .filter(|codec| rtp_capabilities.find(codec).is_some())
            .cloned()
            .collect();
        if codecs.is_empty() {
            return Err(Error::new_engine(format!(
                "Cannot consume producer {} with the given RTP capabilities",
                producer_id
            )));
        }

        let mut consumers = self.consumers.lock().await;
        consumers.retain(|c| !c.closed());
        let ssrc = (Uuid::new_v4().as_u128() & u128::from(u32::MAX)) as u32;
        let consumer = Arc::new(LoopbackConsumer {
            id: Uuid::new_v4().to_string(),
            producer_id: producer.id.clone(),
            kind: producer.kind,
            rtp_parameters: RtpParameters {
                mid: Some(self.next_mid.fetch_add(1, Ordering::Relaxed).to_string()),
                codecs,
                encodings: vec![crate::rtp_parameters::RtpEncodingParameters {
                    ssrc: Some(ssrc),
                    rid: None,
                }],
            },
            closed: AtomicBool::new(false),
            producer_closed: producer.closed.clone(),
        });
        consumers.push(consumer.clone());
        tracing::debug!(
            "LoopbackConsumer {} is created on transport {} for producer {}",
            consumer.id,
            self.id,
            producer_id
        );
        Ok(consumer)
    }
}

#[derive(Debug)]
struct LoopbackProducer {
    id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    engine: Arc<EngineState>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Handle for LoopbackProducer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.engine.producers.lock().await.remove(&self.id);
        tracing::debug!("LoopbackProducer {} is closed", self.id);
        Ok(())
    }
}

impl ProducerHandle for LoopbackProducer {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }
}

#[derive(Debug)]
struct LoopbackConsumer {
    id: String,
    producer_id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    closed: AtomicBool,
    producer_closed: Arc<AtomicBool>,
}

#[async_trait]
impl Handle for LoopbackConsumer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.producer_closed.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl ConsumerHandle for LoopbackConsumer {
    fn producer_id(&self) -> String {
        self.producer_id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }
}
