use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use super::{
    loopback::LoopbackEngine, ConsumerHandle, DTLSParameters, Handle, IceCandidate,
    IceParameters, MediaEngine, ProducerHandle, TransportHandle, TransportOptions,
};
use crate::{
    error::Error,
    rtp_parameters::{MediaKind, RtpCapabilities, RtpParameters},
};

/// Switches shared by a [`FaultyEngine`] and every handle it issued.
#[derive(Debug, Default)]
pub(crate) struct Faults {
    pub fail_producer_close: AtomicBool,
    pub fail_transport_close: AtomicBool,
    pub reject_transport: AtomicBool,
    pub create_delay_ms: AtomicU64,
    pub producer_close_attempts: AtomicUsize,
    pub transport_close_attempts: AtomicUsize,
    /// Transport ids created and not yet closed successfully.
    pub open_transports: Mutex<HashSet<String>>,
    /// Order in which close was attempted, as "producer:<id>" / "transport:<id>".
    pub close_order: Mutex<Vec<String>>,
}

impl Faults {
    pub fn close_attempts(&self) -> usize {
        self.producer_close_attempts.load(Ordering::SeqCst)
            + self.transport_close_attempts.load(Ordering::SeqCst)
    }

    pub fn open_transport_count(&self) -> usize {
        self.open_transports.lock().unwrap().len()
    }
}

/// Wraps [`LoopbackEngine`] and injects failures on demand.
#[derive(Debug)]
pub(crate) struct FaultyEngine {
    inner: LoopbackEngine,
    pub faults: Arc<Faults>,
}

impl FaultyEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: LoopbackEngine::default(),
            faults: Arc::new(Faults::default()),
        })
    }
}

#[async_trait]
impl MediaEngine for FaultyEngine {
    async fn create_transport(
        &self,
        options: TransportOptions,
    ) -> Result<Arc<dyn TransportHandle>, Error> {
        let delay = self.faults.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.faults.reject_transport.load(Ordering::SeqCst) {
            return Err(Error::new_engine("injected transport rejection".to_string()));
        }
        let inner = self.inner.create_transport(options).await?;
        self.faults
            .open_transports
            .lock()
            .unwrap()
            .insert(inner.id());
        Ok(Arc::new(FaultyTransport {
            inner,
            faults: self.faults.clone(),
        }))
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.inner.rtp_capabilities()
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[derive(Debug)]
struct FaultyTransport {
    inner: Arc<dyn TransportHandle>,
    faults: Arc<Faults>,
}

#[async_trait]
impl Handle for FaultyTransport {
    fn id(&self) -> String {
        self.inner.id()
    }

    fn closed(&self) -> bool {
        self.inner.closed()
    }

    async fn close(&self) -> Result<(), Error> {
        self.faults
            .transport_close_attempts
            .fetch_add(1, Ordering::SeqCst);
        self.faults
            .close_order
            .lock()
            .unwrap()
            .push(format!("transport:{}", self.inner.id()));
        if self.faults.fail_transport_close.load(Ordering::SeqCst) {
            return Err(Error::new_engine("injected transport close failure".to_string()));
        }
        self.inner.close().await?;
        self.faults
            .open_transports
            .lock()
            .unwrap()
            .remove(&self.inner.id());
        Ok(())
    }
}

#[async_trait]
impl TransportHandle for FaultyTransport {
    fn ice_parameters(&self) -> IceParameters {
        self.inner.ice_parameters()
    }

    fn ice_candidates(&self) -> Vec<IceCandidate> {
        self.inner.ice_candidates()
    }

    fn dtls_parameters(&self) -> DTLSParameters {
        self.inner.dtls_parameters()
    }

    async fn connect(&self, dtls_parameters: DTLSParameters) -> Result<(), Error> {
        self.inner.connect(dtls_parameters).await
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<dyn ProducerHandle>, Error> {
        let inner = self.inner.produce(kind, rtp_parameters).await?;
        Ok(Arc::new(FaultyProducer {
            inner,
            faults: self.faults.clone(),
        }))
    }

    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<Arc<dyn ConsumerHandle>, Error> {
        self.inner.consume(producer_id, rtp_capabilities).await
    }
}

#[derive(Debug)]
struct FaultyProducer {
    inner: Arc<dyn ProducerHandle>,
    faults: Arc<Faults>,
}

#[async_trait]
impl Handle for FaultyProducer {
    fn id(&self) -> String {
        self.inner.id()
    }

    fn closed(&self) -> bool {
        self.inner.closed()
    }

    async fn close(&self) -> Result<(), Error> {
        self.faults
            .producer_close_attempts
            .fetch_add(1, Ordering::SeqCst);
        self.faults
            .close_order
            .lock()
            .unwrap()
            .push(format!("producer:{}", self.inner.id()));
        if self.faults.fail_producer_close.load(Ordering::SeqCst) {
            return Err(Error::new_engine("injected producer close failure".to_string()));
        }
        self.inner.close().await
    }
}

impl ProducerHandle for FaultyProducer {
    fn kind(&self) -> MediaKind {
        self.inner.kind()
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.inner.rtp_parameters()
    }
}
