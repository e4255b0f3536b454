use std::{fmt, sync::Arc};

use derivative::Derivative;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{
    engine::{DTLSParameters, IceCandidate, IceParameters, ProducerHandle, TransportHandle},
    error::Error,
    rtp_parameters::MediaKind,
};

/// Caller-supplied identifier of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Created,
    Connected,
    Closed,
}

/// A transport owned by exactly one peer.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct Transport {
    pub id: String,
    pub peer_id: PeerId,
    state: ConnectionState,
    #[derivative(Debug = "ignore")]
    handle: Arc<dyn TransportHandle>,
}

impl Transport {
    pub(crate) fn new(peer_id: PeerId, handle: Arc<dyn TransportHandle>) -> Self {
        Self {
            id: handle.id(),
            peer_id,
            state: ConnectionState::Created,
            handle,
        }
    }

    /// Current state. A handle the engine closed on its own reports `Closed`.
    pub fn connection_state(&self) -> ConnectionState {
        if self.handle.closed() {
            ConnectionState::Closed
        } else {
            self.state
        }
    }

    pub(crate) fn handle(&self) -> &Arc<dyn TransportHandle> {
        &self.handle
    }

    /// `Connected` is only reachable from `Created`. Returns whether the state changed.
    pub(crate) fn mark_connected(&mut self) -> bool {
        if self.state == ConnectionState::Created {
            self.state = ConnectionState::Connected;
            true
        } else {
            false
        }
    }

    pub fn descriptor(&self) -> TransportDescriptor {
        TransportDescriptor {
            id: self.id.clone(),
            ice_parameters: self.handle.ice_parameters(),
            ice_candidates: self.handle.ice_candidates(),
            dtls_parameters: self.handle.dtls_parameters(),
        }
    }
}

/// What a client needs to set up its side of a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportDescriptor {
    pub id: String,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DTLSParameters,
}

/// An inbound media stream owned by exactly one peer.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct Producer {
    pub id: String,
    pub kind: MediaKind,
    pub peer_id: PeerId,
    pub transport_id: String,
    #[derivative(Debug = "ignore")]
    handle: Arc<dyn ProducerHandle>,
}

impl Producer {
    pub(crate) fn new(
        peer_id: PeerId,
        transport_id: String,
        handle: Arc<dyn ProducerHandle>,
    ) -> Self {
        Self {
            id: handle.id(),
            kind: handle.kind(),
            peer_id,
            transport_id,
            handle,
        }
    }

    pub(crate) fn handle(&self) -> &Arc<dyn ProducerHandle> {
        &self.handle
    }

    pub fn closed(&self) -> bool {
        self.handle.closed()
    }

    pub fn info(&self) -> ProducerInfo {
        ProducerInfo {
            id: self.id.clone(),
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerInfo {
    pub id: String,
    pub kind: MediaKind,
}

/// One signaling session and the resources it owns. Both collections keep creation order.
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    transports: IndexMap<String, Transport>,
    producers: IndexMap<String, Producer>,
    // Set once the peer has left the registry; nothing may be attached afterwards.
    detached: bool,
}

impl Peer {
    pub(crate) fn new(id: PeerId) -> Self {
        Self {
            id,
            transports: IndexMap::new(),
            producers: IndexMap::new(),
            detached: false,
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn transports(&self) -> impl Iterator<Item = &Transport> {
        self.transports.values()
    }

    pub fn producers(&self) -> impl Iterator<Item = &Producer> {
        self.producers.values()
    }

    pub fn transport(&self, transport_id: &str) -> Option<&Transport> {
        self.transports.get(transport_id)
    }

    pub(crate) fn transport_mut(&mut self, transport_id: &str) -> Option<&mut Transport> {
        self.transports.get_mut(transport_id)
    }

    pub fn producer(&self, producer_id: &str) -> Option<&Producer> {
        self.producers.get(producer_id)
    }

    pub fn producer_infos(&self) -> Vec<ProducerInfo> {
        self.producers.values().map(Producer::info).collect()
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub(crate) fn detach(&mut self) {
        self.detached = true;
    }

    pub(crate) fn add_transport(&mut self, transport: Transport) -> Result<(), Error> {
        self.ensure_attached()?;
        if self.transports.contains_key(&transport.id) {
            return Err(Error::new_engine(format!(
                "Transport id {} is already in use",
                transport.id
            )));
        }
        self.transports.insert(transport.id.clone(), transport);
        Ok(())
    }

    pub(crate) fn add_producer(&mut self, producer: Producer) -> Result<(), Error> {
        self.ensure_attached()?;
        if !self.transports.contains_key(&producer.transport_id) {
            return Err(Error::transport_not_found(&producer.transport_id));
        }
        if self.producers.contains_key(&producer.id) {
            return Err(Error::new_engine(format!(
                "Producer id {} is already in use",
                producer.id
            )));
        }
        self.producers.insert(producer.id.clone(), producer);
        Ok(())
    }

    pub(crate) fn remove_transport(&mut self, transport_id: &str) -> Option<Transport> {
        self.transports.shift_remove(transport_id)
    }

    pub(crate) fn remove_producer(&mut self, producer_id: &str) -> Option<Producer> {
        self.producers.shift_remove(producer_id)
    }

    fn ensure_attached(&self) -> Result<(), Error> {
        if self.detached {
            return Err(Error::peer_not_found(self.id.as_str()));
        }
        Ok(())
    }
}
