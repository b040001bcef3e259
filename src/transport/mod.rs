use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::types::{QueryKey, TransportError};

/// Remote side of the protocol. Implementations bridge to an actual network
/// layer; both operations must be safely abandonable mid-call without
/// corrupting remote state.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
  /// Fetch the current server value for a key.
  async fn fetch(&self, key: &QueryKey) -> Result<serde_json::Value, TransportError>;

  /// Write a new value for a key, returning the server's committed value.
  async fn write(
    &self,
    key: &QueryKey,
    value: serde_json::Value,
  ) -> Result<serde_json::Value, TransportError>;
}

/// One request forwarded to the task backing a `ChannelTransport`. The
/// backing task answers through the `reply` sender; dropping it surfaces a
/// closed-transport error to the caller.
#[derive(Debug)]
pub enum TransportRequest {
  Fetch {
    key: QueryKey,
    reply: oneshot::Sender<Result<serde_json::Value, TransportError>>,
  },
  Write {
    key: QueryKey,
    value: serde_json::Value,
    reply: oneshot::Sender<Result<serde_json::Value, TransportError>>,
  },
}

impl TransportRequest {
  pub fn key(&self) -> &QueryKey {
    match self {
      Self::Fetch { key, .. } | Self::Write { key, .. } => key,
    }
  }
}

/// In-process transport backed by a request channel. Embedders (and the
/// test suite) receive `TransportRequest`s on the paired receiver and reply
/// at their own pace, which also models hung or failing remotes.
pub struct ChannelTransport {
  tx: mpsc::UnboundedSender<TransportRequest>,
}

impl ChannelTransport {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportRequest>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }

  fn send(&self, request: TransportRequest) -> Result<(), TransportError> {
    self
      .tx
      .send(request)
      .map_err(|_| TransportError::new("transport closed"))
  }
}

#[async_trait]
impl RemoteTransport for ChannelTransport {
  async fn fetch(&self, key: &QueryKey) -> Result<serde_json::Value, TransportError> {
    let (reply, rx) = oneshot::channel();
    self.send(TransportRequest::Fetch {
      key: key.clone(),
      reply,
    })?;
    rx.await.map_err(|_| TransportError::new("transport closed"))?
  }

  async fn write(
    &self,
    key: &QueryKey,
    value: serde_json::Value,
  ) -> Result<serde_json::Value, TransportError> {
    let (reply, rx) = oneshot::channel();
    self.send(TransportRequest::Write {
      key: key.clone(),
      value,
      reply,
    })?;
    rx.await.map_err(|_| TransportError::new("transport closed"))?
  }
}
