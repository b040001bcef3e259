pub mod client;
pub mod config;
pub mod coordinator;
pub mod mutation;
pub mod store;
pub mod transport;
pub mod types;

pub use client::{EditState, QueryClient};
pub use config::{init_tracing, ClientConfig};
pub use coordinator::QueryCoordinator;
pub use mutation::MutationRunner;
pub use store::{CacheStore, CacheUpdate, Watcher};
pub use transport::{ChannelTransport, RemoteTransport, TransportRequest};
pub use types::{
  CacheEntry, EntrySnapshot, EntryState, FetchError, MutationError, QueryKey, TransportError,
};
