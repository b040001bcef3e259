mod entry;
mod error;
mod key;

pub use entry::{CacheEntry, EntrySnapshot, EntryState};
pub use error::{FetchError, MutationError, TransportError};
pub use key::QueryKey;
