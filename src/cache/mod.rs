//! Response caching for resource reads.
//!
//! - Keys are a resource kind plus a normalized parameter set
//! - Entries live until cleared unless stored with a TTL
//! - Invalidation is explicit: everything, or every key of one kind
//! - Expired entries can still be served when the network is down

mod key;
mod layer;
mod store;

pub use key::CacheKey;
pub use layer::{CacheLayer, CacheResult, CacheSource};
pub use store::ResponseCache;
