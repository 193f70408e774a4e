//! Pure domain services.

mod cache_policy;
mod host_policy;
mod key_transform;

pub use cache_policy::{CacheDecision, decide, needs_lookup};
pub use host_policy::HostPolicyStore;
pub use key_transform::{DEFAULT_MEMO_CAPACITY, KeyTransform, MAX_ENCODED_KEY_LEN, encode_key};
