//! HTTP plumbing against the origin server: HEAD probing, ranged GETs, and
//! `.netrc` credential lookup. All requests go through libcurl `Easy`
//! handles and are blocking; call from `spawn_blocking` in async code.

mod fetch_range;
mod netrc;
mod probe;

pub use fetch_range::fetch_range;
pub use netrc::{lookup_credentials, Credentials};
pub use probe::probe_origin;
