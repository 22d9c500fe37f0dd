//! Daemon-side pieces of worksync: the peer transport, the discovery
//! timer, and the connectivity probe. The binary wires these around the
//! service layer from `worksync-core`.

pub mod discovery;
pub mod peer;
pub mod probe;
