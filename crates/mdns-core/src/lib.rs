//! LAN discovery for shoot nodes over mDNS.

pub mod announce;
pub mod discover;
pub mod model;
pub mod net;

/// TXT key carrying the node's overlay id (hex).
pub const TXT_MID: &str = "mid";
/// TXT key carrying the node's instance identifier.
pub const TXT_INSTANCE: &str = "instance";
