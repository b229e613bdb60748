//! Message bus publish interface.
//!
//! The real transport (shared memory, sockets, whatever the consuming UI
//! uses) is out of scope; this module only decides, per event, whether it
//! would be published at all, honoring the `ALLOW`/`BLOCK` env-var
//! conventions this family of tools uses to restrict replay traffic.

use std::collections::HashSet;
use std::env;

use crate::types::MessageKind;

/// Socket-name allow/block list. An empty `allow` means "no restriction";
/// a non-empty `allow` means only those sockets pass, `block` always wins.
#[derive(Debug, Clone, Default)]
pub struct BusFilter {
    allow: HashSet<String>,
    block: HashSet<String>,
}

impl BusFilter {
    pub fn new(allow: impl IntoIterator<Item = String>, block: impl IntoIterator<Item = String>) -> BusFilter {
        BusFilter { allow: allow.into_iter().collect(), block: block.into_iter().collect() }
    }

    /// Reads `ALLOW`/`BLOCK` as comma-separated socket name lists, matching
    /// the env-var convention this family of tools uses.
    pub fn from_env() -> BusFilter {
        let split = |var: &str| -> HashSet<String> {
            env::var(var)
                .ok()
                .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
                .unwrap_or_default()
        };
        BusFilter::new(split("ALLOW"), split("BLOCK"))
    }

    /// Whether a message of this kind should be published. Kinds with no
    /// socket name (e.g. `InitData`, `Sentinel`, the encode-index kinds)
    /// are never published on the bus; they only drive internal state.
    pub fn allows(&self, kind: MessageKind) -> bool {
        let Some(socket) = kind.socket_name() else { return false };
        if self.block.contains(socket) {
            return false;
        }
        self.allow.is_empty() || self.allow.contains(socket)
    }
}
