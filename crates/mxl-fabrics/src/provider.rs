//! Fabric provider enumeration and string codec.
//!
//! Grounded on `providerFromAPI`/provider string handling in
//! `original_source/lib/fabrics/ofi/src/internal/Provider.{hpp,cpp}`.

use crate::error::{FabricsError, Result};

/// A fabric provider. `Auto` is resolved to a concrete provider by the
/// backend selecting it: TCP for the connection-oriented backend, SHM for
/// the connectionless backend.
///
/// `#[repr(C)]` so this can cross the C-style boundary (`crate::ffi`) by
/// value with a stable layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// Let the backend pick a sensible default.
    Auto,
    /// Plain TCP sockets.
    Tcp,
    /// InfiniBand/RoCE Verbs.
    Verbs,
    /// AWS Elastic Fabric Adapter.
    Efa,
    /// Shared memory (same-host only).
    Shm,
}

impl Provider {
    /// The provider preference order used when resolving [`Provider::Auto`]
    /// for a connection-oriented (reliable, connected) backend, or when a
    /// caller asks the fabric layer to discover any matching adapter.
    pub const PREFERENCE_ORDER: [Provider; 4] = [Provider::Efa, Provider::Verbs, Provider::Shm, Provider::Tcp];

    /// Resolve `Auto` for the connection-oriented backend.
    pub fn resolve_connection_oriented(self) -> Provider {
        match self {
            Provider::Auto => Provider::Tcp,
            other => other,
        }
    }

    /// Resolve `Auto` for the connectionless (reliable-datagram) backend.
    pub fn resolve_connectionless(self) -> Provider {
        match self {
            Provider::Auto => Provider::Shm,
            other => other,
        }
    }

    /// Render as the canonical lowercase string used on the wire and in
    /// the C-style boundary's `providerToString`.
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Auto => "auto",
            Provider::Tcp => "tcp",
            Provider::Verbs => "verbs",
            Provider::Efa => "efa",
            Provider::Shm => "shm",
        }
    }

    /// Parse a provider name, case-insensitively. Unknown names fail with
    /// [`FabricsError::InvalidArg`], matching `providerFromString`'s
    /// contract in spec.md §6.
    pub fn from_str_ci(s: &str) -> Result<Provider> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Provider::Auto),
            "tcp" => Ok(Provider::Tcp),
            "verbs" => Ok(Provider::Verbs),
            "efa" => Ok(Provider::Efa),
            "shm" => Ok(Provider::Shm),
            other => Err(FabricsError::invalid_arg(format!("unknown provider '{other}'"))),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_variants() {
        for p in [Provider::Auto, Provider::Tcp, Provider::Verbs, Provider::Efa, Provider::Shm] {
            assert_eq!(Provider::from_str_ci(p.as_str()).unwrap(), p);
        }
    }

    #[test]
    fn is_case_insensitive() {
        assert_eq!(Provider::from_str_ci("TCP").unwrap(), Provider::Tcp);
        assert_eq!(Provider::from_str_ci("ShM").unwrap(), Provider::Shm);
    }

    #[test]
    fn rejects_unknown_provider() {
        assert!(matches!(Provider::from_str_ci("quic"), Err(FabricsError::InvalidArg { .. })));
    }

    #[test]
    fn auto_resolves_per_backend() {
        assert_eq!(Provider::Auto.resolve_connection_oriented(), Provider::Tcp);
        assert_eq!(Provider::Auto.resolve_connectionless(), Provider::Shm);
        assert_eq!(Provider::Verbs.resolve_connection_oriented(), Provider::Verbs);
    }
}
