//! The self-describing, freely serialisable record a target hands back to
//! whoever wires up its initiators: an opaque fabric address, the remote
//! regions it registered, and a random endpoint identifier.
//!
//! Grounded on `Address.{hpp,cpp}` (the base64 fabric address codec) and
//! `RemoteRegion.hpp`'s `reflect-cpp` JSON mapping in `original_source`.
//! The wire schema is fixed by spec.md §6: a JSON object with exactly the
//! fields `fabricAddress`, `regions`, `identifier`, nothing else.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{FabricsError, Result};
use crate::remote_region::RemoteRegion;

/// An opaque, provider-specific endpoint address. The bytes are meaningless
/// outside this fabric's own address space; they exist only to be handed
/// to an [`crate::fabric::AddressVector`] on the initiator side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FabricAddress {
    bytes: Vec<u8>,
}

impl FabricAddress {
    /// Wrap raw address bytes, e.g. from [`crate::fabric::PassiveEndpoint::address`]
    /// or [`crate::fabric::Endpoint::address`] encoded little-endian.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The raw address bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Base64-encode the address bytes (standard alphabet, with padding),
    /// matching `FabricAddress::toBase64`.
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    /// Decode a base64-encoded address, matching `FabricAddress::fromBase64`.
    /// Fails with [`FabricsError::InvalidArg`] on malformed base64.
    pub fn from_base64(data: &str) -> Result<Self> {
        let bytes = BASE64.decode(data).map_err(|e| FabricsError::invalid_arg(format!("invalid base64 fabric address: {e}")))?;
        Ok(Self { bytes })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct FabricAddressWire {
    addr: String,
}

impl Serialize for FabricAddress {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        FabricAddressWire { addr: self.to_base64() }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FabricAddress {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = FabricAddressWire::deserialize(deserializer)?;
        FabricAddress::from_base64(&wire.addr).map_err(serde::de::Error::custom)
    }
}

/// The record a target publishes describing how to reach it: its fabric
/// address, the remote regions it registered, and a random 64-bit
/// endpoint identifier that lets a completion stream distinguish a
/// restarted peer from its previous incarnation (spec.md §9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetInfo {
    #[serde(rename = "fabricAddress")]
    fabric_address: FabricAddress,
    regions: Vec<RemoteRegion>,
    identifier: u64,
}

impl TargetInfo {
    /// Build a target info record.
    pub fn new(fabric_address: FabricAddress, regions: Vec<RemoteRegion>, identifier: u64) -> Self {
        Self { fabric_address, regions, identifier }
    }

    /// The target's opaque fabric address.
    pub fn fabric_address(&self) -> &FabricAddress {
        &self.fabric_address
    }

    /// The remote regions this target registered.
    pub fn regions(&self) -> &[RemoteRegion] {
        &self.regions
    }

    /// The target's random endpoint identifier.
    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    /// Serialise to the `{"fabricAddress":...,"regions":[...],"identifier":...}`
    /// JSON text format.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| FabricsError::internal(format!("failed to serialise TargetInfo: {e}")))
    }

    /// Parse the JSON text format. Fails with [`FabricsError::InvalidArg`]
    /// on any malformed or unrecognised field, per spec.md §6.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| FabricsError::invalid_arg(format!("malformed TargetInfo: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fabric_address_base64_round_trips() {
        let addr = FabricAddress::from_bytes(vec![2, 0, 35, 131, 127, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]);
        let encoded = addr.to_base64();
        assert_eq!(FabricAddress::from_base64(&encoded).unwrap(), addr);
    }

    #[test]
    fn target_info_round_trips_the_spec_literal() {
        let input = r#"{"fabricAddress":{"addr":"AgAjg38AAAEAAAAAAAAAAA=="},"regions":[{"addr":0,"len":2496512,"rkey":12490884954606633550},{"addr":0,"len":2496512,"rkey":8202674608102871622}],"identifier":1995225397354848055}"#;
        let parsed = TargetInfo::from_json(input).unwrap();
        assert_eq!(parsed.identifier(), 1995225397354848055);
        assert_eq!(parsed.regions().len(), 2);
        let round_tripped = parsed.to_json().unwrap();
        assert_eq!(round_tripped, input);
    }

    #[test]
    fn rejects_unknown_fields() {
        let input = r#"{"fabricAddress":{"addr":"AA=="},"regions":[],"identifier":1,"extra":true}"#;
        assert!(matches!(TargetInfo::from_json(input), Err(FabricsError::InvalidArg { .. })));
    }

    #[test]
    fn rejects_malformed_base64() {
        let input = r#"{"fabricAddress":{"addr":"not valid base64!!"},"regions":[],"identifier":1}"#;
        assert!(matches!(TargetInfo::from_json(input), Err(FabricsError::InvalidArg { .. })));
    }
}
