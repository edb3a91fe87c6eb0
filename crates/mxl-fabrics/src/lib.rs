#![warn(missing_docs)]

//! MXL fabrics subsystem: one-sided RMA data transport between a
//! [`target::Target`] and an [`initiator::Initiator`] over a reliable
//! connection-oriented or connectionless reliable-datagram backend.
//!
//! This crate is the data-transport core of the media-exchange layer: it
//! moves time-aligned media payloads (video grains, continuous audio sample
//! windows) between producing and consuming processes, on the same host or
//! across a network, via remote-memory-write transfers tagged with 32-bit
//! immediate data. The flow file layout, directory watcher, CLI tools and
//! NMOS/JSON flow descriptor parsing that sit around this core in the wider
//! media-exchange layer are out of scope here.

pub mod bounce;
pub mod error;
pub mod fabric;
pub mod ffi;
pub mod immdata;
pub mod initiator;
pub mod local_region;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod provider;
pub mod region;
pub mod remote_region;
pub mod slice;
pub mod target;
pub mod target_info;

pub use error::{FabricsError, Result};
pub use initiator::{Initiator, InitiatorConfig};
pub use provider::Provider;
pub use target::{Target, TargetConfig};
pub use target_info::TargetInfo;
