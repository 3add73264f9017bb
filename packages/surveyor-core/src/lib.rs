//! Surveyor Core Library
//!
//! Discovers SSH-reachable network devices in an address range and compiles
//! them into a vendor-aware automation inventory:
//! - Range expansion and bounded-concurrency probing (ping, then TCP connect)
//! - Device classification behind the [`Classifier`] trait
//! - A construct-then-freeze inventory tree with overlay groups
//! - YAML, JSON and INI encodings of that tree
//!
//! # Example
//!
//! ```no_run
//! use surveyor_core::{codec, Discovery, Encoding, SurveyConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> surveyor_core::Result<()> {
//!     let config = SurveyConfig::load(None)?;
//!     let report = Discovery::new(config).run("192.168.1.0/24").await?;
//!     println!("Found {} devices", report.classified);
//!
//!     codec::write_inventory(Path::new("inventory.yml"), &report.tree, Encoding::Yaml)?;
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod inventory;
pub mod scanner;

pub use inventory::codec;

// Re-export commonly used types
pub use classify::{
    Classification, Classifier, ConnectionProfile, CredentialRefs, DeviceClass, DeviceGroup,
    OctetRangeClassifier, SecretRef, Transport, Vendor,
};
pub use codec::Encoding;
pub use config::{ConfigSource, SurveyConfig};
pub use error::{Result, SurveyError};
pub use inventory::{
    DeviceRecord, GroupKind, InventoryBuilder, InventoryGroup, InventoryStats, InventoryTree,
};
pub use scanner::{
    Discovery, DiscoveryProgress, DiscoveryReport, DiscoveryStage, Disposition, Probe,
    ProbeOutcome, ProbePhase, ProgressCallback,
};
