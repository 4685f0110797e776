#![doc = include_str!("../README.md")]

pub mod envelope;

// Public re-export so downstream crates can reach the protocol types via
// `sluice_tonic_core::sluice`
pub use sluice;

/// Generated `sluice.Sluice` service and message definitions.
pub mod proto {
    tonic::include_proto!("sluice");

    /// Encoded descriptor set for `tonic-reflection`.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("sluice_descriptor");
}
