/// Generates the gRPC client and server bindings for `proto/sluice.proto`.
///
/// The envelope `payload` field is generated as `bytes::Bytes` rather than
/// `Vec<u8>`, so encoded frames move from the encoder into the transport
/// without another copy.
///
/// A file descriptor set is written next to the generated code for the
/// reflection service:
///
/// ```rust
/// pub const FILE_DESCRIPTOR_SET: &[u8] =
///     tonic::include_file_descriptor_set!("sluice_descriptor");
/// ```
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("sluice_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    config
        .bytes([".sluice.Envelope.payload"])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/sluice.proto"], &["proto"])
        .unwrap();
}
