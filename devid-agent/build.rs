//! Compiles the Workload API protobuf definition into Rust code, the same
//! `tonic_build` invocation pattern this workspace's sibling crates use for
//! any gRPC surface.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure().build_server(false).compile(&["proto/workload.proto"], &["proto"])?;
    Ok(())
}
