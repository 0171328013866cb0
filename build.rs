//! Build script for Strata.
//!
//! There is nothing to generate. The broker protocol is a dozen fixed
//! messages, so the wire types live as hand-written prost structs in
//! src/proto/ and the crate builds with no protoc toolchain or vendored
//! generated code. If the protocol ever needs to be shared with
//! non-Rust clients, this is where tonic-build would compile a proto/
//! directory instead.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
}
