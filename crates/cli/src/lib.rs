//! SceneWire controller library: session discovery and a blocking
//! protocol client. The `swctl` binary is a thin layer over this.

pub mod exit_codes;
pub mod session;
