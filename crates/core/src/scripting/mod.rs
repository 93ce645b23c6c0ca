//! External process execution.
//!
//! The inference engine and any other opaque tool are driven through
//! [`subprocess::run_command`], which owns spawn, output capture and the
//! optional wall-clock limit.

pub mod subprocess;

pub use subprocess::{run_command, ProcessError, ProcessInput, ProcessOutput};
