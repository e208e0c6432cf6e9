//! Embedded Starlark interpreter: sessions, globals, and value wrappers.
//!
//! The interpreter side of the sandbox. Each session owns an isolated
//! module ([`session::Session`]); the capability surface is injected as
//! frozen globals ([`globals`]) backed by the value wrappers in
//! [`values`]. All enforcement happens below this layer, in
//! [`crate::capability`].

pub mod globals;
pub mod session;
pub mod values;

pub use session::{ExecutionResult, Session};
