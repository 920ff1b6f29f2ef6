//! Specialist agents.
//!
//! The reasoning backend, the repository tools it may call, the invoker that
//! adapts its raw output, and the built-in specialist catalog.

pub mod backend;
pub mod invoker;
pub mod specialists;
pub mod tools;

pub use backend::{BackendConfig, HttpBackend, ReasoningBackend, SpecialistRequest};
pub use invoker::{RetryPolicy, SpecialistInvoker};
pub use specialists::ModelSelection;
