//! Source-to-source instantiation of generic Rust template packages.
//!
//! A template package is a directory of ordinary, non-generic Rust files in which some types
//! stand in for type variables. Requests bind those typevars to concrete types; the session
//! propagates the bindings to every dependent type and prints renamed, specialized copies of
//! the types, their constructors and their impl blocks.

pub mod bindings;
pub mod diagnostics;
pub mod frontend;
pub mod imports;
pub mod mangle;
pub mod manifest;
pub mod model;
pub mod print;
pub mod report;
pub mod session;

mod classify;
mod register;
mod resolve;
mod util;
mod walk;

pub use bindings::{BindingCache, Bindings, TypeArgs};
pub use diagnostics::{Diagnostic, DiagnosticCode, Phase};
pub use session::{generate, prepare, Session};
