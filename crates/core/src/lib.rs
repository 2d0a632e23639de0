//! Core types shared across the Basalt engine.
//!
//! This crate defines the data model (values, columns, result sets), the
//! AST contract consumed by the planner, the error taxonomy, and the
//! storage adapter traits that decouple the engine from the key-value
//! backend.
//!
//! Everything here is dependency-light by design: every other crate in the
//! workspace depends on `basalt-core`, so it must not pull in the heavier
//! machinery (WAL, planner, kernels) that lives upstream.

pub mod ast;
pub mod column;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use value::{DataType, Value};
