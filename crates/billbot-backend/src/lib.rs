//! billbot-backend: client for the billing backend
//!
//! This crate provides the wire types exchanged with the billing server,
//! the hourly request token, and the [`Backend`] trait together with its
//! HTTP implementation.

pub mod client;
pub mod error;
pub mod token;
pub mod types;

pub use client::{Backend, BackendEndpoints, HttpBackend};
pub use error::{Error, FailureKind, Result};
pub use types::*;
