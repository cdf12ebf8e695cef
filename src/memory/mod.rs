//! Long-term fact memory backed by the external memory service.
//!
//! The service stores free-text facts and answers similarity searches with
//! scored results. The client filters results below the relevance threshold
//! so callers only ever see facts worth injecting into a prompt. Memory is
//! optional: when no base URL is configured every lookup resolves empty.

pub mod client;

pub use client::{MemoryClient, RetrievedFact};
