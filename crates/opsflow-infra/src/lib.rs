//! Infrastructure layer for Opsflow.
//!
//! Implementations of the ports defined in `opsflow-core`: the SQLite store
//! behind every repository trait, the JWE secret cipher, token hashing and
//! webhook signatures, the HTTP connector and LLM client, and the
//! configuration loader.

pub mod config;
pub mod connector;
pub mod crypto;
pub mod llm;
pub mod sqlite;
