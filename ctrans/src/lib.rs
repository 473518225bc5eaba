//! Shared protocol definitions for the ctrans transfer system.
//!
//! This crate holds everything the client and server must agree on: the
//! JSON wire types, the fixed chunk geometry, and the hashing I/O
//! helpers used on both sides of the connection.

pub mod api;
pub mod chunking;
pub mod io;
