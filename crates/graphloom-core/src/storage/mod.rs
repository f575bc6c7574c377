//! # Storage Module
//!
//! Disk-backed `GraphStore` implementations.

pub mod redb_store;

pub use redb_store::RedbStore;
