//! Image server replication engine.
//!
//! This crate keeps a follower image server continuously synchronized with
//! a master image server over a long-lived streaming connection. It owns
//! a content-addressed object store beneath a directory-structured image
//! namespace, copes with disk-pressure failures by evicting unreferenced
//! objects, and reconciles missing images at reconnect time. A companion
//! add-image path cooperates with the replicator (via an in-flight
//! injection registry) to avoid double-fetching images that are
//! simultaneously being pushed by a master.

pub mod api2;
pub mod backup;
pub mod client;
pub mod config;
pub mod server;
pub mod tools;
pub mod wire;
