//! Outgoing connections to a master image server: dialing, the RPC
//! client stubs, and the replicator that drives them (C5/C6/C7).

pub mod connection;
pub mod image_client;
pub mod pull;
