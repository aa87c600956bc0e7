//! Cluster access and the Calrissian job runners built on it

pub mod cluster;
pub mod runners;
