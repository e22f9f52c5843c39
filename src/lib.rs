//! # Node Sync Controller
//!
//! A Kubernetes controller that keeps Scaleway network resources in line with
//! the cluster nodes:
//!
//! 1. **Reserved IPs** - every node holds one flexible IP from a fixed pool
//! 2. **Reverse DNS** - node IPs resolve back to `<node>.<domain>`
//! 3. **Database ACLs** - managed databases accept connections from node IPs
//!
//! Node changes flow from a watch through a filter into a deduplicating,
//! rate-limited queue drained by a small worker pool. Every reconciliation
//! pass re-reads the current node state, so only the latest state matters.

pub mod config;
pub mod constants;
pub mod controller;
pub mod node;
pub mod observability;
pub mod provider;
pub mod runtime;
