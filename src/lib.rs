//! Tollgate - Fixed-Window Rate Limiting
//!
//! This crate implements a fixed-window rate limiter keyed by `(scope, identifier)`
//! with pluggable storage: a process-local map for single instances, or a
//! gossip-replicated store shared by a mesh of service nodes. A small gRPC
//! service exposes the limiter to request handlers written in other languages.

pub mod config;
pub mod error;
pub mod grpc;
pub mod mesh;
pub mod ratelimit;
