//! # capstan
//!
//! A priority-ordered job queue backed by a PostgreSQL table, for application
//! code that already owns a relational database. Durability, ordering, and
//! concurrency control are delegated to SQL: jobs are rows, leasing is a
//! `FOR UPDATE SKIP LOCKED` transaction, and parallel workers never hand the
//! same job out twice.
//!
//! Enqueue with [`Queue::add`]; attach [`Worker`]s that poll, lease, run a
//! processor with bounded retries, and finalise each job as `completed` or
//! `failed`. Both ends emit typed events (`activated`, `completed`, `failed`,
//! `waiting`, `error`) for observation.

// Modules stay private and the surface below is re-exported item by item, so
// internal layout can change without touching the public API.

// Types
mod types;
pub use types::Job;
pub use types::JobPayload;
pub use types::JobState;
pub use types::DEFAULT_PRIORITY;

// Errors
mod error;
// The error a processor's exhausted attempts are folded into
pub use error::MaxRetriesError;
// Errors about the queue itself - duplicate names, missing rows, postgres/network errors
pub use error::QueueError;

// Config
mod config;
pub use config::PoolConfig;
pub use config::QueueOptions;
pub use config::WorkerOptions;

// Persistence
mod client;
mod pool;
pub use client::Client;
pub use pool::Pool;

// Queue
mod queue;
pub use queue::Queue;

// Worker
mod worker;
pub use worker::Worker;

// Retry
mod retry;
pub use retry::retry;

// Events
mod events;
