//! Coupon issuance core - a strictly limited coupon pool served to a very
//! large concurrent client population with an immediate PASS/FAIL answer.
//!
//! The hard part of the system is a tiny latency-critical path: an atomic
//! check-and-commit evaluated inside Redis, coupled to an asynchronous
//! durability pipeline over Kafka into Postgres. Everything else exists to
//! make that one step's outputs durable and observable.
//!
//! # Architecture
//!
//! ```text
//! Synchronous path:
//! ┌─────────┐    ┌───────────────┐    ┌──────────────────┐    ┌───────────┐
//! │ Request │───▶│   Issuance    │───▶│  Atomic decision │───▶│  Event    │
//! │         │    │   handler     │    │  (Redis script)  │    │  log      │
//! └─────────┘    └───────────────┘    └──────────────────┘    └─────┬─────┘
//!                        │ publish acked before PASS reaches        │
//!                        ▼ the client                               │
//!                   200 / 400 / 503                                 │
//!                                                                   ▼
//! Asynchronous path:                                         ┌───────────┐
//! ┌──────────────┐     idempotent writes                     │  Durable  │
//! │   Postgres   │◀───────────────────────────────────────── │  writer   │
//! └──────┬───────┘     (unique constraints absorb replays)   └───────────┘
//!        │
//!        ▼
//! ┌──────────────┐     compares Redis participant counts
//! │  Reconciler  │     against persisted issuance counts
//! └──────────────┘
//! ```
//!
//! # Invariants
//!
//! - Persisted issuances for an event never exceed its configured stock.
//! - A user holds at most one coupon per event, in memory and on disk.
//! - Every synchronous success has exactly one durable record, eventually.
//!
//! Redis is the sole authority for the *decision* (who wins); Postgres is
//! the sole authority for *history* (what happened); the Kafka log is the
//! reliable bridge between the two and retains no authority of its own.

#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod db;
pub mod dlq;
pub mod error;
pub mod issuance;
pub mod producer;
pub mod reconcile;
pub mod retry;
pub mod server;
pub mod store;
pub mod testing;
pub mod types;
pub mod writer;
