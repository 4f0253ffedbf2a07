//! # SmartStash
//!
//! An embedded, single-process key-value storage engine with:
//! - A write-ahead log of CRC-checked chunks in fixed 32 KiB blocks
//! - One in-memory sorted index per generation (memtable)
//! - Atomic multi-key batches that survive crashes all-or-nothing
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Db (FLOCK, RwLock)                      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ pooled Batch: put / delete / get / commit
//!                       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          MemTable generations (newest = active)              │
//! │   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐     │
//! │   │  gen 1 (ro)  │   │  gen 2 (ro)  │   │ gen 3 active │     │
//! │   └──────┬───────┘   └──────┬───────┘   └──────┬───────┘     │
//! └──────────┼──────────────────┼──────────────────┼────────────┘
//!            ▼                  ▼                  ▼
//!   ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//!   │ Tiny WAL .SEG.1 │ │ Tiny WAL .SEG.2 │ │ Tiny WAL .SEG.3 │
//!   │ sealed + active │ │ sealed + active │ │ sealed + active │
//!   │    segments     │ │    segments     │ │    segments     │
//!   └─────────────────┘ └─────────────────┘ └─────────────────┘
//! ```
//!
//! A commit logs the whole batch plus a BatchEnd record to the active
//! generation's WAL, then applies it to the index. Opening the database
//! replays every WAL and only makes batches with a BatchEnd visible.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod cache;
pub mod pool;
pub mod wal;
pub mod memtable;
pub mod batch;
pub mod id;
pub mod flock;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StashError};
pub use config::{BatchOptions, Config, WalSyncStrategy, WriteOptions};
pub use batch::Batch;
pub use engine::{Db, DbStats};
pub use id::{IdGenerator, PersistentIdGenerator, SequenceGenerator};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of SmartStash
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
