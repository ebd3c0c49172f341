// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # ltm-kernel
//!
//! Long-term declarative memory for a rule-based cognitive agent: persist
//! pieces of working memory as durable chunks and retrieve the best match
//! for a partial graph pattern (a cue).
//!
//! ## Architecture
//!
//! - **Symbols** (`symbol`, `wm`): reference-counted symbols and the
//!   working-memory graph the agent owns
//! - **Store** (`store`): redb tables, eager / lazy transaction manager
//! - **Hash cache** (`hash`): constants ↔ compact ids, invalidated per epoch
//! - **Registry** (`registry`): identifier names ↔ persistent ids, activation
//! - **Storage** (`storage`): replace-semantics chunk store with incremental
//!   selectivity counters
//! - **Retrieval** (`retrieval`): direct expansion and rarest-first cue query
//! - **Command protocol** (`command`): per-state `^ltm` headers driven once
//!   per cycle
//! - **Engine** (`engine`): the [`Ltm`](engine::Ltm) context tying it together
//!
//! ## Library usage
//!
//! ```no_run
//! use ltm_kernel::config::LtmConfig;
//! use ltm_kernel::engine::Ltm;
//! use ltm_kernel::storage::StoreMode;
//! use ltm_kernel::wm::WorkingMemory;
//!
//! let mut wm = WorkingMemory::new();
//! let mut ltm = Ltm::open(LtmConfig::default(), &mut wm).unwrap();
//!
//! let b = wm.new_identifier('B', 1);
//! let red = wm.symbols_mut().str("red");
//! wm.add_str_attr(&b, "color", &red);
//! ltm.store(&mut wm, &b, StoreMode::Single).unwrap();
//!
//! let cue = wm.new_identifier('Q', 1);
//! wm.add_str_attr(&cue, "color", &red);
//! let best = ltm.query(&wm, &cue, &[]).unwrap();
//! assert!(best.is_some());
//! ```

pub mod chunks;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod hash;
pub mod paths;
pub mod registry;
pub mod retrieval;
pub mod stats;
pub mod storage;
pub mod store;
pub mod symbol;
pub mod wm;
