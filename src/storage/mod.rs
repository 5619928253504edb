//! Storage Module
//!
//! The persisted state every other subsystem builds on.
//!
//! ## Core Concepts
//! - **Options**: `OptionStore` is a scoped key-value store holding build info and queue batches.
//!   Keys sharing a prefix can be listed oldest first.
//! - **Locks**: `NamedMutex` provides named advisory locks with a TTL, so a crashed holder
//!   never blocks progress for longer than the TTL.
//! - **Tables**: `IndexTables` is the repository behind the index. Every table exists once per
//!   `IndexRole`, and rows are keyed by entity id × language.

pub mod mutex;
pub mod options;
pub mod tables;
pub mod types;
