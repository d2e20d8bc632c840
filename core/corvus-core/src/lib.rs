//! # Corvus Core
//!
//! Columnar data model for the Corvus SPARQL engine. This crate holds the
//! types every other Corvus crate builds on:
//!
//! - [`Id`]: the tagged 64-bit value filling every table cell
//! - [`IdTable`] / [`IdTableView`]: column-major tables and borrowed views
//! - [`LocalVocab`]: per-query vocabulary for synthesized strings
//! - [`TrackedAllocator`]: byte accounting against a per-query budget

pub mod alloc;
pub mod id;
pub mod id_table;
pub mod local_vocab;

pub use alloc::{AllocationError, TrackedAllocator};
pub use id::{Datatype, Id};
pub use id_table::{IdTable, IdTableView};
pub use local_vocab::LocalVocab;
