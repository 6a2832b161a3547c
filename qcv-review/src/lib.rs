//! # QC Review Core
//!
//! The metric-grouping, value-typing, and edit-buffering core of the QC
//! review tool:
//! - Value classification and the custom structured value state machine
//! - Flattened metric table and the change ledger over it
//! - Group index with shared media handles
//! - Status pivot table
//! - Submit coordination against the document store
//!
//! Widget rendering and entry points live outside this crate; they consume
//! these contracts through `ReviewSession` and `SubmitCoordinator`.

pub mod docdb;
pub mod group;
pub mod ledger;
pub mod matrix;
pub mod media;
pub mod session;
pub mod submit;
pub mod table;
pub mod value;

pub use session::ReviewSession;
pub use submit::{CommitAck, SubmitCoordinator};
