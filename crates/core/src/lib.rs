//! Core types for the Canopy container family
//!
//! This crate defines the pieces shared by every container variant:
//! - [`Element`]: how an element exposes its identifier (the sort key)
//! - [`Entry`], [`Watch`], [`RevisionId`], [`Generation`]: the versioned
//!   entry model
//! - probes ([`Bare`], [`Dated`], [`Above`], [`Below`], [`AfterRevision`]):
//!   heterogeneous search keys over `(identifier, generation)` storage order
//! - [`Error`] / [`Result`]: the unified status model

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod error;
pub mod order;

pub use entry::{Element, Entry, Generation, RevisionId, Watch};
pub use error::{Error, Result};
pub use order::{AfterRevision, Above, Bare, Below, Dated, Probe};
