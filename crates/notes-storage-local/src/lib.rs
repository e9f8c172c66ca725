//! Local directory backend for chapter notes.
//!
//! Provides a `NoteStore` over a folder kept in sync by an external client,
//! plus the persisted device identity used for leases.

pub mod device;
mod store;

pub use store::LocalDirStore;
