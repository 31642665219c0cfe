//! Subject module.
//!
//! A [`Subject`] is the unit of work and of caching: one experiment
//! container, its sessions in acquisition order, the common cells, and the
//! aligned tensor.
//!
//! # Operations
//!
//! All subject operations are available on [`OphysCache`](crate::OphysCache):
//!
//! - [`subject(id)`](crate::OphysCache::subject) - cache hit or compute and persist
//! - [`subject_for(key)`](crate::OphysCache::subject_for) - same, without a metadata lookup
//! - [`assemble_subject(id)`](crate::OphysCache::assemble_subject) - compute only
//! - [`cached_subject(key)`](crate::OphysCache::cached_subject) - cache only

pub mod types;

pub use types::{SessionRecord, Subject, SubjectKey, RECORD_EXTENSION};
