//! Archive writer for gridded datasets.
//!
//! Every archive is assembled in a hidden sibling directory and renamed into
//! place on commit, so a crash never leaves a half-written archive behind.

mod dataset_writer;

pub use dataset_writer::{DatasetDraft, DatasetWriter, VariableSpec, WriteResult};
