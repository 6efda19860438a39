//! Filesystem-backed workspace adapter.

pub mod workspace;

pub use workspace::FsWorkspaceStore;
