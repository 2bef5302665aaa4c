//! File system helpers: ignore rules and tree walking/copying.

pub mod ignore;
pub mod walker;

pub use ignore::GitignoreFilter;
pub use walker::{copy_tree, CopyReport, WalkOptions};
