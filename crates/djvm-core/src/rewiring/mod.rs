//! Class rewriting: the emitter pipeline followed by namespace relocation.

pub mod remapper;
pub mod rewriter;

pub use remapper::{ClassRemapper, Mapping};
pub use rewriter::ClassRewriter;
