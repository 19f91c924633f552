mod mirror;
mod refs;
mod stream;

pub use mirror::MirrorStore;
pub use refs::{changed_refs, render_listing, RefState};

#[cfg(test)]
pub(crate) use mirror::tests::{commit_block, commit_stream};
