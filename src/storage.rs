//! Local storage collaborators: a content-addressed file store and named-array files.
pub mod arrays;
pub mod content;
