pub mod cache;
pub mod text;

pub use cache::MemoCache;
