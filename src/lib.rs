//! A memory-bounded LRU cache for books which are expensive to unpack.
//!
//! Unpacking a book (reading it from disk, decompressing it out of an archive) is slow, and a plain map of names to
//! books just grows forever.  This crate keeps the most recently used books in memory up to a byte budget, and
//! unpacks everything else on demand.  It provides:
//!
//! [CostBasedLru] is a standard Lru cache which supports giving each item a cost.  Before an item is inserted, the
//! cache evicts least recently used items until the new one fits, and items too expensive to fit at all are refused.
//! This is the low-level building block, and is exposed because it's useful in other contexts.
//!
//! The higher level piece is [BookCache], which returns `Arc`s wrapping [Book]s produced by an [Unpacker]:
//!
//! - A cached book is returned immediately and becomes the most recently used one.
//! - Otherwise the unpacker is asked for it, and the result is cached, evicting as necessary.
//! - A book larger than the whole budget is still returned, but not cached.
//! - Books are shared: evicting one never invalidates an `Arc` a caller is still holding.
//!
//! The cache is safe to share between threads.  Concurrent requests for the same missing book unpack it only once.
//!
//! To use this crate, implement [Unpacker] (or use [DirectoryUnpacker]), then construct a [BookCache] with your chosen
//! [BookCacheConfig].
mod book;
mod book_cache;
mod cost_based_lru;
mod directory_unpacker;
mod traits;

pub use book::*;
pub use book_cache::*;
pub use cost_based_lru::*;
pub use directory_unpacker::*;
pub use traits::*;
