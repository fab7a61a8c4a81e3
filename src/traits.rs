//! The [Unpacker] trait is responsible for turning book names into [Book]s.
//!
//! The cache calls the unpacker on every miss and treats it as a black box: it may read from disk, decompress an
//! archive, or anything else that is too slow to repeat on every request.
use crate::Book;

/// Produce a [Book] from its name.
pub trait Unpacker: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Unpack a book.
    ///
    /// Return `Ok(None)` if there is no book by this name.  `Err` is reserved for real failures such as I/O errors or
    /// corrupt data, and is handed to the caller of the cache unchanged.
    fn unpack(&self, name: &str) -> Result<Option<Book>, Self::Error>;
}

impl<T: Unpacker + ?Sized> Unpacker for std::sync::Arc<T> {
    type Error = T::Error;

    fn unpack(&self, name: &str) -> Result<Option<Book>, Self::Error> {
        (**self).unpack(name)
    }
}
