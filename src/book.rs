//! The cached payload.

/// A named, immutable chunk of content.
///
/// The cache hands books out behind `Arc`, so a book outlives its eviction for as long as a caller keeps it.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Book {
    name: String,
    content: Vec<u8>,
}

impl Book {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Book {
        Book {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// The cost of this book as seen by the cache.
    pub fn size_in_bytes(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn into_content(self) -> Vec<u8> {
        self.content
    }
}
