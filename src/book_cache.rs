//! The [BookCache] drives an [Unpacker], keeping recently used books in memory up to a byte budget.
//!
//! Books are handed out as `Arc<Book>`.  Evicting a book only drops the cache's reference, so anything a caller is
//! still holding stays valid.
//!
//! Locking is split in two.  The Lru itself lives behind one mutex, and every lookup, promotion, and admission runs
//! entirely inside it.  The unpacker is called with that mutex released, but under a per-name guard: a second thread
//! asking for a book that is currently being unpacked waits for the first, then finds the result in the cache instead
//! of unpacking it again.
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::*;

type CacheHashMap<V> = std::collections::HashMap<String, V, ahash::RandomState>;

#[derive(Clone, Debug, derive_builder::Builder)]
pub struct BookCacheConfig {
    /// Maximum total size of the cached books in bytes.
    pub max_memory: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError<E: std::error::Error + 'static> {
    /// The unpacker failed.  The cache is left as it was.
    #[error(transparent)]
    Unpack(E),
}

pub struct BookCache<U: Unpacker> {
    config: BookCacheConfig,
    books: Mutex<CostBasedLru<str, Book>>,
    /// Mutexes that stop multiple threads trying to unpack the same book.
    unpacking_guards: Mutex<CacheHashMap<Arc<Mutex<()>>>>,
    unpacker: U,
}

impl<U: Unpacker> BookCache<U> {
    pub fn new(unpacker: U, config: BookCacheConfig) -> BookCache<U> {
        BookCache {
            unpacker,
            books: Mutex::new(CostBasedLru::new(config.max_memory)),
            unpacking_guards: Default::default(),
            config,
        }
    }

    pub fn with_max_memory(unpacker: U, max_memory: u64) -> BookCache<U> {
        BookCache::new(unpacker, BookCacheConfig { max_memory })
    }

    /// Find a book in the cache, marking it as most recently used.
    fn search_for_book(&self, name: &str) -> Option<Arc<Book>> {
        let found = self.books.lock().get(name);
        if found.is_some() {
            trace!(name, "cache hit");
        }
        found
    }

    /// Put a freshly unpacked book into the Lru, evicting as needed.
    fn admit(&self, name: &str, book: &Arc<Book>) {
        let size = book.size_in_bytes();
        let mut guard = self.books.lock();
        let outcome = guard.insert(Arc::from(name), book.clone(), size);

        for (evicted, _) in outcome.evicted.iter() {
            debug!(name = &**evicted, "evicted book");
        }
        match outcome.admission {
            Admission::Admitted => debug!(
                name,
                size,
                memory_used = guard.current_cost(),
                "cached book"
            ),
            Admission::Rejected => debug!(
                name,
                size,
                max_memory = self.config.max_memory,
                "book is larger than the cache, returning it uncached"
            ),
        }
    }

    /// Unpack a book, assuming we are holding the guard which stops other threads from unpacking it in parallel.
    fn find_or_unpack_postchecked(
        &self,
        name: &str,
    ) -> Result<Option<Arc<Book>>, CacheError<U::Error>> {
        // Whoever held the guard before us may have just cached it.
        if let Some(x) = self.search_for_book(name) {
            return Ok(Some(x));
        }

        debug!(name, "cache miss, unpacking");
        let book = match self.unpacker.unpack(name) {
            Ok(Some(b)) => Arc::new(b),
            Ok(None) => {
                debug!(name, "no such book");
                return Ok(None);
            }
            Err(e) => {
                warn!(name, error = %e, "failed to unpack book");
                return Err(CacheError::Unpack(e));
            }
        };

        self.admit(name, &book);
        Ok(Some(book))
    }

    /// Drop our handle on a guard, removing it from the map if nobody else is waiting on it.
    ///
    /// Handles are only cloned or dropped with the map locked, so the strong count is stable here.
    fn release_guard(&self, name: &str, mutex: Arc<Mutex<()>>) {
        let mut guards = self.unpacking_guards.lock();
        let ours = guards
            .get(name)
            .map(|x| Arc::ptr_eq(x, &mutex))
            .unwrap_or(false);
        if ours && Arc::strong_count(&mutex) == 2 {
            guards.remove(name);
        }
        std::mem::drop(mutex);
    }

    /// Get a book, unpacking it if it isn't cached.
    ///
    /// Returns `Ok(None)` if the unpacker has no such book.  A book which is too large to ever fit is still returned,
    /// it just won't be cached.
    pub fn get(&self, name: &str) -> Result<Option<Arc<Book>>, CacheError<U::Error>> {
        if let Some(x) = self.search_for_book(name) {
            return Ok(Some(x));
        }

        let mutex = {
            let mut guard_inner = self.unpacking_guards.lock();
            let tmp = guard_inner
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            (*tmp).clone()
        };
        let res = {
            let _guard: parking_lot::MutexGuard<()> = mutex.lock();
            self.find_or_unpack_postchecked(name)
        };
        self.release_guard(name, mutex);
        res
    }

    /// Is this book cached?  Doesn't count as a use.
    pub fn contains(&self, name: &str) -> bool {
        self.books.lock().contains(name)
    }

    /// Remove a book from the cache.
    pub fn remove(&self, name: &str) -> Option<Arc<Book>> {
        self.books.lock().remove(name)
    }

    pub fn clear(&self) {
        self.books.lock().clear();
    }

    /// Total size of the cached books in bytes.
    pub fn memory_used(&self) -> u64 {
        self.books.lock().current_cost()
    }

    pub fn max_memory(&self) -> u64 {
        self.config.max_memory
    }

    pub fn len(&self) -> usize {
        self.books.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.lock().is_empty()
    }

    /// Names of the cached books, most recently used first.
    pub fn cached_names(&self) -> Vec<String> {
        self.books
            .lock()
            .iter()
            .map(|(name, _)| name.to_string())
            .collect()
    }
}
