//! a [CostBasedLru] is an Lru cache which uses the cost of the items in the cache to decide when to evict.
//!
//! Recency is tracked with an ordered index from a sequence number to the key.  Every insertion or access takes the
//! next sequence number, so the smallest sequence in the index is always the least recently used entry and the largest
//! is the most recently used one.  An auxiliary hash-based index maps keys back to their current sequence, the item,
//! and its cost.
//!
//! Unlike a count-bounded Lru, admission happens before insertion: we evict from the old end until the new item fits,
//! and an item which is more expensive than the whole cache is refused rather than inserted and immediately evicted.
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use ahash::RandomState;

struct Slot<V> {
    sequence: u64,
    item: Arc<V>,
    cost: u64,
}

/// Whether an item made it into the cache.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Admission {
    Admitted,
    /// The item costs more than the cache may hold, even empty.
    Rejected,
}

/// Everything that happened during an [CostBasedLru::insert].
#[derive(Debug)]
pub struct InsertOutcome<K: ?Sized, V> {
    pub admission: Admission,
    /// The previous value for this key, if there was one.
    pub replaced: Option<Arc<V>>,
    /// Entries evicted to make room, oldest first.
    pub evicted: Vec<(Arc<K>, Arc<V>)>,
}

#[derive(Debug, thiserror::Error)]
#[error("lru invariant violated: {0}")]
pub struct InvariantError(String);

pub struct CostBasedLru<K: ?Sized, V> {
    recency: BTreeMap<u64, Arc<K>>,
    index: HashMap<Arc<K>, Slot<V>, RandomState>,
    max_cost: u64,
    /// Current cost of the items in the cache.
    current_cost: u64,
    next_sequence: u64,
}

impl<K: Hash + Eq + ?Sized, V> CostBasedLru<K, V> {
    pub fn new(max_cost: u64) -> CostBasedLru<K, V> {
        CostBasedLru {
            recency: Default::default(),
            index: Default::default(),
            max_cost,
            current_cost: 0,
            next_sequence: 0,
        }
    }

    fn bump_sequence(&mut self) -> u64 {
        let ret = self.next_sequence;
        self.next_sequence += 1;
        ret
    }

    /// Get an item, making it the most recently used one.
    pub fn get(&mut self, key: &K) -> Option<Arc<V>> {
        let sequence = self.bump_sequence();
        let slot = self.index.get_mut(key)?;
        let owned_key = self
            .recency
            .remove(&slot.sequence)
            .expect("Recency index out of sync with the key index");
        slot.sequence = sequence;
        let item = slot.item.clone();
        self.recency.insert(sequence, owned_key);
        Some(item)
    }

    /// Get an item without touching its recency.
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        self.index.get(key).map(|s| s.item.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        let slot = self.index.remove(key)?;
        self.recency.remove(&slot.sequence);
        self.current_cost -= slot.cost;
        Some(slot.item)
    }

    /// Evict the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(Arc<K>, Arc<V>)> {
        let (_, key) = self.recency.pop_first()?;
        let slot = self
            .index
            .remove(&*key)
            .expect("Key index out of sync with the recency index");
        self.current_cost -= slot.cost;
        Some((key, slot.item))
    }

    /// Add an item to the cache, evicting least recently used entries until it fits.
    ///
    /// If the key was already present, the old entry is dropped first and handed back in the outcome.  Items whose cost
    /// exceeds `max_cost` are never inserted; note that by the time we know this, eviction has already emptied the
    /// cache.
    pub fn insert(&mut self, key: Arc<K>, value: Arc<V>, cost: u64) -> InsertOutcome<K, V> {
        let replaced = self.remove(&*key);
        let mut evicted = vec![];

        while self.current_cost.saturating_add(cost) > self.max_cost {
            match self.pop_lru() {
                Some(e) => evicted.push(e),
                None => break,
            }
        }

        let admission = if self.current_cost.saturating_add(cost) <= self.max_cost {
            let sequence = self.bump_sequence();
            self.recency.insert(sequence, key.clone());
            self.index.insert(
                key,
                Slot {
                    sequence,
                    item: value,
                    cost,
                },
            );
            self.current_cost += cost;
            Admission::Admitted
        } else {
            Admission::Rejected
        };

        InsertOutcome {
            admission,
            replaced,
            evicted,
        }
    }

    pub fn clear(&mut self) {
        self.recency.clear();
        self.index.clear();
        self.current_cost = 0;
    }

    pub fn current_cost(&self) -> u64 {
        self.current_cost
    }

    pub fn max_cost(&self) -> u64 {
        self.max_cost
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Iterator visiting entries in most-recently-used order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.recency.values().rev().filter_map(move |k| {
            let slot = self.index.get(&**k)?;
            Some((&**k, &*slot.item))
        })
    }

    /// Verify that both indices agree and that the cost accounting is right.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        if self.recency.len() != self.index.len() {
            return Err(InvariantError(format!(
                "{} entries in the recency index but {} keys",
                self.recency.len(),
                self.index.len()
            )));
        }

        let mut total = 0u64;
        for (sequence, key) in self.recency.iter() {
            let slot = self
                .index
                .get(&**key)
                .ok_or_else(|| InvariantError(format!("sequence {} has no key entry", sequence)))?;
            if slot.sequence != *sequence {
                return Err(InvariantError(format!(
                    "key at sequence {} thinks it is at {}",
                    sequence, slot.sequence
                )));
            }
            if *sequence >= self.next_sequence {
                return Err(InvariantError(format!(
                    "sequence {} was never handed out",
                    sequence
                )));
            }
            total += slot.cost;
        }

        if total != self.current_cost {
            return Err(InvariantError(format!(
                "tracked cost {} but entries sum to {}",
                self.current_cost, total
            )));
        }
        if self.current_cost > self.max_cost {
            return Err(InvariantError(format!(
                "cost {} exceeds the maximum of {}",
                self.current_cost, self.max_cost
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lru::LruCache;
    use proptest::prelude::*;

    fn put(cache: &mut CostBasedLru<u64, u64>, k: u64, v: u64, cost: u64) -> InsertOutcome<u64, u64> {
        cache.insert(Arc::new(k), Arc::new(v), cost)
    }

    fn keys(cache: &CostBasedLru<u64, u64>) -> Vec<u64> {
        cache.iter().map(|x| *x.0).collect()
    }

    /// Simple helper to build proptest strategies so that we can test the one-based base case against [LruCache].
    #[derive(Copy, Clone, Debug, Ord, Eq, PartialOrd, PartialEq)]
    enum CacheCommand {
        Put(u64, u64),
        Get(u64),
        Delete(u64),
    }

    fn cache_command_strat(
        max_key: std::ops::Range<u64>,
        max_value: std::ops::Range<u64>,
    ) -> prop::strategy::BoxedStrategy<CacheCommand> {
        proptest::prop_oneof![
            max_key.clone().prop_map(CacheCommand::Get),
            (max_key.clone(), max_value).prop_map(|(x, y)| CacheCommand::Put(x, y)),
            max_key.prop_map(CacheCommand::Delete),
        ]
        .boxed()
    }

    // When we set max_cost to the capacity and the cost of all inputted keys as 1, we get something exactly equivalent
    // to [LruCache].
    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 500,
            max_shrink_iters: 10000,
            ..Default::default()
        })]
        #[test]
        fn test_against_lru_cache_bounded(
            bound in 1..200u64,
            commands in prop::collection::vec(cache_command_strat(0..100, 0..10000), 0..2000)
        ) {
            let mut known_good = LruCache::<u64, u64>::new(bound as usize);
            let mut ours = CostBasedLru::<u64, u64>::new(bound);

            for c in commands {
                use CacheCommand::*;

                match c {
                    Get(k) => {
                        let left: Option<u64> = known_good.get(&k).cloned();
                        let right: Option<u64> = ours.get(&k).as_deref().cloned();
                        prop_assert_eq!(left, right);
                    },
                    Put(k, v) => {
                        let outcome = put(&mut ours, k, v, 1);
                        prop_assert_eq!(outcome.admission, Admission::Admitted);
                        prop_assert_eq!(known_good.put(k, v), outcome.replaced.as_deref().cloned());
                    },
                    Delete(k) => prop_assert_eq!(known_good.pop(&k), ours.remove(&k).as_deref().cloned()),
                }

                let good_state = known_good.iter().map(|(k, v)| (*k, *v)).collect::<Vec<_>>();
                let our_state = ours.iter().map(|(k, v)| (*k, *v)).collect::<Vec<_>>();
                prop_assert_eq!(&good_state, &our_state);
            }
        }

        // With arbitrary costs we can't compare against a model, but the accounting must always hold.
        #[test]
        fn test_cost_invariants(
            max_cost in 0..100u64,
            commands in prop::collection::vec((0..30u64, 0..40u64, any::<bool>()), 0..500)
        ) {
            let mut cache = CostBasedLru::<u64, u64>::new(max_cost);
            for (key, cost, is_get) in commands {
                if is_get {
                    cache.get(&key);
                } else {
                    let outcome = put(&mut cache, key, cost, cost);
                    prop_assert_eq!(outcome.admission == Admission::Admitted, cost <= max_cost);
                    prop_assert_eq!(cache.contains(&key), cost <= max_cost);
                }
                prop_assert!(cache.check_invariants().is_ok());
            }
        }
    }

    #[test]
    fn test_eviction() {
        let mut cache = CostBasedLru::<u64, u64>::new(10);
        put(&mut cache, 1, 1, 1);
        put(&mut cache, 2, 2, 2);
        put(&mut cache, 3, 3, 3);
        put(&mut cache, 4, 4, 4);
        let outcome = put(&mut cache, 5, 5, 5);

        let evicted = outcome.evicted.iter().map(|x| *x.0).collect::<Vec<_>>();
        assert_eq!(evicted, vec![1, 2, 3]);
        let state = cache
            .iter()
            .map(|x| (*x.0, *x.1))
            .collect::<Vec<(u64, u64)>>();
        assert_eq!(state, vec![(5, 5), (4, 4)]);
        assert_eq!(cache.current_cost(), 9);
    }

    #[test]
    fn test_access_protects_from_eviction() {
        let mut cache = CostBasedLru::<u64, u64>::new(30);
        put(&mut cache, 1, 1, 10);
        put(&mut cache, 2, 2, 10);
        put(&mut cache, 3, 3, 10);
        assert_eq!(cache.get(&1).as_deref(), Some(&1));

        let outcome = put(&mut cache, 4, 4, 10);
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(*outcome.evicted[0].0, 2);
        assert_eq!(keys(&cache), vec![4, 1, 3]);
    }

    #[test]
    fn test_peek_does_not_promote() {
        let mut cache = CostBasedLru::<u64, u64>::new(2);
        put(&mut cache, 1, 1, 1);
        put(&mut cache, 2, 2, 1);
        assert_eq!(cache.peek(&1).as_deref(), Some(&1));
        put(&mut cache, 3, 3, 1);
        assert!(!cache.contains(&1));
        assert_eq!(keys(&cache), vec![3, 2]);
    }

    #[test]
    fn test_too_expensive_is_rejected() {
        let mut cache = CostBasedLru::<u64, u64>::new(10);
        put(&mut cache, 1, 1, 4);
        put(&mut cache, 2, 2, 4);

        let outcome = put(&mut cache, 3, 3, 11);
        assert_eq!(outcome.admission, Admission::Rejected);
        // Eviction ran before we knew it couldn't fit.
        assert_eq!(outcome.evicted.len(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.current_cost(), 0);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_exact_fit() {
        let mut cache = CostBasedLru::<u64, u64>::new(10);
        let outcome = put(&mut cache, 1, 1, 10);
        assert_eq!(outcome.admission, Admission::Admitted);
        assert_eq!(cache.current_cost(), 10);
    }

    #[test]
    fn test_zero_budget() {
        let mut cache = CostBasedLru::<u64, u64>::new(0);
        assert_eq!(put(&mut cache, 1, 1, 1).admission, Admission::Rejected);
        assert!(cache.is_empty());
        // Free items still fit.
        assert_eq!(put(&mut cache, 2, 2, 0).admission, Admission::Admitted);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_uniform_sizes_keep_most_recent() {
        let mut cache = CostBasedLru::<u64, u64>::new(4 * 8);
        for i in 0..20 {
            put(&mut cache, i, i, 8);
        }
        assert_eq!(keys(&cache), vec![19, 18, 17, 16]);

        cache.get(&16);
        let outcome = put(&mut cache, 20, 20, 8);
        assert_eq!(*outcome.evicted[0].0, 17);
        assert_eq!(keys(&cache), vec![20, 16, 19, 18]);
    }

    #[test]
    fn test_replace_keeps_single_entry() {
        let mut cache = CostBasedLru::<u64, u64>::new(10);
        put(&mut cache, 1, 1, 6);
        let outcome = put(&mut cache, 1, 2, 7);
        assert_eq!(outcome.replaced.as_deref(), Some(&1));
        assert!(outcome.evicted.is_empty());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_cost(), 7);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_unsized_keys() {
        let mut cache = CostBasedLru::<str, Vec<u8>>::new(100);
        cache.insert(Arc::from("a"), Arc::new(vec![1, 2, 3]), 3);
        assert_eq!(cache.get("a").as_deref(), Some(&vec![1, 2, 3]));
        assert!(cache.remove("a").is_some());
        assert!(cache.get("a").is_none());
        cache.check_invariants().unwrap();
    }
}
