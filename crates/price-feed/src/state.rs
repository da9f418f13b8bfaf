//! Subscription store
//!
//! One flat map keyed by (token, fiat, destination) behind a single lock.
//! Readers take deep-copied snapshots, so a match cycle never races with
//! concurrent inserts or evictions.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use alerts_core::{ConditionBlock, ConditionKey, StoreError, StoreResult};

/// In-memory condition store shared by the ingestor, poller and delivery
#[derive(Debug, Default)]
pub struct SubscriptionStore {
    conditions: RwLock<HashMap<ConditionKey, ConditionBlock>>,

    /// Stats
    inserts: AtomicU64,
    replacements: AtomicU64,
    deletes: AtomicU64,
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the condition for the block's key
    pub fn set(&self, mut block: ConditionBlock) {
        block.current_price = None;
        let key = block.key();

        let previous = self.conditions.write().insert(key.clone(), block);

        if previous.is_some() {
            self.replacements.fetch_add(1, Ordering::Relaxed);
            debug!("Replaced condition {}", key);
        } else {
            self.inserts.fetch_add(1, Ordering::Relaxed);
            debug!("Stored condition {}", key);
        }
    }

    /// Remove a condition. Absent keys are reported, never fatal.
    pub fn delete(&self, key: &ConditionKey) -> StoreResult<ConditionBlock> {
        let removed = self.conditions.write().remove(key);

        match removed {
            Some(block) => {
                self.deletes.fetch_add(1, Ordering::Relaxed);
                debug!("Deleted condition {}", key);
                Ok(block)
            }
            None => Err(StoreError::NotFound(key.clone())),
        }
    }

    /// Remove a condition only while `matches` still accepts the stored block.
    ///
    /// A re-subscription that replaced the block in the meantime stays in
    /// place and is reported as `Replaced`.
    pub fn delete_if<F>(&self, key: &ConditionKey, matches: F) -> StoreResult<ConditionBlock>
    where
        F: FnOnce(&ConditionBlock) -> bool,
    {
        let mut conditions = self.conditions.write();

        match conditions.get(key) {
            None => return Err(StoreError::NotFound(key.clone())),
            Some(stored) if !matches(stored) => return Err(StoreError::Replaced(key.clone())),
            Some(_) => {}
        }

        let removed = conditions.remove(key);
        drop(conditions);

        match removed {
            Some(block) => {
                self.deletes.fetch_add(1, Ordering::Relaxed);
                debug!("Deleted condition {}", key);
                Ok(block)
            }
            None => Err(StoreError::NotFound(key.clone())),
        }
    }

    pub fn get(&self, key: &ConditionKey) -> Option<ConditionBlock> {
        self.conditions.read().get(key).cloned()
    }

    pub fn contains(&self, key: &ConditionKey) -> bool {
        self.conditions.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.conditions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.read().is_empty()
    }

    /// Immutable copy of the current store contents
    pub fn snapshot(&self) -> StoreSnapshot {
        let conditions = self.conditions.read();

        let mut by_pair: BTreeMap<(String, String), Vec<ConditionBlock>> = BTreeMap::new();
        for block in conditions.values() {
            by_pair
                .entry((block.token.clone(), block.fiat.clone()))
                .or_default()
                .push(block.clone());
        }
        drop(conditions);

        for blocks in by_pair.values_mut() {
            blocks.sort_by(|a, b| a.destination.cmp(&b.destination));
        }

        StoreSnapshot { by_pair }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            condition_count: self.len(),
            inserts: self.inserts.load(Ordering::Relaxed),
            replacements: self.replacements.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the store, indexed by (token, fiat)
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    by_pair: BTreeMap<(String, String), Vec<ConditionBlock>>,
}

impl StoreSnapshot {
    /// Distinct subscribed tokens
    pub fn tokens(&self) -> BTreeSet<String> {
        self.by_pair.keys().map(|(token, _)| token.clone()).collect()
    }

    /// Distinct subscribed fiats
    pub fn fiats(&self) -> BTreeSet<String> {
        self.by_pair.keys().map(|(_, fiat)| fiat.clone()).collect()
    }

    /// Every condition stored for one pair, ordered by destination
    pub fn conditions_for(&self, token: &str, fiat: &str) -> &[ConditionBlock] {
        self.by_pair
            .get(&(token.to_string(), fiat.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_pair.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pair.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConditionBlock> {
        self.by_pair.values().flatten()
    }
}

/// Statistics about the store
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub condition_count: usize,
    pub inserts: u64,
    pub replacements: u64,
    pub deletes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alerts_core::Operator;

    fn block(token: &str, fiat: &str, price: &str, dest: &str) -> ConditionBlock {
        ConditionBlock::new(token, fiat, price, Operator::Ge, dest)
    }

    #[test]
    fn test_set_then_snapshot_contains_block() {
        let store = SubscriptionStore::new();
        let b = block("BTC", "USD", "42000", "dest1");
        store.set(b.clone());

        let snapshot = store.snapshot();
        assert_eq!(snapshot.conditions_for("BTC", "USD"), &[b.clone()]);
        assert_eq!(store.get(&b.key()), Some(b));
    }

    #[test]
    fn test_same_key_overwrites() {
        let store = SubscriptionStore::new();
        store.set(block("BTC", "USD", "42000", "dest1"));
        store.set(block("BTC", "USD", "43000", "dest1"));

        let snapshot = store.snapshot();
        let stored = snapshot.conditions_for("BTC", "USD");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].threshold_price, "43000");

        let stats = store.stats();
        assert_eq!(stats.inserts, 1);
        assert_eq!(stats.replacements, 1);
    }

    #[test]
    fn test_set_clears_transient_price() {
        let store = SubscriptionStore::new();
        let fired = block("BTC", "USD", "1", "d").with_current_price("2");
        store.set(fired.clone());

        assert!(store.get(&fired.key()).unwrap().current_price.is_none());
    }

    #[test]
    fn test_delete_absent_key_is_not_found() {
        let store = SubscriptionStore::new();
        store.set(block("ETH", "EUR", "2000", "dest1"));

        let missing = ConditionKey::new("BTC", "USD", "dest1");
        assert_eq!(
            store.delete(&missing),
            Err(StoreError::NotFound(missing.clone()))
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().deletes, 0);
    }

    #[test]
    fn test_delete_if_keeps_replaced_condition() {
        let store = SubscriptionStore::new();
        let fired = ConditionBlock::new("BTC", "USD", "42000", Operator::Ge, "7");
        store.set(fired.clone());
        store.set(ConditionBlock::new("BTC", "USD", "50000", Operator::Ge, "7"));

        let same = |b: &ConditionBlock| b.threshold_price == fired.threshold_price;
        assert_eq!(
            store.delete_if(&fired.key(), same),
            Err(StoreError::Replaced(fired.key()))
        );
        assert_eq!(store.get(&fired.key()).unwrap().threshold_price, "50000");

        let updated = |b: &ConditionBlock| b.threshold_price == "50000";
        assert!(store.delete_if(&fired.key(), updated).is_ok());
        assert_eq!(
            store.delete_if(&fired.key(), |_| true),
            Err(StoreError::NotFound(fired.key()))
        );
    }

    #[test]
    fn test_delete_removes_only_the_leaf() {
        let store = SubscriptionStore::new();
        let a = block("BTC", "USD", "1", "a");
        let b = block("BTC", "USD", "1", "b");
        store.set(a.clone());
        store.set(b.clone());

        assert_eq!(store.delete(&a.key()).unwrap(), a);
        assert!(store.delete(&a.key()).is_err());
        assert_eq!(store.snapshot().conditions_for("BTC", "USD"), &[b]);
    }

    #[test]
    fn test_snapshot_universe_is_distinct() {
        let store = SubscriptionStore::new();
        store.set(block("BTC", "USD", "1", "a"));
        store.set(block("BTC", "EUR", "1", "a"));
        store.set(block("ETH", "USD", "1", "b"));

        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.tokens().into_iter().collect::<Vec<_>>(),
            vec!["BTC", "ETH"]
        );
        assert_eq!(
            snapshot.fiats().into_iter().collect::<Vec<_>>(),
            vec!["EUR", "USD"]
        );
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let store = SubscriptionStore::new();
        let b = block("BTC", "USD", "1", "a");
        store.set(b.clone());

        let snapshot = store.snapshot();
        store.delete(&b.key()).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_sets() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(SubscriptionStore::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for j in 0..100 {
                        store.set(block("BTC", "USD", &j.to_string(), &format!("dest-{i}-{}", j % 10)));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let stats = store.stats();
        assert_eq!(stats.condition_count, 40);
        assert_eq!(stats.inserts + stats.replacements, 400);
    }
}
