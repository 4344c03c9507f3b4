//! In-process store.
//!
//! Implements the full [`Store`] contract over interior-mutable maps.
//! Backs the test suite and the `store.backend = "memory"` development
//! mode; pipelines are atomic because the whole state sits behind one
//! mutex.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Store, StoreError, StoreOp};

#[derive(Default)]
struct Inner {
    strings: HashMap<String, String>,
    sets: HashMap<String, HashSet<String>>,
    /// member -> score; range queries sort on (score, member).
    zsets: HashMap<String, BTreeMap<String, f64>>,
}

impl Inner {
    fn apply(&mut self, op: &StoreOp) {
        match op {
            StoreOp::Set { key, value } => {
                self.strings.insert(key.clone(), value.clone());
            }
            StoreOp::Del { key } => {
                self.strings.remove(key);
                self.sets.remove(key);
                self.zsets.remove(key);
            }
            StoreOp::SetAdd { key, member } => {
                self.sets.entry(key.clone()).or_default().insert(member.clone());
            }
            StoreOp::SetRem { key, member } => {
                if let Some(set) = self.sets.get_mut(key) {
                    set.remove(member);
                }
            }
            StoreOp::SetMove { src, des, member } => {
                let moved = self
                    .sets
                    .get_mut(src)
                    .map(|s| s.remove(member))
                    .unwrap_or(false);
                if moved {
                    self.sets.entry(des.clone()).or_default().insert(member.clone());
                }
            }
            StoreOp::ZAdd { key, member, score } => {
                self.zsets.entry(key.clone()).or_default().insert(member.clone(), *score);
            }
            StoreOp::ZRem { key, member } => {
                if let Some(zset) = self.zsets.get_mut(key) {
                    zset.remove(member);
                }
            }
        }
    }

    fn zset_sorted(&self, key: &str) -> Vec<String> {
        let Some(zset) = self.zsets.get(key) else {
            return Vec::new();
        };
        let mut entries: Vec<(&String, &f64)> = zset.iter().collect();
        entries.sort_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(b.0)));
        entries.into_iter().map(|(m, _)| m.clone()).collect()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Resolve a (possibly negative) range index against `len`, protocol
/// style: -1 is the last element, out-of-range clamps.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn glob_match(pattern: &str, key: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            key.len() >= prefix.len() + suffix.len()
                && key.starts_with(prefix)
                && key.ends_with(suffix)
        }
        None => pattern == key,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.lock().strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.inner.lock().apply(&StoreOp::Del { key: key.to_string() });
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.strings.contains_key(key)
            || inner.sets.get(key).is_some_and(|s| !s.is_empty())
            || inner.zsets.get(key).is_some_and(|z| !z.is_empty()))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock();
        let mut keys: Vec<String> = inner
            .strings
            .keys()
            .chain(inner.sets.iter().filter(|(_, s)| !s.is_empty()).map(|(k, _)| k))
            .chain(inner.zsets.iter().filter(|(_, z)| !z.is_empty()).map(|(k, _)| k))
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.inner.lock().apply(&StoreOp::SetAdd {
            key: key.to_string(),
            member: member.to_string(),
        });
        Ok(())
    }

    async fn set_rem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.inner.lock().apply(&StoreOp::SetRem {
            key: key.to_string(),
            member: member.to_string(),
        });
        Ok(())
    }

    async fn set_move(&self, src: &str, des: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let moved = inner.sets.get_mut(src).map(|s| s.remove(member)).unwrap_or(false);
        if moved {
            inner.sets.entry(des.to_string()).or_default().insert(member.to_string());
        }
        Ok(moved)
    }

    async fn set_pop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock();
        let Some(set) = inner.sets.get_mut(key) else {
            return Ok(None);
        };
        let member = set.iter().next().cloned();
        if let Some(ref m) = member {
            set.remove(m);
        }
        Ok(member)
    }

    async fn set_sample(&self, key: &str, count: i64) -> Result<Vec<String>, StoreError> {
        // Deterministic sample: sorted members, first `count`. The
        // contract only promises "up to N distinct members".
        let inner = self.inner.lock();
        let Some(set) = inner.sets.get(key) else {
            return Ok(Vec::new());
        };
        let mut members: Vec<String> = set.iter().cloned().collect();
        members.sort();
        members.truncate(count.max(0) as usize);
        Ok(members)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock();
        let mut members: Vec<String> = inner
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .lock()
            .sets
            .get(key)
            .is_some_and(|s| s.contains(member)))
    }

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.inner.lock().apply(&StoreOp::ZAdd {
            key: key.to_string(),
            member: member.to_string(),
            score,
        });
        Ok(())
    }

    async fn zset_rem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.inner.lock().apply(&StoreOp::ZRem {
            key: key.to_string(),
            member: member.to_string(),
        });
        Ok(())
    }

    async fn zset_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        let sorted = self.inner.lock().zset_sorted(key);
        Ok(match resolve_range(sorted.len(), start, stop) {
            Some((lo, hi)) => sorted[lo..=hi].to_vec(),
            None => Vec::new(),
        })
    }

    async fn zset_rank(&self, key: &str, member: &str) -> Result<Option<i64>, StoreError> {
        let sorted = self.inner.lock().zset_sorted(key);
        Ok(sorted.iter().position(|m| m == member).map(|p| p as i64))
    }

    async fn pipeline(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        for op in &ops {
            inner.apply(op);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn strings_and_sets() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.exists("k").await.unwrap());

        store.set_add("s", "a").await.unwrap();
        store.set_add("s", "b").await.unwrap();
        assert!(store.set_contains("s", "a").await.unwrap());
        assert_eq!(store.set_members("s").await.unwrap(), vec!["a", "b"]);
        assert_eq!(store.set_sample("s", 1).await.unwrap().len(), 1);

        assert!(store.set_move("s", "t", "a").await.unwrap());
        assert!(!store.set_move("s", "t", "a").await.unwrap());
        assert!(store.set_contains("t", "a").await.unwrap());
    }

    #[tokio::test]
    async fn zset_orders_by_score_and_resolves_negative_ranges() {
        let store = MemoryStore::new();
        store.zset_add("z", "mid", 2.0).await.unwrap();
        store.zset_add("z", "low", 1.0).await.unwrap();
        store.zset_add("z", "high", 3.0).await.unwrap();

        assert_eq!(store.zset_range("z", 0, 0).await.unwrap(), vec!["low"]);
        assert_eq!(
            store.zset_range("z", 0, -1).await.unwrap(),
            vec!["low", "mid", "high"]
        );
        assert_eq!(store.zset_rank("z", "high").await.unwrap(), Some(2));
        assert_eq!(store.zset_rank("z", "absent").await.unwrap(), None);

        store.zset_rem("z", "low").await.unwrap();
        assert_eq!(store.zset_range("z", 0, 0).await.unwrap(), vec!["mid"]);
    }

    #[tokio::test]
    async fn keys_matches_prefix_patterns() {
        let store = MemoryStore::new();
        store.zset_add("book:USD:EUR", "o1", 1.0).await.unwrap();
        store.zset_add("book:EUR:USD", "o2", 1.0).await.unwrap();
        store.set("stats:last-price", "1").await.unwrap();

        let books = store.keys("book:*").await.unwrap();
        assert_eq!(books, vec!["book:EUR:USD", "book:USD:EUR"]);
    }

    #[tokio::test]
    async fn pipeline_applies_all_ops() {
        let store = MemoryStore::new();
        store.set_add("from", "m").await.unwrap();
        store
            .pipeline(vec![
                StoreOp::SetRem {
                    key: "from".to_string(),
                    member: "m".to_string(),
                },
                StoreOp::ZAdd {
                    key: "zk".to_string(),
                    member: "m".to_string(),
                    score: 4.2,
                },
                StoreOp::Set {
                    key: "sk".to_string(),
                    value: "1".to_string(),
                },
            ])
            .await
            .unwrap();

        assert!(!store.set_contains("from", "m").await.unwrap());
        assert_eq!(store.zset_range("zk", 0, -1).await.unwrap(), vec!["m"]);
        assert_eq!(store.get("sk").await.unwrap().as_deref(), Some("1"));
    }
}
