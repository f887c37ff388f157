//! An in-memory stand-in for a real key/value backing store, built for
//! the test suites of the crates above this one. It speaks the same
//! `KvBackend` trait a Redis-backed store would, so those suites never
//! need a live server.
//!
//! Expiry for `set_nx_px` is tracked against `std::time::Instant` and
//! checked lazily on access, exactly as a real store would check it on
//! the next read rather than proactively sweeping.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regstore_base::{KvBackend, Result};

#[derive(Clone, Debug)]
enum Value {
    Str(Vec<u8>, Option<Instant>),
    List(Vec<Vec<u8>>),
    ZSet(Vec<(f64, Vec<u8>)>),
}

/// A single-process, single-`HashMap` backend double. Cheap to clone a
/// handle to (the state lives behind an `Arc`-like shared `Mutex`), so
/// tests can spin up several stores over the same backing map to
/// exercise cross-store invariants.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<HashMap<Vec<u8>, Value>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_str(&self, map: &mut HashMap<Vec<u8>, Value>, key: &[u8]) -> Option<Vec<u8>> {
        match map.get(key) {
            Some(Value::Str(bytes, Some(deadline))) => {
                if Instant::now() >= *deadline {
                    map.remove(key);
                    None
                } else {
                    Some(bytes.clone())
                }
            }
            Some(Value::Str(bytes, None)) => Some(bytes.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl KvBackend for FakeBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut map = self.state.lock().unwrap();
        Ok(self.live_str(&mut map, key))
    }

    async fn getset(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut map = self.state.lock().unwrap();
        let prev = self.live_str(&mut map, key);
        map.insert(key.to_vec(), Value::Str(value.to_vec(), None));
        Ok(prev)
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut map = self.state.lock().unwrap();
        map.insert(key.to_vec(), Value::Str(value.to_vec(), None));
        Ok(())
    }

    async fn del(&self, key: &[u8]) -> Result<bool> {
        let mut map = self.state.lock().unwrap();
        Ok(map.remove(key).is_some())
    }

    async fn set_nx_px(&self, key: &[u8], value: &[u8], ttl_ms: u64) -> Result<bool> {
        let mut map = self.state.lock().unwrap();
        if self.live_str(&mut map, key).is_some() {
            return Ok(false);
        }
        let deadline = Instant::now() + Duration::from_millis(ttl_ms);
        map.insert(key.to_vec(), Value::Str(value.to_vec(), Some(deadline)));
        Ok(true)
    }

    async fn cas_del(&self, key: &[u8], expected: &[u8]) -> Result<bool> {
        let mut map = self.state.lock().unwrap();
        match self.live_str(&mut map, key) {
            Some(current) if current == expected => {
                map.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lpush(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut map = self.state.lock().unwrap();
        match map.entry(key.to_vec()).or_insert_with(|| Value::List(Vec::new())) {
            Value::List(list) => list.insert(0, value.to_vec()),
            other => *other = Value::List(vec![value.to_vec()]),
        }
        Ok(())
    }

    async fn lrange(&self, key: &[u8], start: isize, stop: isize) -> Result<Vec<Vec<u8>>> {
        let map = self.state.lock().unwrap();
        let Some(Value::List(list)) = map.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        let norm = |i: isize| -> isize {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len)
            }
        };
        let start = norm(start);
        let stop = (norm(stop) + 1).min(len);
        if start >= stop {
            return Ok(Vec::new());
        }
        Ok(list[start as usize..stop as usize].to_vec())
    }

    async fn lrem(&self, key: &[u8], value: &[u8]) -> Result<i64> {
        let mut map = self.state.lock().unwrap();
        let Some(Value::List(list)) = map.get_mut(key) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|v| v != value);
        Ok((before - list.len()) as i64)
    }

    async fn zadd(&self, key: &[u8], member: &[u8], score: f64) -> Result<()> {
        let mut map = self.state.lock().unwrap();
        match map.entry(key.to_vec()).or_insert_with(|| Value::ZSet(Vec::new())) {
            Value::ZSet(set) => {
                set.retain(|(_, m)| m != member);
                set.push((score, member.to_vec()));
                set.sort_by(|a, b| a.0.total_cmp(&b.0));
            }
            other => *other = Value::ZSet(vec![(score, member.to_vec())]),
        }
        Ok(())
    }

    async fn zrem(&self, key: &[u8], member: &[u8]) -> Result<()> {
        let mut map = self.state.lock().unwrap();
        if let Some(Value::ZSet(set)) = map.get_mut(key) {
            set.retain(|(_, m)| m != member);
        }
        Ok(())
    }

    async fn zrangebyscore_limit(
        &self,
        key: &[u8],
        max_score: f64,
        limit: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let map = self.state.lock().unwrap();
        let Some(Value::ZSet(set)) = map.get(key) else {
            return Ok(Vec::new());
        };
        Ok(set
            .iter()
            .filter(|(score, _)| *score <= max_score)
            .take(limit)
            .map(|(_, member)| member.clone())
            .collect())
    }

    async fn mget(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut map = self.state.lock().unwrap();
        Ok(keys.iter().map(|k| self.live_str(&mut map, k)).collect())
    }

    async fn scan_page(
        &self,
        cursor: u64,
        prefix: &[u8],
        _count: usize,
    ) -> Result<(u64, Vec<Vec<u8>>)> {
        if cursor != 0 {
            return Ok((0, Vec::new()));
        }
        let map = self.state.lock().unwrap();
        let keys = map.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        Ok((0, keys))
    }

    async fn zcard(&self, key: &[u8]) -> Result<u64> {
        let map = self.state.lock().unwrap();
        match map.get(key) {
            Some(Value::ZSet(set)) => Ok(set.len() as u64),
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod test;
