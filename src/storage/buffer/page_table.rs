use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// Thread-safe extendible hash table, used as the buffer pool's page table.
///
/// The directory holds shared bucket references under a read-write latch;
/// each bucket carries its own latch and a local depth. When an insert hits
/// a full bucket the directory doubles (if the bucket's local depth equals
/// the global depth) and the bucket is split, redistributing entries by the
/// next discriminator bit.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    state: RwLock<Directory<K, V>>,
}

struct Directory<K, V> {
    global_depth: usize,
    num_buckets: usize,
    dir: Vec<Arc<Bucket<K, V>>>,
}

struct Bucket<K, V> {
    depth: usize,
    items: Mutex<HashMap<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> Bucket<K, V> {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            items: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or update in place. Returns false iff the bucket is full and
    /// the key is not already present.
    fn insert(&self, key: &K, value: &V, capacity: usize) -> bool {
        let mut items = self.items.lock();
        if let Some(slot) = items.get_mut(key) {
            *slot = value.clone();
            return true;
        }
        if items.len() >= capacity {
            return false;
        }
        items.insert(key.clone(), value.clone());
        true
    }
}

fn hash_of<K: Hash>(key: &K) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() as usize
}

impl<K: Hash + Eq + Clone, V: Clone> ExtendibleHashTable<K, V> {
    pub fn new(bucket_size: usize) -> Self {
        Self {
            bucket_size,
            state: RwLock::new(Directory {
                global_depth: 0,
                num_buckets: 1,
                dir: vec![Arc::new(Bucket::new(0))],
            }),
        }
    }

    pub fn global_depth(&self) -> usize {
        self.state.read().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> usize {
        self.state.read().dir[dir_index].depth
    }

    pub fn num_buckets(&self) -> usize {
        self.state.read().num_buckets
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let state = self.state.read();
        let bucket = &state.dir[Self::index_of(key, state.global_depth)];
        let result = bucket.items.lock().get(key).cloned();
        result
    }

    pub fn remove(&self, key: &K) -> bool {
        let state = self.state.read();
        let bucket = &state.dir[Self::index_of(key, state.global_depth)];
        let result = bucket.items.lock().remove(key).is_some();
        result
    }

    pub fn insert(&self, key: K, value: V) {
        {
            let state = self.state.read();
            let bucket = &state.dir[Self::index_of(&key, state.global_depth)];
            if bucket.insert(&key, &value, self.bucket_size) {
                return;
            }
        }

        // The target bucket was full; retry under the exclusive directory
        // latch, doubling and splitting until the insert fits.
        let mut state = self.state.write();
        loop {
            let idx = Self::index_of(&key, state.global_depth);
            let bucket = state.dir[idx].clone();
            if bucket.insert(&key, &value, self.bucket_size) {
                return;
            }

            if bucket.depth == state.global_depth {
                state.global_depth += 1;
                // dir[i] and dir[i + old_size] alias the same bucket until
                // a split redirects them.
                let doubled: Vec<_> = state.dir.clone();
                state.dir.extend(doubled);
            }

            let depth = bucket.depth;
            let mask = 1usize << depth;
            let low_bucket = Arc::new(Bucket::new(depth + 1));
            let high_bucket = Arc::new(Bucket::new(depth + 1));
            state.num_buckets += 1;

            for (k, v) in bucket.items.lock().drain() {
                if hash_of(&k) & mask != 0 {
                    high_bucket.insert(&k, &v, usize::MAX);
                } else {
                    low_bucket.insert(&k, &v, usize::MAX);
                }
            }

            // Redirect every directory slot whose low `depth` bits match
            // the split bucket, by the new discriminator bit.
            let start = idx & (mask - 1);
            let dir_len = state.dir.len();
            let mut i = start;
            while i < dir_len {
                state.dir[i] = if i & mask != 0 {
                    high_bucket.clone()
                } else {
                    low_bucket.clone()
                };
                i += mask;
            }
        }
    }

    fn index_of(key: &K, global_depth: usize) -> usize {
        hash_of(key) & ((1usize << global_depth) - 1)
    }
}
