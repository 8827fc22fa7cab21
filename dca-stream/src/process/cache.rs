/// Undecoded bytes carried from one chunk to the next.
///
/// The cache never holds more than the unconsumed tail of the previous
/// chunk. Merging hands the old contents over to the caller, so the cache
/// is empty until [`retain`](ByteCache::retain) stores the next tail.
#[derive(Debug, Default)]
pub struct ByteCache {
    bytes: Vec<u8>,
}

impl ByteCache {
    /// Joins the cached tail with `chunk`, leaving the cache empty.
    pub fn merge(&mut self, chunk: Vec<u8>) -> Vec<u8> {
        if self.bytes.is_empty() {
            return chunk;
        }

        let mut merged = std::mem::take(&mut self.bytes);
        merged.extend_from_slice(&chunk);
        merged
    }

    /// Replaces the cache with `window[offset..]`.
    pub fn retain(&mut self, window: &[u8], offset: usize) {
        self.bytes = window.get(offset..).map(<[u8]>::to_vec).unwrap_or_default();
    }

    pub fn clear(&mut self) {
        self.bytes = Vec::new();
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

#[test]
fn merge_joins_tail_and_chunk() {
    let mut cache = ByteCache::default();

    let window = cache.merge(vec![1, 2, 3, 4, 5]);
    cache.retain(&window, 3);
    assert_eq!(cache.as_slice(), &[4, 5]);

    let window = cache.merge(vec![6, 7]);
    assert_eq!(window, [4, 5, 6, 7]);
    assert!(cache.is_empty());
}

#[test]
fn retain_past_end_empties() {
    let mut cache = ByteCache::default();
    cache.retain(&[1, 2, 3], 3);
    assert!(cache.is_empty());

    cache.retain(&[1, 2, 3], 7);
    assert_eq!(cache.len(), 0);
}
