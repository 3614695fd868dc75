use bytes::Bytes;

/// A response observed from an origin, stored verbatim (status line, headers, and body).
#[derive(Debug, Clone)]
pub(super) struct CacheEntry {
    pub payload: Bytes,
}

impl CacheEntry {
    pub(super) fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    pub(super) fn size(&self) -> usize {
        self.payload.len()
    }
}
