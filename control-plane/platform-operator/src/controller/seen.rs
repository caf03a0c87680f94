use std::collections::HashSet;

use tokio::sync::RwLock;

/// Remembers which one-off actions already ran for a resource generation.
///
/// Keys are `(uid, generation, tag)`. Entries of older generations are
/// dropped as soon as a newer generation of the same resource is marked.
#[derive(Default)]
pub struct SeenCache {
    inner: RwLock<HashSet<(String, i64, &'static str)>>,
}

impl SeenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time `tag` is marked for this uid and generation.
    pub async fn first_time(&self, uid: &str, generation: i64, tag: &'static str) -> bool {
        let key = (uid.to_string(), generation, tag);
        if self.inner.read().await.contains(&key) {
            return false;
        }
        let mut w = self.inner.write().await;
        w.retain(|(u, g, _)| u != uid || *g >= generation);
        w.insert(key)
    }

    pub async fn forget(&self, uid: &str) {
        self.inner.write().await.retain(|(u, _, _)| u != uid);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn once_per_generation() {
        let seen = SeenCache::new();
        assert!(seen.first_time("u1", 1, "start").await);
        assert!(!seen.first_time("u1", 1, "start").await);
        assert!(seen.first_time("u1", 1, "upgrade").await);
        assert!(seen.first_time("u2", 1, "start").await);

        assert!(seen.first_time("u1", 2, "start").await);
        // generation 1 entries of u1 are gone, u2 untouched
        assert_eq!(seen.len().await, 2);

        seen.forget("u1").await;
        assert_eq!(seen.len().await, 1);
        assert!(seen.first_time("u1", 2, "start").await);
    }
}
