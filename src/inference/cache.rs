use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Keyed load-once cache for expensive inference state.
///
/// The first caller for a key runs the loader; concurrent callers for the
/// same key wait for it instead of loading again. A failed load leaves the
/// slot empty so a later call can retry.
pub struct PipelineCache<K, V> {
    slots: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for PipelineCache<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> PipelineCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_try_load<E, F, Fut>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slots.entry(key).or_insert_with(|| Arc::new(OnceCell::new())).clone()
        };
        slot.get_or_try_init(load).await.cloned()
    }

    /// Number of keys with a completed load
    pub fn loaded_count(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.values().filter(|slot| slot.initialized()).count()
    }

    /// Drop every cached value.
    pub fn clear(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_loads_once() {
        let cache = Arc::new(PipelineCache::<String, u32>::new());
        let loads = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let loads = loads.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_try_load("modnet".to_string(), move || async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(42)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.loaded_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let cache = PipelineCache::<&'static str, u32>::new();

        let first = cache.get_or_try_load("whisper", || async { Err::<u32, _>("offline") }).await;
        assert_eq!(first, Err("offline"));
        assert_eq!(cache.loaded_count(), 0);

        let second = cache.get_or_try_load("whisper", || async { Ok::<_, &str>(7) }).await;
        assert_eq!(second, Ok(7));
    }

    #[tokio::test]
    async fn test_keys_are_independent_and_clearable() {
        let cache = PipelineCache::<&'static str, &'static str>::new();
        cache.get_or_try_load("a", || async { Ok::<_, ()>("one") }).await.unwrap();
        cache.get_or_try_load("b", || async { Ok::<_, ()>("two") }).await.unwrap();
        let cached = cache.get_or_try_load("a", || async { Ok::<_, ()>("reloaded") }).await.unwrap();
        assert_eq!(cached, "one");
        assert_eq!(cache.loaded_count(), 2);

        cache.clear();
        assert_eq!(cache.loaded_count(), 0);
    }
}
