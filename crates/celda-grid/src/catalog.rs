// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::FilterOption;
use anyhow::{Result, anyhow};
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Source of a reference list (companies, products, campaigns and so on).
pub trait CatalogLoader<T>: Send + Sync {
    fn load(&self) -> Result<Vec<T>>;
}

impl<T, F> CatalogLoader<T> for F
where
    F: Fn() -> Result<Vec<T>> + Send + Sync,
{
    fn load(&self) -> Result<Vec<T>> {
        self()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LoadState {
    Idle,
    Loading,
    Loaded,
    Failed(String),
}

struct Inner<T> {
    items: Vec<T>,
    state: LoadState,
}

/// Load-once cache over a [`CatalogLoader`]. Construct it once and hand out
/// references; concurrent callers of [`CatalogCache::ensure_loaded`] wait for
/// the load already in flight rather than starting another.
pub struct CatalogCache<T> {
    name: String,
    loader: Box<dyn CatalogLoader<T>>,
    inner: Mutex<Inner<T>>,
    ready: Condvar,
}

impl<T> fmt::Debug for CatalogCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogCache")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<T: Clone> CatalogCache<T> {
    pub fn new(
        name: impl Into<String>,
        loader: impl Fn() -> Result<Vec<T>> + Send + Sync + 'static,
    ) -> Self {
        Self::from_loader(name, loader)
    }

    pub fn from_loader(name: impl Into<String>, loader: impl CatalogLoader<T> + 'static) -> Self {
        Self {
            name: name.into(),
            loader: Box::new(loader),
            inner: Mutex::new(Inner {
                items: Vec::new(),
                state: LoadState::Idle,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads the catalog unless it already is. A failed load leaves the list
    /// empty and is retried by the next call.
    pub fn ensure_loaded(&self) -> Result<()> {
        let mut inner = self.lock();
        loop {
            let state = inner.state.clone();
            match state {
                LoadState::Loaded => return Ok(()),
                LoadState::Loading => {
                    inner = self
                        .ready
                        .wait_while(inner, |inner| inner.state == LoadState::Loading)
                        .unwrap_or_else(PoisonError::into_inner);
                    if let LoadState::Failed(message) = &inner.state {
                        return Err(anyhow!("load catalog {}: {message}", self.name));
                    }
                }
                LoadState::Idle | LoadState::Failed(_) => break,
            }
        }
        inner.state = LoadState::Loading;
        drop(inner);

        log::debug!("loading catalog {}", self.name);
        let result = self.loader.load();

        let mut inner = self.lock();
        let outcome = match result {
            Ok(items) => {
                inner.items = items;
                inner.state = LoadState::Loaded;
                Ok(())
            }
            Err(err) => {
                log::warn!("catalog {} failed to load: {err:#}", self.name);
                inner.items.clear();
                inner.state = LoadState::Failed(format!("{err:#}"));
                Err(err.context(format!("load catalog {}", self.name)))
            }
        };
        drop(inner);
        self.ready.notify_all();
        outcome
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().state == LoadState::Loaded
    }

    pub fn items(&self) -> Vec<T> {
        self.lock().items.clone()
    }

    pub fn options(
        &self,
        label: impl Fn(&T) -> String,
        value: impl Fn(&T) -> String,
    ) -> Vec<FilterOption> {
        self.lock()
            .items
            .iter()
            .map(|item| FilterOption::new(label(item), value(item)))
            .collect()
    }

    pub fn by_key<K: PartialEq>(&self, key: impl Fn(&T) -> K, wanted: &K) -> Option<T> {
        self.lock()
            .items
            .iter()
            .find(|item| &key(item) == wanted)
            .cloned()
    }

    /// Forgets the loaded list so the next call reloads it.
    pub fn invalidate(&self) {
        let mut inner = self.lock();
        if inner.state != LoadState::Loading {
            inner.items.clear();
            inner.state = LoadState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CatalogCache;
    use crate::FilterOption;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Company {
        code: String,
        name: String,
    }

    fn company(code: &str, name: &str) -> Company {
        Company {
            code: code.to_owned(),
            name: name.to_owned(),
        }
    }

    #[test]
    fn concurrent_callers_share_one_load() -> anyhow::Result<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = CatalogCache::new("companies", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            Ok(vec![company("AC", "Acme")])
        });

        thread::scope(|scope| {
            let handles = (0..4)
                .map(|_| scope.spawn(|| cache.ensure_loaded()))
                .collect::<Vec<_>>();
            for handle in handles {
                assert!(matches!(handle.join(), Ok(Ok(()))));
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        cache.ensure_loaded()?;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.items().len(), 1);
        Ok(())
    }

    #[test]
    fn failures_are_retried_on_next_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = CatalogCache::new("products", move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("timeout");
            }
            Ok(vec![company("P1", "Diario")])
        });

        assert!(cache.ensure_loaded().is_err());
        assert!(!cache.is_loaded());
        assert!(cache.items().is_empty());
        assert!(cache.ensure_loaded().is_ok());
        assert!(cache.is_loaded());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn options_and_lookup_by_key() -> anyhow::Result<()> {
        let cache = CatalogCache::new("companies", || {
            Ok(vec![company("AC", "Acme"), company("BX", "Box")])
        });
        cache.ensure_loaded()?;
        assert_eq!(
            cache.options(|c| c.name.clone(), |c| c.code.clone()),
            vec![FilterOption::new("Acme", "AC"), FilterOption::new("Box", "BX")]
        );
        assert_eq!(
            cache.by_key(|c| c.code.clone(), &"BX".to_owned()),
            Some(company("BX", "Box"))
        );

        cache.invalidate();
        assert!(!cache.is_loaded());
        Ok(())
    }
}
