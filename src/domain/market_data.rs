//! Memoized, per-key locked OHLCV store.
//!
//! At most one fetch per [`MarketKey`] is in flight at any time; different
//! keys fetch concurrently. The lock table is guarded by a short-lived mutex
//! that is never held across a fetch.

use crate::domain::Timestamp;
use crate::domain::error::MarketDataError;
use crate::domain::ohlcv::OhlcvFrame;
use crate::ports::market_data_port::{FetchRequest, MarketDataPort, MarketKey};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct MarketDataStore {
    fetcher: Arc<dyn MarketDataPort>,
    start_time: Option<Timestamp>,
    frames: RwLock<HashMap<MarketKey, Arc<OhlcvFrame>>>,
    locks: Mutex<HashMap<MarketKey, Arc<Mutex<()>>>>,
}

impl MarketDataStore {
    pub fn new(fetcher: Arc<dyn MarketDataPort>) -> Self {
        MarketDataStore {
            fetcher,
            start_time: None,
            frames: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Earliest bar requested from the fetcher.
    pub fn with_start_time(mut self, start_time: Timestamp) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Returns an owned copy of the series for `key`.
    ///
    /// Fetches when `force_fetch` is set or nothing is cached, passing the
    /// cached frame to the fetcher so it can append incrementally. A failed
    /// fetch leaves the cached entry in place and reports it as
    /// [`MarketDataError::stale`].
    pub fn get(&self, key: &MarketKey, force_fetch: bool) -> Result<OhlcvFrame, MarketDataError> {
        info!(%key, force_fetch, "get ohlcv");

        let lock = self.key_lock(key);
        let _guard = lock.lock();

        let previous = self.frames.read().get(key).cloned();
        if !force_fetch {
            if let Some(frame) = &previous {
                return Ok(OhlcvFrame::clone(frame));
            }
        }

        let request = FetchRequest {
            key: key.clone(),
            start_time: self.start_time,
        };
        match self.fetcher.fetch_ohlcv(&request, previous.as_deref()) {
            Ok(frame) => {
                let stored = Arc::new(frame);
                self.frames.write().insert(key.clone(), Arc::clone(&stored));
                Ok(OhlcvFrame::clone(&stored))
            }
            Err(e) => {
                warn!(%key, error = %e, "fetch failed, keeping cached entry");
                Err(MarketDataError {
                    key: key.to_string(),
                    reason: e.to_string(),
                    stale: previous.map(|f| Box::new(OhlcvFrame::clone(&f))),
                })
            }
        }
    }

    /// Cached copy without fetching.
    pub fn cached(&self, key: &MarketKey) -> Option<OhlcvFrame> {
        self.frames.read().get(key).map(|f| OhlcvFrame::clone(f))
    }

    fn key_lock(&self, key: &MarketKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(key.clone()).or_default())
    }
}
