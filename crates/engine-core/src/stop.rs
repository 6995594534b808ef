use crate::state::SessionStore;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Polled cooperative stop request. Implementations never fail: a signal
/// that cannot be read counts as "not requested".
#[async_trait]
pub trait StopSignal: Send + Sync {
    async fn is_stop_requested(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverStop;

#[async_trait]
impl StopSignal for NeverStop {
    async fn is_stop_requested(&self) -> bool {
        false
    }
}

/// Reads the stop flag of one mapping from the session store.
pub struct StoreStopSignal {
    store: Arc<dyn SessionStore>,
    mapref: String,
}

impl StoreStopSignal {
    pub fn new(store: Arc<dyn SessionStore>, mapref: &str) -> Self {
        StoreStopSignal {
            store,
            mapref: mapref.to_string(),
        }
    }
}

#[async_trait]
impl StopSignal for StoreStopSignal {
    async fn is_stop_requested(&self) -> bool {
        match self.store.is_stop_requested(&self.mapref).await {
            Ok(requested) => requested,
            Err(e) => {
                warn!(mapref = %self.mapref, error = %e, "Failed to read stop request");
                false
            }
        }
    }
}

/// Bridges process signals (Ctrl-C, SIGTERM) into the polled model.
#[derive(Debug, Clone)]
pub struct TokenStopSignal {
    token: CancellationToken,
}

impl TokenStopSignal {
    pub fn new(token: CancellationToken) -> Self {
        TokenStopSignal { token }
    }
}

#[async_trait]
impl StopSignal for TokenStopSignal {
    async fn is_stop_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Requested as soon as any inner signal is.
#[derive(Default, Clone)]
pub struct AnyStopSignal {
    signals: Vec<Arc<dyn StopSignal>>,
}

impl AnyStopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, signal: Arc<dyn StopSignal>) -> Self {
        self.signals.push(signal);
        self
    }
}

#[async_trait]
impl StopSignal for AnyStopSignal {
    async fn is_stop_requested(&self) -> bool {
        for signal in &self.signals {
            if signal.is_stop_requested().await {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::memory::MemorySessionStore;

    #[tokio::test]
    async fn test_store_and_token_signals_combine() {
        let store = Arc::new(MemorySessionStore::new());
        let token = CancellationToken::new();
        let signal = AnyStopSignal::new()
            .with(Arc::new(StoreStopSignal::new(store.clone(), "M1")))
            .with(Arc::new(TokenStopSignal::new(token.clone())));

        assert!(!signal.is_stop_requested().await);

        store.request_stop("M2", true).await.unwrap();
        assert!(!signal.is_stop_requested().await);

        store.request_stop("M1", true).await.unwrap();
        assert!(signal.is_stop_requested().await);

        store.request_stop("M1", false).await.unwrap();
        token.cancel();
        assert!(signal.is_stop_requested().await);
        assert!(!NeverStop.is_stop_requested().await);
    }
}
