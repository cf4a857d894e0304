use std::sync::atomic::{AtomicU64, Ordering};

/// Total ordering over attempts to produce the freshest sell-side price.
///
/// Each superseding action takes a token with [`Generations::next`]; on
/// completion the token is checked against [`Generations::current`] and stale
/// work is discarded, regardless of wall-clock completion order. Instance
/// scoped, so independent coordinators (and parallel tests) never interfere.
#[derive(Debug, Default)]
pub struct Generations {
    counter: AtomicU64,
}

impl Generations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next token. Call exactly once per superseding action.
    pub fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, token: u64) -> bool {
        self.current() == token
    }
}
