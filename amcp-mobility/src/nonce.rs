//! Nonce de-duplication at the destination (§4.6 "Duplicate token (same
//! nonce) at D: silently acknowledged; not instantiated twice").

use dashmap::DashSet;

#[derive(Default)]
pub struct NonceStore {
    seen: DashSet<String>,
}

impl NonceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `nonce` as seen; returns `true` the first time a given
    /// nonce is observed, `false` on every subsequent call (duplicate).
    pub fn observe(&self, nonce: &str) -> bool {
        self.seen.insert(nonce.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_observation_of_same_nonce_is_a_duplicate() {
        let store = NonceStore::new();
        assert!(store.observe("n1"));
        assert!(!store.observe("n1"));
        assert!(store.observe("n2"));
    }
}
