//! URL registry: `identity → set<PublishedUrl>` plus a reverse index for
//! O(1) lookup, the way the teacher's `ConnectionRegistry` keeps a
//! session↔room bidirectional map. Guarded only by the actor discipline in
//! [`crate::core`] — no internal locking, since exactly one task ever
//! touches this structure.

use std::collections::{HashMap, HashSet};

use veilgate_core::Environment;

/// Visually-unambiguous token alphabet for published URLs.
pub const TOKEN_ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyz23456789";

/// Minimum/maximum token length.
pub const TOKEN_MIN_LEN: usize = 4;
/// See [`TOKEN_MIN_LEN`].
pub const TOKEN_MAX_LEN: usize = 24;

/// How long an identity's registry entry may go unseen before the keepalive
/// sweeper prunes it (§9 design notes).
pub const IDENTITY_PRUNE_AFTER_SECS: u64 = 30 * 24 * 3600;

/// A registered public URL: `http://<onion-host>.onion/<token>`, stored in
/// canonical (lowercase) form.
pub type PublishedUrl = String;

/// One identity's registry entry: its owned URLs and when it was last seen
/// (updated on every handshake that reclaims it).
#[derive(Debug, Default)]
struct IdentityEntry {
    urls: HashSet<PublishedUrl>,
    last_seen_secs: u64,
}

/// Mapping of session identity to its owned published URLs, with a reverse
/// index from URL back to owning identity for O(1) lookup.
#[derive(Debug, Default)]
pub struct UrlRegistry {
    onion_host: String,
    identities: HashMap<String, IdentityEntry>,
    by_url: HashMap<PublishedUrl, String>,
}

impl UrlRegistry {
    /// Create an empty registry for the given onion hostname.
    #[must_use]
    pub fn new(onion_host: impl Into<String>) -> Self {
        Self { onion_host: onion_host.into(), identities: HashMap::new(), by_url: HashMap::new() }
    }

    /// Record that `identity` was just seen (handshake reclaimed or created
    /// its entry), updating its prune clock.
    pub fn touch(&mut self, identity: &str, now_secs: u64) {
        self.identities.entry(identity.to_string()).or_default().last_seen_secs = now_secs;
    }

    /// Draw a token of random length in `[TOKEN_MIN_LEN, TOKEN_MAX_LEN]`
    /// from [`TOKEN_ALPHABET`], using the environment's random byte stream
    /// (rejection-sampling each byte against the alphabet so the
    /// distribution stays uniform rather than biased by a modulo).
    fn random_token(env: &impl Environment) -> String {
        let mut len_byte = [0u8; 1];
        env.random_bytes(&mut len_byte);
        let span = (TOKEN_MAX_LEN - TOKEN_MIN_LEN + 1) as u8;
        let len = TOKEN_MIN_LEN + (len_byte[0] % span) as usize;

        let mut token = String::with_capacity(len);
        let mut byte = [0u8; 1];
        while token.len() < len {
            env.random_bytes(&mut byte);
            // Reject bytes that would bias the distribution: alphabet has
            // 32 symbols, so only reject the top partial bucket.
            let bucket_count = 256 / TOKEN_ALPHABET.len();
            if (byte[0] as usize) >= bucket_count * TOKEN_ALPHABET.len() {
                continue;
            }
            token.push(TOKEN_ALPHABET[byte[0] as usize % TOKEN_ALPHABET.len()] as char);
        }
        token
    }

    /// Create a new unique URL owned by `identity`.
    pub fn create(&mut self, identity: &str, env: &impl Environment) -> PublishedUrl {
        loop {
            let token = Self::random_token(env);
            let candidate = format!("http://{}.onion/{token}", self.onion_host).to_lowercase();
            if self.by_url.contains_key(&candidate) {
                continue;
            }
            self.identities.entry(identity.to_string()).or_default().urls.insert(candidate.clone());
            self.by_url.insert(candidate.clone(), identity.to_string());
            return candidate;
        }
    }

    /// Rotate `old` (owned by `identity`) to a freshly-generated URL,
    /// atomically removing the old one.
    ///
    /// # Errors
    ///
    /// Returns an error if `old` is not currently owned by `identity`.
    pub fn change(
        &mut self,
        identity: &str,
        old: &str,
        env: &impl Environment,
    ) -> Result<PublishedUrl, UrlNotOwned> {
        let old = old.to_lowercase();
        if self.by_url.get(&old).map(String::as_str) != Some(identity) {
            return Err(UrlNotOwned);
        }
        let fresh = self.create(identity, env);
        self.by_url.remove(&old);
        if let Some(entry) = self.identities.get_mut(identity) {
            entry.urls.remove(&old);
        }
        Ok(fresh)
    }

    /// Remove `url` from `identity`'s set.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not currently owned by `identity`.
    pub fn delete(&mut self, identity: &str, url: &str) -> Result<(), UrlNotOwned> {
        let url = url.to_lowercase();
        if self.by_url.get(&url).map(String::as_str) != Some(identity) {
            return Err(UrlNotOwned);
        }
        self.by_url.remove(&url);
        if let Some(entry) = self.identities.get_mut(identity) {
            entry.urls.remove(&url);
        }
        Ok(())
    }

    /// Whether `identity` owns `url`.
    #[must_use]
    pub fn owns(&self, identity: &str, url: &str) -> bool {
        self.by_url.get(&url.to_lowercase()).map(String::as_str) == Some(identity)
    }

    /// Resolve a full published URL back to its owning identity.
    #[must_use]
    pub fn lookup(&self, url: &str) -> Option<&str> {
        self.by_url.get(&url.to_lowercase()).map(String::as_str)
    }

    /// Build the canonical (lowercase) full URL for a raw path token, the way
    /// the public-facing HTTP surface reconstructs it from a request path
    /// before calling [`UrlRegistry::lookup`].
    #[must_use]
    pub fn full_url(&self, token: &str) -> PublishedUrl {
        format!("http://{}.onion/{token}", self.onion_host).to_lowercase()
    }

    /// Prune every identity entry unseen for more than
    /// [`IDENTITY_PRUNE_AFTER_SECS`], releasing its URLs. Returns the pruned
    /// identities, for logging.
    pub fn prune_stale(&mut self, now_secs: u64) -> Vec<String> {
        let stale: Vec<String> = self
            .identities
            .iter()
            .filter(|(_, entry)| {
                now_secs.saturating_sub(entry.last_seen_secs) > IDENTITY_PRUNE_AFTER_SECS
            })
            .map(|(identity, _)| identity.clone())
            .collect();

        for identity in &stale {
            if let Some(entry) = self.identities.remove(identity) {
                for url in entry.urls {
                    self.by_url.remove(&url);
                }
            }
        }
        stale
    }

    /// Whether `identity` has a registry entry at all (even if empty).
    #[must_use]
    pub fn has_identity(&self, identity: &str) -> bool {
        self.identities.contains_key(identity)
    }
}

/// `Change URL`/`Delete URL` targeted a URL not owned by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrlNotOwned;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestEnv;

    #[test]
    fn create_produces_unique_lowercase_urls() {
        let mut registry = UrlRegistry::new("xyz");
        let env = TestEnv::new();
        let a = registry.create("alice", &env);
        let b = registry.create("alice", &env);
        assert_ne!(a, b);
        assert_eq!(a, a.to_lowercase());
        assert_eq!(registry.lookup(&a), Some("alice"));
    }

    #[test]
    fn change_rotates_and_removes_old() {
        let mut registry = UrlRegistry::new("xyz");
        let env = TestEnv::new();
        let url = registry.create("alice", &env);
        let rotated = registry.change("alice", &url, &env).unwrap();
        assert_ne!(url, rotated);
        assert_eq!(registry.lookup(&url), None);
        assert_eq!(registry.lookup(&rotated), Some("alice"));
    }

    #[test]
    fn change_rejects_unowned_url() {
        let mut registry = UrlRegistry::new("xyz");
        let env = TestEnv::new();
        let url = registry.create("alice", &env);
        assert_eq!(registry.change("bob", &url, &env), Err(UrlNotOwned));
    }

    #[test]
    fn delete_rejects_unowned_url() {
        let mut registry = UrlRegistry::new("xyz");
        let env = TestEnv::new();
        let url = registry.create("alice", &env);
        assert_eq!(registry.delete("bob", &url), Err(UrlNotOwned));
        assert!(registry.delete("alice", &url).is_ok());
        assert_eq!(registry.lookup(&url), None);
    }

    #[test]
    fn owns_is_case_insensitive() {
        let mut registry = UrlRegistry::new("xyz");
        let env = TestEnv::new();
        let url = registry.create("alice", &env);
        assert!(registry.owns("alice", &url.to_uppercase()));
    }

    #[test]
    fn prune_stale_releases_urls() {
        let mut registry = UrlRegistry::new("xyz");
        let env = TestEnv::new();
        let url = registry.create("alice", &env);
        registry.touch("alice", 1_000);
        let pruned = registry.prune_stale(1_000 + IDENTITY_PRUNE_AFTER_SECS + 1);
        assert_eq!(pruned, vec!["alice".to_string()]);
        assert_eq!(registry.lookup(&url), None);
    }

    #[test]
    fn prune_stale_keeps_recently_seen() {
        let mut registry = UrlRegistry::new("xyz");
        registry.touch("alice", 1_000);
        let pruned = registry.prune_stale(1_500);
        assert!(pruned.is_empty());
        assert!(registry.has_identity("alice"));
    }
}
