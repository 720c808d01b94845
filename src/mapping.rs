use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{info, warn};

use crate::dns::{canonicalize, display_without_dot};
use crate::error::ProxyError;

#[derive(Debug, Deserialize)]
struct SeedFile {
    mappings: HashMap<String, Ipv4Addr>,
}

/// Authoritative local name→IPv4 map. Reads are served from a
/// copy-on-write snapshot (`Arc<HashMap<..>>` behind a short-lived read
/// lock) so the hot path in `pipeline.rs` never contends with writers
/// and always observes a consistent view.
pub struct MappingStore {
    shadow: RwLock<Arc<HashMap<String, Ipv4Addr>>>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self {
            shadow: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Loads the `{"mappings": {domain: ipv4}}` JSON format at startup.
    /// Domains without a trailing dot are normalized; an absent file is
    /// not an error.
    pub fn load_seed_file(&self, path: &str) -> Result<usize, ProxyError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path, "no custom-mapping seed file found, starting empty");
                return Ok(0);
            }
            Err(err) => return Err(err.into()),
        };

        let seed: SeedFile = serde_json::from_str(&contents)
            .map_err(|err| ProxyError::StorageUnavailable(format!("invalid seed file: {err}")))?;

        let mut map = HashMap::with_capacity(seed.mappings.len());
        for (domain, ip) in seed.mappings {
            map.insert(canonicalize(&domain), ip);
        }
        let count = map.len();
        *self.shadow.write() = Arc::new(map);
        info!(count, path, "loaded custom-mapping seed file");
        Ok(count)
    }

    /// Snapshot of every mapping, keyed without the trailing dot.
    pub fn get_all(&self) -> HashMap<String, Ipv4Addr> {
        self.shadow
            .read()
            .iter()
            .map(|(domain, ip)| (display_without_dot(domain), *ip))
            .collect()
    }

    /// Looks up `domain` (canonicalized before comparison).
    pub fn get(&self, domain: &str) -> Option<Ipv4Addr> {
        self.shadow.read().get(&canonicalize(domain)).copied()
    }

    /// Inserts or overwrites a mapping. Reaches the hot-path shadow
    /// immediately, without a server restart.
    pub fn put(&self, domain: &str, ip: Ipv4Addr) {
        let key = canonicalize(domain);
        let mut guard = self.shadow.write();
        let mut next = HashMap::clone(&guard);
        next.insert(key, ip);
        *guard = Arc::new(next);
    }

    /// Removes a mapping; `NotFound` if it was absent.
    pub fn delete(&self, domain: &str) -> Result<(), ProxyError> {
        let key = canonicalize(domain);
        let mut guard = self.shadow.write();
        if !guard.contains_key(&key) {
            warn!(domain, "delete requested for unknown mapping");
            return Err(ProxyError::MappingNotFound(domain.to_string()));
        }
        let mut next = HashMap::clone(&guard);
        next.remove(&key);
        *guard = Arc::new(next);
        Ok(())
    }
}

impl Default for MappingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_round_trip() {
        let store = MappingStore::new();
        store.put("server.local", Ipv4Addr::new(192, 168, 0, 30));
        assert_eq!(
            store.get("SERVER.LOCAL"),
            Some(Ipv4Addr::new(192, 168, 0, 30))
        );
        assert_eq!(
            store.get_all().get("server.local"),
            Some(&Ipv4Addr::new(192, 168, 0, 30))
        );

        store.delete("server.local.").unwrap();
        assert_eq!(store.get("server.local"), None);
    }

    #[test]
    fn delete_missing_is_not_found() {
        let store = MappingStore::new();
        let err = store.delete("missing.example.").unwrap_err();
        assert!(matches!(err, ProxyError::MappingNotFound(_)));
    }

    #[test]
    fn put_overwrites_existing() {
        let store = MappingStore::new();
        store.put("a.example", Ipv4Addr::new(1, 1, 1, 1));
        store.put("a.example", Ipv4Addr::new(2, 2, 2, 2));
        assert_eq!(store.get("a.example"), Some(Ipv4Addr::new(2, 2, 2, 2)));
    }

    #[test]
    fn loads_seed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.json");
        std::fs::write(
            &path,
            r#"{"mappings": {"server.local": "192.168.0.30"}}"#,
        )
        .unwrap();

        let store = MappingStore::new();
        let count = store.load_seed_file(path.to_str().unwrap()).unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            store.get("server.local."),
            Some(Ipv4Addr::new(192, 168, 0, 30))
        );
    }

    #[test]
    fn missing_seed_file_is_not_an_error() {
        let store = MappingStore::new();
        let count = store.load_seed_file("/nonexistent/path.json").unwrap();
        assert_eq!(count, 0);
    }
}
