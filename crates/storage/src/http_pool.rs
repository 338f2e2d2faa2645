//! HTTP Client Pool: one keep-alive `reqwest::Client` per daemon base URL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Lazily builds and caches a tuned `reqwest::Client` per daemon base URL so
/// every read of a given remote's sidecar reuses the same connection pool
/// instead of paying a new TCP/TLS handshake per request.
pub struct DaemonClientPool {
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl DaemonClientPool {
    pub fn new() -> Self {
        Self { clients: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, base_url: &str) -> reqwest::Client {
        let mut clients = self.clients.lock().expect("client pool mutex poisoned");
        if let Some(client) = clients.get(base_url) {
            return client.clone();
        }
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        clients.insert(base_url.to_string(), client.clone());
        client
    }

    pub fn len(&self) -> usize {
        self.clients.lock().expect("client pool mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.clients.lock().expect("client pool mutex poisoned").clear();
    }
}

impl Default for DaemonClientPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_client_for_same_base_url() {
        let pool = DaemonClientPool::new();
        let a = pool.get("http://127.0.0.1:19000");
        let b = pool.get("http://127.0.0.1:19000");
        assert_eq!(pool.len(), 1);
        drop((a, b));
    }

    #[test]
    fn distinct_urls_get_distinct_entries() {
        let pool = DaemonClientPool::new();
        pool.get("http://127.0.0.1:19000");
        pool.get("http://127.0.0.1:19001");
        assert_eq!(pool.len(), 2);
    }
}
