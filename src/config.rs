use std::{fs, path::Path};

use serde::Deserialize;

use crate::model::HandleSide;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// number of async worker threads, range [1, 32768), defaults to 8
    pub async_worker_threads: u16,
    /// mutation debounce config
    pub debounce: DebounceConfig,
    /// remote retry config
    pub retry: RetryConfig,
    /// offline queue config
    pub queue: QueueConfig,
    /// connection ports available per node side
    pub ports: PortCapacity,
    /// remote persistence API config
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// quiescence window in milliseconds before a coalesced mutation persists
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// additional attempts after the first failure (total attempts = retries + 1)
    pub retries: u32,
    /// base backoff in milliseconds, doubled per attempt
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// window in which a duplicate (kind, entity) enqueue is dropped
    pub dedup_window_ms: u64,
    /// directory holding one persisted queue file per diagram
    pub dir: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PortCapacity {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// base URL of the persistence API
    pub base_url: String,
    /// per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            async_worker_threads: 8,
            debounce: DebounceConfig::default(),
            retry: RetryConfig::default(),
            queue: QueueConfig::default(),
            ports: PortCapacity::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            delay_ms: 500,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay_ms: 240,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 5000,
            dir: "toposync-queue".to_string(),
        }
    }
}

impl Default for PortCapacity {
    fn default() -> Self {
        Self {
            top: 4,
            right: 4,
            bottom: 4,
            left: 4,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl PortCapacity {
    /// Ports available on the given side.
    pub fn for_side(
        &self,
        side: HandleSide,
    ) -> u32 {
        match side {
            HandleSide::Top => self.top,
            HandleSide::Right => self.right,
            HandleSide::Bottom => self.bottom,
            HandleSide::Left => self.left,
        }
    }
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Self {
        let data = fs::read_to_string(path.as_ref()).expect(&format!("failed to load config file {:?}", path.as_ref()));

        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Self {
        let config = toml::from_str::<Config>(toml_str).expect("failed to parse the toml str");
        config
    }
}

#[cfg(test)]
mod test {
    use crate::Config;

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
        async_worker_threads = 4

        [debounce]
        delay_ms = 250

        [retry]
        retries = 3
        base_delay_ms = 180

        [ports]
        right = 6

        [remote]
        base_url = "https://dashboard.example.com/api"
        "#;
        let config = Config::load_from_str(toml_str);
        assert_eq!(config.async_worker_threads, 4);
        assert_eq!(config.debounce.delay_ms, 250);
        assert_eq!(config.retry.retries, 3);
        assert_eq!(config.retry.base_delay_ms, 180);
        assert_eq!(config.ports.right, 6);
        assert_eq!(config.ports.top, 4);
        assert_eq!(config.queue.dedup_window_ms, 5000);
        assert_eq!(config.remote.base_url, "https://dashboard.example.com/api");
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.debounce.delay_ms, 500);
        assert_eq!(config.retry.retries, 2);
        assert_eq!(config.ports.left, 4);
    }
}
