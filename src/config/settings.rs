use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// One section per component: the WebSocket server, the ingestion queue,
/// the message store, the feed generator and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub queue: QueueSettings,
    pub store: StoreSettings,
    pub feed: FeedSettings,
    pub log: LogSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the server will bind to.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    Sled,
}

/// Ingestion queue and durable log.
///
/// `workers = 0` starts one insertion worker per available CPU.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct QueueSettings {
    pub workers: usize,
    pub backend: Backend,
    pub path: String,
    pub consumer_group: String,
    pub start_offset: String,
}

/// Message store. `max_messages` caps retention for the sled store.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StoreSettings {
    pub backend: Backend,
    pub path: String,
    pub max_messages: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FeedSettings {
    pub channel_capacity: usize,
    pub delivery_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Every field is optional. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub queue: Option<PartialQueueSettings>,
    pub store: Option<PartialStoreSettings>,
    pub feed: Option<PartialFeedSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialQueueSettings {
    pub workers: Option<usize>,
    pub backend: Option<Backend>,
    pub path: Option<String>,
    pub consumer_group: Option<String>,
    pub start_offset: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialStoreSettings {
    pub backend: Option<Backend>,
    pub path: Option<String>,
    pub max_messages: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialFeedSettings {
    pub channel_capacity: Option<usize>,
    pub delivery_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 9876,
            },
            queue: QueueSettings {
                workers: 0,
                backend: Backend::Memory,
                path: "livefeed_log".to_string(),
                consumer_group: "service-worker".to_string(),
                start_offset: "latest".to_string(),
            },
            store: StoreSettings {
                backend: Backend::Memory,
                path: "livefeed_db".to_string(),
                max_messages: None,
            },
            feed: FeedSettings {
                channel_capacity: 64,
                delivery_timeout_ms: 100,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fills every missing value of `partial` from `Settings::default()`.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();

        Self {
            server: ServerSettings {
                host: partial
                    .server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(default.server.host),
                port: partial
                    .server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(default.server.port),
            },
            queue: QueueSettings {
                workers: partial
                    .queue
                    .as_ref()
                    .and_then(|q| q.workers)
                    .unwrap_or(default.queue.workers),
                backend: partial
                    .queue
                    .as_ref()
                    .and_then(|q| q.backend)
                    .unwrap_or(default.queue.backend),
                path: partial
                    .queue
                    .as_ref()
                    .and_then(|q| q.path.clone())
                    .unwrap_or(default.queue.path),
                consumer_group: partial
                    .queue
                    .as_ref()
                    .and_then(|q| q.consumer_group.clone())
                    .unwrap_or(default.queue.consumer_group),
                start_offset: partial
                    .queue
                    .as_ref()
                    .and_then(|q| q.start_offset.clone())
                    .unwrap_or(default.queue.start_offset),
            },
            store: StoreSettings {
                backend: partial
                    .store
                    .as_ref()
                    .and_then(|s| s.backend)
                    .unwrap_or(default.store.backend),
                path: partial
                    .store
                    .as_ref()
                    .and_then(|s| s.path.clone())
                    .unwrap_or(default.store.path),
                max_messages: partial
                    .store
                    .as_ref()
                    .and_then(|s| s.max_messages)
                    .or(default.store.max_messages),
            },
            feed: FeedSettings {
                channel_capacity: partial
                    .feed
                    .as_ref()
                    .and_then(|f| f.channel_capacity)
                    .unwrap_or(default.feed.channel_capacity),
                delivery_timeout_ms: partial
                    .feed
                    .as_ref()
                    .and_then(|f| f.delivery_timeout_ms)
                    .unwrap_or(default.feed.delivery_timeout_ms),
            },
            log: LogSettings {
                level: partial
                    .log
                    .as_ref()
                    .and_then(|l| l.level.clone())
                    .unwrap_or(default.log.level),
            },
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
