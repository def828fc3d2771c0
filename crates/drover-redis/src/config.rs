//! Configuration for the Redis broker adapter.

/// Connection and naming configuration shared by the queue handles of one
/// worker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Redis connection URL
    pub redis_url: String,

    /// Key prefix for the commands, completion, and errors streams
    pub namespace: String,

    /// Consumer group name
    pub group: String,

    /// Consumer name (unique per worker instance)
    pub consumer: String,

    /// XREADGROUP block timeout in milliseconds
    pub block_timeout_ms: u64,
}

impl BrokerConfig {
    /// Create a new BrokerConfig for `namespace`.
    ///
    /// Uses default values for the remaining settings, which can be
    /// overridden via environment variables.
    pub fn new(redis_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();

        let block_timeout_ms: u64 = std::env::var("DROVER_BLOCK_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);

        Self {
            redis_url: redis_url.into(),
            group: format!("{namespace}-workers"),
            consumer: format!("drover-{}", uuid::Uuid::new_v4()),
            namespace,
            block_timeout_ms,
        }
    }

    /// Key of the inbound commands stream.
    pub fn commands_stream(&self) -> String {
        format!("{}:commands", self.namespace)
    }

    /// Key of the completion stream.
    pub fn completion_stream(&self) -> String {
        format!("{}:completion", self.namespace)
    }

    /// Key of the error stream.
    pub fn errors_stream(&self) -> String {
        format!("{}:errors", self.namespace)
    }
}
