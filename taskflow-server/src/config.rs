//! Process configuration, loaded from `TASKFLOW_*` environment variables at
//! startup (config-tree dots become underscores, e.g. `server.http.port` →
//! `TASKFLOW_SERVER_HTTP_PORT`).

use std::collections::HashMap;
use std::time::Duration;

use taskflow_core::rpc::ClientConfig;

/// Complete runtime configuration.
///
/// Every field has a default so the processes work out-of-the-box against a
/// local Redis.
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub http: HttpConfig,
    pub worker: WorkerSettings,
    pub redis: RedisConfig,
    pub queues: QueueWeights,
    pub progress: ProgressSettings,
    pub grpc: GrpcServicesConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `development` or `production`.
    pub env: String,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Maximum concurrent handlers.
    pub concurrency: usize,
    pub health: WorkerHealthConfig,
}

#[derive(Debug, Clone)]
pub struct WorkerHealthConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub addr: String,
    pub password: String,
    pub db: i64,
}

/// Relative dispatch weights of the fixed queue set.
#[derive(Debug, Clone)]
pub struct QueueWeights {
    pub critical: u32,
    pub high: u32,
    pub default: u32,
    pub low: u32,
}

impl QueueWeights {
    /// Queue names with weights, ordered heaviest first.
    pub fn as_vec(&self) -> Vec<(String, u32)> {
        vec![
            ("critical".to_owned(), self.critical),
            ("high".to_owned(), self.high),
            ("default".to_owned(), self.default),
            ("low".to_owned(), self.low),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ProgressSettings {
    pub max_len: u64,
    pub ttl: Duration,
    pub read_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GrpcServicesConfig {
    pub enabled: bool,
    /// Service name → client config. The service list comes from
    /// `TASKFLOW_GRPC_SERVICES` (comma-separated names); each service is
    /// configured via `TASKFLOW_GRPC_SERVICE_<NAME>_*` variables.
    pub services: HashMap<String, ClientConfig>,
    pub defaults: ClientConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `console`.
    pub format: String,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = ClientConfig {
            address: String::new(),
            timeout: duration_env("TASKFLOW_GRPC_DEFAULTS_TIMEOUT", Duration::from_secs(300)),
            health_check_interval: duration_env(
                "TASKFLOW_GRPC_DEFAULTS_HEALTH_CHECK_INTERVAL",
                Duration::from_secs(30),
            ),
            max_retries: parse_env("TASKFLOW_GRPC_DEFAULTS_MAX_RETRIES", 3),
            retry_delay: duration_env("TASKFLOW_GRPC_DEFAULTS_RETRY_DELAY", Duration::from_secs(1)),
        };

        let mut services = HashMap::new();
        for name in list_env("TASKFLOW_GRPC_SERVICES") {
            let prefix = format!("TASKFLOW_GRPC_SERVICE_{}", name.to_uppercase());
            services.insert(
                name.clone(),
                ClientConfig {
                    address: env_or(&format!("{prefix}_ADDRESS"), ""),
                    timeout: duration_env(&format!("{prefix}_TIMEOUT"), defaults.timeout),
                    health_check_interval: duration_env(
                        &format!("{prefix}_HEALTH_CHECK_INTERVAL"),
                        defaults.health_check_interval,
                    ),
                    max_retries: parse_env(&format!("{prefix}_MAX_RETRIES"), defaults.max_retries),
                    retry_delay: duration_env(&format!("{prefix}_RETRY_DELAY"), defaults.retry_delay),
                },
            );
        }

        Self {
            app: AppConfig {
                env: env_or("TASKFLOW_APP_ENV", "development"),
            },
            http: HttpConfig {
                host: env_or("TASKFLOW_SERVER_HTTP_HOST", "0.0.0.0"),
                port: parse_env("TASKFLOW_SERVER_HTTP_PORT", 8080),
            },
            worker: WorkerSettings {
                concurrency: parse_env("TASKFLOW_SERVER_WORKER_CONCURRENCY", 10),
                health: WorkerHealthConfig {
                    enabled: bool_env("TASKFLOW_SERVER_WORKER_HEALTH_ENABLED", false),
                    host: env_or("TASKFLOW_SERVER_WORKER_HEALTH_HOST", "0.0.0.0"),
                    port: parse_env("TASKFLOW_SERVER_WORKER_HEALTH_PORT", 8081),
                },
            },
            redis: RedisConfig {
                addr: env_or("TASKFLOW_REDIS_ADDR", "127.0.0.1:6379"),
                password: env_or("TASKFLOW_REDIS_PASSWORD", ""),
                db: parse_env("TASKFLOW_REDIS_DB", 0),
            },
            queues: QueueWeights {
                critical: parse_env("TASKFLOW_QUEUES_CRITICAL", 6),
                high: parse_env("TASKFLOW_QUEUES_HIGH", 3),
                default: parse_env("TASKFLOW_QUEUES_DEFAULT", 2),
                low: parse_env("TASKFLOW_QUEUES_LOW", 1),
            },
            progress: ProgressSettings {
                max_len: parse_env("TASKFLOW_PROGRESS_MAX_LEN", 1000),
                ttl: duration_env("TASKFLOW_PROGRESS_TTL", Duration::from_secs(60 * 60)),
                read_timeout: duration_env(
                    "TASKFLOW_PROGRESS_READ_TIMEOUT",
                    Duration::from_secs(30),
                ),
            },
            grpc: GrpcServicesConfig {
                enabled: bool_env("TASKFLOW_GRPC_SERVICES_ENABLED", false),
                services,
                defaults,
            },
            logging: LoggingConfig {
                level: env_or("TASKFLOW_LOGGING_LEVEL", "info"),
                format: env_or("TASKFLOW_LOGGING_FORMAT", "json"),
            },
        }
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.http.port == 0 {
            anyhow::bail!("server.http.port must be greater than 0");
        }
        if self.worker.concurrency == 0 {
            anyhow::bail!("server.worker.concurrency must be greater than 0");
        }
        let weights = &self.queues;
        if weights.critical == 0 || weights.high == 0 || weights.default == 0 || weights.low == 0 {
            anyhow::bail!("queue weights must be greater than 0");
        }
        if self.worker.health.enabled && self.worker.health.port == 0 {
            anyhow::bail!("server.worker.health.port must be greater than 0");
        }
        if self.grpc.enabled {
            for (name, svc) in &self.grpc.services {
                if svc.address.is_empty() {
                    anyhow::bail!("grpc service {name} has no address");
                }
            }
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.app.env == "production"
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }

    pub fn worker_health_addr(&self) -> String {
        format!("{}:{}", self.worker.health.host, self.worker.health.port)
    }

    pub fn stream_options(&self) -> taskflow_core::progress::StreamOptions {
        taskflow_core::progress::StreamOptions {
            max_len: self.progress.max_len,
            ttl: self.progress.ttl,
            read_timeout: self.progress.read_timeout,
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn bool_env(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

/// Durations accept humantime forms (`30s`, `1h`) or bare seconds.
fn duration_env(key: &str, default: Duration) -> Duration {
    let Ok(raw) = std::env::var(key) else {
        return default;
    };
    humantime::parse_duration(&raw)
        .ok()
        .or_else(|| raw.parse::<u64>().ok().map(Duration::from_secs))
        .unwrap_or(default)
}

fn list_env(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::from_env();
        cfg.validate().expect("defaults must validate");
        assert_eq!(cfg.queues.as_vec().len(), 4);
        assert_eq!(cfg.progress.max_len, 1000);
        assert_eq!(cfg.grpc.defaults.timeout, Duration::from_secs(300));
    }

    #[test]
    fn validation_rejects_zero_weights() {
        let mut cfg = Config::from_env();
        cfg.queues.default = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_rejects_unaddressed_services() {
        let mut cfg = Config::from_env();
        cfg.grpc.enabled = true;
        cfg.grpc
            .services
            .insert("llm".to_owned(), ClientConfig::default());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn weights_order_heaviest_first() {
        let cfg = Config::from_env();
        let queues = cfg.queues.as_vec();
        assert_eq!(queues[0].0, "critical");
        assert_eq!(queues[3].0, "low");
    }
}
