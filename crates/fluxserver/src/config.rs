use anyhow::{Context, Result};
use fluxruntime::RuntimeConfig;
use std::str::FromStr;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Server settings read from the environment
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub runtime: RuntimeConfig,
}

impl ServerConfig {
    /// Reads `BIND_ADDRESS`, `FLUX_MAX_PARALLEL`, `FLUX_EVENT_BUFFER` and
    /// `FLUX_NODE_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = RuntimeConfig::default();
        let runtime = RuntimeConfig {
            max_parallel_nodes: parse_or(&lookup, "FLUX_MAX_PARALLEL", defaults.max_parallel_nodes)?,
            event_buffer_size: parse_or(&lookup, "FLUX_EVENT_BUFFER", defaults.event_buffer_size)?,
            node_timeout_ms: match lookup("FLUX_NODE_TIMEOUT_MS") {
                Some(raw) => Some(parse("FLUX_NODE_TIMEOUT_MS", &raw)?),
                None => defaults.node_timeout_ms,
            },
        };

        Ok(Self {
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            runtime,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => parse(name, &raw),
        None => Ok(default),
    }
}

fn parse<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: {:?}", name, raw))
}
