//! Configuration from environment variables.
//!
//! | Variable                 | Default                   |
//! |--------------------------|---------------------------|
//! | `APISERVER_URL`          | in-cluster service        |
//! | `APISERVER_TOKEN`        | service account token     |
//! | `WATCH_NAMESPACE`        | all namespaces            |
//! | `CONTROLLER_WORKERS`     | 2                         |
//! | `RECONCILE_ERROR_POLICY` | `requeue`                 |

use crate::error::ControllerError;
use apiserver_client::ClientConfig;
use informer::ErrorPolicy;

const DEFAULT_WORKERS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Explicit API server URL; in-cluster settings are used when unset
    pub apiserver_url: Option<String>,
    pub apiserver_token: Option<String>,
    pub namespace: Option<String>,
    pub workers: usize,
    pub error_policy: ErrorPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let workers = match get("CONTROLLER_WORKERS") {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|workers| *workers > 0)
                .ok_or_else(|| {
                    ControllerError::InvalidConfig(format!(
                        "CONTROLLER_WORKERS must be a positive integer, got '{value}'"
                    ))
                })?,
            None => DEFAULT_WORKERS,
        };

        let error_policy = match get("RECONCILE_ERROR_POLICY") {
            Some(value) => value
                .trim()
                .parse::<ErrorPolicy>()
                .map_err(ControllerError::InvalidConfig)?,
            None => ErrorPolicy::default(),
        };

        Ok(Self {
            apiserver_url: get("APISERVER_URL"),
            apiserver_token: get("APISERVER_TOKEN"),
            namespace: get("WATCH_NAMESPACE"),
            workers,
            error_policy,
        })
    }

    /// Client settings: the explicit URL when given, in-cluster otherwise.
    pub fn client_config(&self) -> Result<ClientConfig, ControllerError> {
        let config = match &self.apiserver_url {
            Some(url) => ClientConfig::new(url.clone()),
            None => ClientConfig::in_cluster()?,
        };

        Ok(match &self.apiserver_token {
            Some(token) => config.with_bearer_token(token.clone()),
            None => config,
        })
    }
}
