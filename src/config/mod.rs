use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, trace};
use pingora::server::configuration::{Opt, ServerConf};
use pingora_error::{Error, ErrorType::*, OrErr, Result};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::{dispatch::http::DEFAULT_MAX_BODY_BYTES, rollout::DEFAULT_QUEUE_CAPACITY};

#[derive(Default, Debug, Serialize, Deserialize, Validate)]
pub struct Config {
    #[serde(default)]
    pub pingora: ServerConf,

    #[validate(length(min = 1))]
    #[validate(nested)]
    pub listeners: Vec<Listener>,

    pub registration: Registration,

    #[validate(nested)]
    #[serde(default)]
    pub router: Router,

    #[serde(default)]
    pub log: Option<Log>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub prometheus: Option<Prometheus>,
    #[serde(default)]
    pub sentry: Option<Sentry>,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> Result<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path).or_err_with(ReadError, || {
            format!("Unable to read conf file from {path}")
        })?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    // config file load entry point
    pub fn load_yaml_with_opt_override(opt: &Opt) -> Result<Self> {
        if let Some(path) = &opt.conf {
            let mut conf = Self::load_from_yaml(path)?;
            conf.merge_with_opt(opt);
            Ok(conf)
        } else {
            Error::e_explain(ReadError, "No path specified")
        }
    }

    pub fn from_yaml(conf_str: &str) -> Result<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str).or_err_with(ReadError, || {
            format!("Unable to parse yaml conf {conf_str}")
        })?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()
            .or_err_with(FileReadError, || "Conf file valid failed")?;

        Ok(conf)
    }

    #[cfg(test)]
    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).unwrap()
    }

    pub fn merge_with_opt(&mut self, opt: &Opt) {
        if opt.daemon {
            self.pingora.daemon = true;
        }
    }
}

/// Public listener serving application traffic.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Listener::validate_tls_for_offer_h2"))]
pub struct Listener {
    pub address: SocketAddr,
    pub tls: Option<Tls>,
    #[serde(default)]
    pub offer_h2: bool,
}

impl Listener {
    fn validate_tls_for_offer_h2(&self) -> Result<(), ValidationError> {
        if self.offer_h2 && self.tls.is_none() {
            Err(ValidationError::new("tls_required_for_h2"))
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tls {
    pub cert_path: String,
    pub key_path: String,
}

/// Control-plane listener receiving service notifications.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Registration {
    pub address: SocketAddr,
}

impl Default for Registration {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 9500)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Router {
    /// Pending rollout triggers kept before further triggers are dropped.
    #[validate(range(min = 1))]
    #[serde(default = "Router::default_rollout_queue")]
    pub rollout_queue: usize,

    #[validate(range(min = 1))]
    #[serde(default = "Router::default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Secret mixed into per-host session cookie names.
    #[serde(default)]
    pub cookie_key: Option<String>,

    /// Timeout in seconds for every call to a backend service.
    #[validate(range(min = 1))]
    #[serde(default = "Router::default_rpc_timeout")]
    pub rpc_timeout: u64,
}

impl Router {
    fn default_rollout_queue() -> usize {
        DEFAULT_QUEUE_CAPACITY
    }

    fn default_max_body_bytes() -> usize {
        DEFAULT_MAX_BODY_BYTES
    }

    fn default_rpc_timeout() -> u64 {
        30
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self {
            rollout_queue: Self::default_rollout_queue(),
            max_body_bytes: Self::default_max_body_bytes(),
            cookie_key: None,
            rpc_timeout: Self::default_rpc_timeout(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Log {
    pub path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Status {
    pub address: SocketAddr,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prometheus {
    pub address: SocketAddr,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sentry {
    pub dsn: String,
}
