//! Controller configuration.
//!
//! Read once at start-up from environment variables. Image lookup values
//! are the last fallback after the machine's and the cluster's own fields.

use crate::error::ControllerError;
use std::time::Duration;

/// Default format of the OS image URL streamed onto the target disk
pub const DEFAULT_IMAGE_LOOKUP_FORMAT: &str =
    "{{.BaseRegistry}}/{{.OSDistro}}-{{.OSVersion}}-kube-{{.KubernetesVersion}}.raw.gz";
/// Default registry serving OS images
pub const DEFAULT_IMAGE_LOOKUP_BASE_REGISTRY: &str =
    "ghcr.io/tinkerbell/cluster-api-provider-tinkerbell";
/// Default OS distribution
pub const DEFAULT_IMAGE_LOOKUP_OS_DISTRO: &str = "ubuntu";
/// Default OS version
pub const DEFAULT_IMAGE_LOOKUP_OS_VERSION: &str = "20.04";

/// Image lookup defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLookupDefaults {
    pub format: String,
    pub base_registry: String,
    pub os_distro: String,
    pub os_version: String,
}

impl Default for ImageLookupDefaults {
    fn default() -> Self {
        Self {
            format: DEFAULT_IMAGE_LOOKUP_FORMAT.to_string(),
            base_registry: DEFAULT_IMAGE_LOOKUP_BASE_REGISTRY.to_string(),
            os_distro: DEFAULT_IMAGE_LOOKUP_OS_DISTRO.to_string(),
            os_version: DEFAULT_IMAGE_LOOKUP_OS_VERSION.to_string(),
        }
    }
}

/// Runtime configuration of the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; all namespaces when `None`
    pub watch_namespace: Option<String>,
    pub image_lookup: ImageLookupDefaults,
    /// Address of the Tinkerbell stack, used for the metadata service URL
    pub tinkerbell_ip: Option<String>,
    /// Concurrent reconciliations per watched kind
    pub reconcile_concurrency: u16,
    /// Quiet period after the last event before reconciling
    pub reconcile_debounce: Duration,
    /// Requeue interval while waiting on workflows and BMC jobs
    pub workflow_poll: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            image_lookup: ImageLookupDefaults::default(),
            tinkerbell_ip: None,
            reconcile_concurrency: 3,
            reconcile_debounce: Duration::from_secs(5),
            workflow_poll: Duration::from_secs(30),
        }
    }
}

impl ControllerConfig {
    /// Loads configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, treating empty values as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let image_lookup = ImageLookupDefaults {
            format: get("IMAGE_LOOKUP_FORMAT").unwrap_or(defaults.image_lookup.format),
            base_registry: get("IMAGE_LOOKUP_BASE_REGISTRY")
                .unwrap_or(defaults.image_lookup.base_registry),
            os_distro: get("IMAGE_LOOKUP_OS_DISTRO").unwrap_or(defaults.image_lookup.os_distro),
            os_version: get("IMAGE_LOOKUP_OS_VERSION").unwrap_or(defaults.image_lookup.os_version),
        };

        let reconcile_concurrency = match get("RECONCILE_CONCURRENCY") {
            Some(v) => parse_number::<u16>("RECONCILE_CONCURRENCY", &v)?,
            None => defaults.reconcile_concurrency,
        };
        let reconcile_debounce = match get("RECONCILE_DEBOUNCE_SECS") {
            Some(v) => Duration::from_secs(parse_number("RECONCILE_DEBOUNCE_SECS", &v)?),
            None => defaults.reconcile_debounce,
        };
        let workflow_poll = match get("WORKFLOW_POLL_SECS") {
            Some(v) => Duration::from_secs(parse_number("WORKFLOW_POLL_SECS", &v)?),
            None => defaults.workflow_poll,
        };
        if workflow_poll.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "WORKFLOW_POLL_SECS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            watch_namespace: get("WATCH_NAMESPACE"),
            image_lookup,
            tinkerbell_ip: get("TINKERBELL_IP"),
            reconcile_concurrency,
            reconcile_debounce,
            workflow_poll,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ControllerError> {
    value.trim().parse::<T>().map_err(|_| {
        ControllerError::InvalidConfig(format!("{} must be a non-negative integer, got '{}'", key, value))
    })
}
