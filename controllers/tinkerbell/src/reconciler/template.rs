//! Provisioning template rendering.
//!
//! The rendered template is handed to the Tinkerbell workflow engine, which
//! expands its own `{{.device_1}}` placeholders from the workflow's hardware
//! map. Only provider-side values (disk, partition, image URL, metadata
//! service address) are substituted here.

use crate::config::ImageLookupDefaults;
use crate::error::ControllerError;
use crds::{TinkerbellClusterSpec, TinkerbellMachineSpec};
use minijinja::{context, Environment, UndefinedBehavior};
use once_cell::sync::Lazy;
use regex::Regex;

/// Devices whose partitions carry a `p` before the partition number
static PARTITION_P_SUFFIX: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^/dev/(nvme|mmcblk)"));

/// Go-style `{{.Field}}` placeholders
static GO_PLACEHOLDER: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}"));

const DEFAULT_TEMPLATE: &str = r#"version: "0.1"
name: {{ name }}
global_timeout: 6000
tasks:
  - name: "{{ name }}"
    worker: "{% raw %}{{.device_1}}{% endraw %}"
    volumes:
      - /dev:/dev
      - /dev/console:/dev/console
      - /lib/firmware:/lib/firmware:ro
    actions:
      - name: "stream-image"
        image: quay.io/tinkerbell-actions/image2disk:v1.0.0
        timeout: 600
        environment:
          DEST_DISK: {{ disk }}
          IMG_URL: {{ image_url }}
          COMPRESSED: true
      - name: "add-tink-cloud-init-config"
        image: quay.io/tinkerbell-actions/writefile:v1.0.0
        timeout: 90
        environment:
          DEST_DISK: {{ partition }}
          FS_TYPE: ext4
          DEST_PATH: /etc/cloud/cloud.cfg.d/10_tinkerbell.cfg
          UID: 0
          GID: 0
          MODE: 0600
          DIRMODE: 0700
          CONTENTS: |
            datasource:
              Ec2:
{%- if metadata_url %}
                metadata_urls: ["{{ metadata_url }}"]
{%- endif %}
                strict_id: false
            system_info:
              default_user:
                name: tink
                groups: [wheel, adm]
                sudo: ["ALL=(ALL) NOPASSWD:ALL"]
                shell: /bin/bash
            manage_etc_hosts: localhost
            warnings:
              dsid_missing_source: off
      - name: "add-tink-cloud-init-ds-config"
        image: quay.io/tinkerbell-actions/writefile:v1.0.0
        timeout: 90
        environment:
          DEST_DISK: {{ partition }}
          FS_TYPE: ext4
          DEST_PATH: /etc/cloud/ds-identify.cfg
          UID: 0
          GID: 0
          MODE: 0600
          DIRMODE: 0700
          CONTENTS: |
            datasource: Ec2
      - name: "kexec-image"
        image: quay.io/tinkerbell-actions/kexec:v1.0.0
        timeout: 90
        pid: host
        environment:
          BLOCK_DEVICE: {{ partition }}
          FS_TYPE: ext4
"#;

/// Image lookup parameters after applying machine, cluster and controller defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLookup {
    pub format: String,
    pub base_registry: String,
    pub os_distro: String,
    pub os_version: String,
}

impl ImageLookup {
    /// Machine fields win over cluster fields, which win over controller defaults
    pub fn resolve(
        machine: &TinkerbellMachineSpec,
        cluster: Option<&TinkerbellClusterSpec>,
        defaults: &ImageLookupDefaults,
    ) -> Self {
        fn pick(machine: &Option<String>, cluster: Option<&Option<String>>, default: &str) -> String {
            machine
                .as_deref()
                .filter(|v| !v.is_empty())
                .or_else(|| cluster.and_then(|c| c.as_deref()).filter(|v| !v.is_empty()))
                .unwrap_or(default)
                .to_string()
        }

        Self {
            format: pick(
                &machine.image_lookup_format,
                cluster.map(|c| &c.image_lookup_format),
                &defaults.format,
            ),
            base_registry: pick(
                &machine.image_lookup_base_registry,
                cluster.map(|c| &c.image_lookup_base_registry),
                &defaults.base_registry,
            ),
            os_distro: pick(
                &machine.image_lookup_os_distro,
                cluster.map(|c| &c.image_lookup_os_distro),
                &defaults.os_distro,
            ),
            os_version: pick(
                &machine.image_lookup_os_version,
                cluster.map(|c| &c.image_lookup_os_version),
                &defaults.os_version,
            ),
        }
    }

    /// Expands the format string for `kubernetes_version`
    ///
    /// Accepts `{{.Field}}` and `{{ Field }}` placeholders. Unknown fields are errors.
    pub fn image_url(&self, kubernetes_version: &str) -> Result<String, ControllerError> {
        let pattern = GO_PLACEHOLDER
            .as_ref()
            .map_err(|e| ControllerError::TemplateRender(e.to_string()))?;
        let normalized = pattern.replace_all(&self.format, "{{ $1 }}");

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.render_str(
            &normalized,
            context! {
                BaseRegistry => &self.base_registry,
                OSDistro => &self.os_distro,
                OSVersion => &self.os_version,
                KubernetesVersion => kubernetes_version,
            },
        )
        .map_err(|e| ControllerError::TemplateRender(format!("image lookup format '{}': {}", self.format, e)))
    }
}

/// First partition of `device`
///
/// `/dev/nvme0n1` -> `/dev/nvme0n1p1`, `/dev/mmcblk0` -> `/dev/mmcblk0p1`, `/dev/sda` -> `/dev/sda1`.
pub fn target_partition(device: &str) -> String {
    let needs_p = PARTITION_P_SUFFIX
        .as_ref()
        .is_ok_and(|re| re.is_match(device));
    if needs_p {
        format!("{}p1", device)
    } else {
        format!("{}1", device)
    }
}

/// Values substituted into the default template
#[derive(Debug, Clone)]
pub struct TemplateParams<'a> {
    pub name: &'a str,
    pub disk: &'a str,
    pub image_url: &'a str,
    pub tinkerbell_ip: Option<&'a str>,
}

/// Renders the default provisioning template
pub fn render_default(params: &TemplateParams<'_>) -> Result<String, ControllerError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    let metadata_url = params
        .tinkerbell_ip
        .map(|ip| format!("http://{}:50061", ip))
        .unwrap_or_default();
    env.render_str(
        DEFAULT_TEMPLATE,
        context! {
            name => params.name,
            disk => params.disk,
            partition => target_partition(params.disk),
            image_url => params.image_url,
            metadata_url => metadata_url,
        },
    )
    .map_err(|e| ControllerError::TemplateRender(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_partition() {
        assert_eq!(target_partition("/dev/nvme0n1"), "/dev/nvme0n1p1");
        assert_eq!(target_partition("/dev/mmcblk0"), "/dev/mmcblk0p1");
        assert_eq!(target_partition("/dev/sda"), "/dev/sda1");
        assert_eq!(target_partition("/dev/vda"), "/dev/vda1");
    }

    #[test]
    fn test_default_image_url() {
        let lookup = ImageLookup::resolve(
            &TinkerbellMachineSpec::default(),
            None,
            &ImageLookupDefaults::default(),
        );
        assert_eq!(
            lookup.image_url("v1.30.2").unwrap(),
            "ghcr.io/tinkerbell/cluster-api-provider-tinkerbell/ubuntu-20.04-kube-v1.30.2.raw.gz"
        );
    }

    #[test]
    fn test_lookup_precedence() {
        let machine = TinkerbellMachineSpec {
            image_lookup_os_version: Some("22.04".to_string()),
            ..Default::default()
        };
        let cluster = TinkerbellClusterSpec {
            image_lookup_os_version: Some("18.04".to_string()),
            image_lookup_base_registry: Some("registry.local/images".to_string()),
            image_lookup_format: Some("{{ BaseRegistry }}/{{.OSDistro}}:{{.OSVersion}}-{{ KubernetesVersion }}".to_string()),
            ..Default::default()
        };
        let lookup = ImageLookup::resolve(&machine, Some(&cluster), &ImageLookupDefaults::default());
        assert_eq!(lookup.os_version, "22.04");
        assert_eq!(lookup.base_registry, "registry.local/images");
        assert_eq!(lookup.image_url("v1.29.0").unwrap(), "registry.local/images/ubuntu:22.04-v1.29.0");
    }

    #[test]
    fn test_unknown_placeholder_is_an_error() {
        let lookup = ImageLookup {
            format: "{{.Registry}}/image".to_string(),
            base_registry: "r".to_string(),
            os_distro: "d".to_string(),
            os_version: "v".to_string(),
        };
        let err = lookup.image_url("v1.30.0").unwrap_err();
        assert!(matches!(err, ControllerError::TemplateRender(_)));
    }

    #[test]
    fn test_default_template_keeps_engine_placeholders() {
        let rendered = render_default(&TemplateParams {
            name: "worker-0",
            disk: "/dev/nvme0n1",
            image_url: "http://images/ubuntu.raw.gz",
            tinkerbell_ip: Some("10.0.0.5"),
        })
        .unwrap();

        assert!(rendered.contains(r#"worker: "{{.device_1}}""#));
        assert!(rendered.contains("DEST_DISK: /dev/nvme0n1\n"));
        assert!(rendered.contains("DEST_DISK: /dev/nvme0n1p1\n"));
        assert!(rendered.contains("IMG_URL: http://images/ubuntu.raw.gz"));
        assert!(rendered.contains(r#"metadata_urls: ["http://10.0.0.5:50061"]"#));

        let parsed: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(parsed["name"].as_str(), Some("worker-0"));
        assert_eq!(parsed["tasks"][0]["actions"].as_sequence().map(Vec::len), Some(4));
    }

    #[test]
    fn test_metadata_url_omitted_without_tinkerbell_ip() {
        let rendered = render_default(&TemplateParams {
            name: "worker-0",
            disk: "/dev/sda",
            image_url: "http://images/ubuntu.raw.gz",
            tinkerbell_ip: None,
        })
        .unwrap();
        assert!(!rendered.contains("metadata_urls"));
        assert!(rendered.contains("BLOCK_DEVICE: /dev/sda1"));
    }
}
