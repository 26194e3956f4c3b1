//! App and component specifications
//!
//! Specifications are versioned (1-9). Versions 1-3 describe a single container
//! through top-level fields; version 4 and later describe a `compose` list of
//! named components. Feature fields are only honored from the version that
//! introduced them.

use serde::{Deserialize, Serialize};

use super::resources::{ResourceTriple, Resources, Tier};

/// Highest specification version understood by this agent
pub const MAX_SPEC_VERSION: u32 = 9;

/// One container of a compose app
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpecification {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Image reference, e.g. "nginx:1.25"
    pub repotag: String,

    /// Ports opened on the host
    #[serde(default)]
    pub ports: Vec<u16>,

    /// Container-side ports, index-aligned with `ports`
    #[serde(default)]
    pub container_ports: Vec<u16>,

    #[serde(default)]
    pub domains: Vec<String>,

    #[serde(default, rename = "enviromentParameters", alias = "environmentParameters")]
    pub environment_parameters: Vec<String>,

    #[serde(default)]
    pub commands: Vec<String>,

    /// Mount path with optional sync role flags ("r:/appdata", "g:/data")
    #[serde(default)]
    pub container_data: String,

    /// Registry credentials, possibly encrypted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repoauth: Option<String>,

    #[serde(flatten)]
    pub resources: Resources,
}

/// A versioned app descriptor
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSpecification {
    pub version: u32,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub owner: String,

    // Single-container fields (versions 1-3)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repotag: Option<String>,

    /// Version 1 single port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Version 1 single container port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_ports: Vec<u16>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,

    #[serde(
        default,
        rename = "enviromentParameters",
        alias = "environmentParameters",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub environment_parameters: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_data: String,

    #[serde(flatten)]
    pub resources: Resources,

    // Compose (version 4+)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compose: Vec<ComponentSpecification>,

    /// Desired network-wide instance count (version 3+)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<u32>,

    /// Geolocation rule tokens (version 5+)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub geolocation: Vec<String>,

    /// Node allow-list of IPs or `txhash:txindex` (version 7)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<String>,

    /// Requires a node with a static IP (version 7+)
    #[serde(default)]
    pub staticip: bool,

    /// Encrypted enterprise payload (version 8+)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enterprise: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repoauth: Option<String>,
}

/// A component bound to its owning app
#[derive(Debug, Clone, PartialEq)]
pub struct AppComponent {
    pub app_name: String,
    pub spec: ComponentSpecification,
    /// False for single-container (version 1-3) apps
    pub is_component: bool,
}

impl AppComponent {
    /// Stable identifier: `component_app` for compose components, `app` otherwise
    pub fn identifier(&self) -> String {
        if self.is_component {
            format!("{}_{}", self.spec.name, self.app_name)
        } else {
            self.app_name.clone()
        }
    }

    /// Container name, which also keys the volume and its crontab entry
    pub fn app_id(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.identifier())
    }

    /// Host/container port pairs
    pub fn port_pairs(&self) -> Vec<(u16, u16)> {
        self.spec
            .ports
            .iter()
            .zip(self.spec.container_ports.iter())
            .map(|(h, c)| (*h, *c))
            .collect()
    }

    pub fn container_data(&self) -> ContainerData {
        ContainerData::parse(&self.spec.container_data)
    }
}

impl AppSpecification {
    /// Whether the spec is a multi-component app
    pub fn is_compose(&self) -> bool {
        self.version >= 4 && !self.compose.is_empty()
    }

    /// Components in declared install order
    pub fn components(&self) -> Vec<AppComponent> {
        if self.version >= 4 {
            return self
                .compose
                .iter()
                .map(|c| AppComponent {
                    app_name: self.name.clone(),
                    spec: c.clone(),
                    is_component: true,
                })
                .collect();
        }

        let (ports, container_ports) = if self.version == 1 {
            (
                self.port.into_iter().collect(),
                self.container_port.into_iter().collect(),
            )
        } else {
            (self.ports.clone(), self.container_ports.clone())
        };

        vec![AppComponent {
            app_name: self.name.clone(),
            spec: ComponentSpecification {
                name: self.name.clone(),
                description: self.description.clone(),
                repotag: self.repotag.clone().unwrap_or_default(),
                ports,
                container_ports,
                domains: self.domains.clone(),
                environment_parameters: self.environment_parameters.clone(),
                commands: self.commands.clone(),
                container_data: self.container_data.clone(),
                repoauth: self.repoauth.clone(),
                resources: self.resources.clone(),
            },
            is_component: false,
        }]
    }

    /// Every host port declared by the app
    pub fn all_ports(&self) -> Vec<u16> {
        self.components()
            .into_iter()
            .flat_map(|c| c.spec.ports)
            .collect()
    }

    /// Geolocation tokens, empty before version 5
    pub fn geolocation_tokens(&self) -> &[String] {
        if self.version >= 5 {
            &self.geolocation
        } else {
            &[]
        }
    }

    /// Node allow-list, only honored for version 7
    pub fn node_allow_list(&self) -> &[String] {
        if self.version == 7 {
            &self.nodes
        } else {
            &[]
        }
    }

    pub fn requires_static_ip(&self) -> bool {
        self.version >= 7 && self.staticip
    }

    /// Declared instance count, ignored before version 3
    pub fn declared_instances(&self) -> Option<u32> {
        if self.version >= 3 {
            self.instances
        } else {
            None
        }
    }

    pub fn is_enterprise(&self) -> bool {
        self.version >= 8 && self.enterprise.as_deref().is_some_and(|e| !e.is_empty())
    }
}

impl AppComponent {
    /// Resources of this component resolved for `tier`
    pub fn resources(&self, tier: Tier) -> ResourceTriple {
        self.spec.resources.resolve(tier)
    }
}

/// Parsed `containerData` declaration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerData {
    /// Volume is populated by the sync service; the container is not started
    pub receive_only: bool,
    /// Volume participates in sync (any of the r/s/g roles)
    pub sync: bool,
    /// Primary/standby role
    pub primary: bool,
    /// Container-side mount path, empty when none
    pub path: String,
}

impl ContainerData {
    /// Parse the primary mount declaration; extra `|`-separated mounts are ignored
    pub fn parse(raw: &str) -> Self {
        let first = raw.split('|').next().unwrap_or("").trim();
        let (flags, path) = match first.split_once(':') {
            Some((flags, path))
                if !flags.is_empty() && flags.chars().all(|c| matches!(c, 'r' | 's' | 'g')) =>
            {
                (flags, path)
            }
            _ => ("", first),
        };

        ContainerData {
            receive_only: flags.contains('r'),
            sync: !flags.is_empty(),
            primary: flags.contains('g'),
            path: path.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compose_spec() -> AppSpecification {
        let json = r#"{
            "version": 6,
            "name": "shop",
            "owner": "1abc",
            "instances": 3,
            "geolocation": ["acEU"],
            "compose": [
                {"name": "db", "repotag": "postgres:16", "ports": [31000], "containerPorts": [5432],
                 "containerData": "r:/var/lib/postgresql/data", "cpu": 1.0, "ram": 1000, "hdd": 10},
                {"name": "web", "repotag": "nginx:1.25", "ports": [31001], "containerPorts": [80],
                 "enviromentParameters": ["MODE=prod"], "containerData": "/data",
                 "cpu": 0.5, "ram": 500, "hdd": 2}
            ]
        }"#;
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_compose_components_keep_declared_order() {
        let spec = compose_spec();
        assert!(spec.is_compose());
        let ids: Vec<String> = spec.components().iter().map(|c| c.identifier()).collect();
        assert_eq!(ids, vec!["db_shop", "web_shop"]);
        assert_eq!(spec.all_ports(), vec![31000, 31001]);
    }

    #[test]
    fn test_v1_single_port_fields() {
        let json = r#"{"version": 1, "name": "legacy", "repotag": "busybox:latest",
            "port": 30001, "containerPort": 8080, "cpu": 0.2, "ram": 200, "hdd": 1}"#;
        let spec: AppSpecification = serde_json::from_str(json).unwrap();
        let components = spec.components();
        assert_eq!(components.len(), 1);
        assert!(!components[0].is_component);
        assert_eq!(components[0].identifier(), "legacy");
        assert_eq!(components[0].port_pairs(), vec![(30001, 8080)]);
        assert_eq!(components[0].app_id("apphost"), "apphostlegacy");
    }

    #[test]
    fn test_feature_fields_are_version_gated() {
        let mut spec = compose_spec();
        assert_eq!(spec.geolocation_tokens(), &["acEU".to_string()]);
        assert_eq!(spec.declared_instances(), Some(3));

        spec.version = 4;
        assert!(spec.geolocation_tokens().is_empty());

        spec.version = 8;
        spec.nodes = vec!["203.0.113.5".to_string()];
        assert!(spec.node_allow_list().is_empty());
        spec.version = 7;
        assert_eq!(spec.node_allow_list().len(), 1);

        spec.staticip = true;
        assert!(spec.requires_static_ip());
        spec.version = 6;
        assert!(!spec.requires_static_ip());
    }

    #[test]
    fn test_container_data_roles() {
        let cd = ContainerData::parse("r:/appdata");
        assert!(cd.receive_only && cd.sync && !cd.primary);
        assert_eq!(cd.path, "/appdata");

        let cd = ContainerData::parse("g:/data|0:/other");
        assert!(cd.primary && cd.sync && !cd.receive_only);
        assert_eq!(cd.path, "/data");

        let cd = ContainerData::parse("/plain");
        assert!(!cd.sync);
        assert_eq!(cd.path, "/plain");

        assert_eq!(ContainerData::parse(""), ContainerData::default());
    }

    #[test]
    fn test_spec_roundtrip_keeps_wire_names() {
        let spec = compose_spec();
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["compose"][1]["enviromentParameters"][0], "MODE=prod");
        assert_eq!(value["compose"][0]["containerPorts"][0], 5432);
        let back: AppSpecification = serde_json::from_value(value).unwrap();
        assert_eq!(back, spec);
    }
}
