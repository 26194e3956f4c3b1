use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::spec::Tier;

#[derive(Parser, Debug)]
#[command(name = "apphost")]
#[command(about = "Admit, install, monitor and evict containerized apps on this node")]
#[command(version)]
pub struct Args {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Node configuration file (defaults to ~/.apphost/config.yaml)
    #[arg(short, long, value_name = "FILE", env = "APPHOST_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Path to a .env file
    #[arg(long, value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the agent and its HTTP API
    Serve {
        /// Override the configured bind address
        #[arg(long, value_name = "ADDR")]
        bind_addr: Option<String>,

        /// Override the configured API port
        #[arg(short, long, value_name = "PORT")]
        port: Option<u16>,
    },

    /// Validate a specification and show what it would require
    Check {
        /// Specification file (JSON)
        spec_file: PathBuf,

        /// Tier to resolve resources for (defaults to the configured tier)
        #[arg(long)]
        tier: Option<Tier>,
    },
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

use crate::admission::{compute_requirements, validate_compose_hw, validate_declared_hw};
use crate::config::Config;
use crate::spec::AppSpecification;

/// Format the dry-run report of `apphost check`.
/// Pure function - returns a formatted string.
pub fn format_check(spec: &AppSpecification, tier: Tier, config: &Config) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "apphost v{} - Specification Check\n\n",
        env!("CARGO_PKG_VERSION")
    ));
    output.push_str(&format!("Application: {} (version {})\n", spec.name, spec.version));
    if !spec.owner.is_empty() {
        output.push_str(&format!("Owner: {}\n", spec.owner));
    }
    output.push_str(&format!("Tier: {}\n\n", tier));

    let components = spec.components();
    output.push_str(&format!("Components ({}):\n", components.len()));
    for component in &components {
        let r = component.resources(tier);
        output.push_str(&format!(
            "  - {} [{}]\n",
            component.app_id(&config.node.container_prefix),
            component.spec.repotag
        ));
        output.push_str(&format!(
            "      cpu {} / ram {} MB / hdd {} GB\n",
            r.cpu, r.ram, r.hdd
        ));
        if !component.spec.ports.is_empty() {
            let pairs: Vec<String> = component
                .port_pairs()
                .iter()
                .map(|(h, c)| format!("{}->{}", h, c))
                .collect();
            output.push_str(&format!("      ports {}\n", pairs.join(", ")));
        }
        let data = component.container_data();
        if !data.path.is_empty() {
            output.push_str(&format!("      data {}", data.path));
            if data.receive_only {
                output.push_str(" (receive-only)");
            }
            output.push('\n');
        }
    }

    let total = compute_requirements(spec, tier);
    output.push_str(&format!(
        "\nRequired: cpu {} / ram {} MB / hdd {} GB\n",
        total.cpu, total.ram, total.hdd
    ));

    if !spec.geolocation_tokens().is_empty() {
        output.push_str(&format!(
            "Geolocation: {}\n",
            spec.geolocation_tokens().join(", ")
        ));
    }
    if !spec.node_allow_list().is_empty() {
        output.push_str(&format!("Nodes: {}\n", spec.node_allow_list().join(", ")));
    }
    if spec.requires_static_ip() {
        output.push_str("Static IP: required\n");
    }
    if let Some(instances) = spec.declared_instances() {
        output.push_str(&format!("Instances: {}\n", instances));
    }

    let reserved = config.reserved.as_triple();
    let hw = if spec.version >= 4 {
        validate_compose_hw(spec, &config.tiers, reserved)
    } else {
        validate_declared_hw(spec, &config.tiers, reserved)
    };
    match hw {
        Ok(()) => output.push_str("\nValidation: PASSED\n"),
        Err(e) => output.push_str(&format!("\nValidation: FAILED ({})\n", e)),
    }

    output
}
