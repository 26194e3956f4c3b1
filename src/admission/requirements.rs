//! Resource requirements, the ledger of locked resources and hardware checks

use serde::Serialize;

use super::AdmissionError;
use crate::spec::{to_decicores, AppSpecification, ResourceTriple, Resources, Tier};
use crate::state::NodeSpecs;

/// Share of the SSD that may be sold to apps
pub const SSD_USABLE_FRACTION: f64 = 0.95;

/// Resources required by `spec` on a node of `tier`.
///
/// Versions 1-3 resolve the top-level fields; version 4 and later sum the
/// independently resolved components. A newer spec without components falls back
/// to its raw top-level fields.
pub fn compute_requirements(spec: &AppSpecification, tier: Tier) -> ResourceTriple {
    if spec.version <= 3 {
        spec.resources.resolve(tier)
    } else if !spec.compose.is_empty() {
        spec.compose.iter().map(|c| c.resources.resolve(tier)).sum()
    } else {
        spec.resources.base
    }
}

/// Resources held by installed apps; recomputed on demand, never stored
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLedger {
    pub cpus_locked: f64,
    pub ram_locked: u64,
    pub hdd_locked: u64,
}

impl ResourceLedger {
    /// Sum the requirements of `apps`, skipping the app named `exclude`
    pub fn from_apps(apps: &[AppSpecification], tier: Tier, exclude: Option<&str>) -> Self {
        let total: ResourceTriple = apps
            .iter()
            .filter(|a| Some(a.name.as_str()) != exclude)
            .map(|a| compute_requirements(a, tier))
            .sum();
        Self {
            cpus_locked: total.cpu,
            ram_locked: total.ram,
            hdd_locked: total.hdd,
        }
    }
}

/// Check `required` against node capacity minus reserved and locked resources.
///
/// HDD is checked first against 95% of the SSD, then CPU in decicores, then RAM.
pub fn check_hardware(
    required: ResourceTriple,
    node: NodeSpecs,
    reserved: ResourceTriple,
    ledger: ResourceLedger,
) -> Result<(), AdmissionError> {
    let hdd_available =
        node.ssd_gb as f64 * SSD_USABLE_FRACTION - reserved.hdd as f64 - ledger.hdd_locked as f64;
    if required.hdd as f64 > hdd_available {
        return Err(AdmissionError::InsufficientSpace);
    }

    let cpu_available = to_decicores(node.cpu_cores)
        - to_decicores(reserved.cpu)
        - to_decicores(ledger.cpus_locked);
    if required.decicores() > cpu_available {
        return Err(AdmissionError::InsufficientCpu);
    }

    let ram_available = node.ram_mb as i64 - reserved.ram as i64 - ledger.ram_locked as i64;
    if required.ram as i64 > ram_available {
        return Err(AdmissionError::InsufficientRam);
    }

    Ok(())
}

// ============================================================================
// Declared hardware sanity checks
// ============================================================================

fn invalid(msg: String) -> AdmissionError {
    AdmissionError::InvalidHardware(msg)
}

/// Fixed-point rules: cpu in steps of 0.1, ram in steps of 100, hdd at least 1
fn check_format(label: &str, r: ResourceTriple) -> Result<(), AdmissionError> {
    let tenths = r.cpu * 10.0;
    if r.cpu < 0.1 || (tenths - tenths.round()).abs() > 1e-6 {
        return Err(invalid(format!(
            "CPU of {} badly assigned: {} is not a positive multiple of 0.1",
            label, r.cpu
        )));
    }
    if r.ram < 100 || r.ram % 100 != 0 {
        return Err(invalid(format!(
            "RAM of {} badly assigned: {} is not a positive multiple of 100",
            label, r.ram
        )));
    }
    if r.hdd < 1 {
        return Err(invalid(format!("SSD of {} badly assigned: {}", label, r.hdd)));
    }
    Ok(())
}

fn check_ceiling(
    label: &str,
    r: ResourceTriple,
    ceiling: ResourceTriple,
    reserved: ResourceTriple,
) -> Result<(), AdmissionError> {
    if r.decicores() > ceiling.decicores() - reserved.decicores() {
        return Err(invalid(format!("Too much CPU resources assigned for {}", label)));
    }
    if r.ram > ceiling.ram.saturating_sub(reserved.ram) {
        return Err(invalid(format!("Too much RAM resources assigned for {}", label)));
    }
    if r.hdd > ceiling.hdd.saturating_sub(reserved.hdd) {
        return Err(invalid(format!("Too much SSD resources assigned for {}", label)));
    }
    Ok(())
}

/// Values declared for `tier`; a tiered spec must declare all three
fn declared_tier_values(
    label: &str,
    resources: &Resources,
    tier: Tier,
) -> Result<ResourceTriple, AdmissionError> {
    let o = resources.tier_override(tier);
    let suffix = tier.field_suffix();
    match (o.cpu, o.ram, o.hdd) {
        (Some(cpu), Some(ram), Some(hdd)) => Ok(ResourceTriple::new(cpu, ram, hdd)),
        (None, _, _) => Err(invalid(format!("cpu{} of {} is missing", suffix, label))),
        (_, None, _) => Err(invalid(format!("ram{} of {} is missing", suffix, label))),
        (_, _, None) => Err(invalid(format!("hdd{} of {} is missing", suffix, label))),
    }
}

/// Sanity-check the declared hardware of a single-container spec
pub fn validate_declared_hw(
    spec: &AppSpecification,
    ceilings: &crate::config::TierCeilings,
    reserved: ResourceTriple,
) -> Result<(), AdmissionError> {
    let label = spec.name.as_str();
    let resources = &spec.resources;

    check_format(label, resources.base)?;
    check_ceiling(label, resources.base, ceilings.ceiling(Tier::Stratus), reserved)?;

    if resources.tiered {
        for tier in Tier::ALL {
            let values = declared_tier_values(label, resources, tier)?;
            check_format(label, values)?;
            check_ceiling(label, values, ceilings.ceiling(tier), reserved)?;
        }
    }
    Ok(())
}

/// Sanity-check a compose spec: every component's format, then the app totals
pub fn validate_compose_hw(
    spec: &AppSpecification,
    ceilings: &crate::config::TierCeilings,
    reserved: ResourceTriple,
) -> Result<(), AdmissionError> {
    let mut base_total = ResourceTriple::default();
    let mut tier_totals = [ResourceTriple::default(); 3];
    let mut any_tiered = false;

    for component in &spec.compose {
        let label = format!("{} of {}", component.name, spec.name);
        let resources = &component.resources;
        check_format(&label, resources.base)?;
        base_total = base_total + resources.base;

        for (i, tier) in Tier::ALL.into_iter().enumerate() {
            let values = if resources.tiered {
                any_tiered = true;
                let values = declared_tier_values(&label, resources, tier)?;
                check_format(&label, values)?;
                values
            } else {
                resources.base
            };
            tier_totals[i] = tier_totals[i] + values;
        }
    }

    check_ceiling(
        &spec.name,
        base_total,
        ceilings.ceiling(Tier::Stratus),
        reserved,
    )?;
    if any_tiered {
        for (i, tier) in Tier::ALL.into_iter().enumerate() {
            check_ceiling(&spec.name, tier_totals[i], ceilings.ceiling(tier), reserved)?;
        }
    }
    Ok(())
}
