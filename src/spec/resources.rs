//! Tiered resource declarations
//!
//! App and component specifications declare `cpu`/`ram`/`hdd` plus optional
//! per-tier overrides (`cpubasic`, `ramsuper`, `hddbamf`, ...). On the wire these
//! are flat fields; in memory they are an explicit `{Tier -> TierOverride}` map
//! resolved by [`Resources::resolve`].

use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use serde::{Deserialize, Serialize};

/// Node capability class bounding the resources sellable to apps
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Basic tier
    #[default]
    Cumulus,
    /// Super tier
    Nimbus,
    /// Bamf tier
    Stratus,
}

impl Tier {
    /// All tiers, smallest first
    pub const ALL: [Tier; 3] = [Tier::Cumulus, Tier::Nimbus, Tier::Stratus];

    /// Suffix used by the flat specification fields (`cpubasic`, `ramsuper`, ...)
    pub fn field_suffix(&self) -> &'static str {
        match self {
            Tier::Cumulus => "basic",
            Tier::Nimbus => "super",
            Tier::Stratus => "bamf",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Cumulus => "cumulus",
            Tier::Nimbus => "nimbus",
            Tier::Stratus => "stratus",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cumulus" | "basic" => Ok(Tier::Cumulus),
            "nimbus" | "super" => Ok(Tier::Nimbus),
            "stratus" | "bamf" => Ok(Tier::Stratus),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// CPU cores, RAM in MB and HDD in GB
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceTriple {
    pub cpu: f64,
    pub ram: u64,
    pub hdd: u64,
}

impl ResourceTriple {
    pub fn new(cpu: f64, ram: u64, hdd: u64) -> Self {
        Self { cpu, ram, hdd }
    }

    /// CPU expressed in tenths of a core
    pub fn decicores(&self) -> i64 {
        to_decicores(self.cpu)
    }
}

impl Add for ResourceTriple {
    type Output = ResourceTriple;

    fn add(self, other: ResourceTriple) -> ResourceTriple {
        ResourceTriple {
            cpu: self.cpu + other.cpu,
            ram: self.ram + other.ram,
            hdd: self.hdd + other.hdd,
        }
    }
}

impl Sum for ResourceTriple {
    fn sum<I: Iterator<Item = ResourceTriple>>(iter: I) -> Self {
        iter.fold(ResourceTriple::default(), |acc, r| acc + r)
    }
}

/// Convert cores to decicores, rounding away float noise (0.3 * 10 = 2.9999...)
pub fn to_decicores(cpu: f64) -> i64 {
    (cpu * 10.0).round() as i64
}

/// Tier-specific values declared for one tier; `None` when the field is absent
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TierOverride {
    pub cpu: Option<f64>,
    pub ram: Option<u64>,
    pub hdd: Option<u64>,
}

impl TierOverride {
    fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.ram.is_none() && self.hdd.is_none()
    }
}

/// Declared resources of an app or component
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "FlatResources", into = "FlatResources")]
pub struct Resources {
    /// Whether the per-tier overrides are consulted
    pub tiered: bool,
    /// Base values used by untiered specs and as fallback
    pub base: ResourceTriple,
    /// Per-tier overrides
    pub overrides: BTreeMap<Tier, TierOverride>,
}

impl Resources {
    /// Untiered resources
    pub fn flat(cpu: f64, ram: u64, hdd: u64) -> Self {
        Self {
            tiered: false,
            base: ResourceTriple::new(cpu, ram, hdd),
            overrides: BTreeMap::new(),
        }
    }

    /// Mark as tiered and set the override for one tier
    pub fn with_tier(mut self, tier: Tier, cpu: f64, ram: u64, hdd: u64) -> Self {
        self.tiered = true;
        self.overrides.insert(
            tier,
            TierOverride {
                cpu: Some(cpu),
                ram: Some(ram),
                hdd: Some(hdd),
            },
        );
        self
    }

    /// Override declared for a tier, if any
    pub fn tier_override(&self, tier: Tier) -> TierOverride {
        self.overrides.get(&tier).copied().unwrap_or_default()
    }

    /// Resolve the effective resources for `tier`.
    ///
    /// Each resource independently takes the tier value when the spec is tiered
    /// and the value is present and non-zero, otherwise the base value.
    pub fn resolve(&self, tier: Tier) -> ResourceTriple {
        if !self.tiered {
            return self.base;
        }
        let o = self.tier_override(tier);
        ResourceTriple {
            cpu: o.cpu.filter(|v| *v != 0.0).unwrap_or(self.base.cpu),
            ram: o.ram.filter(|v| *v != 0).unwrap_or(self.base.ram),
            hdd: o.hdd.filter(|v| *v != 0).unwrap_or(self.base.hdd),
        }
    }
}

/// Wire representation with the flat per-tier fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FlatResources {
    #[serde(default)]
    tiered: bool,
    #[serde(default)]
    cpu: f64,
    #[serde(default)]
    ram: u64,
    #[serde(default)]
    hdd: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cpubasic: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cpusuper: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cpubamf: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rambasic: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ramsuper: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rambamf: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hddbasic: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hddsuper: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hddbamf: Option<u64>,
}

impl From<FlatResources> for Resources {
    fn from(flat: FlatResources) -> Self {
        let mut overrides = BTreeMap::new();
        let per_tier = [
            (Tier::Cumulus, flat.cpubasic, flat.rambasic, flat.hddbasic),
            (Tier::Nimbus, flat.cpusuper, flat.ramsuper, flat.hddsuper),
            (Tier::Stratus, flat.cpubamf, flat.rambamf, flat.hddbamf),
        ];
        for (tier, cpu, ram, hdd) in per_tier {
            let o = TierOverride { cpu, ram, hdd };
            if !o.is_empty() {
                overrides.insert(tier, o);
            }
        }
        Resources {
            tiered: flat.tiered,
            base: ResourceTriple::new(flat.cpu, flat.ram, flat.hdd),
            overrides,
        }
    }
}

impl From<Resources> for FlatResources {
    fn from(r: Resources) -> Self {
        let basic = r.tier_override(Tier::Cumulus);
        let sup = r.tier_override(Tier::Nimbus);
        let bamf = r.tier_override(Tier::Stratus);
        FlatResources {
            tiered: r.tiered,
            cpu: r.base.cpu,
            ram: r.base.ram,
            hdd: r.base.hdd,
            cpubasic: basic.cpu,
            cpusuper: sup.cpu,
            cpubamf: bamf.cpu,
            rambasic: basic.ram,
            ramsuper: sup.ram,
            rambamf: bamf.ram,
            hddbasic: basic.hdd,
            hddsuper: sup.hdd,
            hddbamf: bamf.hdd,
        }
    }
}
