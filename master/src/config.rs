//! `MasterConfig` (§9.A ambient engineering stack): the serde-derived
//! configuration value an embedding application builds once (typically
//! deserialised from TOML/JSON by the caller) and hands to
//! [`crate::instance::Instance::new`]. This crate never reads files itself
//! (§6 "Persisted state: none") — only the typed shape is owned here.

use serde::{Deserialize, Serialize};

use crate::model::scp::ScpClassVersion;
use crate::model::timing::TimingMasterKind;

/// Per-slave static configuration, known before the fleet is ever driven
/// through CP0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveConfig {
    /// Sercos wire address, 1..=511.
    pub address: u16,
    /// Application-selected active SCP classes; empty means "adopt all v1
    /// classes reported by the slave" (§4.D step 4).
    #[serde(default)]
    pub active_classes: Vec<ScpClassVersionConfig>,
}

/// Serde-friendly mirror of [`ScpClassVersion`] (the real type's `ScpClass`
/// enum is not itself `Deserialize` since its wire encoding is the
/// authority, not a derive).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScpClassVersionConfig {
    /// `S-0-1000` class type byte (§4.D), e.g. `0x03` for SCP_Sync.
    pub class_type: u8,
    pub version: u8,
}

impl ScpClassVersionConfig {
    pub fn to_scp_class_version(self) -> Option<ScpClassVersion> {
        crate::model::scp::ScpClass::from_type_byte(self.class_type)
            .map(|class| ScpClassVersion::new(class, self.version))
    }
}

/// Hot-Plug timeout/repeat budgets (§5 "Timeouts", §4.E), exposed as
/// configuration rather than hard-coded constants so an integrator can tune
/// them per installation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HotPlugConfig {
    pub hp0_repeat_count: u32,
    pub slave_scan_timeout_cycles: u32,
    pub hp1_dispatch_timeout_cycles: u32,
    pub svc_activation_timeout_cycles: u32,
    /// Budget for the condensed CP2→CP4 parameter push (§4.E "Condensed CP
    /// parameter push"), nominally 200 ms expressed in cycles of `tScyc`.
    pub condensed_push_timeout_cycles: u32,
}

impl Default for HotPlugConfig {
    fn default() -> Self {
        Self {
            hp0_repeat_count: 16,
            slave_scan_timeout_cycles: 2000,
            hp1_dispatch_timeout_cycles: 2000,
            svc_activation_timeout_cycles: 2000,
            condensed_push_timeout_cycles: 200,
        }
    }
}

/// Top-level configuration for one [`crate::instance::Instance`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    pub slaves: Vec<SlaveConfig>,
    #[serde(default = "default_t_scyc_ns")]
    pub t_scyc_ns: u32,
    #[serde(default)]
    pub master_kind: MasterKindConfig,
    #[serde(default)]
    pub hotplug: HotPlugConfig,
    /// Maximum `S-0-1000`/`activeClasses` entries accepted (§4.D step 1/5).
    #[serde(default = "default_max_scp_class_entries")]
    pub max_scp_class_entries: usize,
}

fn default_t_scyc_ns() -> u32 {
    1_000_000
}

fn default_max_scp_class_entries() -> usize {
    crate::phase::scp::MAX_SCP_CLASS_ENTRIES
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub enum MasterKindConfig {
    #[default]
    Hard,
    Soft,
}

impl From<MasterKindConfig> for TimingMasterKind {
    fn from(value: MasterKindConfig) -> Self {
        match value {
            MasterKindConfig::Hard => TimingMasterKind::Hard,
            MasterKindConfig::Soft => TimingMasterKind::Soft,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hotplug_config_has_nonzero_budgets() {
        let cfg = HotPlugConfig::default();
        assert!(cfg.hp0_repeat_count > 0);
        assert!(cfg.slave_scan_timeout_cycles > 0);
    }

    #[test]
    fn master_kind_config_maps_to_timing_master_kind() {
        assert_eq!(
            TimingMasterKind::from(MasterKindConfig::Soft),
            TimingMasterKind::Soft
        );
        assert_eq!(
            TimingMasterKind::from(MasterKindConfig::Hard),
            TimingMasterKind::Hard
        );
    }

    #[test]
    fn scp_class_version_config_rejects_unknown_class_type() {
        let cfg = ScpClassVersionConfig {
            class_type: 0xFF,
            version: 1,
        };
        assert!(cfg.to_scp_class_version().is_none());
    }
}
