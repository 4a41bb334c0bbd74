//! The SCP Class Reasoner (§4.D): determines each slave's capability
//! profile and checks consistency.

use sercos_hal::idn::well_known;

use crate::error::MasterError;
use crate::model::scp::{ClassMask, ScpClass, ScpClassVersion};
use crate::model::slave::ProjectedSlave;

/// Maximum `S-0-1000` / `activeClasses` entries this master accepts
/// (§4.D step 1/5).
pub const MAX_SCP_CLASS_ENTRIES: usize = 16;

/// §4.D step 1-2: validate and adopt a slave's `S-0-1000` list, already
/// read off the wire by the caller (a macro `ReadData` on `S-0-1000`).
pub fn adopt_supported_classes(
    slave: &mut ProjectedSlave,
    wire_words: &[u16],
) -> Result<(), MasterError> {
    let entry_count = wire_words.len();
    if entry_count > MAX_SCP_CLASS_ENTRIES {
        return Err(MasterError::SystemError {
            detail: "S-0-1000 list longer than the configured maximum entries",
        });
    }
    slave.supported_classes.clear();
    for &word in wire_words {
        if let Some(scv) = ScpClassVersion::from_wire(word) {
            slave.supported_classes.push(scv);
        }
    }
    Ok(())
}

/// §4.D step 4: if the application has not supplied `activeClasses`,
/// populate it with all v1-tagged classes from `supportedClasses`.
pub fn default_active_classes_if_unset(slave: &mut ProjectedSlave) {
    if !slave.active_classes.is_empty() {
        return;
    }
    slave.active_classes = slave
        .supported_classes
        .iter()
        .copied()
        .filter(|scv| scv.version == 1)
        .collect();
}

/// §4.D step 5: plausibility checks over `activeClasses`.
pub fn check_plausibility(slave: &ProjectedSlave) -> Result<(), MasterError> {
    if slave.active_classes.len() > MAX_SCP_CLASS_ENTRIES {
        return Err(MasterError::SystemError {
            detail: "activeClasses exceeds the configured maximum entries",
        });
    }

    for active in &slave.active_classes {
        let is_supported = slave
            .supported_classes
            .iter()
            .any(|s| s.class == active.class && s.version == active.version);
        if !is_supported {
            return Err(MasterError::BasicScpTypeMismatch {
                slave: crate::model::slave::SlaveIdx::new(slave.slave_index),
            });
        }
    }

    for (i, a) in slave.active_classes.iter().enumerate() {
        for b in &slave.active_classes[i + 1..] {
            if a.class == b.class && a.version != b.version {
                return Err(MasterError::BasicScpTypeMismatch {
                    slave: crate::model::slave::SlaveIdx::new(slave.slave_index),
                });
            }
        }
    }
    Ok(())
}

/// §4.D step 7: translate `activeClasses` into the 32-bit dispatch mask.
pub fn build_class_mask(slave: &mut ProjectedSlave) {
    slave.class_mask = slave
        .active_classes
        .iter()
        .fold(ClassMask::empty(), |mask, scv| {
            mask | ClassMask::from_class(scv.class)
        });
}

/// §4.D step 8: reject unless exactly one basic family is present.
pub fn check_basic_family(slave: &ProjectedSlave) -> Result<(), MasterError> {
    if slave.class_mask.has_exactly_one_basic_family() {
        Ok(())
    } else {
        Err(MasterError::BasicScpTypeMismatch {
            slave: crate::model::slave::SlaveIdx::new(slave.slave_index),
        })
    }
}

/// §4.D step 9: every `SCP_Sync` slave must support `S-0-1036` ("Inter
/// Frame Gap"); the caller supplies whether a prior attribute probe found
/// it. Returns `false` (downgrading the inter-frame-gap feature flag,
/// per §4.D) rather than erroring — absence here is a capability
/// reduction, not a protocol fault.
pub fn slave_supports_inter_frame_gap(slave: &ProjectedSlave, probe_found_it: bool) -> bool {
    if !slave.class_mask.contains(ClassMask::SYNC) {
        return true;
    }
    probe_found_it
}

/// Runs the full §4.D algorithm (steps 4,5,7,8) over an already-populated
/// `supported_classes` / already-probed `supports_active_class_selection`.
/// Steps 1-3 and 6 (wire I/O against the slave) are the caller's
/// responsibility since they require SVC macro transactions; this function
/// is the pure reasoning core.
pub fn reconcile(slave: &mut ProjectedSlave) -> Result<(), MasterError> {
    default_active_classes_if_unset(slave);
    check_plausibility(slave)?;
    build_class_mask(slave);
    check_basic_family(slave)?;
    Ok(())
}

/// §4.D step 6: whether `activeClasses` should be written back (slave
/// supports `S-0-1000.0.1`) or the absence recorded as
/// `S_0_1000_0_1_NOT_SUPPORTED` (tracked via a `tracing` event since it is
/// informational, not a `MasterError` per §4.D "a 'not there' error is
/// informational").
pub fn note_active_class_writeback(slave: &ProjectedSlave) {
    if !slave.supports_active_class_selection && !slave.active_classes.is_empty() {
        tracing::info!(
            slave_idx = slave.slave_index,
            idn = %well_known::S_0_1000_0_1,
            "S_0_1000_0_1_NOT_SUPPORTED"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slave_with_classes(classes: &[(ScpClass, u8)]) -> ProjectedSlave {
        let mut slave = ProjectedSlave::new(0, 1);
        slave.supported_classes = classes
            .iter()
            .map(|&(c, v)| ScpClassVersion::new(c, v))
            .collect();
        slave
    }

    #[test]
    fn defaults_to_all_v1_classes_when_unset() {
        let mut slave = slave_with_classes(&[(ScpClass::FixCfg, 1), (ScpClass::Sync, 2)]);
        default_active_classes_if_unset(&mut slave);
        assert_eq!(slave.active_classes.len(), 1);
        assert_eq!(slave.active_classes[0].class, ScpClass::FixCfg);
    }

    #[test]
    fn rejects_active_class_not_in_supported_list() {
        let mut slave = slave_with_classes(&[(ScpClass::FixCfg, 1)]);
        slave.active_classes = vec![ScpClassVersion::new(ScpClass::VarCfg, 1)];
        assert!(check_plausibility(&slave).is_err());
    }

    #[test]
    fn rejects_duplicate_class_with_different_versions() {
        let mut slave = slave_with_classes(&[(ScpClass::FixCfg, 1), (ScpClass::Sync, 2)]);
        slave.active_classes = vec![
            ScpClassVersion::new(ScpClass::FixCfg, 1),
            ScpClassVersion::new(ScpClass::FixCfg, 2),
        ];
        // Second FixCfg entry is not itself in supported_classes as v2, so
        // this also fails the membership check; exercise the duplicate
        // path directly with a slave that supports both versions.
        slave.supported_classes.push(ScpClassVersion::new(ScpClass::FixCfg, 2));
        assert!(check_plausibility(&slave).is_err());
    }

    #[test]
    fn reconcile_builds_mask_and_accepts_fixcfg_only_fleet() {
        let mut slave = slave_with_classes(&[(ScpClass::FixCfg, 1), (ScpClass::Sync, 1)]);
        reconcile(&mut slave).unwrap();
        assert!(slave.class_mask.contains(ClassMask::FIX_CFG));
        assert!(slave.class_mask.contains(ClassMask::SYNC));
    }

    #[test]
    fn reconcile_rejects_both_basic_families() {
        let mut slave = slave_with_classes(&[(ScpClass::FixCfg, 1), (ScpClass::VarCfg, 1)]);
        let err = reconcile(&mut slave);
        assert!(err.is_err());
    }

    #[test]
    fn inter_frame_gap_requirement_only_applies_to_sync_slaves() {
        let mut slave = slave_with_classes(&[(ScpClass::FixCfg, 1)]);
        reconcile(&mut slave).unwrap();
        assert!(slave_supports_inter_frame_gap(&slave, false));

        let mut sync_slave = slave_with_classes(&[(ScpClass::VarCfg, 1), (ScpClass::Sync, 1)]);
        reconcile(&mut sync_slave).unwrap();
        assert!(!slave_supports_inter_frame_gap(&sync_slave, false));
        assert!(slave_supports_inter_frame_gap(&sync_slave, true));
    }
}
