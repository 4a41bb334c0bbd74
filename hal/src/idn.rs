//! Sercos IDN addressing and the seven service-channel elements.

use core::fmt;

/// Element number within a parameter's SVC data block. Fixed by the Sercos
/// wire format: 1 = IDN, 2 = name, 3 = attribute, 4 = unit, 5 = min, 6 = max,
/// 7 = operation data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Element {
    Idn = 1,
    Name = 2,
    Attribute = 3,
    Unit = 4,
    Min = 5,
    Max = 6,
    Data = 7,
}

impl Element {
    pub const fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Element::Idn,
            2 => Element::Name,
            3 => Element::Attribute,
            4 => Element::Unit,
            5 => Element::Min,
            6 => Element::Max,
            7 => Element::Data,
            _ => return None,
        })
    }

    /// Elements 2 and 4 (name, unit) are lists; element 7 may be a list
    /// depending on the attribute. 1/3/5/6 are always fixed-length scalars.
    pub const fn is_always_list(self) -> bool {
        matches!(self, Element::Name | Element::Unit)
    }
}

/// A Sercos identifier number: `S/P-<parameter>.<SI>.<SE>`.
///
/// `is_procedure_command` distinguishes `S-0-0127`-style command IDNs (which
/// the master interacts with through Set/Clear/ReadCmdStatus) from data IDNs;
/// both render with the same `S-0-` prefix (§6 names `S-0-0127`/`S-0-1024`
/// the same way it names data parameters), so the distinction only affects
/// `to_u32`'s marker bit, not `Display`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Idn {
    pub is_procedure_command: bool,
    pub parameter: u16,
    pub structure_instance: u8,
    pub structure_element: u8,
}

impl Idn {
    pub const fn s(parameter: u16) -> Self {
        Self {
            is_procedure_command: false,
            parameter,
            structure_instance: 0,
            structure_element: 0,
        }
    }

    pub const fn s_with(parameter: u16, structure_instance: u8, structure_element: u8) -> Self {
        Self {
            is_procedure_command: false,
            parameter,
            structure_instance,
            structure_element,
        }
    }

    pub const fn cmd(parameter: u16) -> Self {
        Self {
            is_procedure_command: true,
            parameter,
            structure_instance: 0,
            structure_element: 0,
        }
    }

    /// Encode as the 32-bit wire representation: bit 31 marks "S" (data,
    /// clear) vs "P" parameters are not distinguished by this master since
    /// only S-parameters are used for master/slave communication parameters;
    /// bit 30 marks a procedure command.
    pub const fn to_u32(self) -> u32 {
        (self.parameter as u32)
            | ((self.structure_instance as u32) << 16)
            | ((self.structure_element as u32) << 24)
            | if self.is_procedure_command { 1 << 30 } else { 0 }
    }
}

impl fmt::Display for Idn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "S-0-{:04}.{}.{}",
            self.parameter, self.structure_instance, self.structure_element
        )
    }
}

/// Named IDNs referenced by this master (§6).
pub mod well_known {
    use super::Idn;

    pub const S_0_1000: Idn = Idn::s(1000);
    pub const S_0_1000_0_1: Idn = Idn::s_with(1000, 0, 1);
    pub const S_0_1002: Idn = Idn::s(1002);
    pub const S_0_1003: Idn = Idn::s(1003);
    pub const S_0_1005: Idn = Idn::s(1005);
    pub const S_0_1006: Idn = Idn::s(1006);
    pub const S_0_1007: Idn = Idn::s(1007);
    pub const S_0_1008: Idn = Idn::s(1008);
    pub const S_0_1009: Idn = Idn::s(1009);
    pub const S_0_1010: Idn = Idn::s(1010);
    pub const S_0_1011: Idn = Idn::s(1011);
    pub const S_0_1012: Idn = Idn::s(1012);
    pub const S_0_1013: Idn = Idn::s(1013);
    pub const S_0_1014: Idn = Idn::s(1014);
    pub const S_0_1015: Idn = Idn::s(1015);
    pub const S_0_1017: Idn = Idn::s(1017);
    pub const S_0_1023: Idn = Idn::s(1023);
    pub const S_0_1024: Idn = Idn::cmd(1024);
    pub const S_0_1027_0_1: Idn = Idn::s_with(1027, 0, 1);
    pub const S_0_1027_0_2: Idn = Idn::s_with(1027, 0, 2);
    pub const S_0_1032: Idn = Idn::s(1032);
    pub const S_0_1036: Idn = Idn::s(1036);
    pub const S_0_1037: Idn = Idn::s(1037);
    pub const S_0_1047: Idn = Idn::s(1047);
    pub const S_0_1048: Idn = Idn::s(1048);
    pub const S_0_1051: Idn = Idn::s(1051);
    pub const S_0_1061: Idn = Idn::s(1061);
    pub const S_0_0127: Idn = Idn::cmd(127);
    pub const S_0_0128: Idn = Idn::cmd(128);

    /// `S-0-1050.<connection>.<se>`: per-connection configuration list.
    pub const fn s_0_1050(connection: u8, structure_element: u8) -> Idn {
        Idn::s_with(1050, connection, structure_element)
    }

    /// `S-0-1060.<connection>.7`: real-time-bit allocation for a connection.
    pub const fn s_0_1060_7(connection: u8) -> Idn {
        Idn::s_with(1060, connection, 7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_round_trips_through_u8() {
        for raw in 1u8..=7 {
            let e = Element::from_u8(raw).unwrap();
            assert_eq!(e as u8, raw);
        }
        assert!(Element::from_u8(0).is_none());
        assert!(Element::from_u8(8).is_none());
    }

    #[test]
    fn name_and_unit_are_always_lists() {
        assert!(Element::Name.is_always_list());
        assert!(Element::Unit.is_always_list());
        assert!(!Element::Data.is_always_list());
    }

    #[test]
    fn procedure_command_idn_sets_marker_bit() {
        let idn = well_known::S_0_1024;
        assert!(idn.is_procedure_command);
        assert_eq!(idn.to_u32() >> 30 & 1, 1);
    }

    #[test]
    fn display_matches_dotted_form() {
        let idn = well_known::s_0_1050(3, 1);
        assert_eq!(format!("{}", idn), "S-0-1050.3.1");
    }
}
