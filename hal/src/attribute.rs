//! The 4-byte attribute word read from SVC element 3 (§4.B `ReadAttribute`).

use bit_field::BitField;

/// IEC 61800-7 / Sercos data type codes carried in the low byte of the
/// attribute word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Binary,
    Unsigned,
    Signed,
    Unicode,
    Other(u8),
}

impl DataType {
    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => DataType::Binary,
            1 => DataType::Unsigned,
            2 => DataType::Signed,
            3 => DataType::Unicode,
            other => DataType::Other(other),
        }
    }
}

/// Parsed form of SVC element 3: type, length code, list flag, procedure
/// command flag, data-block element bitmask, and the parameter/product
/// attribute bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeWord {
    pub data_type: DataType,
    /// Length code: 0=1 byte, 1=2, 2=4, 3=8 bytes (fixed-length elements).
    pub length_code: u8,
    pub is_list: bool,
    pub is_procedure_command: bool,
    /// Bit N set => data block element `N+2` (name, attribute, unit, min,
    /// max) is present for this IDN.
    pub data_block_elements: u8,
    /// `true` => a product (read-only across the network) attribute,
    /// `false` => a regular parameter attribute.
    pub is_product_attribute: bool,
}

impl AttributeWord {
    pub fn from_wire(word: u32) -> Self {
        Self {
            data_type: DataType::from_code(word.get_bits(0..4) as u8),
            length_code: word.get_bits(4..6) as u8,
            is_list: word.get_bit(6),
            is_procedure_command: word.get_bit(7),
            data_block_elements: word.get_bits(8..14) as u8,
            is_product_attribute: word.get_bit(15),
        }
    }

    pub fn to_wire(self) -> u32 {
        let mut word: u32 = 0;
        word.set_bits(0..4, self.data_type_code() as u32);
        word.set_bits(4..6, self.length_code as u32);
        word.set_bit(6, self.is_list);
        word.set_bit(7, self.is_procedure_command);
        word.set_bits(8..14, self.data_block_elements as u32);
        word.set_bit(15, self.is_product_attribute);
        word
    }

    fn data_type_code(self) -> u8 {
        match self.data_type {
            DataType::Binary => 0,
            DataType::Unsigned => 1,
            DataType::Signed => 2,
            DataType::Unicode => 3,
            DataType::Other(code) => code,
        }
    }

    /// Length in bytes implied by `length_code`, for fixed-length (non-list)
    /// elements. Lists carry their own 4-byte current/max-length header
    /// instead (§4.B `ReadName`/`ReadUnit`/`GetListLength`).
    pub const fn fixed_length_bytes(self) -> u8 {
        match self.length_code {
            0 => 1,
            1 => 2,
            2 => 4,
            _ => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_wire_encoding() {
        let attr = AttributeWord {
            data_type: DataType::Signed,
            length_code: 2,
            is_list: true,
            is_procedure_command: false,
            data_block_elements: 0b10101,
            is_product_attribute: true,
        };
        assert_eq!(AttributeWord::from_wire(attr.to_wire()), attr);
    }

    #[test]
    fn fixed_length_bytes_matches_length_code_table() {
        for (code, expected) in [(0u8, 1u8), (1, 2), (2, 4), (3, 8)] {
            let attr = AttributeWord {
                data_type: DataType::Binary,
                length_code: code,
                is_list: false,
                is_procedure_command: false,
                data_block_elements: 0,
                is_product_attribute: false,
            };
            assert_eq!(attr.fixed_length_bytes(), expected);
        }
    }
}
