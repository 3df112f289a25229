//! Payload transforms applied to outbound grants.

use serde::{Deserialize, Serialize};

/// In-place transform over a grant's bytes.
pub trait Transform: Send {
    fn apply(&self, buffer: &mut [u8]);
}

/// Scale operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Multiply,
    Divide,
}

/// Width of one addressable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSize {
    /// One byte per unit.
    Byte,
    /// Two bytes per unit, little-endian.
    Word,
}

impl UnitSize {
    pub fn bytes(self) -> usize {
        match self {
            UnitSize::Byte => 1,
            UnitSize::Word => 2,
        }
    }
}

/// Multiplies or divides every unit by `factor`, wrapping on overflow.
///
/// Trailing bytes that do not form a whole unit are left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleTransform {
    pub factor: u32,
    pub op: OpKind,
    pub unit: UnitSize,
}

impl ScaleTransform {
    fn scale(&self, value: u32) -> u32 {
        match self.op {
            OpKind::Multiply => value.wrapping_mul(self.factor),
            // A zero divisor is rejected by config validation; pass through if it slips by.
            OpKind::Divide => value.checked_div(self.factor).unwrap_or(value),
        }
    }
}

impl Transform for ScaleTransform {
    fn apply(&self, buffer: &mut [u8]) {
        match self.unit {
            UnitSize::Byte => {
                for byte in buffer.iter_mut() {
                    *byte = self.scale(u32::from(*byte)) as u8;
                }
            }
            UnitSize::Word => {
                for pair in buffer.chunks_exact_mut(2) {
                    let value = u16::from_le_bytes([pair[0], pair[1]]);
                    let scaled = self.scale(u32::from(value)) as u16;
                    pair.copy_from_slice(&scaled.to_le_bytes());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiply_bytes_wraps() {
        let t = ScaleTransform {
            factor: 2,
            op: OpKind::Multiply,
            unit: UnitSize::Byte,
        };
        let mut buf = [1u8, 7, 200];
        t.apply(&mut buf);
        assert_eq!(buf, [2, 14, 144]);
    }

    #[test]
    fn divide_words_leaves_trailing_byte() {
        let t = ScaleTransform {
            factor: 4,
            op: OpKind::Divide,
            unit: UnitSize::Word,
        };
        let mut buf = [0x00, 0x01, 0x10, 0x00, 0xFF];
        t.apply(&mut buf);
        // 0x0100 / 4 = 0x0040, 0x0010 / 4 = 0x0004
        assert_eq!(buf, [0x40, 0x00, 0x04, 0x00, 0xFF]);
    }

    #[test]
    fn zero_divisor_is_identity() {
        let t = ScaleTransform {
            factor: 0,
            op: OpKind::Divide,
            unit: UnitSize::Byte,
        };
        let mut buf = [9u8, 3];
        t.apply(&mut buf);
        assert_eq!(buf, [9, 3]);
    }
}
