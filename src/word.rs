// The machine cell type.
//
// A Word is 64 bits with no stored tag. Unsigned, signed, float, and
// pointer readings all share the same bit pattern, and the file format
// depends on that: operands are written to disk as raw bits and must
// come back meaning whatever the program meant them to mean.

use std::fmt;

#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct Word(u64);

impl Word {
    pub fn from_u64(value: u64) -> Word {
        Word(value)
    }

    pub fn from_i64(value: i64) -> Word {
        Word(value as u64)
    }

    pub fn from_f64(value: f64) -> Word {
        Word(value.to_bits())
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.0)
    }

    // Pointer reading. Only ever displayed; the machine never
    // dereferences it.
    pub fn as_ptr(self) -> *const u8 {
        self.0 as *const u8
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Word({:#018x})", self.0)
    }
}

impl From<u64> for Word {
    fn from(value: u64) -> Word { Word::from_u64(value) }
}

impl From<i64> for Word {
    fn from(value: i64) -> Word { Word::from_i64(value) }
}

impl From<f64> for Word {
    fn from(value: f64) -> Word { Word::from_f64(value) }
}
