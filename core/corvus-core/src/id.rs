//! The tagged 64-bit value that fills every table cell.
//!
//! An [`Id`] packs a 4-bit datatype tag and a 60-bit payload into one word.
//! Vocabulary entries, numbers, dates and booleans all live behind the same
//! fixed-width representation so that tables stay columnar and joins compare
//! plain words. `Undefined` is a first-class value: it carries tag zero and
//! payload zero and compares strictly below every defined id, which is what
//! lets the merge-join kernels bound the range of rows an UNDEF can match.

use std::cmp::Ordering;
use std::fmt;

const TAG_BITS: u32 = 4;
const PAYLOAD_BITS: u32 = 64 - TAG_BITS;
const PAYLOAD_MASK: u64 = (1 << PAYLOAD_BITS) - 1;

/// Datatype tag of an [`Id`], stored in the high 4 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Datatype {
    Undefined = 0,
    Bool = 1,
    Int = 2,
    Double = 3,
    Date = 4,
    VocabIndex = 5,
    LocalVocabIndex = 6,
    TextRecordIndex = 7,
    BlankNodeIndex = 8,
}

impl Datatype {
    fn from_tag(tag: u64) -> Self {
        match tag {
            0 => Datatype::Undefined,
            1 => Datatype::Bool,
            2 => Datatype::Int,
            3 => Datatype::Double,
            4 => Datatype::Date,
            5 => Datatype::VocabIndex,
            6 => Datatype::LocalVocabIndex,
            7 => Datatype::TextRecordIndex,
            8 => Datatype::BlankNodeIndex,
            _ => unreachable!("corrupt id tag {tag}"),
        }
    }
}

/// A 64-bit tagged value: one cell of an `IdTable`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Id(u64);

impl Id {
    const fn with_tag(tag: Datatype, payload: u64) -> Self {
        Id(((tag as u64) << PAYLOAD_BITS) | (payload & PAYLOAD_MASK))
    }

    /// The unbound value. Matches everything in joins, sorts first.
    pub const UNDEF: Id = Id(0);

    pub fn from_bool(value: bool) -> Self {
        Id::with_tag(Datatype::Bool, value as u64)
    }

    /// Store a signed integer in the 60-bit payload. Values outside the
    /// representable range are clamped.
    pub fn from_int(value: i64) -> Self {
        let min = -(1i64 << (PAYLOAD_BITS - 1));
        let max = (1i64 << (PAYLOAD_BITS - 1)) - 1;
        let clamped = value.clamp(min, max);
        Id::with_tag(Datatype::Int, (clamped as u64) & PAYLOAD_MASK)
    }

    /// Store a double, dropping the low 4 mantissa bits to make room for the
    /// tag.
    pub fn from_double(value: f64) -> Self {
        Id::with_tag(Datatype::Double, value.to_bits() >> TAG_BITS)
    }

    /// Opaque date payload in the external index encoding.
    pub fn from_date(payload: u64) -> Self {
        Id::with_tag(Datatype::Date, payload)
    }

    pub fn from_vocab_index(index: u64) -> Self {
        Id::with_tag(Datatype::VocabIndex, index)
    }

    pub fn from_local_vocab_index(index: u64) -> Self {
        Id::with_tag(Datatype::LocalVocabIndex, index)
    }

    pub fn from_text_record_index(index: u64) -> Self {
        Id::with_tag(Datatype::TextRecordIndex, index)
    }

    pub fn from_blank_node_index(index: u64) -> Self {
        Id::with_tag(Datatype::BlankNodeIndex, index)
    }

    pub fn datatype(self) -> Datatype {
        Datatype::from_tag(self.0 >> PAYLOAD_BITS)
    }

    pub fn is_undefined(self) -> bool {
        self == Id::UNDEF
    }

    fn payload(self) -> u64 {
        self.0 & PAYLOAD_MASK
    }

    /// Sign-extended integer payload. `None` for other datatypes.
    pub fn as_int(self) -> Option<i64> {
        if self.datatype() != Datatype::Int {
            return None;
        }
        let raw = (self.payload() << TAG_BITS) as i64;
        Some(raw >> TAG_BITS)
    }

    pub fn as_double(self) -> Option<f64> {
        if self.datatype() != Datatype::Double {
            return None;
        }
        Some(f64::from_bits(self.payload() << TAG_BITS))
    }

    pub fn as_bool(self) -> Option<bool> {
        if self.datatype() != Datatype::Bool {
            return None;
        }
        Some(self.payload() != 0)
    }

    /// Index payload for the vocabulary-like datatypes.
    pub fn index(self) -> Option<u64> {
        match self.datatype() {
            Datatype::VocabIndex
            | Datatype::LocalVocabIndex
            | Datatype::TextRecordIndex
            | Datatype::BlankNodeIndex
            | Datatype::Date => Some(self.payload()),
            _ => None,
        }
    }

    /// Numeric view across `Bool`, `Int` and `Double`, used by filter
    /// expressions. `None` means "not a number" and excludes the row.
    pub fn as_numeric(self) -> Option<f64> {
        match self.datatype() {
            Datatype::Bool => Some(self.payload() as f64),
            Datatype::Int => self.as_int().map(|i| i as f64),
            Datatype::Double => self.as_double(),
            _ => None,
        }
    }

    /// The raw word. Only meaningful for serialization and hashing.
    pub fn to_bits(self) -> u64 {
        self.0
    }
}

impl Ord for Id {
    /// Total order: datatype tag first (so `Undefined` is the global
    /// minimum), then the semantic value within the datatype.
    fn cmp(&self, other: &Self) -> Ordering {
        let (dt_left, dt_right) = (self.datatype(), other.datatype());
        if dt_left != dt_right {
            return dt_left.cmp(&dt_right);
        }
        match dt_left {
            Datatype::Int => self.as_int().cmp(&other.as_int()),
            Datatype::Double => {
                let left = self.as_double().unwrap_or(f64::NAN);
                let right = other.as_double().unwrap_or(f64::NAN);
                left.total_cmp(&right)
            }
            _ => self.payload().cmp(&other.payload()),
        }
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Id {
    /// Canonical, locale-independent rendering. Cache keys embed this, so
    /// the format must be byte-stable across platforms.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.datatype() {
            Datatype::Undefined => write!(f, "U"),
            Datatype::Bool => write!(f, "B:{}", self.payload()),
            Datatype::Int => write!(f, "I:{}", self.as_int().unwrap_or(0)),
            Datatype::Double => write!(f, "D:{:?}", self.as_double().unwrap_or(0.0)),
            Datatype::Date => write!(f, "T:{}", self.payload()),
            Datatype::VocabIndex => write!(f, "V:{}", self.payload()),
            Datatype::LocalVocabIndex => write!(f, "L:{}", self.payload()),
            Datatype::TextRecordIndex => write!(f, "X:{}", self.payload()),
            Datatype::BlankNodeIndex => write!(f, "_:{}", self.payload()),
        }
    }
}
