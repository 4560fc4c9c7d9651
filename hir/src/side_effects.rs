use std::fmt::{self, Display, Write};

use crate::Type;

const TYPE_COUNT: u32 = 9;

const FIELD_WRITE_OFFSET: u32 = 0;
const ARRAY_WRITE_OFFSET: u32 = FIELD_WRITE_OFFSET + TYPE_COUNT;
const LAST_BIT_FOR_WRITES: u32 = ARRAY_WRITE_OFFSET + TYPE_COUNT - 1;
const CAN_TRIGGER_GC_BIT: u32 = LAST_BIT_FOR_WRITES + 1;
const CHANGE_BITS: u32 = CAN_TRIGGER_GC_BIT + 1;

const FIELD_READ_OFFSET: u32 = CAN_TRIGGER_GC_BIT + 1;
const ARRAY_READ_OFFSET: u32 = FIELD_READ_OFFSET + TYPE_COUNT;
const LAST_BIT_FOR_READS: u32 = ARRAY_READ_OFFSET + TYPE_COUNT - 1;
const DEPENDS_ON_GC_BIT: u32 = LAST_BIT_FOR_READS + 1;

const ALL_CHANGE_BITS: u64 = (1 << CHANGE_BITS) - 1;
const ALL_DEPEND_ON_BITS: u64 = ((1 << CHANGE_BITS) - 1) << CHANGE_BITS;
const ALL_WRITES: u64 = ((1 << (LAST_BIT_FOR_WRITES + 1 - FIELD_WRITE_OFFSET)) - 1)
    << FIELD_WRITE_OFFSET;
const ALL_READS: u64 =
    ((1 << (LAST_BIT_FOR_READS + 1 - FIELD_READ_OFFSET)) - 1) << FIELD_READ_OFFSET;

/// Memory an instruction may write ("changes") and read ("depends on").
///
/// Writes and reads are tracked per type and per access kind (field or array).
/// Writes occupy the low half of the set and reads the high half, so that
/// shifting the reads down lines them up with the writes they depend on. The
/// garbage collector is modelled as one more location: allocations and
/// runtime calls may trigger it, and reference loads depend on it.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Default)]
pub struct SideEffects(u64);

impl SideEffects {
    pub const fn none() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(ALL_CHANGE_BITS | ALL_DEPEND_ON_BITS)
    }

    pub const fn all_changes() -> Self {
        Self(ALL_CHANGE_BITS)
    }

    pub const fn all_dependencies() -> Self {
        Self(ALL_DEPEND_ON_BITS)
    }

    pub const fn all_except_gc_dependency() -> Self {
        Self(ALL_CHANGE_BITS | ALL_READS)
    }

    pub const fn all_writes_and_reads() -> Self {
        Self(ALL_WRITES | ALL_READS)
    }

    pub const fn all_writes() -> Self {
        Self(ALL_WRITES)
    }

    pub const fn all_reads() -> Self {
        Self(ALL_READS)
    }

    pub const fn can_trigger_gc() -> Self {
        Self(1 << CAN_TRIGGER_GC_BIT)
    }

    pub const fn depends_on_gc() -> Self {
        Self(1 << DEPENDS_ON_GC_BIT)
    }

    /// Volatile accesses are ordered against every other memory access.
    pub fn field_write_of_type(ty: Type, is_volatile: bool) -> Self {
        if is_volatile {
            Self::all_writes_and_reads()
        } else {
            Self(type_flag(ty, FIELD_WRITE_OFFSET))
        }
    }

    pub fn array_write_of_type(ty: Type) -> Self {
        Self(type_flag(ty, ARRAY_WRITE_OFFSET))
    }

    pub fn field_read_of_type(ty: Type, is_volatile: bool) -> Self {
        if is_volatile {
            Self::all_writes_and_reads()
        } else {
            Self(type_flag(ty, FIELD_READ_OFFSET))
        }
    }

    pub fn array_read_of_type(ty: Type) -> Self {
        Self(type_flag(ty, ARRAY_READ_OFFSET))
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn exclusion(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn includes(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn does_nothing(self) -> bool {
        self.0 == 0
    }

    pub const fn has_side_effects(self) -> bool {
        self.0 & ALL_CHANGE_BITS != 0
    }

    pub const fn has_dependencies(self) -> bool {
        self.0 & ALL_DEPEND_ON_BITS != 0
    }

    pub const fn does_any_write(self) -> bool {
        self.0 & ALL_WRITES != 0
    }

    pub const fn does_any_read(self) -> bool {
        self.0 & ALL_READS != 0
    }

    pub const fn may_depend_on(self, other: Self) -> bool {
        let depends_on_flags = (self.0 & ALL_DEPEND_ON_BITS) >> CHANGE_BITS;
        other.0 & depends_on_flags != 0
    }

    pub const fn bits(self) -> u64 {
        self.0
    }
}

fn type_flag(ty: Type, offset: u32) -> u64 {
    ty.side_effect_index().map_or(0, |index| 1 << (index + offset))
}

impl Display for SideEffects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const TYPE_CHARS: &[u8] = b"LZBCSIJFD";
        f.write_char('|')?;
        for bit in (0..=DEPENDS_ON_GC_BIT).rev() {
            if bit == CAN_TRIGGER_GC_BIT {
                f.write_char('|')?;
            }
            if self.0 & (1 << bit) == 0 {
                continue;
            }
            let c = match bit {
                DEPENDS_ON_GC_BIT | CAN_TRIGGER_GC_BIT => 'G',
                ARRAY_READ_OFFSET..=LAST_BIT_FOR_READS => {
                    TYPE_CHARS[(bit - ARRAY_READ_OFFSET) as usize].to_ascii_lowercase() as char
                }
                FIELD_READ_OFFSET.. => TYPE_CHARS[(bit - FIELD_READ_OFFSET) as usize] as char,
                ARRAY_WRITE_OFFSET.. => {
                    TYPE_CHARS[(bit - ARRAY_WRITE_OFFSET) as usize].to_ascii_lowercase() as char
                }
                _ => TYPE_CHARS[(bit - FIELD_WRITE_OFFSET) as usize] as char,
            };
            f.write_char(c)?;
        }
        f.write_char('|')
    }
}
