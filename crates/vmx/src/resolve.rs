//! Control resolution
//!
//! Merges the per-bit legality reported by a capability MSR with the settings requested by the
//! hypervisor. The resolved value is always legal for the hardware: when the request can't be
//! honored the hardware wins and the disagreement is reported as a [`Conflict`].
//!
//! See Intel SDM Vol 3D Appendix A.3 for the meaning of the allowed settings.

use core::fmt;

use crate::caps::CapabilityMask;

// ———————————————————————————————— Bit Fields ———————————————————————————————— //

/// A contiguous group of bits inside a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    /// Mask of the field, right-aligned.
    pub mask: u64,
    /// Position of the lowest bit of the field.
    pub shift: u32,
}

impl BitField {
    /// A field of `width` bits starting at bit `shift`.
    pub const fn new(shift: u32, width: u32) -> Self {
        assert!(width > 0 && width <= 64 && shift + width <= 64, "Invalid bit field");
        let mask = if width == 64 {
            u64::MAX
        } else {
            (1 << width) - 1
        };
        Self { mask, shift }
    }

    /// A single bit field.
    pub const fn bit(index: u32) -> Self {
        Self::new(index, 1)
    }

    /// Extracts the field from a raw register value.
    pub const fn get(self, raw: u64) -> u64 {
        (raw >> self.shift) & self.mask
    }

    /// Returns true if any bit of the field is set.
    pub const fn is_set(self, raw: u64) -> bool {
        self.get(raw) != 0
    }

    /// Returns `raw` with the field replaced by `value`.
    pub const fn insert(self, raw: u64, value: u64) -> u64 {
        (raw & !self.in_place()) | ((value & self.mask) << self.shift)
    }

    /// The mask of the field at its position in the register.
    pub const fn in_place(self) -> u64 {
        self.mask << self.shift
    }
}

// ————————————————————————————— Desired Features ————————————————————————————— //

/// The settings the hypervisor asks for on one control register.
///
/// Bits present in neither mask carry no preference and resolve to 0 when the hardware lets us
/// choose.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DesiredFeatureSet {
    must_be_1: u32,
    must_be_0: u32,
}

impl DesiredFeatureSet {
    /// Creates a feature set, the two masks must not overlap.
    pub const fn new(must_be_1: u32, must_be_0: u32) -> Self {
        assert!(
            must_be_1 & must_be_0 == 0,
            "A control bit can't be both required and forbidden"
        );
        Self {
            must_be_1,
            must_be_0,
        }
    }

    /// No preference for any bit.
    pub const fn empty() -> Self {
        Self::new(0, 0)
    }

    /// Additionally requires the given bits to be set.
    pub const fn require(self, bits: u32) -> Self {
        Self::new(self.must_be_1 | bits, self.must_be_0)
    }

    /// Additionally requires the given bits to be cleared.
    pub const fn forbid(self, bits: u32) -> Self {
        Self::new(self.must_be_1, self.must_be_0 | bits)
    }

    pub const fn must_be_1(&self) -> u32 {
        self.must_be_1
    }

    pub const fn must_be_0(&self) -> u32 {
        self.must_be_0
    }

    /// Bits without preference.
    pub const fn unspecified(&self) -> u32 {
        !(self.must_be_1 | self.must_be_0)
    }
}

// ———————————————————————————————— Conflicts ————————————————————————————————— //

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The bit is required but the hardware only allows 0.
    RequiredButUnsupported,
    /// The bit is forbidden but the hardware only allows 1.
    ForbiddenButMandatory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict {
    /// Index of the bit, in 0..32.
    pub bit: u8,
    pub reason: ConflictReason,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            ConflictReason::RequiredButUnsupported => {
                write!(f, "bit {} is required but unsupported", self.bit)
            }
            ConflictReason::ForbiddenButMandatory => {
                write!(f, "bit {} is forbidden but mandatory", self.bit)
            }
        }
    }
}

/// The set of conflicts of a resolution.
///
/// A bit conflicts for at most one reason, so two masks are enough to hold any set of conflicts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Conflicts {
    required_but_unsupported: u32,
    forbidden_but_mandatory: u32,
}

impl Conflicts {
    pub const fn is_empty(&self) -> bool {
        self.required_but_unsupported == 0 && self.forbidden_but_mandatory == 0
    }

    pub const fn len(&self) -> usize {
        (self.required_but_unsupported.count_ones() + self.forbidden_but_mandatory.count_ones())
            as usize
    }

    /// Bits required by the caller that the hardware forces to 0.
    pub const fn required_but_unsupported(&self) -> u32 {
        self.required_but_unsupported
    }

    /// Bits forbidden by the caller that the hardware forces to 1.
    pub const fn forbidden_but_mandatory(&self) -> u32 {
        self.forbidden_but_mandatory
    }

    /// Returns the conflict on a given bit, if any.
    pub fn get(&self, bit: u8) -> Option<Conflict> {
        let field = BitField::bit(bit as u32);
        let reason = if field.is_set(self.required_but_unsupported as u64) {
            ConflictReason::RequiredButUnsupported
        } else if field.is_set(self.forbidden_but_mandatory as u64) {
            ConflictReason::ForbiddenButMandatory
        } else {
            return None;
        };
        Some(Conflict { bit, reason })
    }

    /// Iterates over the conflicts by increasing bit index.
    pub fn iter(&self) -> impl Iterator<Item = Conflict> + '_ {
        (0..32).filter_map(move |bit| self.get(bit))
    }

    /// The conflict with the lowest bit index.
    pub fn first(&self) -> Option<Conflict> {
        self.iter().next()
    }

    fn record(&mut self, bit: u32, reason: ConflictReason) {
        match reason {
            ConflictReason::RequiredButUnsupported => self.required_but_unsupported |= 1 << bit,
            ConflictReason::ForbiddenButMandatory => self.forbidden_but_mandatory |= 1 << bit,
        }
    }
}

// ———————————————————————————————— Resolution ———————————————————————————————— //

/// The outcome of resolving one control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlResolution {
    /// A value the hardware accepts, even when conflicts are present.
    pub resolved_value: u32,
    pub conflicts: Conflicts,
    /// Bits reported as neither allowed to be 0 nor 1. They are resolved to 0.
    pub anomalies: u32,
}

impl ControlResolution {
    /// A resolution is only usable if it has no conflicts.
    pub const fn is_usable(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Resolves a control register value given its allowed settings.
///
/// For each bit: if it can't be 1 it is 0, if it can't be 0 it is 1, otherwise it is 1 only if
/// the caller requires it.
pub fn resolve(desired: DesiredFeatureSet, allowed0: u32, allowed1: u32) -> ControlResolution {
    let mut resolved_value = 0;
    let mut conflicts = Conflicts::default();
    let mut anomalies = 0;

    for bit in 0..32 {
        let field = BitField::bit(bit);
        let can_be_0 = field.is_set(allowed0 as u64);
        let can_be_1 = field.is_set(allowed1 as u64);
        let required = field.is_set(desired.must_be_1 as u64);
        let forbidden = field.is_set(desired.must_be_0 as u64);

        let value = if !can_be_1 {
            if !can_be_0 {
                anomalies |= 1 << bit;
            }
            if required {
                conflicts.record(bit, ConflictReason::RequiredButUnsupported);
            }
            0
        } else if !can_be_0 {
            if forbidden {
                conflicts.record(bit, ConflictReason::ForbiddenButMandatory);
            }
            1
        } else {
            required as u64
        };
        resolved_value = field.insert(resolved_value, value);
    }

    ControlResolution {
        resolved_value: resolved_value as u32,
        conflicts,
        anomalies,
    }
}

/// Resolves a control register value against a capability mask.
pub fn resolve_mask(desired: DesiredFeatureSet, mask: CapabilityMask) -> ControlResolution {
    resolve(desired, mask.allowed0, mask.allowed1)
}

// ————————————————————————————————— Tests —————————————————————————————————— //
