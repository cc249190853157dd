// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Which operations this mount answers

use crate::registry::{Opcode, OPCODE_SLOTS};

/// Presence table indexed by opcode, computed once from the caller's
/// capability set. `init`, `error` and `getattr` are always present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImplementedSet {
    present: [bool; OPCODE_SLOTS],
    provided: [bool; OPCODE_SLOTS],
}

impl ImplementedSet {
    pub fn from_provided<I>(provided: I) -> Self
    where
        I: IntoIterator<Item = Opcode>,
    {
        let mut set = ImplementedSet {
            present: [false; OPCODE_SLOTS],
            provided: [false; OPCODE_SLOTS],
        };
        for op in provided {
            set.provided[op.index()] = true;
            set.present[op.index()] = true;
        }
        for op in Opcode::ALWAYS_IMPLEMENTED {
            set.present[op.index()] = true;
        }
        set
    }

    /// Whether requests for `op` are routed to the dispatch method.
    pub fn contains(&self, op: Opcode) -> bool {
        self.present[op.index()]
    }

    /// Whether the caller supplied a handler for `op`.
    pub fn is_provided(&self, op: Opcode) -> bool {
        self.provided[op.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = Opcode> + '_ {
        Opcode::ALL.into_iter().filter(|op| self.contains(*op))
    }

    /// Bitmap handed verbatim to the native layer: `1` at each present opcode.
    pub fn to_bitmap(&self) -> [u32; OPCODE_SLOTS] {
        self.present.map(u32::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_operations_are_always_present() {
        let set = ImplementedSet::from_provided([]);
        let bitmap = set.to_bitmap();
        assert_eq!(bitmap.iter().sum::<u32>(), 3);
        for op in Opcode::ALWAYS_IMPLEMENTED {
            assert!(set.contains(op));
            assert!(!set.is_provided(op));
            assert_eq!(bitmap[op.index()], 1);
        }
        assert!(!set.contains(Opcode::Read));
    }

    #[test]
    fn provided_operations_are_marked() {
        let set = ImplementedSet::from_provided([Opcode::Read, Opcode::Getattr]);
        assert!(set.contains(Opcode::Read));
        assert!(set.is_provided(Opcode::Getattr));
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![Opcode::Init, Opcode::Error, Opcode::Getattr, Opcode::Read]
        );
        assert_eq!(set.to_bitmap().len(), OPCODE_SLOTS);
    }
}
