//! Named groups with bit-flag membership.
//!
//! Every group owns one bit of a 64-bit mask. A file part records its
//! group's bit, so filtering by any set of groups is a single
//! `part.group_flag & mask != 0` test.
//!
//! Flags are stored in a signed 64-bit column, so only the low 63 bits are
//! handed out. Bit positions are allocated monotonically and never reused
//! within a registry's lifetime: removing a group leaves its bit retired so
//! historical parts cannot silently change group.

use std::collections::HashMap;
use std::ops::{BitOr, BitOrAssign};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::models::{check_required, Group, MAX_GROUP_NAME_LEN};

/// Number of usable flag positions in a signed 64-bit column.
pub const MAX_GROUP_BITS: u32 = 63;

/// A set of groups encoded as a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupMask(u64);

impl GroupMask {
    pub const EMPTY: GroupMask = GroupMask(0);

    pub fn from_bits(bits: u64) -> Self {
        GroupMask(bits)
    }

    /// Mask with only bit `position` set.
    pub fn from_position(position: u32) -> Self {
        GroupMask(1u64 << position)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Column representation. Positions stay below 63, so this never goes negative.
    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    pub fn from_i64(value: i64) -> Self {
        GroupMask(value as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// `true` when the two masks share at least one group.
    pub fn contains_any(&self, other: GroupMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Position of the lowest set bit, for single-group flags.
    pub fn position(&self) -> Option<u32> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros())
        }
    }
}

impl BitOr for GroupMask {
    type Output = GroupMask;

    fn bitor(self, rhs: GroupMask) -> GroupMask {
        GroupMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for GroupMask {
    fn bitor_assign(&mut self, rhs: GroupMask) {
        self.0 |= rhs.0;
    }
}

/// Display name of the flag at `position` (`Group01`, `Group02`, …).
pub fn flag_name(position: u32) -> String {
    format!("Group{:02}", position + 1)
}

/// Allocates flag bits to named groups.
#[derive(Debug, Clone)]
pub struct GroupRegistry {
    by_name: HashMap<String, Group>,
    next_position: u32,
    capacity: u32,
}

impl GroupRegistry {
    /// Registry with all 63 usable positions.
    pub fn new() -> Self {
        Self::with_capacity(MAX_GROUP_BITS)
    }

    /// Registry limited to `bits` positions (at most 63).
    pub fn with_capacity(bits: u32) -> Self {
        Self {
            by_name: HashMap::new(),
            next_position: 0,
            capacity: bits.min(MAX_GROUP_BITS),
        }
    }

    /// Rebuild a registry from persisted groups and the persisted allocation cursor.
    ///
    /// The cursor is raised past every restored flag so a stale cursor can
    /// never hand out a bit that is still in use.
    pub fn restore(groups: Vec<Group>, next_position: u32) -> Self {
        let mut registry = Self::new();
        let mut cursor = next_position;
        for group in groups {
            if let Some(pos) = group.flag.position() {
                cursor = cursor.max(pos + 1);
            }
            registry.by_name.insert(group.name.clone(), group);
        }
        registry.next_position = cursor;
        registry
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Next bit position that will be handed out.
    pub fn next_position(&self) -> u32 {
        self.next_position
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Register `name` under the next unused bit.
    pub fn create_group(&mut self, name: &str) -> Result<Group> {
        check_required("group name", name, MAX_GROUP_NAME_LEN)?;
        if self.by_name.contains_key(name) {
            return Err(StoreError::GroupExists(name.to_string()));
        }
        if self.next_position >= self.capacity {
            return Err(StoreError::GroupCapacityExceeded(self.capacity));
        }

        let position = self.next_position;
        let group = Group {
            id: position as i64 + 1,
            name: name.to_string(),
            flag: GroupMask::from_position(position),
            flag_name: flag_name(position),
            created: Utc::now(),
        };
        self.next_position += 1;
        self.by_name.insert(group.name.clone(), group.clone());
        Ok(group)
    }

    /// Remove a group. Its bit stays retired.
    pub fn remove_group(&mut self, name: &str) -> Result<Group> {
        self.by_name
            .remove(name)
            .ok_or_else(|| StoreError::UnknownGroup(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&Group> {
        self.by_name.get(name)
    }

    /// OR together the flags of all named groups.
    pub fn resolve<I, S>(&self, names: I) -> Result<GroupMask>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mask = GroupMask::EMPTY;
        for name in names {
            let name = name.as_ref();
            let group = self
                .by_name
                .get(name)
                .ok_or_else(|| StoreError::UnknownGroup(name.to_string()))?;
            mask |= group.flag;
        }
        Ok(mask)
    }

    /// All groups ordered by flag position.
    pub fn groups(&self) -> Vec<Group> {
        let mut groups: Vec<Group> = self.by_name.values().cloned().collect();
        groups.sort_by_key(|g| g.flag.bits());
        groups
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_distinct_powers_of_two() {
        let mut reg = GroupRegistry::new();
        let a = reg.create_group("Manuals").unwrap();
        let b = reg.create_group("Specs").unwrap();
        assert_eq!(a.flag.bits(), 1);
        assert_eq!(b.flag.bits(), 2);
        assert_eq!(a.flag_name, "Group01");
        assert_eq!(b.flag_name, "Group02");
        assert!(!a.flag.contains_any(b.flag));
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut reg = GroupRegistry::with_capacity(4);
        for i in 0..4 {
            reg.create_group(&format!("g{}", i)).unwrap();
        }
        let err = reg.create_group("g4").unwrap_err();
        assert!(matches!(err, StoreError::GroupCapacityExceeded(4)));
    }

    #[test]
    fn test_full_width_capacity() {
        let mut reg = GroupRegistry::new();
        for i in 0..MAX_GROUP_BITS {
            let g = reg.create_group(&format!("g{}", i)).unwrap();
            assert!(g.flag.as_i64() > 0);
        }
        assert!(matches!(
            reg.create_group("one-too-many"),
            Err(StoreError::GroupCapacityExceeded(63))
        ));
    }

    #[test]
    fn test_removed_flags_are_not_reused() {
        let mut reg = GroupRegistry::new();
        let a = reg.create_group("a").unwrap();
        reg.remove_group("a").unwrap();
        let b = reg.create_group("b").unwrap();
        assert_ne!(a.flag, b.flag);
        let a2 = reg.create_group("a").unwrap();
        assert_ne!(a.flag, a2.flag);
    }

    #[test]
    fn test_resolve() {
        let mut reg = GroupRegistry::new();
        reg.create_group("a").unwrap();
        reg.create_group("b").unwrap();
        reg.create_group("c").unwrap();
        let mask = reg.resolve(["a", "c"]).unwrap();
        assert_eq!(mask.bits(), 0b101);
        assert!(reg.resolve(Vec::<String>::new()).unwrap().is_empty());
        assert!(matches!(
            reg.resolve(["a", "zzz"]),
            Err(StoreError::UnknownGroup(ref n)) if n == "zzz"
        ));
    }

    #[test]
    fn test_duplicate_and_blank_names() {
        let mut reg = GroupRegistry::new();
        reg.create_group("a").unwrap();
        assert!(matches!(reg.create_group("a"), Err(StoreError::GroupExists(_))));
        assert!(reg.create_group("").is_err());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_restore_keeps_cursor_past_live_flags() {
        let mut reg = GroupRegistry::new();
        reg.create_group("a").unwrap();
        reg.create_group("b").unwrap();
        let restored = GroupRegistry::restore(reg.groups(), 0);
        assert_eq!(restored.next_position(), 2);
        let mut restored = GroupRegistry::restore(reg.groups(), 10);
        assert_eq!(restored.create_group("c").unwrap().flag.position(), Some(10));
    }
}
