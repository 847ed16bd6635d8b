//! Register map: channel ids bound to device register slots.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

use regbridge_common::{ChannelDefinition, Direction};

/// Register map errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
    #[error("channel '{0}' is not writable")]
    NotWritable(String),
    #[error("reading has {actual} values, {expected} readable slots configured")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("duplicate channel id '{0}'")]
    DuplicateChannel(String),
    #[error("empty channel id")]
    EmptyId,
}

/// One channel's current value and direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterSlot {
    pub id: String,
    pub direction: Direction,
    /// Last observed (readable) or last commanded (writable) value.
    pub value: i64,
    /// None until the slot is first updated.
    pub updated_at: Option<DateTime<Utc>>,
}

impl RegisterSlot {
    fn new(def: &ChannelDefinition) -> Self {
        Self {
            id: def.id.clone(),
            direction: def.direction,
            value: 0,
            updated_at: None,
        }
    }
}

/// A write value whose device echo disagrees with what was commanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoMismatch {
    pub id: String,
    pub commanded: i64,
    pub echoed: i64,
}

/// Ordered, fixed set of register slots keyed by channel id.
///
/// Slots are created once from the channel definitions; none are added or
/// removed afterwards.
#[derive(Debug, Clone)]
pub struct RegisterMap {
    slots: Vec<RegisterSlot>,
    index: HashMap<String, usize>,
    readable: Vec<usize>,
    writable: Vec<usize>,
}

impl RegisterMap {
    /// Build the map from channel definitions, keeping declared order.
    pub fn from_definitions(definitions: &[ChannelDefinition]) -> Result<Self, RegisterError> {
        let mut slots = Vec::with_capacity(definitions.len());
        let mut index = HashMap::with_capacity(definitions.len());
        let mut readable = Vec::new();
        let mut writable = Vec::new();

        for (position, def) in definitions.iter().enumerate() {
            if def.id.is_empty() {
                return Err(RegisterError::EmptyId);
            }
            if index.insert(def.id.clone(), position).is_some() {
                return Err(RegisterError::DuplicateChannel(def.id.clone()));
            }

            match def.direction {
                Direction::Readable => readable.push(position),
                Direction::Writable => writable.push(position),
            }
            slots.push(RegisterSlot::new(def));
        }

        Ok(Self {
            slots,
            index,
            readable,
            writable,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn readable_count(&self) -> usize {
        self.readable.len()
    }

    pub fn writable_count(&self) -> usize {
        self.writable.len()
    }

    pub fn get(&self, id: &str) -> Option<&RegisterSlot> {
        self.index.get(id).map(|&i| &self.slots[i])
    }

    /// Set a writable slot's commanded value.
    pub fn set_write_value(&mut self, id: &str, value: i64) -> Result<(), RegisterError> {
        let position = *self
            .index
            .get(id)
            .ok_or_else(|| RegisterError::UnknownChannel(id.to_string()))?;

        let slot = &mut self.slots[position];
        if slot.direction != Direction::Writable {
            return Err(RegisterError::NotWritable(id.to_string()));
        }

        slot.value = value;
        slot.updated_at = Some(Utc::now());
        Ok(())
    }

    /// Assign values to the readable slots in declared order.
    ///
    /// Returns the updated readable slots.
    pub fn apply_reading(&mut self, values: &[i64]) -> Result<Vec<RegisterSlot>, RegisterError> {
        if values.len() != self.readable.len() {
            return Err(RegisterError::LengthMismatch {
                expected: self.readable.len(),
                actual: values.len(),
            });
        }

        let now = Utc::now();
        let mut updated = Vec::with_capacity(values.len());
        for (&position, &value) in self.readable.iter().zip(values) {
            let slot = &mut self.slots[position];
            slot.value = value;
            slot.updated_at = Some(now);
            updated.push(slot.clone());
        }

        Ok(updated)
    }

    /// Compare echoed write values (declared order) with the commanded ones.
    pub fn echo_mismatches(&self, echoed: &[i64]) -> Vec<EchoMismatch> {
        self.writable
            .iter()
            .zip(echoed)
            .filter_map(|(&position, &echoed)| {
                let slot = &self.slots[position];
                (slot.value != echoed).then(|| EchoMismatch {
                    id: slot.id.clone(),
                    commanded: slot.value,
                    echoed,
                })
            })
            .collect()
    }

    /// Writable slot at `index` in declared order.
    pub fn writable_slot(&self, index: usize) -> Option<&RegisterSlot> {
        self.writable.get(index).map(|&position| &self.slots[position])
    }

    /// Copy of every slot in declared order.
    pub fn snapshot(&self) -> Vec<RegisterSlot> {
        self.slots.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_map() -> RegisterMap {
        RegisterMap::from_definitions(&ChannelDefinition::layout(4, 4)).unwrap()
    }

    #[test]
    fn test_layout_counts() {
        let map = default_map();

        assert_eq!(map.len(), 8);
        assert_eq!(map.readable_count(), 4);
        assert_eq!(map.writable_count(), 4);
        assert_eq!(map.writable_slot(2).map(|s| s.id.as_str()), Some("W2"));
        assert!(map.writable_slot(4).is_none());
        assert!(map.snapshot().iter().all(|s| s.updated_at.is_none()));
    }

    #[test]
    fn test_set_write_value() {
        let mut map = default_map();

        map.set_write_value("W1", 77).unwrap();

        let slot = map.get("W1").unwrap();
        assert_eq!(slot.value, 77);
        assert!(slot.updated_at.is_some());
        let values: Vec<i64> = (0..map.writable_count())
            .filter_map(|i| map.writable_slot(i))
            .map(|slot| slot.value)
            .collect();
        assert_eq!(values, vec![0, 77, 0, 0]);
    }

    #[test]
    fn test_set_write_value_rejects_bad_targets() {
        let mut map = default_map();

        assert_eq!(
            map.set_write_value("W9", 1),
            Err(RegisterError::UnknownChannel("W9".to_string()))
        );
        assert_eq!(
            map.set_write_value("R0", 1),
            Err(RegisterError::NotWritable("R0".to_string()))
        );
        assert_eq!(map.get("R0").unwrap().value, 0);
    }

    #[test]
    fn test_apply_reading_in_declared_order() {
        let defs = vec![
            ChannelDefinition::writable("out"),
            ChannelDefinition::readable("b"),
            ChannelDefinition::readable("a"),
        ];
        let mut map = RegisterMap::from_definitions(&defs).unwrap();

        let updated = map.apply_reading(&[5, 6]).unwrap();

        assert_eq!(updated.len(), 2);
        assert_eq!(updated[0].id, "b");
        assert_eq!(map.get("b").unwrap().value, 5);
        assert_eq!(map.get("a").unwrap().value, 6);
        assert_eq!(map.get("out").unwrap().value, 0);
    }

    #[test]
    fn test_apply_reading_length_mismatch() {
        let mut map = default_map();

        assert_eq!(
            map.apply_reading(&[1, 2, 3]),
            Err(RegisterError::LengthMismatch {
                expected: 4,
                actual: 3
            })
        );
        assert!(map.snapshot().iter().all(|s| s.value == 0));
    }

    #[test]
    fn test_duplicate_and_empty_ids() {
        let dup = vec![
            ChannelDefinition::readable("R0"),
            ChannelDefinition::writable("R0"),
        ];
        assert_eq!(
            RegisterMap::from_definitions(&dup).unwrap_err(),
            RegisterError::DuplicateChannel("R0".to_string())
        );

        let empty = vec![ChannelDefinition::readable("")];
        assert_eq!(
            RegisterMap::from_definitions(&empty).unwrap_err(),
            RegisterError::EmptyId
        );
    }

    #[test]
    fn test_echo_mismatches() {
        let mut map = default_map();
        map.set_write_value("W0", 1).unwrap();
        map.set_write_value("W2", 3).unwrap();

        let mismatches = map.echo_mismatches(&[1, 0, 9, 0]);

        assert_eq!(
            mismatches,
            vec![EchoMismatch {
                id: "W2".to_string(),
                commanded: 3,
                echoed: 9,
            }]
        );
    }
}
