//! Out-of-band property provenance.
//!
//! Maps (live object, property name) to the tracking reference of the value
//! last written there, plus the reference of the key itself. Objects are held
//! through weak handles only: the table never extends an object's lifetime,
//! and lookups against a dropped object find nothing.

use std::collections::HashMap;

use tracing::debug;

use crate::oplog::TrackingRef;
use crate::value::{ObjectId, ObjectRef, WeakObjectRef};

/// Default number of writes between sweeps of dead objects.
pub const DEFAULT_SWEEP_INTERVAL: usize = 1024;

/// What the table knows about one property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropertyTracking {
    /// Reference of the value last assigned to the property.
    pub value: Option<TrackingRef>,
    /// Reference of the property name as written by the program.
    pub key: Option<TrackingRef>,
}

struct ObjectSlot {
    object: WeakObjectRef,
    properties: HashMap<String, PropertyTracking>,
}

/// Weak side-table from object properties to tracking references.
pub struct PropertyTable {
    slots: HashMap<ObjectId, ObjectSlot>,
    writes_since_sweep: usize,
    sweep_interval: usize,
}

impl PropertyTable {
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_sweep_interval(sweep_interval: usize) -> Self {
        Self {
            slots: HashMap::new(),
            writes_since_sweep: 0,
            sweep_interval: sweep_interval.max(1),
        }
    }

    /// Record the value reference for `object[property]`. Last write wins.
    pub fn record_property_tracking(
        &mut self,
        object: &ObjectRef,
        property: &str,
        tracking: TrackingRef,
    ) {
        self.slot_mut(object, property).value = Some(tracking);
    }

    /// Record the reference of the key name used to write `object[property]`.
    pub fn record_key_tracking(&mut self, object: &ObjectRef, property: &str, key: TrackingRef) {
        self.slot_mut(object, property).key = Some(key);
    }

    pub fn lookup_property_tracking(
        &self,
        object: &ObjectRef,
        property: &str,
    ) -> Option<TrackingRef> {
        self.lookup(object, property).and_then(|p| p.value)
    }

    pub fn lookup_key_tracking(&self, object: &ObjectRef, property: &str) -> Option<TrackingRef> {
        self.lookup(object, property).and_then(|p| p.key)
    }

    pub fn lookup(&self, object: &ObjectRef, property: &str) -> Option<PropertyTracking> {
        let slot = self.slots.get(&object.id())?;
        if !slot.object.is_alive() {
            return None;
        }
        slot.properties.get(property).copied()
    }

    /// Drop slots whose objects no longer exist. Returns how many were removed.
    pub fn sweep(&mut self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.object.is_alive());
        self.writes_since_sweep = 0;
        let removed = before - self.slots.len();
        if removed > 0 {
            debug!(removed, remaining = self.slots.len(), "swept property table");
        }
        removed
    }

    /// Number of objects with live slots.
    pub fn live_objects(&self) -> usize {
        self.slots.values().filter(|s| s.object.is_alive()).count()
    }

    fn slot_mut(&mut self, object: &ObjectRef, property: &str) -> &mut PropertyTracking {
        self.writes_since_sweep += 1;
        if self.writes_since_sweep >= self.sweep_interval {
            self.sweep();
        }
        self.slots
            .entry(object.id())
            .or_insert_with(|| ObjectSlot {
                object: object.downgrade(),
                properties: HashMap::new(),
            })
            .properties
            .entry(property.to_string())
            .or_default()
    }
}

impl Default for PropertyTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ObjectKind;

    #[test]
    fn test_record_and_lookup() {
        let mut table = PropertyTable::new();
        let obj = ObjectRef::new(ObjectKind::Plain);
        table.record_property_tracking(&obj, "hi", TrackingRef(3));
        assert_eq!(table.lookup_property_tracking(&obj, "hi"), Some(TrackingRef(3)));
        assert_eq!(table.lookup_property_tracking(&obj, "other"), None);
    }

    #[test]
    fn test_last_write_wins() {
        let mut table = PropertyTable::new();
        let obj = ObjectRef::new(ObjectKind::Plain);
        table.record_property_tracking(&obj, "a", TrackingRef(1));
        table.record_property_tracking(&obj, "a", TrackingRef(7));
        assert_eq!(table.lookup_property_tracking(&obj, "a"), Some(TrackingRef(7)));
    }

    #[test]
    fn test_key_and_value_tracked_separately() {
        let mut table = PropertyTable::new();
        let obj = ObjectRef::new(ObjectKind::Plain);
        table.record_key_tracking(&obj, "a", TrackingRef(0));
        assert_eq!(table.lookup_key_tracking(&obj, "a"), Some(TrackingRef(0)));
        assert_eq!(table.lookup_property_tracking(&obj, "a"), None);
    }

    #[test]
    fn test_objects_are_distinguished_by_identity() {
        let mut table = PropertyTable::new();
        let a = ObjectRef::new(ObjectKind::Plain);
        let b = ObjectRef::new(ObjectKind::Plain);
        table.record_property_tracking(&a, "x", TrackingRef(1));
        assert_eq!(table.lookup_property_tracking(&b, "x"), None);
        assert_eq!(table.lookup_property_tracking(&a.clone(), "x"), Some(TrackingRef(1)));
    }

    #[test]
    fn test_table_does_not_keep_objects_alive() {
        let mut table = PropertyTable::new();
        let obj = ObjectRef::new(ObjectKind::Plain);
        let weak = obj.downgrade();
        table.record_property_tracking(&obj, "x", TrackingRef(1));
        drop(obj);
        assert!(!weak.is_alive());
        assert_eq!(table.live_objects(), 0);
        assert_eq!(table.sweep(), 1);
    }

    #[test]
    fn test_periodic_sweep() {
        let mut table = PropertyTable::with_sweep_interval(2);
        let dead = ObjectRef::new(ObjectKind::Plain);
        table.record_property_tracking(&dead, "x", TrackingRef(0));
        drop(dead);
        let live = ObjectRef::new(ObjectKind::Plain);
        table.record_property_tracking(&live, "y", TrackingRef(1));
        assert_eq!(table.slots.len(), 1);
        assert_eq!(table.lookup_property_tracking(&live, "y"), Some(TrackingRef(1)));
    }
}
