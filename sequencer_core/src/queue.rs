use std::collections::VecDeque;

use crate::unit::Unit;

/// A unit that has been pushed onto a sequencer and given its identity there.
#[derive(Debug)]
pub(crate) struct QueuedUnit {
    pub id: u64,
    pub name: String,
    pub unit: Unit,
}

/// FIFO of units waiting to be dispatched.
#[derive(Debug, Default)]
pub(crate) struct UnitQueue {
    units: VecDeque<QueuedUnit>,
}

impl UnitQueue {
    pub fn push_back(&mut self, unit: QueuedUnit) {
        self.units.push_back(unit);
    }

    pub fn pop_front(&mut self) -> Option<QueuedUnit> {
        self.units.pop_front()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.units.iter().map(|queued| queued.name.clone()).collect()
    }
}
