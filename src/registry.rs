/*!
Core registry: explicit registration tables and the hot-swap skeleton.

Each contract (CPU, pixel, audio) gets its own `CoreRegistry` built from a
static table of `(id, factory)` pairs. Ids are deduplicated and kept
sorted; a factory runs at most once per id per registry lifetime, and the
instance it produces is cached (parked) when another core takes over.

`swap_to` implements the contract-neutral part of the swap protocol: same
id is a no-op, an unknown id fails without touching the active instance,
and the caller-supplied `transfer` closure runs with the outgoing and
incoming instances before the incoming one is published. The closure is
where contract-specific steps live (state transfer, register-latch replay,
buffer releases); any failure inside it must be swallowed there so the
swap still publishes a validly initialized instance.

The active slot is a plain owned `Box`, never an `Option`: there is no
reachable state in which "active" points at nothing.
*/

use crate::errors::{EmuError, Result};

pub type Factory<T> = fn() -> Box<T>;

struct Slot<T: ?Sized> {
    id: &'static str,
    factory: Factory<T>,
    /// Instance created earlier and currently inactive.
    parked: Option<Box<T>>,
}

pub struct CoreRegistry<T: ?Sized> {
    contract: &'static str,
    slots: Vec<Slot<T>>,
    active: Box<T>,
    active_index: usize,
}

impl<T: ?Sized> CoreRegistry<T> {
    /// Build from a registration table, activating the first id found in
    /// `preference` (or the first registered id).
    pub fn new(
        contract: &'static str,
        table: &[(&'static str, Factory<T>)],
        preference: &[&str],
    ) -> Self {
        let mut slots: Vec<Slot<T>> = Vec::with_capacity(table.len());
        for &(id, factory) in table {
            if slots.iter().any(|s| s.id == id) {
                continue;
            }
            slots.push(Slot {
                id,
                factory,
                parked: None,
            });
        }
        slots.sort_by(|a, b| a.id.cmp(b.id));
        assert!(!slots.is_empty(), "empty {contract} registration table");

        let active_index = preference
            .iter()
            .find_map(|p| slots.iter().position(|s| s.id == *p))
            .unwrap_or(0);
        let active = (slots[active_index].factory)();
        Self {
            contract,
            slots,
            active,
            active_index,
        }
    }

    /// Sorted, duplicate-free registered ids.
    pub fn ids(&self) -> Vec<&'static str> {
        self.slots.iter().map(|s| s.id).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.iter().any(|s| s.id == id)
    }

    pub fn active_id(&self) -> &'static str {
        self.slots[self.active_index].id
    }

    pub fn active(&self) -> &T {
        &self.active
    }

    pub fn active_mut(&mut self) -> &mut T {
        &mut self.active
    }

    /// Swap the active instance. `transfer(outgoing, incoming)` runs before
    /// publication; the previously active instance is parked afterwards.
    pub fn swap_to(&mut self, id: &str, transfer: impl FnOnce(&mut T, &mut T)) -> Result<()> {
        let Some(idx) = self.slots.iter().position(|s| s.id == id) else {
            return Err(EmuError::SwapFailed {
                contract: self.contract,
                id: id.to_string(),
            });
        };
        if idx == self.active_index {
            return Ok(());
        }
        let factory = self.slots[idx].factory;
        let mut incoming = match self.slots[idx].parked.take() {
            Some(instance) => instance,
            None => factory(),
        };
        transfer(&mut self.active, &mut incoming);
        std::mem::swap(&mut self.active, &mut incoming);
        self.slots[self.active_index].parked = Some(incoming);
        self.active_index = idx;
        Ok(())
    }

    /// Discard every cached instance and rebuild the active one from its
    /// factory, preferring `previous`, then the preference order. Used on
    /// ROM load to stop state bleeding between titles.
    pub fn hard_reset(&mut self, previous: &str, preference: &[&str]) {
        for slot in &mut self.slots {
            slot.parked = None;
        }
        let idx = self
            .slots
            .iter()
            .position(|s| s.id == previous)
            .or_else(|| {
                preference
                    .iter()
                    .find_map(|p| self.slots.iter().position(|s| s.id == *p))
            })
            .unwrap_or(0);
        self.active = (self.slots[idx].factory)();
        self.active_index = idx;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named {
        fn name(&self) -> &'static str;
        fn counter(&self) -> u32;
        fn bump(&mut self);
    }

    struct N(&'static str, u32);
    impl Named for N {
        fn name(&self) -> &'static str {
            self.0
        }
        fn counter(&self) -> u32 {
            self.1
        }
        fn bump(&mut self) {
            self.1 += 1;
        }
    }

    fn make_a() -> Box<dyn Named> {
        Box::new(N("A", 0))
    }
    fn make_b() -> Box<dyn Named> {
        Box::new(N("B", 0))
    }

    fn registry() -> CoreRegistry<dyn Named> {
        CoreRegistry::new("test", &[("B", make_b), ("A", make_a), ("A", make_a)], &["A"])
    }

    #[test]
    fn ids_are_sorted_and_deduplicated() {
        let r = registry();
        assert_eq!(r.ids(), vec!["A", "B"]);
        assert_eq!(r.active_id(), "A");
    }

    #[test]
    fn unknown_id_fails_and_keeps_active() {
        let mut r = registry();
        let err = r.swap_to("Z", |_, _| {}).unwrap_err();
        assert!(matches!(err, EmuError::SwapFailed { .. }));
        assert_eq!(r.active_id(), "A");
    }

    #[test]
    fn same_id_is_a_noop_without_transfer() {
        let mut r = registry();
        let mut called = false;
        r.swap_to("A", |_, _| called = true).unwrap();
        assert!(!called);
    }

    #[test]
    fn swap_parks_and_revives_instances() {
        let mut r = registry();
        r.active_mut().bump();
        r.active_mut().bump();
        r.swap_to("B", |_, _| {}).unwrap();
        assert_eq!(r.active_id(), "B");
        assert_eq!(r.active().counter(), 0);

        // Swapping back revives the parked instance, not a fresh one.
        r.swap_to("A", |_, _| {}).unwrap();
        assert_eq!(r.active().counter(), 2);
    }

    #[test]
    fn transfer_sees_outgoing_then_incoming() {
        let mut r = registry();
        r.swap_to("B", |old, new| {
            assert_eq!(old.name(), "A");
            assert_eq!(new.name(), "B");
        })
        .unwrap();
    }

    #[test]
    fn hard_reset_drops_cached_instances() {
        let mut r = registry();
        r.active_mut().bump();
        r.swap_to("B", |_, _| {}).unwrap();
        r.hard_reset("A", &["B", "A"]);
        assert_eq!(r.active_id(), "A");
        assert_eq!(r.active().counter(), 0);
    }

    #[test]
    fn hard_reset_falls_back_to_preference_order() {
        let mut r = registry();
        r.hard_reset("GONE", &["B", "A"]);
        assert_eq!(r.active_id(), "B");
    }
}
