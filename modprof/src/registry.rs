use crate::counters::{CounterFactory, ResourceCounter};
use crate::phase::ComponentDescription;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// What the memory counter keeps for one analysed module.
pub struct RegistryEntry {
    pub(crate) counter: Box<dyn ResourceCounter>,
    /// Size recorded at the end of the previous phase. After the next phase
    /// starts this holds that size minus the size at the start, see
    /// [`MemoryCounterService`](crate::MemoryCounterService).
    pub(crate) previous_recorded_size: Option<i64>,
    pub(crate) previous_step: Option<String>,
}

impl RegistryEntry {
    fn new(counter: Box<dyn ResourceCounter>) -> Self {
        RegistryEntry {
            counter,
            previous_recorded_size: None,
            previous_step: None,
        }
    }

    pub fn previous_recorded_size(&self) -> Option<i64> {
        self.previous_recorded_size
    }

    pub fn previous_step(&self) -> Option<&str> {
        self.previous_step.as_deref()
    }
}

pub type SharedEntry = Arc<Mutex<RegistryEntry>>;

/// Module label to counter mapping. Entries are created the first time a
/// module is constructed and live as long as the registry.
///
/// The map itself is behind a lock so modules on different streams can be
/// registered and looked up concurrently; each entry has its own lock
/// since only one phase of a given module runs at a time.
pub struct ComponentRegistry {
    allow_list: FxHashSet<String>,
    entries: Mutex<FxHashMap<String, SharedEntry>>,
}

impl ComponentRegistry {
    /// An empty `allow_list` makes every module eligible.
    pub fn new<I, S>(allow_list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ComponentRegistry {
            allow_list: allow_list.into_iter().map(Into::into).collect(),
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn is_eligible(&self, label: &str) -> bool {
        self.allow_list.is_empty() || self.allow_list.contains(label)
    }

    /// Creates an entry for `component` if it is eligible and the factory
    /// can supply a counter. The new counter starts out enabled, with its
    /// maximum reset, so construction itself is measured.
    pub fn register_if_eligible(
        &self,
        component: &ComponentDescription,
        factory: &dyn CounterFactory,
        verbose: bool,
    ) -> Option<SharedEntry> {
        if !self.is_eligible(&component.label) {
            info!("MemCounter not enabled for module \"{}\".", component.label);
            return None;
        }

        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&component.label) {
            really_warn!(
                "ComponentRegistry: module \"{}\" was constructed twice, keeping the first counter",
                component.label
            );
            return Some(existing.clone());
        }

        let mut counter = match factory.create_counter() {
            Some(counter) => counter,
            None => {
                info!(
                    "Couldn't get a new memory counter, so module \"{}\" will not be analysed.",
                    component.label
                );
                return None;
            }
        };

        if verbose {
            info!(
                "Enabling MemCounter for module \"{}\" of type \"{}\".",
                component.label, component.type_name
            );
        }
        counter.reset_maximum();
        counter.enable();

        let entry = Arc::new(Mutex::new(RegistryEntry::new(counter)));
        entries.insert(component.label.clone(), entry.clone());
        Some(entry)
    }

    pub fn lookup(&self, label: &str) -> Option<SharedEntry> {
        self.entries.lock().get(label).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing_common::{CounterCall, MockFactory};

    #[test]
    fn only_allowed_modules_get_entries() {
        let factory = MockFactory::new();
        let registry = ComponentRegistry::new(vec!["foo"]);

        let foo = ComponentDescription::new("foo", "FooProducer");
        let bar = ComponentDescription::new("bar", "BarProducer");

        assert!(registry.register_if_eligible(&foo, &factory, false).is_some());
        assert!(registry.register_if_eligible(&bar, &factory, false).is_none());

        assert!(registry.lookup("foo").is_some());
        assert!(registry.lookup("bar").is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(factory.created(), 1);
    }

    #[test]
    fn empty_allow_list_takes_everything() {
        let factory = MockFactory::new();
        let registry = ComponentRegistry::new(Vec::<String>::new());

        for label in &["a", "b", "c"] {
            let component = ComponentDescription::new(*label, "T");
            assert!(registry.register_if_eligible(&component, &factory, true).is_some());
        }
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn new_counters_start_enabled() {
        let factory = MockFactory::new();
        let registry = ComponentRegistry::new(Vec::<String>::new());
        let component = ComponentDescription::new("foo", "FooProducer");

        let entry = registry.register_if_eligible(&component, &factory, false).unwrap();

        let state = factory.state(0);
        assert_eq!(
            state.calls(),
            vec![CounterCall::ResetMaximum, CounterCall::Enable]
        );
        assert!(entry.lock().previous_recorded_size().is_none());
        assert!(entry.lock().previous_step().is_none());
    }

    #[test]
    fn exhausted_factory_leaves_module_untracked() {
        let factory = MockFactory::with_capacity(1);
        let registry = ComponentRegistry::new(Vec::<String>::new());

        let first = ComponentDescription::new("first", "T");
        let second = ComponentDescription::new("second", "T");

        assert!(registry.register_if_eligible(&first, &factory, false).is_some());
        assert!(registry.register_if_eligible(&second, &factory, false).is_none());
        assert!(registry.lookup("second").is_none());
    }

    #[test]
    fn second_construction_keeps_first_counter() {
        let factory = MockFactory::new();
        let registry = ComponentRegistry::new(Vec::<String>::new());
        let component = ComponentDescription::new("foo", "FooProducer");

        let first = registry.register_if_eligible(&component, &factory, false).unwrap();
        let second = registry.register_if_eligible(&component, &factory, false).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created(), 1);
    }
}
