//! The ordered, dependency-annotated collection of components for one cluster
use crate::{
    component::{AsAny, Component},
    Error, Result,
};
use std::fmt;

/// Handle to an entry of a [`ClusterComponents`]
///
/// Handles are only handed out by [`ClusterComponents::add`] and friends, for entries
/// that are already present. Any handle a new entry can name as a dependency therefore
/// points to an earlier entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) usize);

impl ComponentId {
    /// Position in the collection
    pub fn index(self) -> usize {
        self.0
    }
}

/// One component plus the entries it depends on
pub struct ClusterComponentEntry {
    component: Box<dyn Component>,
    dependencies: Vec<ComponentId>,
    is_provider: bool,
}

impl ClusterComponentEntry {
    /// The wrapped component
    pub fn component(&self) -> &dyn Component {
        &*self.component
    }

    pub(crate) fn component_mut(&mut self) -> &mut dyn Component {
        &mut *self.component
    }

    /// Entries that must be ready before this one reconciles,
    /// and must outlive it when deleting
    pub fn dependencies(&self) -> &[ComponentId] {
        &self.dependencies
    }

    /// Whether this entry wraps the provider's main resource
    pub fn is_provider(&self) -> bool {
        self.is_provider
    }
}

impl fmt::Debug for ClusterComponentEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterComponentEntry")
            .field("component", &self.component.name())
            .field("dependencies", &self.dependencies)
            .field("is_provider", &self.is_provider)
            .finish()
    }
}

/// Components of one cluster in dependency order, leaves first
///
/// Built from scratch every pass: [`Provider::set_components`] declares the entries and
/// their dependencies, [`Provider::before_components_update`] patches their specs.
///
/// Every dependency of an entry appears earlier in the collection. A guard entry
/// (see [`ClusterComponents::add_guard`]) is an implicit dependency of everything added
/// after it, which makes it the first to reconcile and the last to delete.
///
/// [`Provider::set_components`]: crate::Provider::set_components
/// [`Provider::before_components_update`]: crate::Provider::before_components_update
#[derive(Debug, Default)]
pub struct ClusterComponents {
    entries: Vec<ClusterComponentEntry>,
    guard: Option<ComponentId>,
}

impl ClusterComponents {
    /// Empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a component depending on `dependencies`
    ///
    /// # Errors
    ///
    /// [`Error::DanglingDependency`] when a handle does not come from this collection.
    pub fn add(
        &mut self,
        component: impl Component + 'static,
        dependencies: &[ComponentId],
    ) -> Result<ComponentId> {
        self.push(Box::new(component), dependencies, false)
    }

    /// Append the provider's main resource
    ///
    /// There is at most one provider entry; adding a second one moves the mark.
    pub fn add_provider(
        &mut self,
        component: impl Component + 'static,
        dependencies: &[ComponentId],
    ) -> Result<ComponentId> {
        for entry in &mut self.entries {
            entry.is_provider = false;
        }
        self.push(Box::new(component), dependencies, true)
    }

    /// Append a guard that every later entry implicitly depends on
    pub fn add_guard(&mut self, component: impl Component + 'static) -> Result<ComponentId> {
        let id = self.push(Box::new(component), &[], false)?;
        self.guard = Some(id);
        Ok(id)
    }

    fn push(
        &mut self,
        component: Box<dyn Component>,
        dependencies: &[ComponentId],
        is_provider: bool,
    ) -> Result<ComponentId> {
        if let Some(dangling) = dependencies.iter().find(|d| d.0 >= self.entries.len()) {
            return Err(Error::DanglingDependency {
                component: component.name(),
                dependency: dangling.0,
            });
        }
        let mut deps: Vec<ComponentId> = self.guard.into_iter().collect();
        for dep in dependencies {
            if !deps.contains(dep) {
                deps.push(*dep);
            }
        }
        let id = ComponentId(self.entries.len());
        self.entries.push(ClusterComponentEntry {
            component,
            dependencies: deps,
            is_provider,
        });
        Ok(id)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in dependency order
    pub fn entries(&self) -> &[ClusterComponentEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [ClusterComponentEntry] {
        &mut self.entries
    }

    /// Display names in dependency order
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.component.name()).collect()
    }

    /// Handle of the entry named `name`
    pub fn id_of(&self, name: &str) -> Option<ComponentId> {
        self.entries
            .iter()
            .position(|e| e.component.name() == name)
            .map(ComponentId)
    }

    /// Typed access to the entry behind `id`
    pub fn get<T: Component>(&self, id: ComponentId) -> Option<&T> {
        let entry = self.entries.get(id.0)?;
        <dyn Component as AsAny>::as_any(&*entry.component).downcast_ref()
    }

    /// Typed mutable access to the entry behind `id`
    pub fn get_mut<T: Component>(&mut self, id: ComponentId) -> Option<&mut T> {
        let entry = self.entries.get_mut(id.0)?;
        <dyn Component as AsAny>::as_any_mut(&mut *entry.component).downcast_mut()
    }

    /// Typed mutable access to the entry named `name`
    pub fn find_mut<T: Component>(&mut self, name: &str) -> Option<&mut T> {
        let id = self.id_of(name)?;
        self.get_mut(id)
    }

    /// Every entry of type `T`, in order
    pub fn iter_of<T: Component>(&self) -> impl Iterator<Item = &T> {
        self.entries
            .iter()
            .filter_map(|e| <dyn Component as AsAny>::as_any(&*e.component).downcast_ref())
    }

    /// Every entry of type `T`, in order, mutably
    pub fn iter_of_mut<T: Component>(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries
            .iter_mut()
            .filter_map(|e| <dyn Component as AsAny>::as_any_mut(&mut *e.component).downcast_mut())
    }

    /// Typed access to the provider entry
    pub fn provider<T: Component>(&self) -> Option<&T> {
        let id = self.entries.iter().position(|e| e.is_provider)?;
        self.get(ComponentId(id))
    }

    /// Typed mutable access to the provider entry
    pub fn provider_mut<T: Component>(&mut self) -> Option<&mut T> {
        let id = self.entries.iter().position(|e| e.is_provider)?;
        self.get_mut(ComponentId(id))
    }

    /// Like [`ClusterComponents::provider_mut`] but a missing or mistyped entry is an error
    pub fn require_provider_mut<T: Component>(&mut self) -> Result<&mut T> {
        self.provider_mut()
            .ok_or_else(|| Error::MissingComponent(std::any::type_name::<T>().to_string()))
    }

    /// Entries that list `id` as a dependency
    pub fn dependents(&self, id: ComponentId) -> impl Iterator<Item = ComponentId> + '_ {
        self.entries
            .iter()
            .enumerate()
            .skip(id.0 + 1)
            .filter(move |(_, e)| e.dependencies.contains(&id))
            .map(|(i, _)| ComponentId(i))
    }
}
