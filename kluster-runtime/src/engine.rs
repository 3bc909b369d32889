//! Drives a [`ClusterComponents`] collection forward (create/converge) or backward (delete)
use crate::{
    components::{ClusterComponents, ComponentId},
    Result,
};
use kluster_core::{ComponentOwner, ComponentState, ComponentStatus, Outcome};
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

/// The generic executor behind every provider
///
/// One call to [`Components::reconcile`] is one pass. The pass is sequential: each
/// component finishes its cloud round-trip before the next one starts, so every
/// component observes the post-state of its predecessors.
///
/// # Create / converge
///
/// Entries are walked in order. An entry runs only when all of its dependencies
/// reached a terminal success earlier in the same pass. The first entry that is still
/// converging or fails ends the pass; later entries depend on it directly or
/// transitively and are not attempted.
///
/// # Delete
///
/// When the owner carries a deletion timestamp, entries are walked in reverse. An entry
/// is only deleted once every entry depending on it is gone, so consumers are torn down
/// before what they consume. Entries that still have dependents are skipped with a
/// requeue. The first error ends the pass.
///
/// # Status
///
/// One [`ComponentStatus`] per entry touched is written to the owner in processing order,
/// whether or not the pass succeeded.
#[derive(Clone, Debug)]
pub struct Components {
    dependency_requeue: Duration,
}

impl Default for Components {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Components {
    /// Engine that asks for a requeue after `dependency_requeue` when an entry is blocked
    pub fn new(dependency_requeue: Duration) -> Self {
        Self { dependency_requeue }
    }

    /// Run one pass over `components` on behalf of `owner`
    ///
    /// Returns the strictest [`Outcome`] requested during the pass. Errors are wrapped
    /// with the name of the failing component.
    pub async fn reconcile<K: ComponentOwner>(
        &self,
        components: &mut ClusterComponents,
        owner: &mut K,
    ) -> Result<Outcome> {
        let mut statuses = Vec::with_capacity(components.len());
        let result = if owner.is_deleting() {
            self.delete(components, &mut statuses).await
        } else {
            self.converge(components, &mut statuses).await
        };
        owner.set_component_statuses(statuses);
        result
    }

    async fn converge(
        &self,
        components: &mut ClusterComponents,
        statuses: &mut Vec<ComponentStatus>,
    ) -> Result<Outcome> {
        let names = components.names();
        let mut ready = vec![false; components.len()];

        for (i, entry) in components.entries_mut().iter_mut().enumerate() {
            let name = &names[i];
            if let Some(dep) = entry.dependencies().iter().find(|d| !ready[d.index()]) {
                let dep_name = &names[dep.index()];
                debug!(component = %name, dependency = %dep_name, "dependency not ready");
                statuses.push(
                    ComponentStatus::new(name, ComponentState::Blocked)
                        .with_message(format!("waiting for {dep_name}")),
                );
                return Ok(Outcome::requeue_after(self.dependency_requeue));
            }

            let span = info_span!("component", component = %name);
            let result = entry.component_mut().reconcile().instrument(span).await;
            let mut status = ComponentStatus::new(name, ComponentState::Ok);
            match result {
                Ok(outcome) if outcome.is_done() => {
                    entry.component().set_status(&mut status);
                    statuses.push(status);
                    ready[i] = true;
                }
                Ok(outcome) => {
                    debug!(component = %name, ?outcome, "component still converging");
                    status.status = ComponentState::Pending;
                    entry.component().set_status(&mut status);
                    statuses.push(status);
                    return Ok(outcome);
                }
                Err(err) => {
                    let err = err.in_component(name.as_str());
                    warn!(component = %name, error = %err, "component failed");
                    status.status = ComponentState::Error;
                    entry.component().set_status(&mut status);
                    status.message = Some(err.to_string());
                    statuses.push(status);
                    return Err(err);
                }
            }
        }
        info!(components = names.len(), "all components converged");
        Ok(Outcome::done())
    }

    async fn delete(
        &self,
        components: &mut ClusterComponents,
        statuses: &mut Vec<ComponentStatus>,
    ) -> Result<Outcome> {
        let names = components.names();
        let mut gone = vec![false; components.len()];
        let mut outcome = Outcome::done();

        for i in (0..components.len()).rev() {
            let name = &names[i];
            let waiting_on = components
                .dependents(ComponentId(i))
                .find(|d| !gone[d.index()])
                .map(|d| &names[d.index()]);
            if let Some(dependent) = waiting_on {
                debug!(component = %name, %dependent, "dependent not deleted yet");
                statuses.push(
                    ComponentStatus::new(name, ComponentState::Blocked)
                        .with_message(format!("waiting for {dependent} to be deleted")),
                );
                outcome = outcome.merge(Outcome::requeue_after(self.dependency_requeue));
                continue;
            }

            let entry = &mut components.entries_mut()[i];
            let span = info_span!("component", component = %name);
            let result = entry.component_mut().delete().instrument(span).await;
            let result = match result {
                Ok(step) if step.is_done() => match entry.component().deletion_status() {
                    Some(confirm) => confirm.is_deleted().await.map(|deleted| (step, deleted)),
                    None => Ok((step, true)),
                },
                Ok(step) => Ok((step, false)),
                Err(err) => Err(err),
            };

            match result {
                Ok((_, true)) => {
                    let mut status = ComponentStatus::new(name, ComponentState::Deleted);
                    entry.component().set_status(&mut status);
                    statuses.push(status);
                    gone[i] = true;
                }
                Ok((step, false)) => {
                    debug!(component = %name, ?step, "component still deleting");
                    let mut status = ComponentStatus::new(name, ComponentState::Deleting);
                    entry.component().set_status(&mut status);
                    statuses.push(status);
                    let step = if step.is_done() {
                        Outcome::requeue_after(self.dependency_requeue)
                    } else {
                        step
                    };
                    outcome = outcome.merge(step);
                }
                Err(err) => {
                    let err = err.in_component(name.as_str());
                    warn!(component = %name, error = %err, "component deletion failed");
                    let mut status = ComponentStatus::new(name, ComponentState::Error);
                    entry.component().set_status(&mut status);
                    status.message = Some(err.to_string());
                    statuses.push(status);
                    return Err(err);
                }
            }
        }
        if outcome.is_done() {
            info!(components = names.len(), "all components deleted");
        }
        Ok(outcome)
    }
}
