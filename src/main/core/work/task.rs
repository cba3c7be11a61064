use std::sync::Arc;

use atomic_refcell::AtomicRefCell;

use crate::host::host::Host;

/// A shared reference to a unit of work that runs on a [`Host`]. Cloning only clones the
/// reference; every clone runs the same closure.
#[derive(Clone)]
pub struct TaskRef {
    inner: Arc<AtomicRefCell<dyn FnMut(&mut Host) + Send + Sync>>,
}

impl TaskRef {
    pub fn new<T: 'static + FnMut(&mut Host) + Send + Sync>(f: T) -> Self {
        Self {
            inner: Arc::new(AtomicRefCell::new(f)),
        }
    }

    /// Create a task that only does something the first time it runs. Running it again is a
    /// no-op.
    pub fn new_once<T: 'static + FnOnce(&mut Host) + Send + Sync>(f: T) -> Self {
        let mut f = Some(f);
        Self::new(move |host| {
            if let Some(f) = f.take() {
                f(host)
            }
        })
    }

    /// Executes the task.
    ///
    /// Panics if the task is already running (a task that executes itself).
    pub fn execute(&self, host: &mut Host) {
        let mut inner = self.inner.borrow_mut();
        inner(host)
    }
}

impl PartialEq for TaskRef {
    /// Two `TaskRef`s are equal if they point to the same task object.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for TaskRef {}

impl std::fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRef")
            .field("inner", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_eq() {
        let a = TaskRef::new(|_host| {});
        let b = TaskRef::new(|_host| {});

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
