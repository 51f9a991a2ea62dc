//! Post-commit entry notifications.

/// Observer notified after an entity is committed to the store.
///
/// Callbacks run on the worker pool after the store write succeeded, at most
/// once per operation, and never for a failed operation. They must not block.
pub trait EntryListener<T>: Send + Sync + 'static {
    fn on_entry_save(&self, _entity: &T) {}

    fn on_entry_remove(&self, _entity: &T) {}
}
