//! Lifecycle management for audio components
//!
//! Every mixer, channel, sample and store is an [`AudioComponent`] owned by a
//! [`ComponentContainer`]. The container is the only place structural mutation
//! of a child list happens: calls made on the designated audio thread apply
//! immediately, anything else is queued and applied on the next `update()`.

use crate::domain::audio::{AudioError, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use tracing::{trace, warn};

/// Base unit of lifecycle management.
pub trait AudioComponent: Send {
    /// Periodic update, called by the owning container on the audio thread.
    fn update(&mut self) -> Result<()>;

    fn is_disposed(&self) -> bool;

    /// Release backend resources. Must be idempotent.
    fn dispose(&mut self);

    /// Whether the component should stay in its container.
    fn is_alive(&self) -> bool {
        !self.is_disposed()
    }
}

type RemovePredicate<T> = Box<dyn Fn(&T) -> bool + Send>;

/// Structural mutation deferred until the next update tick.
enum PendingAction<T> {
    Add(T),
    Remove(RemovePredicate<T>),
}

/// Cloneable intake for a container, usable from any thread.
///
/// Everything sent through a handle is applied on the container's next
/// `update()`, in the order it was sent.
pub struct ContainerHandle<T> {
    pending: Sender<PendingAction<T>>,
}

impl<T> Clone for ContainerHandle<T> {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
        }
    }
}

impl<T: AudioComponent> ContainerHandle<T> {
    /// Queue `item` for addition. Fails once the container is gone.
    pub fn add_item(&self, item: T) -> Result<()> {
        self.pending
            .send(PendingAction::Add(item))
            .map_err(|_| AudioError::Disposed("ComponentContainer"))
    }

    pub fn remove_where<P>(&self, predicate: P) -> Result<()>
    where
        P: Fn(&T) -> bool + Send + 'static,
    {
        self.pending
            .send(PendingAction::Remove(Box::new(predicate)))
            .map_err(|_| AudioError::Disposed("ComponentContainer"))
    }
}

/// Generic ownership container for audio components.
pub struct ComponentContainer<T> {
    items: Vec<T>,
    pending_tx: Sender<PendingAction<T>>,
    pending_rx: Receiver<PendingAction<T>>,
    audio_thread: ThreadId,
    disposed: bool,
}

impl<T: AudioComponent> ComponentContainer<T> {
    /// Create a container bound to the calling thread.
    pub fn new() -> Self {
        let (pending_tx, pending_rx) = unbounded();
        Self {
            items: Vec::new(),
            pending_tx,
            pending_rx,
            audio_thread: thread::current().id(),
            disposed: false,
        }
    }

    /// Rebind the container to the calling thread, e.g. after moving its owner
    /// onto a dedicated audio thread.
    pub fn bind_to_current_thread(&mut self) {
        self.audio_thread = thread::current().id();
    }

    pub fn is_audio_thread(&self) -> bool {
        thread::current().id() == self.audio_thread
    }

    pub fn handle(&self) -> ContainerHandle<T> {
        ContainerHandle {
            pending: self.pending_tx.clone(),
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [T] {
        &mut self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_rx.len()
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<&T> {
        self.items.iter().find(|item| predicate(item))
    }

    pub fn find_mut(&mut self, predicate: impl Fn(&T) -> bool) -> Option<&mut T> {
        self.items.iter_mut().find(|item| predicate(item))
    }

    /// Add a component; applied immediately on the audio thread, queued otherwise.
    pub fn add_item(&mut self, item: T) -> Result<()> {
        if self.disposed {
            return Err(AudioError::Disposed("ComponentContainer"));
        }

        if self.is_audio_thread() {
            self.items.push(item);
        } else {
            trace!("Queueing component addition from a foreign thread");
            // Can't fail: we hold the receiver.
            let _ = self.pending_tx.send(PendingAction::Add(item));
        }
        Ok(())
    }

    /// Remove every component matching `predicate`, firing `on_removed` for
    /// each. Off the audio thread the removal is queued and the hook fires
    /// from the next `update_with()` instead.
    pub fn remove_where<P, F>(&mut self, predicate: P, mut on_removed: F) -> Result<()>
    where
        P: Fn(&T) -> bool + Send + 'static,
        F: FnMut(T),
    {
        if self.disposed {
            return Err(AudioError::Disposed("ComponentContainer"));
        }

        if self.is_audio_thread() {
            self.extract_where(&predicate, &mut on_removed);
        } else {
            let _ = self.pending_tx.send(PendingAction::Remove(Box::new(predicate)));
        }
        Ok(())
    }

    /// Update with the default removal hook, which disposes removed items.
    pub fn update(&mut self) {
        self.update_with(|mut item| item.dispose());
    }

    /// Drain pending actions in FIFO order, update every child, then remove
    /// children that are no longer alive and hand each to `on_removed`.
    ///
    /// A child whose update fails is logged and treated as dead; the remaining
    /// children are still updated.
    pub fn update_with<F>(&mut self, mut on_removed: F)
    where
        F: FnMut(T),
    {
        if self.disposed {
            return;
        }

        // Only drain what was queued before this tick started.
        let queued = self.pending_rx.len();
        for action in self.pending_rx.try_iter().take(queued).collect::<Vec<_>>() {
            match action {
                PendingAction::Add(item) => self.items.push(item),
                PendingAction::Remove(predicate) => {
                    self.extract_where(&*predicate, &mut on_removed)
                }
            }
        }

        let mut failed = vec![false; self.items.len()];
        for (item, failed) in self.items.iter_mut().zip(failed.iter_mut()) {
            if let Err(e) = item.update() {
                warn!("Component update failed, removing it: {}", e);
                *failed = true;
            }
        }

        let mut index = 0;
        let mut kept = Vec::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            let dead = failed[index] || !item.is_alive();
            index += 1;
            if dead {
                on_removed(item);
            } else {
                kept.push(item);
            }
        }
        self.items = kept;
    }

    fn extract_where<F>(&mut self, predicate: &dyn Fn(&T) -> bool, on_removed: &mut F)
    where
        F: FnMut(T),
    {
        let mut kept = Vec::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if predicate(&item) {
                on_removed(item);
            } else {
                kept.push(item);
            }
        }
        self.items = kept;
    }

    /// Take every child out of the container without disposing them.
    pub fn drain(&mut self) -> Vec<T> {
        let mut items: Vec<T> = std::mem::take(&mut self.items);
        for action in self.pending_rx.try_iter() {
            if let PendingAction::Add(item) = action {
                items.push(item);
            }
        }
        items
    }
}

impl<T: AudioComponent> Default for ComponentContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: AudioComponent> AudioComponent for ComponentContainer<T> {
    fn update(&mut self) -> Result<()> {
        ComponentContainer::update(self);
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        for mut item in self.drain() {
            item.dispose();
        }
        self.disposed = true;
    }

    fn is_alive(&self) -> bool {
        !self.disposed && self.pending_rx.is_empty() && self.items.iter().all(|i| i.is_alive())
    }
}

impl<T: AudioComponent + ?Sized> AudioComponent for Box<T> {
    fn update(&mut self) -> Result<()> {
        (**self).update()
    }

    fn is_disposed(&self) -> bool {
        (**self).is_disposed()
    }

    fn dispose(&mut self) {
        (**self).dispose()
    }

    fn is_alive(&self) -> bool {
        (**self).is_alive()
    }
}

/// A component shared between its owning container and outside callers.
///
/// The container drives `update()`/`dispose()` through its clone while the
/// host keeps another clone for lookups.
pub struct SharedComponent<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for SharedComponent<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: AudioComponent> SharedComponent<T> {
    pub fn new(component: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(component)),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, T>> {
        self.inner
            .lock()
            .map_err(|_| AudioError::Backend("component lock poisoned".to_string()))
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: AudioComponent> AudioComponent for SharedComponent<T> {
    fn update(&mut self) -> Result<()> {
        self.lock()?.update()
    }

    fn is_disposed(&self) -> bool {
        self.lock().map(|c| c.is_disposed()).unwrap_or(true)
    }

    fn dispose(&mut self) {
        if let Ok(mut component) = self.lock() {
            component.dispose();
        }
    }

    fn is_alive(&self) -> bool {
        self.lock().map(|c| c.is_alive()).unwrap_or(false)
    }
}
