//! Allocation capabilities and scoped root tracers.
//!
//! Every allocation is gated through a [`GcCapability`]. Capabilities form a
//! parent chain mirroring the dynamic scope of the mutator: the runtime's
//! root sits at the top, tracers that can trigger a collection hang off it,
//! and a [`NoGcScope`] anywhere in the chain forbids collection for its
//! lifetime.

use super::Marker;

use std::cell::{Cell, RefCell};
use std::process;

/// Collection policy of one capability in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcMode {
    /// Top of the chain; cannot itself be traced.
    Root,
    /// May trigger a collection; must expose a tracer.
    CanGc,
    /// May allocate but never collect; records OOM for later inspection.
    CannotGc,
}

/// A set of roots the collector must scan.
pub trait Tracer {
    /// Mark every root this tracer knows about, then delegate to the
    /// parent's tracer.
    fn do_trace(&self, marker: &mut Marker<'_>);
}

/// A handle allowing allocation, with a policy on what happens when the
/// heap runs out of memory.
pub trait GcCapability {
    /// This capability's collection policy.
    fn mode(&self) -> GcMode;

    /// The enclosing capability, if any.
    fn parent(&self) -> Option<&dyn GcCapability>;

    /// The tracer to start a collection from, if this capability has one.
    fn tracer(&self) -> Option<&dyn Tracer>;

    /// Out-of-memory policy, invoked after collection and retry both
    /// failed. The default policy is fatal.
    fn report_oom(&self, words: usize) {
        tracing::error!(words, "heap exhausted");
        eprintln!("plasma: out of memory allocating {words} words");
        process::abort();
    }

    /// Walk the chain: the innermost decisive capability wins. A
    /// `CannotGc` forbids collection, a `CanGc` permits it, and reaching
    /// the root without meeting a tracer means there is nothing to trace.
    fn can_gc(&self) -> bool {
        let mut cap: &dyn GcCapability = self.as_capability();

        loop {
            match cap.mode() {
                GcMode::CannotGc => return false,
                GcMode::CanGc => return true,
                GcMode::Root => match cap.parent() {
                    Some(parent) => cap = parent,
                    None => return false,
                },
            }
        }
    }

    /// Object-safe self upcast used by the default `can_gc` walk.
    fn as_capability(&self) -> &dyn GcCapability;
}

/// The top of a capability chain. Owns no roots and aborts on OOM.
#[derive(Debug, Default)]
pub struct HeapRoot;

impl GcCapability for HeapRoot {
    fn mode(&self) -> GcMode {
        GcMode::Root
    }

    fn parent(&self) -> Option<&dyn GcCapability> {
        None
    }

    fn tracer(&self) -> Option<&dyn Tracer> {
        None
    }

    fn as_capability(&self) -> &dyn GcCapability {
        self
    }
}

/// A `CanGc` capability holding explicit root slots.
///
/// Roots are the addresses of mutator variables that hold (possibly tagged)
/// heap pointers; the collector reads each slot at trace time. Registration
/// is stack-disciplined: the most recently added root must be the next one
/// removed.
pub struct ScopedRoots<'p> {
    parent: &'p dyn GcCapability,
    roots: RefCell<Vec<*const usize>>,
}

impl<'p> ScopedRoots<'p> {
    /// Create an empty root set under `parent`.
    pub fn new(parent: &'p dyn GcCapability) -> Self {
        ScopedRoots {
            parent,
            roots: RefCell::new(Vec::new()),
        }
    }

    /// Register the address of a slot holding a root pointer.
    pub fn add_root(&self, slot: *const usize) {
        self.roots.borrow_mut().push(slot);
    }

    /// Unregister a slot. Must be the most recently added one.
    pub fn remove_root(&self, slot: *const usize) {
        let popped = self.roots.borrow_mut().pop();
        assert_eq!(
            popped,
            Some(slot),
            "roots must be removed in stack order"
        );
    }
}

impl Tracer for ScopedRoots<'_> {
    fn do_trace(&self, marker: &mut Marker<'_>) {
        for &slot in self.roots.borrow().iter() {
            marker.mark_root(unsafe { *slot });
        }

        if let Some(tracer) = self.parent.tracer() {
            tracer.do_trace(marker);
        }
    }
}

impl GcCapability for ScopedRoots<'_> {
    fn mode(&self) -> GcMode {
        GcMode::CanGc
    }

    fn parent(&self) -> Option<&dyn GcCapability> {
        Some(self.parent)
    }

    fn tracer(&self) -> Option<&dyn Tracer> {
        Some(self)
    }

    fn as_capability(&self) -> &dyn GcCapability {
        self
    }
}

/// A scope that must not see a collection.
///
/// Allocation failures inside the scope are recorded rather than fatal; the
/// scope's owner must acknowledge them through [`is_oom`](Self::is_oom) or
/// [`abort_if_oom`](Self::abort_if_oom). Dropping the scope with an
/// unacknowledged failure aborts the process: an OOM silently swallowed
/// here would surface later as a torn object graph.
pub struct NoGcScope<'p> {
    parent: &'p dyn GcCapability,
    oom_words: Cell<Option<usize>>,
    acknowledged: Cell<bool>,
}

impl<'p> NoGcScope<'p> {
    /// Open a no-GC region under `parent`.
    pub fn new(parent: &'p dyn GcCapability) -> Self {
        NoGcScope {
            parent,
            oom_words: Cell::new(None),
            acknowledged: Cell::new(false),
        }
    }

    /// Whether an allocation failed inside this scope. Acknowledges the
    /// failure.
    pub fn is_oom(&self) -> bool {
        self.acknowledged.set(true);
        self.oom_words.get().is_some()
    }

    /// Abort with a diagnostic if an allocation failed inside this scope.
    pub fn abort_if_oom(&self, label: &str) {
        self.acknowledged.set(true);
        if let Some(words) = self.oom_words.get() {
            eprintln!("plasma: out of memory in {label} ({words} words)");
            process::abort();
        }
    }
}

impl GcCapability for NoGcScope<'_> {
    fn mode(&self) -> GcMode {
        GcMode::CannotGc
    }

    fn parent(&self) -> Option<&dyn GcCapability> {
        Some(self.parent)
    }

    fn tracer(&self) -> Option<&dyn Tracer> {
        None
    }

    fn report_oom(&self, words: usize) {
        if self.oom_words.get().is_none() {
            self.oom_words.set(Some(words));
        }
    }

    fn as_capability(&self) -> &dyn GcCapability {
        self
    }
}

impl Drop for NoGcScope<'_> {
    fn drop(&mut self) {
        if self.oom_words.get().is_some() && !self.acknowledged.get() {
            eprintln!(
                "plasma: out of memory inside a no-GC region went unacknowledged"
            );
            process::abort();
        }
    }
}
