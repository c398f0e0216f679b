//! Process-wide services and per-request scopes.
//!
//! [`Services`] is a small type-map: one value per Rust type, shared
//! behind `Arc`. A [`ServiceProvider`] snapshot owns the root map plus an
//! optional scope factory; the dispatch path asks it for a
//! [`ServiceScope`] per request, which resolves scoped values first and
//! falls back to the root. The scope is owned by the dispatching task for
//! exactly one request and released (dropped) before the context returns
//! to its pool.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// A type-indexed set of shared values.
#[derive(Default, Clone)]
pub struct Services {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Services {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a value under its type, replacing any previous one.
    pub fn register<T: Send + Sync + 'static>(&mut self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds the scoped service set for one request from the root set.
pub type ScopeFactory = dyn Fn(&Services) -> Services + Send + Sync;

/// An immutable snapshot of the process-wide services, shared by every
/// connection of a server.
#[derive(Clone, Default)]
pub struct ServiceProvider {
    root: Arc<Services>,
    scope_factory: Option<Arc<ScopeFactory>>,
}

impl ServiceProvider {
    pub fn new(root: Services, scope_factory: Option<Arc<ScopeFactory>>) -> Self {
        Self { root: Arc::new(root), scope_factory }
    }

    /// Creates the per-request scope. Without a factory the scope is a
    /// plain view over the root services.
    pub fn create_scope(&self) -> ServiceScope {
        let scoped = self.scope_factory.as_ref().map(|factory| factory(&self.root));
        ServiceScope { root: self.root.clone(), scoped }
    }
}

/// The per-request capability set: scoped values over the root services.
///
/// Dropping the scope releases every scoped value.
pub struct ServiceScope {
    root: Arc<Services>,
    scoped: Option<Services>,
}

impl ServiceScope {
    /// Resolves a service, scoped values first.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.scoped
            .as_ref()
            .and_then(|services| services.get::<T>())
            .or_else(|| self.root.get::<T>())
    }

    /// True when this scope was produced by a scope factory.
    pub fn is_scoped(&self) -> bool {
        self.scoped.is_some()
    }
}
