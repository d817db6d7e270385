//! Handler registration and component resolution.
//!
//! The listener consumes an explicit table built at startup: channel pattern
//! → handler, optionally bound to an owning component. Components are looked
//! up through an injected [`Resolver`] rather than a global container.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use super::context::HandlerContext;
use super::error::HandlerError;

/// Application logic invoked for each accepted message.
///
/// Implemented for any `Fn(HandlerContext) -> impl Future<Output = Result<(), HandlerError>>`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, ctx: HandlerContext) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: HandlerContext) -> Result<(), HandlerError> {
        (self)(ctx).await
    }
}

/// Adapts a handler taking its component as a first argument.
struct ComponentHandler<C, F> {
    handler: F,
    _component: PhantomData<fn() -> C>,
}

#[async_trait]
impl<C, F, Fut> EventHandler for ComponentHandler<C, F>
where
    C: Any + Send + Sync,
    F: Fn(Arc<C>, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: HandlerContext) -> Result<(), HandlerError> {
        let component = ctx.component::<C>()?;
        (self.handler)(component, ctx).await
    }
}

/// Identifies a component type for a [`Resolver`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentKey {
    type_id: TypeId,
    name: &'static str,
}

impl ComponentKey {
    pub fn of<C: Any>() -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            name: std::any::type_name::<C>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Supplies component instances to handlers that declare an owner.
pub trait Resolver: Send + Sync {
    fn resolve(&self, key: &ComponentKey) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// Map-backed [`Resolver`] for single-process use.
#[derive(Clone, Default)]
pub struct ComponentMap {
    components: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ComponentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component, replacing any previous instance of the same type.
    pub fn with<C: Any + Send + Sync>(mut self, component: C) -> Self {
        self.insert(Arc::new(component));
        self
    }

    pub fn insert<C: Any + Send + Sync>(&mut self, component: Arc<C>) {
        self.components.insert(TypeId::of::<C>(), component);
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl Resolver for ComponentMap {
    fn resolve(&self, key: &ComponentKey) -> Option<Arc<dyn Any + Send + Sync>> {
        self.components.get(&key.type_id()).cloned()
    }
}

/// One registered handler.
#[derive(Clone)]
pub struct Registration {
    pattern: String,
    handler: Arc<dyn EventHandler>,
    component: Option<ComponentKey>,
}

impl Registration {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn component(&self) -> Option<&ComponentKey> {
        self.component.as_ref()
    }

    pub(crate) fn handler(&self) -> Arc<dyn EventHandler> {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("pattern", &self.pattern)
            .field("component", &self.component)
            .finish()
    }
}

/// Explicit pattern → handler table.
///
/// One handler per pattern: registering a pattern again replaces the earlier
/// handler. Registration order is kept and decides which pattern wins when
/// [`IdempotentListener::process`](super::IdempotentListener::process) is
/// handed a message directly.
///
/// ```ignore
/// let registry = HandlerRegistry::new()
///     .on("audit.#", |ctx| async move { Ok(()) })
///     .on_component::<Billing, _, _>("orders.created", |billing, ctx| async move {
///         billing.charge(ctx.input()?).await
///     });
/// ```
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    registrations: Vec<Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a free-standing handler function for `pattern`.
    pub fn on<F, Fut>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(pattern, Arc::new(handler), None)
    }

    /// Register any [`EventHandler`] implementation for `pattern`.
    pub fn on_handler<H>(self, pattern: &str, handler: H) -> Self
    where
        H: EventHandler + 'static,
    {
        self.register(pattern, Arc::new(handler), None)
    }

    /// Register a handler owned by component `C`, which receives the
    /// resolved instance.
    pub fn on_component<C, F, Fut>(self, pattern: &str, handler: F) -> Self
    where
        C: Any + Send + Sync,
        F: Fn(Arc<C>, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler = ComponentHandler {
            handler,
            _component: PhantomData::<fn() -> C>,
        };
        self.register(pattern, Arc::new(handler), Some(ComponentKey::of::<C>()))
    }

    fn register(
        mut self,
        pattern: &str,
        handler: Arc<dyn EventHandler>,
        component: Option<ComponentKey>,
    ) -> Self {
        let registration = Registration {
            pattern: pattern.to_string(),
            handler,
            component,
        };
        match self.registrations.iter_mut().find(|r| r.pattern == pattern) {
            Some(existing) => *existing = registration,
            None => self.registrations.push(registration),
        }
        self
    }

    pub fn get(&self, pattern: &str) -> Option<&Registration> {
        self.registrations.iter().find(|r| r.pattern == pattern)
    }

    /// Registered patterns, in registration order.
    pub fn patterns(&self) -> Vec<&str> {
        self.registrations.iter().map(|r| r.pattern.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
