//! Idempotent listener - deduplicating consumer on top of a transport.
//!
//! For each delivered message the listener:
//!
//! 1. reads `x-message-id`; without one the handler runs undeduplicated
//! 2. reserves the id in the inbox (a known id is a duplicate: ack and stop)
//! 3. runs the registered handler with a [`HandlerContext`]
//! 4. records `Processed` and acknowledges, or records `Failed` and rejects
//!
//! Handlers are registered explicitly in a [`HandlerRegistry`]. A handler may
//! be bound to an owning component, which a [`Resolver`] supplies at
//! delivery time.
//!
//! ## Example
//!
//! ```ignore
//! let registry = HandlerRegistry::new()
//!     .on("orders.created", |ctx| async move {
//!         let order = ctx.input::<OrderCreated>()?;
//!         println!("order {}", order.id);
//!         Ok(())
//!     });
//!
//! let listener = IdempotentListener::new(
//!     store.clone(),
//!     Arc::new(transport),
//!     registry,
//!     Arc::new(ComponentMap::new()),
//!     ListenerConfig::default(),
//! )?;
//! listener.start().await?;
//! ```

mod context;
mod error;
mod idempotent;
mod registry;

pub use context::HandlerContext;
pub use error::HandlerError;
pub use idempotent::{DeliveryOutcome, IdempotentListener};
pub use registry::{
    ComponentKey, ComponentMap, EventHandler, HandlerRegistry, Registration, Resolver,
};
