//! Context passed to event handlers.
//!
//! Carries the decoded payload, the channel and headers of the delivery,
//! and the owning component for handlers registered with
//! [`HandlerRegistry::on_component`](super::HandlerRegistry::on_component).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::transport::{Headers, IncomingMessage};

use super::error::HandlerError;

/// The context passed to every event handler.
///
/// ## Example
///
/// ```ignore
/// registry.on("orders.created", |ctx: HandlerContext| async move {
///     let order = ctx.input::<OrderCreated>()?;
///     println!("order {} on {}", order.id, ctx.channel());
///     Ok(())
/// });
/// ```
#[derive(Clone)]
pub struct HandlerContext {
    channel: String,
    payload: Value,
    headers: Headers,
    component: Option<Arc<dyn Any + Send + Sync>>,
}

impl HandlerContext {
    pub(crate) fn new(message: &IncomingMessage) -> Self {
        Self {
            channel: message.channel.clone(),
            payload: message.payload.clone(),
            headers: message.headers.clone(),
            component: None,
        }
    }

    pub(crate) fn with_component(mut self, component: Arc<dyn Any + Send + Sync>) -> Self {
        self.component = Some(component);
        self
    }

    /// Deserialize the payload into a typed struct.
    pub fn input<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_value(self.payload.clone()).map_err(HandlerError::from)
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|s| s.as_str())
    }

    /// The deduplication identifier of the delivery, if any.
    pub fn message_id(&self) -> Option<&str> {
        self.header(crate::transport::MESSAGE_ID_HEADER)
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// The owning component, downcast to `C`.
    pub fn component<C: Any + Send + Sync>(&self) -> Result<Arc<C>, HandlerError> {
        let component = self.component.clone().ok_or_else(|| {
            HandlerError::Unresolved(std::any::type_name::<C>().to_string())
        })?;
        component
            .downcast::<C>()
            .map_err(|_| HandlerError::Unresolved(std::any::type_name::<C>().to_string()))
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("channel", &self.channel)
            .field("payload", &self.payload)
            .field("headers", &self.headers)
            .field("component", &self.component.is_some())
            .finish()
    }
}
