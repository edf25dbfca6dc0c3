//! Async stream adapter over a [`Subscription`]
//!
//! Used to feed server-sent event endpoints. Dropping the stream drops the
//! subscription, which removes it from the bus.

use crate::bus::Subscription;
use crate::dto::CircuitBreakerEventDto;
use crate::events::CircuitBreakerEvent;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

#[derive(Debug)]
pub struct EventStream {
    subscription: Subscription,
    remaining: Option<usize>,
}

impl EventStream {
    pub fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            remaining: None,
        }
    }

    /// End the stream after `limit` events
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.remaining = Some(limit);
        self
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Map each event to its JSON representation
    pub fn json(self) -> impl Stream<Item = Result<String, serde_json::Error>> + Send {
        futures::StreamExt::map(self, |event| {
            CircuitBreakerEventDto::from(event.as_ref()).to_json()
        })
    }
}

impl Stream for EventStream {
    type Item = Arc<CircuitBreakerEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.remaining == Some(0) {
            return Poll::Ready(None);
        }

        match this.subscription.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if let Some(remaining) = this.remaining.as_mut() {
                    *remaining -= 1;
                }
                Poll::Ready(Some(event))
            }
            other => other,
        }
    }
}
