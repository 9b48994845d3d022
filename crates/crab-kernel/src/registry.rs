//! Frozen channel → event → pipeline table.

use crate::error::KernelError;
use crate::middleware::Pipeline;
use crab_types::RouteKey;
use std::collections::HashMap;

pub(crate) struct Registry<C, E> {
    routes: HashMap<C, HashMap<E, Pipeline<E>>>,
}

impl<C: RouteKey, E: RouteKey> Registry<C, E> {
    pub(crate) fn new(routes: HashMap<C, HashMap<E, Pipeline<E>>>) -> Self {
        Self { routes }
    }

    /// Find the pipeline for a route, or the routing error to answer with.
    pub(crate) fn resolve(&self, channel: &C, event: &E) -> Result<Pipeline<E>, KernelError> {
        let events = self
            .routes
            .get(channel)
            .ok_or_else(|| KernelError::UnsupportedChannel(format!("{channel:?}")))?;

        let pipeline = events.get(event).ok_or_else(|| KernelError::UnsupportedEvent {
            channel: format!("{channel:?}"),
            event: format!("{event:?}"),
        })?;

        if pipeline.is_empty() {
            return Err(KernelError::NoMiddlewareRegistered {
                channel: format!("{channel:?}"),
                event: format!("{event:?}"),
            });
        }
        Ok(pipeline.clone())
    }

    pub(crate) fn middleware_count(&self, channel: &C, event: &E) -> usize {
        self.routes
            .get(channel)
            .and_then(|events| events.get(event))
            .map_or(0, |pipeline| pipeline.len())
    }

    pub(crate) fn has_channel(&self, channel: &C) -> bool {
        self.routes.contains_key(channel)
    }

    pub(crate) fn has_event(&self, channel: &C, event: &E) -> bool {
        self.routes
            .get(channel)
            .is_some_and(|events| events.contains_key(event))
    }

    pub(crate) fn channel_count(&self) -> usize {
        self.routes.len()
    }

    pub(crate) fn route_count(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }
}
