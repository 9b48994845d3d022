//! Fluent pipeline registration.
//!
//! ```rust,ignore
//! let kernel = KernelBuilder::new()
//!     .with(trace_requests)              // leading: prepended to every pipeline below
//!     .channel(Channel::App)
//!     .handle(Event::Greeting)
//!     .with(decrypt_request)
//!     .with(greet)
//!     .channel(Channel::Sdk)
//!     .handle(Event::Greeting)
//!     .with(greet_sdk)
//!     .all_routes()
//!     .with(audit)                       // trailing: appended to every pipeline above
//!     .run()?;
//! ```

use crate::config::KernelConfig;
use crate::cross::CrossResolver;
use crate::error::{KernelResult, RegistrationError};
use crate::kernel::Kernel;
use crate::middleware::{Middleware, Pipeline};
use crate::registry::Registry;
use crab_types::RouteKey;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

type Chain<E> = Vec<Arc<dyn Middleware<E>>>;

/// Where the next `with` call lands.
enum Cursor<C, E> {
    /// Nothing selected yet: `with` registers a leading middleware.
    Idle,
    Channel(C),
    Event(C, E),
    /// After `all_routes()`: `with` appends to every pipeline.
    AllRoutes,
}

/// Builds a [`Kernel`]. Registration happens here and only here.
pub struct KernelBuilder<C, E> {
    routes: HashMap<C, HashMap<E, Chain<E>>>,
    leading: Chain<E>,
    cursor: Cursor<C, E>,
    error: Option<RegistrationError>,
    cross: CrossResolver,
    config: KernelConfig,
}

impl<C: RouteKey, E: RouteKey> Default for KernelBuilder<C, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: RouteKey, E: RouteKey> KernelBuilder<C, E> {
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> Self {
        Self {
            routes: HashMap::new(),
            leading: Vec::new(),
            cursor: Cursor::Idle,
            error: None,
            cross: CrossResolver::new(config.default_cross_resolving_timeout()),
            config,
        }
    }

    /// Select (registering if new) a channel.
    pub fn channel(mut self, channel: C) -> Self {
        self.routes.entry(channel.clone()).or_default();
        self.cursor = Cursor::Channel(channel);
        self
    }

    /// Select (registering if new) an event on the current channel.
    ///
    /// A new pipeline starts with the leading middlewares registered so far.
    pub fn handle(mut self, event: E) -> Self {
        let channel = match &self.cursor {
            Cursor::Channel(channel) | Cursor::Event(channel, _) => channel.clone(),
            Cursor::Idle | Cursor::AllRoutes => {
                self.record(RegistrationError::HandleWithoutChannel {
                    event: format!("{event:?}"),
                });
                return self;
            }
        };

        let leading = &self.leading;
        self.routes
            .entry(channel.clone())
            .or_default()
            .entry(event.clone())
            .or_insert_with(|| leading.clone());

        self.cursor = Cursor::Event(channel, event);
        self
    }

    /// Append a middleware at the cursor.
    pub fn with(self, middleware: impl Middleware<E>) -> Self {
        self.with_shared(Arc::new(middleware))
    }

    /// Like [`with`](Self::with), for a middleware shared between routes.
    pub fn with_shared(mut self, middleware: Arc<dyn Middleware<E>>) -> Self {
        let misuse = match &self.cursor {
            Cursor::Idle => {
                self.leading.push(middleware);
                None
            }
            Cursor::Channel(channel) => Some(RegistrationError::MiddlewareWithoutEvent {
                channel: format!("{channel:?}"),
            }),
            Cursor::Event(channel, event) => {
                if let Some(chain) = self
                    .routes
                    .get_mut(channel)
                    .and_then(|events| events.get_mut(event))
                {
                    chain.push(middleware);
                }
                None
            }
            Cursor::AllRoutes => {
                for chain in self.routes.values_mut().flat_map(HashMap::values_mut) {
                    chain.push(Arc::clone(&middleware));
                }
                None
            }
        };

        if let Some(err) = misuse {
            self.record(err);
        }
        self
    }

    /// Point the cursor at every pipeline registered so far.
    pub fn all_routes(mut self) -> Self {
        self.cursor = Cursor::AllRoutes;
        self
    }

    /// The cross-resolving table the built kernel will use.
    pub fn cross_resolver(&self) -> CrossResolver {
        self.cross.clone()
    }

    /// Freeze the registry. Fails with the first registration error, if any.
    pub fn build(self) -> KernelResult<Kernel<C, E>> {
        if let Some(err) = self.error {
            return Err(err.into());
        }
        self.config.validate()?;

        let routes: HashMap<C, HashMap<E, Pipeline<E>>> = self
            .routes
            .into_iter()
            .map(|(channel, events)| {
                let events = events
                    .into_iter()
                    .map(|(event, chain)| (event, Pipeline::from(chain)))
                    .collect();
                (channel, events)
            })
            .collect();

        let registry = Registry::new(routes);
        debug!(
            channels = registry.channel_count(),
            routes = registry.route_count(),
            "Kernel built"
        );
        Ok(Kernel::new(registry, self.cross, self.config))
    }

    /// Build and start the timeout sweep.
    pub fn run(self) -> KernelResult<Kernel<C, E>> {
        let kernel = self.build()?;
        kernel.start_sweeper(kernel.config().sweep_interval())?;
        Ok(kernel)
    }

    fn record(&mut self, err: RegistrationError) {
        error!(error = %err, "Invalid kernel registration");
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}
