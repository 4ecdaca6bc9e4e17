//! Ordered around-call interceptors.
//!
//! A [`Chain`] is assembled once at server construction. Every call walks the
//! interceptors in order; each one either returns early or hands the call to
//! the rest of the chain through [`Next::run`]. The [`Handler`] at the end is
//! the service method itself.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    call::Call,
    error::{GuardError, Result},
};

/// The service method a chain guards.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles a call that passed every interceptor.
    async fn call(&self, call: Call) -> Result<Bytes>;
}

/// One cross-cutting stage wrapped around the handler.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Stage name for logs.
    fn name(&self) -> &'static str;

    /// Inspects or rejects `call`, usually finishing with `next.run(call)`.
    async fn intercept(&self, call: Call, next: Next<'_>) -> Result<Bytes>;
}

/// The remainder of a chain.
pub struct Next<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    handler: &'a dyn Handler,
}

impl Next<'_> {
    /// Passes `call` to the next interceptor, or to the handler once none
    /// remain.
    ///
    /// # Errors
    ///
    /// Whatever the remaining stages or the handler return.
    pub async fn run(self, call: Call) -> Result<Bytes> {
        match self.interceptors.split_first() {
            Some((first, rest)) => {
                first.intercept(call, Next { interceptors: rest, handler: self.handler }).await
            },
            None => self.handler.call(call).await,
        }
    }
}

/// Interceptors in the order they run.
#[derive(Clone, Default)]
pub struct Chain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.interceptors.iter().map(|stage| stage.name())).finish()
    }
}

impl Chain {
    /// An empty chain that calls the handler directly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `interceptor` after the existing stages.
    #[must_use]
    pub fn with(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Stage names in order.
    pub fn stages(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.interceptors.iter().map(|stage| stage.name())
    }

    /// Runs `call` through every stage and then `handler`.
    ///
    /// Cancelling the call's token aborts whatever stage is in flight.
    ///
    /// # Errors
    ///
    /// [`GuardError::Cancelled`] if the caller cancelled first, otherwise the
    /// first stage error or the handler's own.
    pub async fn serve(&self, call: Call, handler: &dyn Handler) -> Result<Bytes> {
        let cancellation = call.cancellation().clone();
        let method = call.method().to_string();
        let next = Next { interceptors: &self.interceptors, handler };

        tokio::select! {
            biased;
            () = cancellation.cancelled() => {
                tracing::debug!(method = %method, "call cancelled by caller");
                Err(GuardError::Cancelled)
            },
            result = next.run(call) => result,
        }
    }
}
