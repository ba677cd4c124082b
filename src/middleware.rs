//! A request-pipeline stage wrapping a [Qos](crate::Qos) engine.

use std::{fmt, sync::Arc};

use crate::{BadActor, Qos};

/// The parts of an incoming request used to attribute load.
pub trait Request {
    /// The virtual host the request is for, e.g. from the `Host` header.
    fn host(&self) -> Option<&str>;

    /// The client's address, from the transport.
    fn remote_addr(&self) -> Option<&str>;
}

/// The parts of a response needed to reject a request.
pub trait Response {
    /// Write the response status and headers.
    fn write_head(&mut self, status: u16);

    /// Finish the response, without a body.
    fn end(&mut self);
}

/// Called before a request is throttled. Return `false` to let the request through anyway.
///
/// Runs synchronously on the request path, so it mustn't block. Panics are not caught.
pub type BeforeThrottle<R> = Box<dyn Fn(&Qos, &R, BadActor) -> bool + Send + Sync>;

/// What the [Middleware] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Passed on to the next handler.
    Allowed,
    /// Would have been throttled, but the [BeforeThrottle] hook let it through.
    Spared(BadActor),
    /// Rejected with the configured error status.
    Throttled(BadActor),
}

/// A request-pipeline stage which sheds load from bad actors while overloaded.
///
/// Requests are either passed to the next handler, or rejected with the configured error status
/// and an empty body.
pub struct Middleware<R: ?Sized> {
    qos: Arc<Qos>,
    before_throttle: Option<BeforeThrottle<R>>,
}

impl<R> Middleware<R>
where
    R: Request + ?Sized,
{
    #[allow(missing_docs)]
    pub fn new(qos: Arc<Qos>) -> Self {
        Self {
            qos,
            before_throttle: None,
        }
    }

    /// Ask `hook` before throttling each request. See [BeforeThrottle].
    pub fn with_before_throttle(
        self,
        hook: impl Fn(&Qos, &R, BadActor) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            before_throttle: Some(Box::new(hook)),
            ..self
        }
    }

    /// The engine making throttling decisions.
    pub fn qos(&self) -> &Arc<Qos> {
        &self.qos
    }

    /// Handle a request, either calling `next` or rejecting it via `res`.
    pub fn handle<S>(&self, req: &R, res: &mut S, next: impl FnOnce()) -> Decision
    where
        S: Response + ?Sized,
    {
        let Some(cause) = self.qos.should_throttle_request(req) else {
            next();
            return Decision::Allowed;
        };

        let throttle = match &self.before_throttle {
            Some(hook) => hook(self.qos.as_ref(), req, cause),
            None => true,
        };

        if !throttle {
            tracing::debug!(%cause, host = req.host(), ip = req.remote_addr(), "Throttle vetoed");
            next();
            return Decision::Spared(cause);
        }

        tracing::debug!(
            %cause,
            host = req.host(),
            ip = req.remote_addr(),
            lag = ?self.qos.probe().current_lag(),
            "Throttled request"
        );

        res.write_head(self.qos.config().error_status_code);
        res.end();

        Decision::Throttled(cause)
    }
}

impl<R: ?Sized> fmt::Debug for Middleware<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("qos", &self.qos)
            .field("before_throttle", &self.before_throttle.is_some())
            .finish()
    }
}
