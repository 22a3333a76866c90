//! Operation handler abstraction.
//!
//! The handler is the domain callback run once per received request. It is
//! a pure function of the request; the engine never interprets results
//! beyond `Ok`/`Err`.

use crate::error::DomainError;
use crate::message::{MathRequest, MathResponse};

/// Produces the response for one request.
///
/// **Contract:**
/// - Deterministic: identical requests yield identical results.
/// - Domain failures are returned as `Err`, never encoded as special values
///   in an `Ok` response.
/// - Called on a dispatch worker unless the server is configured with an
///   offload pool; handlers that may block must be run with one.
pub trait OperationHandler: Send + Sync + 'static {
    fn compute(&self, request: &MathRequest) -> Result<MathResponse, DomainError>;
}

/// Adapts a closure into an `OperationHandler`.
pub struct HandlerFn<F>(pub F);

impl<F> OperationHandler for HandlerFn<F>
where
    F: Fn(&MathRequest) -> Result<MathResponse, DomainError> + Send + Sync + 'static,
{
    #[inline]
    fn compute(&self, request: &MathRequest) -> Result<MathResponse, DomainError> {
        (self.0)(request)
    }
}
