//! Uniform carrier for asynchronous request/response operations
//!
//! An [`AsyncContext`] owns the request, a slot for the eventual response,
//! and a single-fire completion callback. Operations accept the context,
//! return synchronously once the work has been accepted, and later call
//! [`AsyncContext::finish`] from whichever worker completed the work.
//!
//! Child contexts created with [`AsyncContext::with_parent`] inherit the
//! parent's activity and correlation identifiers so a whole callback chain
//! can be traced as one logical operation.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::{Error, Result};

/// Completion callback invoked exactly once when the context finishes.
pub type Callback<Req, Resp> = Box<dyn FnOnce(Arc<AsyncContext<Req, Resp>>) + Send + 'static>;

/// A single asynchronous operation: owned request, response slot, outcome
/// slot, and a completion callback.
///
/// The context is shared across threads behind an [`Arc`]; the callback is
/// owned by the context and consumed on the first [`finish`](Self::finish).
/// After `finish` returns, the outcome and response are immutable.
pub struct AsyncContext<Req, Resp> {
    /// The request this operation runs on behalf of.
    pub request: Arc<Req>,
    /// Identifier of this operation.
    pub activity_id: Uuid,
    /// Identifier shared by every context in one logical operation chain.
    pub correlation_id: Uuid,
    state: Mutex<State<Req, Resp>>,
}

struct State<Req, Resp> {
    response: Option<Arc<Resp>>,
    outcome: Option<Result<()>>,
    callback: Option<Callback<Req, Resp>>,
    finished: bool,
}

impl<Req, Resp> AsyncContext<Req, Resp> {
    /// Create a root context with fresh activity and correlation identifiers.
    pub fn new(request: Req, callback: Callback<Req, Resp>) -> Arc<Self> {
        Arc::new(Self {
            request: Arc::new(request),
            activity_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            state: Mutex::new(State {
                response: None,
                outcome: None,
                callback: Some(callback),
                finished: false,
            }),
        })
    }

    /// Create a child context that shares the parent's request ownership and
    /// inherits its correlation identifier.
    pub fn with_parent<PReq, PResp>(
        request: Arc<Req>,
        callback: Callback<Req, Resp>,
        parent: &AsyncContext<PReq, PResp>,
    ) -> Arc<Self> {
        Arc::new(Self {
            request,
            activity_id: Uuid::new_v4(),
            correlation_id: parent.correlation_id,
            state: Mutex::new(State {
                response: None,
                outcome: None,
                callback: Some(callback),
                finished: false,
            }),
        })
    }

    /// Store the response. Ignored with a warning if the context already
    /// finished.
    pub fn set_response(&self, response: Resp) {
        let mut state = self.state.lock();
        if state.finished {
            warn!(activity_id = %self.activity_id, "response set after finish; ignored");
            return;
        }
        state.response = Some(Arc::new(response));
    }

    /// The response, if one has been set.
    pub fn response(&self) -> Option<Arc<Resp>> {
        self.state.lock().response.clone()
    }

    /// The outcome, if the context has finished.
    ///
    /// `Some(Ok(()))` is success; `Some(Err(e))` is failure or, when
    /// [`Error::is_retryable`] holds, a retry signal.
    pub fn outcome(&self) -> Option<Result<()>> {
        self.state.lock().outcome.clone()
    }

    /// Record the outcome and dispatch the completion callback.
    ///
    /// The callback fires at most once; a second `finish` is a no-op apart
    /// from a warning. The callback observes exactly one of success (with
    /// the response set), failure, or retry.
    pub fn finish(self: &Arc<Self>, outcome: Result<()>) {
        let callback = {
            let mut state = self.state.lock();
            if state.finished {
                warn!(activity_id = %self.activity_id, "context finished twice; ignored");
                return;
            }
            state.finished = true;
            state.outcome = Some(outcome);
            state.callback.take()
        };
        if let Some(callback) = callback {
            callback(Arc::clone(self));
        }
    }

    /// Convenience for finishing with a failure.
    pub fn finish_err(self: &Arc<Self>, error: Error) {
        self.finish(Err(error));
    }
}
