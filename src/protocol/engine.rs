//! Request/response correlation.
//!
//! A [`CorrelationEngine`] owns an id counter, a pending table and an [`Outbound`]
//! transport. Each call registers its request before transmitting it, so a response is
//! never processed before the request it answers has been registered. The transport
//! has a lock of its own: a send blocked on a full socket never stalls the inbound side.
//!
//! Every outcome reaches the [`Handler`]:
//!
//! - success: the method-specific `on_*` call, with the original request;
//! - error: [`Handler::on_error`] only, even when the response also carries a partial
//!   `result`;
//! - id `"0"`/`null` or an undecodable body: [`Handler::on_unattributable`];
//! - unknown id: dropped with a warning, no handler call.
use std::sync::Mutex;

use log::{debug, info, warn};
use serde_json::Value;

use crate::lock;

use super::{
    Call, Edge, ExecuteParams, ExecuteResult, ExecutionTree, Inbound, JumpResult, Outbound,
    Outcome, PathParams, ProtocolDecodeError, Reference, ReferenceParams, Reply, Request,
    RequestId, Response, RevertResult, TraceParams, TransportError, pending::PendingRequests,
};

/// Callbacks for every outcome an engine can dispatch.
///
/// Handlers run without the engine lock held and may issue further requests.
pub trait Handler: Send + Sync {
    fn on_execute(&self, request: &Request, params: &ExecuteParams, result: ExecuteResult);
    fn on_jump(&self, request: &Request, params: &ReferenceParams, result: JumpResult);
    fn on_revert(&self, request: &Request, params: &ReferenceParams, result: RevertResult);
    fn on_deref(&self, request: &Request, params: &ReferenceParams, value: Value);
    fn on_execution_tree(&self, request: &Request, tree: ExecutionTree);
    fn on_trace(&self, request: &Request, params: &TraceParams, trace: Vec<Edge>);
    fn on_path(&self, request: &Request, params: &PathParams, path: Vec<Edge>);
    fn on_current_reference(&self, request: &Request, reference: Reference);
    fn on_all_references(&self, request: &Request, references: Vec<Reference>);
    fn on_leaves(&self, request: &Request, leaves: Vec<Reference>);

    /// The interpreter answered `request` with an error.
    fn on_error(&self, request: &Request, response: &Response);

    /// An error that cannot be tied to a pending request.
    fn on_unattributable(&self, failure: Unattributable);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Unattributable {
    /// Response with id `"0"` or `null`.
    Remote(Response),
    /// Body that is not a valid response for its request.
    Decode(ProtocolDecodeError),
}

/// How [`CorrelationEngine::handle_body`] classified a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Success(RequestId),
    Error(RequestId),
    Unattributable,
    Orphan(RequestId),
}

struct EngineState {
    next_id: u64,
    pending: PendingRequests,
}

pub struct CorrelationEngine<O: Outbound, H: Handler> {
    state: Mutex<EngineState>,
    outbound: Mutex<O>,
    handler: H,
}

impl<O: Outbound, H: Handler> CorrelationEngine<O, H> {
    pub fn new(outbound: O, handler: H) -> Self {
        Self {
            state: Mutex::new(EngineState {
                next_id: 1,
                pending: PendingRequests::new(),
            }),
            outbound: Mutex::new(outbound),
            handler,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Issues `call` under a fresh id.
    ///
    /// On a transmit failure the request is unregistered again and the error returned;
    /// no handler fires for it.
    pub fn call(&self, call: Call) -> Result<RequestId, TransportError> {
        let (id, body, method) = {
            let mut state = lock(&self.state);

            let id = RequestId::from(state.next_id);
            state.next_id += 1;

            let request = Request::new(id.clone(), call);
            let body = request.encode()?;
            let method = request.method();

            let registered = state.pending.register(request);
            debug_assert!(registered, "request id {id} reused while pending");
            (id, body, method)
        };

        let sent = lock(&self.outbound).transmit(&body);
        if let Err(e) = sent {
            lock(&self.state).pending.complete(&id);
            return Err(e);
        }

        debug!("sent {method} request {id}");
        Ok(id)
    }

    pub fn execute(&self, program: impl Into<String>) -> Result<RequestId, TransportError> {
        self.call(Call::Execute(ExecuteParams {
            program: program.into(),
        }))
    }

    pub fn jump(&self, reference: Reference) -> Result<RequestId, TransportError> {
        self.call(Call::Jump(ReferenceParams { reference }))
    }

    pub fn revert(&self, reference: Reference) -> Result<RequestId, TransportError> {
        self.call(Call::Revert(ReferenceParams { reference }))
    }

    pub fn deref(&self, reference: Reference) -> Result<RequestId, TransportError> {
        self.call(Call::Deref(ReferenceParams { reference }))
    }

    pub fn get_execution_tree(&self) -> Result<RequestId, TransportError> {
        self.call(Call::GetExecutionTree)
    }

    pub fn get_trace(&self, reference: Option<Reference>) -> Result<RequestId, TransportError> {
        self.call(Call::GetTrace(TraceParams { reference }))
    }

    pub fn get_path(
        &self,
        source: Reference,
        target: Reference,
    ) -> Result<RequestId, TransportError> {
        self.call(Call::GetPath(PathParams { source, target }))
    }

    pub fn get_current_reference(&self) -> Result<RequestId, TransportError> {
        self.call(Call::GetCurrentReference)
    }

    pub fn get_all_references(&self) -> Result<RequestId, TransportError> {
        self.call(Call::GetAllReferences)
    }

    pub fn get_leaves(&self) -> Result<RequestId, TransportError> {
        self.call(Call::GetLeaves)
    }

    /// Classifies one inbound body and dispatches it to the handler.
    pub fn handle_body(&self, body: &str) -> Dispatch {
        let response = match Response::parse(body) {
            Ok(response) => response,
            Err(e) => {
                warn!("{e}");
                self.handler.on_unattributable(Unattributable::Decode(e));
                return Dispatch::Unattributable;
            }
        };

        let id = match response.id.clone() {
            Some(id) if !id.is_unattributable() => id,
            _ => {
                self.handler
                    .on_unattributable(Unattributable::Remote(response));
                return Dispatch::Unattributable;
            }
        };

        let Some(request) = lock(&self.state).pending.complete(&id) else {
            warn!("dropping response {id}: no pending request");
            return Dispatch::Orphan(id);
        };

        match response.outcome {
            Outcome::Failure { .. } => {
                if let Some(error) = response.error() {
                    if !request.method().allows(error.code) {
                        warn!(
                            "error code {} is not defined for {}",
                            error.code.code(),
                            request.method()
                        );
                    }
                }
                self.handler.on_error(&request, &response);
                Dispatch::Error(id)
            }
            Outcome::Success(result) => match Reply::decode(request.method(), result) {
                Ok(reply) => {
                    self.dispatch(&request, reply);
                    Dispatch::Success(id)
                }
                Err(e) => {
                    let e = ProtocolDecodeError::new(
                        Some(id),
                        format!("invalid {} result: {e}", request.method()),
                    );
                    warn!("{e}");
                    self.handler.on_unattributable(Unattributable::Decode(e));
                    Dispatch::Unattributable
                }
            },
        }
    }

    fn dispatch(&self, request: &Request, reply: Reply) {
        let h = &self.handler;

        match (&request.call, reply) {
            (Call::Execute(params), Reply::Execute(result)) => {
                h.on_execute(request, params, result)
            }
            (Call::Jump(params), Reply::Jump(result)) => h.on_jump(request, params, result),
            (Call::Revert(params), Reply::Revert(result)) => h.on_revert(request, params, result),
            (Call::Deref(params), Reply::Deref(value)) => h.on_deref(request, params, value),
            (Call::GetExecutionTree, Reply::ExecutionTree(tree)) => {
                h.on_execution_tree(request, tree)
            }
            (Call::GetTrace(params), Reply::Trace(trace)) => h.on_trace(request, params, trace),
            (Call::GetPath(params), Reply::Path(path)) => h.on_path(request, params, path),
            (Call::GetCurrentReference, Reply::CurrentReference(reference)) => {
                h.on_current_reference(request, reference)
            }
            (Call::GetAllReferences, Reply::AllReferences(references)) => {
                h.on_all_references(request, references)
            }
            (Call::GetLeaves, Reply::Leaves(leaves)) => h.on_leaves(request, leaves),
            (call, reply) => unreachable!("reply {reply:?} decoded for {}", call.method()),
        }
    }

    /// Drops every pending request. No handler fires for them.
    pub fn abandon(&self) -> Vec<Request> {
        let orphaned = lock(&self.state).pending.drain();
        if !orphaned.is_empty() {
            info!("abandoned {} pending requests", orphaned.len());
        }
        orphaned
    }

    /// Feeds bodies from `inbound` into [`Self::handle_body`] until the connection
    /// closes, then abandons whatever is still pending.
    pub fn serve<I: Inbound>(&self, inbound: &mut I) -> Result<(), TransportError> {
        let res = loop {
            match inbound.next_body() {
                Ok(Some(body)) => {
                    self.handle_body(&body);
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.abandon();
        res
    }
}
