//! Generic call state machine.
//!
//! Every call, whatever its shape, is driven through
//! `Create -> InitRequestStarted -> InitRequestCompleted -> ProcessRequest
//! -> FinishRequest` by feeding it [`CallEvent`]s and performing the
//! [`Action`] it answers with. One instance serves exactly one call; the
//! [`CallRegistry`] keeps a pending instance per method and replaces it with
//! a fresh clone the moment a call is accepted, so the next call of the same
//! method can start right away.

use crate::rpc::protocol::{CallRequest, RpcMethod, ServerBody, UnaryReply};
use crate::transfer::ArrayValues;
use crate::types::{RpcResult, Status};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

/// Lifecycle state of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Create,
    InitRequestStarted,
    InitRequestCompleted,
    ProcessRequest,
    FinishRequest,
}

/// Transport event delivered to a call.
#[derive(Debug)]
pub enum CallEvent {
    /// The call was accepted with its opening request.
    Accepted(CallRequest),
    /// A chunk arrived (client-streaming calls).
    Chunk(ArrayValues),
    /// The client finished sending (client-streaming calls).
    WritesDone,
    /// The previously requested write was performed.
    WriteCompleted,
    /// The client went away or cancelled the call.
    Disconnected,
}

/// What the transport must do next for a call.
#[derive(Debug, PartialEq)]
pub enum Action {
    /// Send one frame, then report `WriteCompleted`.
    Write(ServerBody),
    /// Wait for the next client event.
    Read,
    /// Send the final frame (if any); the call is over.
    Finish(Option<ServerBody>),
    /// Nothing left to do.
    Done,
}

/// Per-call state of a server-streaming call.
pub trait ServerStreamingHandler: Send {
    /// Next frame to send, or `None` once the stream is exhausted.
    fn process(&mut self) -> RpcResult<Option<ServerBody>>;

    /// Final frame after the stream is exhausted.
    fn finish(&mut self) -> ServerBody;
}

/// Per-call state of a client-streaming call.
pub trait ClientStreamingHandler: Send {
    fn receive(&mut self, chunk: ArrayValues) -> RpcResult<()>;

    /// Complete the call after the client finished sending.
    fn finish(&mut self) -> RpcResult<ServerBody>;

    /// Clean up after a disconnect; nothing is applied.
    fn abort(&mut self) {}
}

pub type UnaryFn = Arc<dyn Fn(CallRequest) -> RpcResult<UnaryReply> + Send + Sync>;
pub type ServerStreamingFactory =
    Arc<dyn Fn(CallRequest) -> RpcResult<Box<dyn ServerStreamingHandler>> + Send + Sync>;
pub type ClientStreamingFactory =
    Arc<dyn Fn(CallRequest) -> RpcResult<Box<dyn ClientStreamingHandler>> + Send + Sync>;

/// The handler bound to a method, by call shape.
#[derive(Clone)]
pub enum CallKind {
    Unary(UnaryFn),
    ServerStreaming(ServerStreamingFactory),
    ClientStreaming(ClientStreamingFactory),
}

enum Active {
    Idle,
    Download(Box<dyn ServerStreamingHandler>),
    Upload(Box<dyn ClientStreamingHandler>),
}

/// State machine context of one in-flight call.
pub struct CallbackInstance {
    method: RpcMethod,
    kind: CallKind,
    state: CallState,
    /// States entered so far, in order.
    path: Vec<CallState>,
    active: Active,
}

impl fmt::Debug for CallbackInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackInstance")
            .field("method", &self.method)
            .field("state", &self.state)
            .finish()
    }
}

impl CallbackInstance {
    pub fn new(method: RpcMethod, kind: CallKind) -> Self {
        Self {
            method,
            kind,
            state: CallState::Create,
            path: vec![CallState::Create],
            active: Active::Idle,
        }
    }

    pub fn unary<F>(method: RpcMethod, handler: F) -> Self
    where
        F: Fn(CallRequest) -> RpcResult<UnaryReply> + Send + Sync + 'static,
    {
        Self::new(method, CallKind::Unary(Arc::new(handler)))
    }

    pub fn server_streaming<F>(method: RpcMethod, factory: F) -> Self
    where
        F: Fn(CallRequest) -> RpcResult<Box<dyn ServerStreamingHandler>> + Send + Sync + 'static,
    {
        Self::new(method, CallKind::ServerStreaming(Arc::new(factory)))
    }

    pub fn client_streaming<F>(method: RpcMethod, factory: F) -> Self
    where
        F: Fn(CallRequest) -> RpcResult<Box<dyn ClientStreamingHandler>> + Send + Sync + 'static,
    {
        Self::new(method, CallKind::ClientStreaming(Arc::new(factory)))
    }

    /// Fresh instance bound to the same method and handler.
    pub fn empty_clone(&self) -> Self {
        Self::new(self.method, self.kind.clone())
    }

    pub fn method(&self) -> RpcMethod {
        self.method
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Every state this call has passed through.
    pub fn path(&self) -> &[CallState] {
        &self.path
    }

    fn enter(&mut self, state: CallState) {
        trace!("{:?} call {:?} -> {:?}", self.method, self.state, state);
        self.state = state;
        self.path.push(state);
    }

    /// Advance the call by one event.
    pub fn on_event(&mut self, event: CallEvent) -> Action {
        trace!("{:?} in {:?} got {:?}", self.method, self.state, event);
        match (self.state, event) {
            (CallState::FinishRequest, _) => Action::Done,
            (_, CallEvent::Disconnected) => {
                debug!("{:?} call disconnected in {:?}", self.method, self.state);
                if let Active::Upload(upload) = &mut self.active {
                    upload.abort();
                }
                self.active = Active::Idle;
                self.enter(CallState::FinishRequest);
                Action::Done
            }
            (CallState::Create, CallEvent::Accepted(request)) => self.accept(request),
            (CallState::ProcessRequest, CallEvent::WriteCompleted) => self.process_download(),
            (CallState::ProcessRequest, CallEvent::Chunk(chunk)) => self.receive_chunk(chunk),
            (CallState::ProcessRequest, CallEvent::WritesDone) => self.finish_upload(),
            (state, event) => self.fail(Status::invalid_argument(format!(
                "Unexpected {:?} for {:?} call in state {:?}",
                event, self.method, state
            ))),
        }
    }

    fn accept(&mut self, request: CallRequest) -> Action {
        self.enter(CallState::InitRequestStarted);
        match self.kind.clone() {
            CallKind::Unary(handler) => {
                self.enter(CallState::InitRequestCompleted);
                self.enter(CallState::ProcessRequest);
                let body = match handler(request) {
                    Ok(reply) => ServerBody::Reply(reply),
                    Err(status) => ServerBody::Error(status),
                };
                self.enter(CallState::FinishRequest);
                Action::Finish(Some(body))
            }
            CallKind::ServerStreaming(factory) => {
                self.enter(CallState::InitRequestCompleted);
                match factory(request) {
                    Ok(handler) => {
                        self.active = Active::Download(handler);
                        self.enter(CallState::ProcessRequest);
                        self.process_download()
                    }
                    Err(status) => self.fail(status),
                }
            }
            CallKind::ClientStreaming(factory) => match factory(request) {
                Ok(handler) => {
                    self.active = Active::Upload(handler);
                    self.enter(CallState::InitRequestCompleted);
                    self.enter(CallState::ProcessRequest);
                    Action::Read
                }
                Err(status) => self.fail(status),
            },
        }
    }

    fn process_download(&mut self) -> Action {
        let Active::Download(handler) = &mut self.active else {
            return self.fail(Status::internal("No download in progress"));
        };
        match handler.process() {
            Ok(Some(body)) => Action::Write(body),
            Ok(None) => {
                let last = handler.finish();
                self.active = Active::Idle;
                self.enter(CallState::FinishRequest);
                Action::Finish(Some(last))
            }
            Err(status) => self.fail(status),
        }
    }

    fn receive_chunk(&mut self, chunk: ArrayValues) -> Action {
        let Active::Upload(handler) = &mut self.active else {
            return self.fail(Status::invalid_argument(format!(
                "{:?} does not accept chunks",
                self.method
            )));
        };
        match handler.receive(chunk) {
            Ok(()) => Action::Read,
            Err(status) => self.fail(status),
        }
    }

    fn finish_upload(&mut self) -> Action {
        let Active::Upload(handler) = &mut self.active else {
            return self.fail(Status::invalid_argument(format!(
                "{:?} does not accept client streams",
                self.method
            )));
        };
        let body = match handler.finish() {
            Ok(body) => body,
            Err(status) => ServerBody::Error(status),
        };
        self.active = Active::Idle;
        self.enter(CallState::FinishRequest);
        Action::Finish(Some(body))
    }

    fn fail(&mut self, status: Status) -> Action {
        debug!("{:?} call failed: {}", self.method, status);
        if let Active::Upload(upload) = &mut self.active {
            upload.abort();
        }
        self.active = Active::Idle;
        self.enter(CallState::FinishRequest);
        Action::Finish(Some(ServerBody::Error(status)))
    }
}

/// Pending callback instances, one per method.
#[derive(Debug, Default)]
pub struct CallRegistry {
    pending: Mutex<HashMap<RpcMethod, CallbackInstance>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the pending instance for its method.
    pub fn register(&self, instance: CallbackInstance) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(instance.method(), instance);
    }

    pub fn register_all(&self, instances: impl IntoIterator<Item = CallbackInstance>) {
        for instance in instances {
            self.register(instance);
        }
    }

    /// Take the pending instance for `method`, re-registering a fresh clone
    /// in its place. `None` if nothing serves the method.
    pub fn accept(&self, method: RpcMethod) -> Option<CallbackInstance> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let instance = pending.remove(&method)?;
        pending.insert(method, instance.empty_clone());
        Some(instance)
    }

    pub fn is_registered(&self, method: RpcMethod) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&method)
    }
}
