//! Connection handling.
//!
//! Each accepted connection gets a reader that routes client frames by call
//! id, a writer that owns the sink, and one task per in-flight call driving
//! its [`CallbackInstance`]. The server stops accepting connections when a
//! shutdown is requested, either through [`ServerHandle::shutdown`] or by a
//! client calling `Quit`.

use crate::error::ServerError;
use crate::rpc::callback::{Action, CallEvent, CallRegistry, CallbackInstance};
use crate::rpc::protocol::{
    CallId, CallRequest, ClientBody, ClientFrame, ServerBody, ServerFrame, ServerTransport,
};
use crate::rpc::services::{AppService, FieldService, ObjectService, ServerApp, ServiceContext};
use crate::types::{ServerConfig, Status};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_serde::formats::Bincode;
use tracing::{debug, error, info, trace, warn};

/// Frames queued per connection before call tasks wait for the writer.
const OUTBOUND_QUEUE: usize = 64;

type Routes = Arc<Mutex<HashMap<CallId, mpsc::UnboundedSender<CallEvent>>>>;

/// Server for one application's object tree.
///
/// # Example
///
/// ```rust,ignore
/// use tether_rpc::prelude::*;
///
/// let server = Server::new(ServerConfig::default(), demo::app());
/// let handle = server.start().await?;
/// println!("listening on {}", handle.local_addr());
/// handle.wait().await?;
/// ```
pub struct Server {
    context: Arc<ServiceContext>,
    registry: Arc<CallRegistry>,
}

impl Server {
    /// Create a server and bind every service into its call registry.
    ///
    /// # Arguments
    ///
    /// * `config` - Listen address, transfer and session settings
    /// * `app` - Documents, methods and object factory to serve
    pub fn new(config: ServerConfig, app: ServerApp) -> Self {
        let context = ServiceContext::new(config, app);
        let registry = Arc::new(CallRegistry::new());
        registry.register_all(Arc::new(AppService::new(context.clone())).create_callbacks());
        registry.register_all(Arc::new(ObjectService::new(context.clone())).create_callbacks());
        registry.register_all(Arc::new(FieldService::new(context.clone())).create_callbacks());
        Self { context, registry }
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.context
    }

    /// Bind the listener and serve connections in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured address is invalid or cannot be
    /// bound.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let addr = self
            .context
            .config
            .bind_addr()
            .map_err(|e| ServerError::InvalidAddress(e.to_string()))?;
        let listener = tarpc::serde_transport::tcp::listen(&addr, Bincode::default)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr();
        info!("Object server listening on {}", local_addr);

        let context = self.context.clone();
        let registry = self.registry.clone();
        let limit = context.config.max_concurrent_connections.max(1);
        let shutdown = context.shutdown_requested();

        let task = tokio::spawn(async move {
            let connections = listener
                .filter_map(|r| futures::future::ready(r.ok()))
                .for_each_concurrent(limit, |transport: ServerTransport| {
                    let connection = Connection::new(context.clone(), registry.clone());
                    async move {
                        // Detached so a shutdown lets open connections flush.
                        if let Err(e) = tokio::spawn(connection.run(transport)).await {
                            error!("Connection task failed: {}", e);
                        }
                    }
                });
            tokio::select! {
                _ = connections => {}
                _ = stopped(shutdown) => {
                    info!("Object server on {} shutting down", local_addr);
                }
            }
        });

        Ok(ServerHandle {
            local_addr,
            context: self.context,
            task,
        })
    }

    /// Serve until a shutdown is requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot start.
    pub async fn serve(self) -> Result<(), ServerError> {
        self.start().await?.wait().await
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    context: Arc<ServiceContext>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.context
    }

    /// Stop accepting connections.
    pub fn shutdown(&self) {
        self.context.request_shutdown();
    }

    /// Wait until the server stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the accept loop panicked.
    pub async fn wait(self) -> Result<(), ServerError> {
        self.task
            .await
            .map_err(|e| ServerError::Task(e.to_string()))
    }
}

/// One client connection.
struct Connection {
    context: Arc<ServiceContext>,
    registry: Arc<CallRegistry>,
    routes: Routes,
}

impl Connection {
    fn new(context: Arc<ServiceContext>, registry: Arc<CallRegistry>) -> Self {
        Self {
            context,
            registry,
            routes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn run(self, transport: ServerTransport) {
        let peer = transport
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown peer".to_string());
        info!("Accepted connection from {}", peer);

        let (mut sink, mut stream) = transport.split();
        let (frames, mut outbound) = mpsc::channel::<ServerFrame>(OUTBOUND_QUEUE);
        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if let Err(e) = sink.send(frame).await {
                    debug!("Write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        loop {
            let frame = tokio::select! {
                frame = stream.next() => frame,
                _ = stopped(self.context.shutdown_requested()) => {
                    debug!("Closing connection from {} for shutdown", peer);
                    break;
                }
            };
            let frame: ClientFrame = match frame {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    warn!("Dropping connection from {}: {}", peer, e);
                    break;
                }
                None => break,
            };
            let call_id = frame.call_id;
            match frame.body {
                ClientBody::Start(request) => self.start_call(call_id, request, &frames).await,
                ClientBody::Chunk(values) => self.route(call_id, CallEvent::Chunk(values)),
                ClientBody::WritesDone => self.route(call_id, CallEvent::WritesDone),
                ClientBody::Cancel => {
                    let sender = self.routes().remove(&call_id);
                    if let Some(sender) = sender {
                        debug!("Call {} cancelled", call_id);
                        let _ = sender.send(CallEvent::Disconnected);
                    }
                }
            }
        }

        // Calls still in flight observe the dropped senders as a disconnect.
        self.routes().clear();
        drop(frames);
        if writer.await.is_err() {
            error!("Writer for {} panicked", peer);
        }
        info!("Connection from {} closed", peer);
    }

    async fn start_call(
        &self,
        call_id: CallId,
        request: CallRequest,
        frames: &mpsc::Sender<ServerFrame>,
    ) {
        let method = request.method();
        let rejection = if self.routes().contains_key(&call_id) {
            Some(Status::invalid_argument(format!(
                "Call id {} is already in use",
                call_id
            )))
        } else {
            None
        };
        let instance = match (rejection, self.registry.accept(method)) {
            (None, Some(instance)) => instance,
            (Some(status), _) => return reject(frames, call_id, status).await,
            (None, None) => {
                let status = Status::unimplemented(format!("{:?} is not served", method));
                return reject(frames, call_id, status).await;
            }
        };

        let (events, receiver) = mpsc::unbounded_channel();
        self.routes().insert(call_id, events);
        trace!("Call {} started for {:?}", call_id, method);
        tokio::spawn(drive_call(
            call_id,
            instance,
            request,
            receiver,
            frames.clone(),
            self.routes.clone(),
        ));
    }

    fn route(&self, call_id: CallId, event: CallEvent) {
        match self.routes().get(&call_id) {
            Some(sender) => {
                let _ = sender.send(event);
            }
            None => trace!("Dropping frame for finished call {}", call_id),
        }
    }

    fn routes(&self) -> std::sync::MutexGuard<'_, HashMap<CallId, mpsc::UnboundedSender<CallEvent>>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves once a shutdown has been requested.
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn reject(frames: &mpsc::Sender<ServerFrame>, call_id: CallId, status: Status) {
    debug!("Rejecting call {}: {}", call_id, status);
    let _ = frames
        .send(ServerFrame {
            call_id,
            body: ServerBody::Error(status),
        })
        .await;
}

/// Feed transport events into one call until it finishes.
async fn drive_call(
    call_id: CallId,
    mut instance: CallbackInstance,
    request: CallRequest,
    mut events: mpsc::UnboundedReceiver<CallEvent>,
    frames: mpsc::Sender<ServerFrame>,
    routes: Routes,
) {
    let mut action = instance.on_event(CallEvent::Accepted(request));
    loop {
        action = match action {
            Action::Write(body) => {
                if frames.send(ServerFrame { call_id, body }).await.is_err() {
                    instance.on_event(CallEvent::Disconnected);
                    break;
                }
                match events.try_recv() {
                    Ok(event) => instance.on_event(event),
                    Err(TryRecvError::Disconnected) => instance.on_event(CallEvent::Disconnected),
                    Err(TryRecvError::Empty) => instance.on_event(CallEvent::WriteCompleted),
                }
            }
            Action::Read => match events.recv().await {
                Some(event) => instance.on_event(event),
                None => instance.on_event(CallEvent::Disconnected),
            },
            Action::Finish(body) => {
                if let Some(body) = body {
                    let _ = frames.send(ServerFrame { call_id, body }).await;
                }
                break;
            }
            Action::Done => break,
        };
    }
    routes
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&call_id);
    trace!("Call {} finished", call_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::protocol::{RpcMethod, UnaryReply};
    use crate::transfer::ArrayValues;

    fn routes() -> Routes {
        Arc::new(Mutex::new(HashMap::new()))
    }

    #[tokio::test]
    async fn test_drive_unary_call() {
        let instance = CallbackInstance::unary(RpcMethod::Ping, |_| Ok(UnaryReply::Empty));
        let (_events, receiver) = mpsc::unbounded_channel();
        let (frames, mut outbound) = mpsc::channel(4);
        let routes = routes();

        drive_call(7, instance, CallRequest::Ping, receiver, frames, routes).await;

        let frame = outbound.recv().await.unwrap();
        assert_eq!(frame.call_id, 7);
        assert_eq!(frame.body, ServerBody::Reply(UnaryReply::Empty));
        assert!(outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_drive_call_handles_disconnect() {
        struct Sink;
        impl crate::rpc::callback::ClientStreamingHandler for Sink {
            fn receive(&mut self, _: ArrayValues) -> crate::types::RpcResult<()> {
                Ok(())
            }
            fn finish(&mut self) -> crate::types::RpcResult<ServerBody> {
                Ok(ServerBody::Reply(UnaryReply::Empty))
            }
        }
        let instance = CallbackInstance::client_streaming(RpcMethod::SetArrayValue, |_| {
            let handler: Box<dyn crate::rpc::callback::ClientStreamingHandler> = Box::new(Sink);
            Ok(handler)
        });
        let (events, receiver) = mpsc::unbounded_channel();
        let (frames, mut outbound) = mpsc::channel(4);
        let routes = routes();
        routes.lock().unwrap().insert(3, events.clone());

        events.send(CallEvent::Chunk(ArrayValues::Int32(vec![1]))).unwrap();
        drop(events);
        routes.lock().unwrap().clear();

        drive_call(3, instance, CallRequest::Ping, receiver, frames, routes.clone()).await;

        assert!(outbound.recv().await.is_none());
        assert!(routes.lock().unwrap().is_empty());
    }
}
