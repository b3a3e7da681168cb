//! Client end of a connection.
//!
//! A [`Client`] multiplexes any number of concurrent calls over one TCP
//! connection and keeps the session it created, so calls after
//! [`Client::create_session`] are authenticated automatically.

use crate::dispatch::MethodResult;
use crate::error::ClientError;
use crate::rpc::messages::*;
use crate::rpc::protocol::{
    CallId, CallRequest, ClientBody, ClientFrame, ClientTransport, ServerBody, ServerFrame,
    UnaryReply,
};
use crate::transfer::{chunk_size, ArrayElement, ArrayValues};
use crate::types::{SessionType, DEFAULT_PACKAGE_BYTE_SIZE};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tether_core::method::MethodDescriptor;
use tether_core::snapshot::{ObjectReference, ObjectSnapshot};
use tether_core::value::ElementType;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serde::formats::Bincode;
use tracing::{debug, error, info, warn};

/// Default connection timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Default number of retry attempts for failed connections.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay between retry attempts in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Configuration for client connections.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Number of retry attempts.
    pub retry_attempts: u32,
    /// Delay between retries.
    pub retry_delay: Duration,
    /// Maximum calls in flight; further calls fail with `Unavailable`.
    pub max_pending_requests: usize,
    /// Chunk budget in bytes for uploads.
    pub package_byte_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_pending_requests: 100,
            package_byte_size: DEFAULT_PACKAGE_BYTE_SIZE,
        }
    }
}

type Pending = Arc<Mutex<HashMap<CallId, mpsc::UnboundedSender<ServerBody>>>>;

/// Connection to an object server.
pub struct Client {
    addr: SocketAddr,
    config: ClientConfig,
    frames: mpsc::UnboundedSender<ClientFrame>,
    pending: Pending,
    next_call: AtomicU64,
    session: Mutex<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Receiving side of one call.
struct Call {
    id: CallId,
    replies: mpsc::UnboundedReceiver<ServerBody>,
}

impl Client {
    /// Connect with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use tether_rpc::prelude::*;
    ///
    /// let client = Client::connect("127.0.0.1:50000".parse().unwrap()).await?;
    /// client.create_session(SessionType::Regular).await?;
    /// let root = client.document("").await?;
    /// ```
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        Self::connect_with_config(addr, ClientConfig::default()).await
    }

    /// Connect with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established within the
    /// configured timeout.
    pub async fn connect_with_config(
        addr: SocketAddr,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        debug!("Connecting to object server at {}", addr);
        let transport: ClientTransport = tokio::time::timeout(
            config.connect_timeout,
            tarpc::serde_transport::tcp::connect(addr, Bincode::default),
        )
        .await
        .map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::TimedOut, "connection timeout")
        })
        .and_then(|connected| connected)
        .map_err(|e| ClientError::Connection(e.to_string()))?;

        let (mut sink, mut stream) = transport.split();
        let (frames, mut outbound) = mpsc::unbounded_channel::<ClientFrame>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if let Err(e) = sink.send(frame).await {
                    debug!("Write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let routes = pending.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let frame: ServerFrame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Connection to {} failed: {}", addr, e);
                        break;
                    }
                };
                let mut calls = routes.lock().unwrap_or_else(PoisonError::into_inner);
                let last = frame.body.is_final();
                if let Some(sender) = calls.get(&frame.call_id) {
                    let _ = sender.send(frame.body);
                }
                if last {
                    calls.remove(&frame.call_id);
                }
            }
            // Waiting calls observe the dropped senders as a disconnect.
            routes.lock().unwrap_or_else(PoisonError::into_inner).clear();
        });

        info!("Connected to object server at {}", addr);
        Ok(Self {
            addr,
            config,
            frames,
            pending,
            next_call: AtomicU64::new(1),
            session: Mutex::new(String::new()),
            reader,
            writer,
        })
    }

    /// Connect, retrying on failure.
    ///
    /// # Errors
    ///
    /// Returns the last connection error once every attempt failed.
    pub async fn connect_with_retry(
        addr: SocketAddr,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let mut last_error = None;
        let attempts = config.retry_attempts.max(1);

        for attempt in 0..attempts {
            if attempt > 0 {
                warn!("Retry attempt {} connecting to object server at {}", attempt, addr);
                tokio::time::sleep(config.retry_delay).await;
            }

            match Self::connect_with_config(addr, config.clone()).await {
                Ok(client) => {
                    if attempt > 0 {
                        info!(
                            "Successfully connected to object server at {} after {} attempts",
                            addr,
                            attempt + 1
                        );
                    }
                    return Ok(client);
                }
                Err(e) => last_error = Some(e),
            }
        }

        error!(
            "Failed to connect to object server at {} after {} attempts",
            addr, attempts
        );
        Err(last_error.unwrap_or(ClientError::Disconnected))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Uuid of the session used for authenticated calls; empty if none.
    pub fn session(&self) -> String {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Use an existing session for subsequent calls.
    pub fn set_session(&self, uuid: impl Into<String>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = uuid.into();
    }

    pub async fn app_info(&self) -> Result<AppInfo, ClientError> {
        match self.unary(CallRequest::GetAppInfo).await? {
            UnaryReply::AppInfo(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        self.unary_empty(CallRequest::Ping).await
    }

    /// Ask the server to shut down.
    pub async fn quit(&self) -> Result<(), ClientError> {
        self.unary_empty(CallRequest::Quit).await
    }

    pub async fn ready_for_session(&self, session_type: SessionType) -> Result<bool, ClientError> {
        match self
            .unary(CallRequest::ReadyForSession(SessionRequest { session_type }))
            .await?
        {
            UnaryReply::Ready(ready) => Ok(ready),
            other => Err(unexpected(other)),
        }
    }

    /// Create a session and use it for subsequent calls.
    pub async fn create_session(
        &self,
        session_type: SessionType,
    ) -> Result<SessionMessage, ClientError> {
        let session = self
            .session_call(CallRequest::CreateSession(SessionRequest { session_type }))
            .await?;
        self.set_session(session.uuid.clone());
        Ok(session)
    }

    pub async fn check_session(&self) -> Result<SessionMessage, ClientError> {
        let message = self.session_message(SessionType::Invalid);
        self.session_call(CallRequest::CheckSession(message)).await
    }

    pub async fn keep_alive(&self) -> Result<SessionMessage, ClientError> {
        let message = self.session_message(SessionType::Invalid);
        self.session_call(CallRequest::KeepSessionAlive(message)).await
    }

    pub async fn change_session(
        &self,
        session_type: SessionType,
    ) -> Result<SessionMessage, ClientError> {
        let message = self.session_message(session_type);
        self.session_call(CallRequest::ChangeSession(message)).await
    }

    /// Destroy the current session and forget it.
    pub async fn destroy_session(&self) -> Result<(), ClientError> {
        let message = self.session_message(SessionType::Invalid);
        self.unary_empty(CallRequest::DestroySession(message)).await?;
        self.set_session(String::new());
        Ok(())
    }

    /// Snapshot of a document's root object; an empty id selects the first
    /// document.
    pub async fn document(&self, document_id: &str) -> Result<ObjectSnapshot, ClientError> {
        let request = DocumentRequest {
            session: self.session(),
            document_id: document_id.to_string(),
        };
        match self.unary(CallRequest::GetDocument(request)).await? {
            UnaryReply::Object(json) => Ok(ObjectSnapshot::from_json_str(&json)?),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_documents(&self) -> Result<Vec<String>, ClientError> {
        let request = DocumentRequest {
            session: self.session(),
            document_id: String::new(),
        };
        match self.unary(CallRequest::ListDocuments(request)).await? {
            UnaryReply::DocumentIds(ids) => Ok(ids),
            other => Err(unexpected(other)),
        }
    }

    /// Execute a method and return its JSON result.
    ///
    /// `Value::Null` parameters select the method's defaults.
    pub async fn execute_method(
        &self,
        object: &ObjectReference,
        method: &str,
        params: &Value,
    ) -> Result<Value, ClientError> {
        let result = self.execute_method_raw(object, method, params).await?;
        Ok(serde_json::from_str(&result.json)?)
    }

    pub async fn execute_method_raw(
        &self,
        object: &ObjectReference,
        method: &str,
        params: &Value,
    ) -> Result<MethodResult, ClientError> {
        let request = MethodRequest {
            session: self.session(),
            object: object.clone(),
            method: method.to_string(),
            params: if params.is_null() {
                String::new()
            } else {
                params.to_string()
            },
        };
        match self.unary(CallRequest::ExecuteMethod(request)).await? {
            UnaryReply::MethodResult(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_methods(
        &self,
        object: &ObjectReference,
    ) -> Result<Vec<MethodDescriptor>, ClientError> {
        let request = ObjectRequest {
            session: self.session(),
            object: object.clone(),
        };
        match self.unary(CallRequest::ListMethods(request)).await? {
            UnaryReply::Methods(methods) => methods
                .iter()
                .map(|json| serde_json::from_str(json).map_err(ClientError::from))
                .collect(),
            other => Err(unexpected(other)),
        }
    }

    /// JSON value of a field.
    pub async fn get_value(&self, owner: &ObjectReference, field: &str) -> Result<Value, ClientError> {
        self.get_value_with(self.field_request(owner, field)).await
    }

    /// JSON value of one element of an array field.
    pub async fn get_element(
        &self,
        owner: &ObjectReference,
        field: &str,
        index: u64,
    ) -> Result<Value, ClientError> {
        self.get_value_with(self.field_request(owner, field).with_offset(index))
            .await
    }

    /// Objects held by a child field, as references or full snapshots.
    pub async fn child_objects(
        &self,
        owner: &ObjectReference,
        field: &str,
        copy_object_values: bool,
    ) -> Result<Vec<ObjectSnapshot>, ClientError> {
        let mut request = self.field_request(owner, field);
        request.copy_object_values = copy_object_values;
        match self.get_value_with(request).await? {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items
                .into_iter()
                .map(|item| serde_json::from_value(item).map_err(ClientError::from))
                .collect(),
            single => Ok(vec![serde_json::from_value(single)?]),
        }
    }

    pub async fn set_value(
        &self,
        owner: &ObjectReference,
        field: &str,
        value: &Value,
    ) -> Result<(), ClientError> {
        let request = SetValueRequest {
            field: self.field_request(owner, field),
            value: value.to_string(),
        };
        self.unary_empty(CallRequest::SetValue(request)).await
    }

    pub async fn set_element(
        &self,
        owner: &ObjectReference,
        field: &str,
        index: u64,
        value: &Value,
    ) -> Result<(), ClientError> {
        let request = SetValueRequest {
            field: self.field_request(owner, field).with_offset(index),
            value: value.to_string(),
        };
        self.unary_empty(CallRequest::SetValue(request)).await
    }

    pub async fn clear_child_objects(
        &self,
        owner: &ObjectReference,
        field: &str,
    ) -> Result<(), ClientError> {
        let request = self.field_request(owner, field);
        self.unary_empty(CallRequest::ClearChildObjects(request)).await
    }

    pub async fn remove_child_object(
        &self,
        owner: &ObjectReference,
        field: &str,
        index: u64,
    ) -> Result<(), ClientError> {
        let request = RemoveChildRequest {
            field: self.field_request(owner, field),
            index,
        };
        self.unary_empty(CallRequest::RemoveChildObject(request)).await
    }

    /// Insert an object at `index`; an index past the end appends.
    pub async fn insert_child_object(
        &self,
        owner: &ObjectReference,
        field: &str,
        index: u64,
        object: &ObjectSnapshot,
    ) -> Result<(), ClientError> {
        let request = InsertChildRequest {
            field: self.field_request(owner, field),
            index,
            object: object.to_json_string()?,
        };
        self.unary_empty(CallRequest::InsertChildObject(request)).await
    }

    /// Download a whole array field.
    ///
    /// # Errors
    ///
    /// Reraises the server's status, or `Decode` if the chunks do not add
    /// up to the announced total.
    pub async fn get_array_values(
        &self,
        owner: &ObjectReference,
        field: &str,
    ) -> Result<ArrayValues, ClientError> {
        let request = self.field_request(owner, field);
        let mut call = self.start(CallRequest::GetArrayValue(request))?;
        let mut values: Option<ArrayValues> = None;
        loop {
            match call.replies.recv().await {
                Some(ServerBody::Chunk(chunk)) => match values.as_mut() {
                    Some(values) => {
                        if !values.extend(chunk) {
                            return Err(ClientError::Decode(format!(
                                "Mixed element types in download of {}",
                                field
                            )));
                        }
                    }
                    None => values = Some(chunk),
                },
                Some(ServerBody::EndOfStream {
                    element_type,
                    total,
                }) => {
                    let values = values.unwrap_or_else(|| ArrayValues::empty(element_type));
                    if values.element_type() != element_type || values.len() as u64 != total {
                        return Err(ClientError::Decode(format!(
                            "Download of {} ended with {} of {} elements",
                            field,
                            values.len(),
                            total
                        )));
                    }
                    debug!("Downloaded {} elements of {}", total, field);
                    return Ok(values);
                }
                Some(ServerBody::Error(status)) => return Err(status.into()),
                Some(other) => {
                    self.cancel(call.id);
                    return Err(ClientError::UnexpectedReply(format!("{:?}", other)));
                }
                None => return Err(ClientError::Disconnected),
            }
        }
    }

    /// Upload a whole array field; it changes in one step once every chunk
    /// arrived.
    pub async fn set_array_values(
        &self,
        owner: &ObjectReference,
        field: &str,
        values: ArrayValues,
    ) -> Result<SetterReply, ClientError> {
        let element_type = values.element_type();
        let upload = self.open_upload(owner, field, element_type, values.len() as u64)?;
        let size = chunk_size(self.config.package_byte_size, element_type);
        for chunk in values.into_chunks(size) {
            upload.send(chunk)?;
        }
        upload.finish().await
    }

    /// Start an upload of `total` elements and send the chunks by hand.
    ///
    /// Nothing changes on the server until [`UploadStream::finish`]; dropping
    /// the stream unfinished cancels the upload.
    pub fn open_upload(
        &self,
        owner: &ObjectReference,
        field: &str,
        element_type: ElementType,
        total: u64,
    ) -> Result<UploadStream<'_>, ClientError> {
        let header = SetterHeader {
            field: self.field_request(owner, field),
            element_type,
            total,
        };
        let call = self.start(CallRequest::SetArrayValue(header))?;
        Ok(UploadStream {
            client: self,
            call,
            finished: false,
        })
    }

    /// Typed download of an array field.
    pub async fn get_array<T: ArrayElement>(
        &self,
        owner: &ObjectReference,
        field: &str,
    ) -> Result<Vec<T>, ClientError> {
        let values = self.get_array_values(owner, field).await?;
        let element_type = values.element_type();
        T::from_values(values).ok_or_else(|| {
            ClientError::Decode(format!(
                "Field {} holds {} elements, not {}",
                field,
                element_type,
                T::ELEMENT_TYPE
            ))
        })
    }

    /// Typed upload of an array field.
    pub async fn set_array<T: ArrayElement>(
        &self,
        owner: &ObjectReference,
        field: &str,
        values: Vec<T>,
    ) -> Result<SetterReply, ClientError> {
        self.set_array_values(owner, field, T::into_values(values))
            .await
    }

    /// Keep the current session alive every `period` until the returned
    /// task is aborted or the session is lost.
    pub fn spawn_keep_alive(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let client = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(client) = client.upgrade() else {
                    break;
                };
                if let Err(e) = client.keep_alive().await {
                    warn!("Keep-alive failed: {}", e);
                    break;
                }
            }
        })
    }

    fn field_request(&self, owner: &ObjectReference, field: &str) -> FieldRequest {
        FieldRequest::new(self.session(), owner.clone(), field)
    }

    fn session_message(&self, session_type: SessionType) -> SessionMessage {
        SessionMessage {
            uuid: self.session(),
            session_type,
        }
    }

    async fn get_value_with(&self, request: FieldRequest) -> Result<Value, ClientError> {
        match self.unary(CallRequest::GetValue(request)).await? {
            UnaryReply::Value(json) => Ok(serde_json::from_str(&json)?),
            other => Err(unexpected(other)),
        }
    }

    async fn session_call(&self, request: CallRequest) -> Result<SessionMessage, ClientError> {
        match self.unary(request).await? {
            UnaryReply::Session(session) => Ok(session),
            other => Err(unexpected(other)),
        }
    }

    async fn unary_empty(&self, request: CallRequest) -> Result<(), ClientError> {
        match self.unary(request).await? {
            UnaryReply::Empty => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn unary(&self, request: CallRequest) -> Result<UnaryReply, ClientError> {
        let mut call = self.start(request)?;
        match call.replies.recv().await {
            Some(ServerBody::Reply(reply)) => Ok(reply),
            Some(ServerBody::Error(status)) => Err(status.into()),
            Some(other) => Err(ClientError::UnexpectedReply(format!("{:?}", other))),
            None => Err(ClientError::Disconnected),
        }
    }

    fn start(&self, request: CallRequest) -> Result<Call, ClientError> {
        let id = self.next_call.fetch_add(1, Ordering::Relaxed);
        let (sender, replies) = mpsc::unbounded_channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.len() >= self.config.max_pending_requests {
                return Err(crate::types::Status::unavailable(format!(
                    "{} calls already in flight",
                    pending.len()
                ))
                .into());
            }
            pending.insert(id, sender);
        }
        if let Err(e) = self.send(id, ClientBody::Start(request)) {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            return Err(e);
        }
        Ok(Call { id, replies })
    }

    fn send(&self, call_id: CallId, body: ClientBody) -> Result<(), ClientError> {
        self.frames
            .send(ClientFrame { call_id, body })
            .map_err(|_| ClientError::Disconnected)
    }

    fn cancel(&self, call_id: CallId) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&call_id);
        let _ = self.send(call_id, ClientBody::Cancel);
    }
}

/// Client end of an open array upload.
pub struct UploadStream<'a> {
    client: &'a Client,
    call: Call,
    finished: bool,
}

impl UploadStream<'_> {
    /// Send the next chunk.
    pub fn send(&self, chunk: ArrayValues) -> Result<(), ClientError> {
        self.client.send(self.call.id, ClientBody::Chunk(chunk))
    }

    /// Close the stream and wait for the server to apply the array.
    pub async fn finish(mut self) -> Result<SetterReply, ClientError> {
        self.finished = true;
        self.client.send(self.call.id, ClientBody::WritesDone)?;
        match self.call.replies.recv().await {
            Some(ServerBody::Uploaded(reply)) => Ok(reply),
            Some(ServerBody::Error(status)) => Err(status.into()),
            Some(other) => Err(ClientError::UnexpectedReply(format!("{:?}", other))),
            None => Err(ClientError::Disconnected),
        }
    }
}

impl Drop for UploadStream<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Cancelling unfinished upload {}", self.call.id);
            self.client.cancel(self.call.id);
        }
    }
}

fn unexpected(reply: UnaryReply) -> ClientError {
    ClientError::UnexpectedReply(format!("{:?}", reply))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_millis(5000));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.package_byte_size, DEFAULT_PACKAGE_BYTE_SIZE);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ClientConfig {
            retry_attempts: 2,
            retry_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let err = Client::connect_with_retry(addr, config).await.err().unwrap();
        assert!(matches!(err, ClientError::Connection(_)));
    }
}
