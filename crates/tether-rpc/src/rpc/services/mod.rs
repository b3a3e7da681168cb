//! Service implementations bound into the call registry.
//!
//! - **AppService**: application info, ping, quit and session lifecycle
//! - **ObjectService**: documents and method invocation
//! - **FieldService**: value access, child objects and array transfers

mod app;
mod field;
mod object;

pub use app::AppService;
pub use field::FieldService;
pub use object::ObjectService;

use crate::directory::DocumentDirectory;
use crate::dispatch::MethodDispatcher;
use crate::resolver::ObjectResolver;
use crate::rpc::messages::AppInfo;
use crate::session::{SessionGuard, SessionManager};
use crate::types::{RpcResult, ServerConfig, Status};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tether_core::document::Document;
use tether_core::factory::ObjectFactory;
use tether_core::field::FieldInfo;
use tether_core::method::MethodRegistry;
use tether_core::object::ObjectHandle;
use tokio::sync::watch;

/// Pull the payload out of the expected request variant or fail the call.
macro_rules! expect_request {
    ($request:expr, $variant:path) => {
        match $request {
            $variant(inner) => inner,
            other => {
                return Err($crate::types::Status::invalid_argument(format!(
                    "Unexpected request {:?}",
                    other.method()
                )))
            }
        }
    };
}
pub(crate) use expect_request;

/// Everything an application contributes to a server.
#[derive(Default)]
pub struct ServerApp {
    pub info: Option<AppInfo>,
    pub documents: Vec<Document>,
    pub methods: MethodRegistry,
    pub factory: ObjectFactory,
}

/// State shared by every service of one server.
pub struct ServiceContext {
    pub config: ServerConfig,
    pub app_info: AppInfo,
    pub sessions: Arc<SessionManager>,
    pub directory: Arc<DocumentDirectory>,
    pub resolver: Arc<ObjectResolver>,
    pub dispatcher: MethodDispatcher,
    pub factory: Arc<ObjectFactory>,
    pub fields: FieldLookupCache,
    shutdown: watch::Sender<bool>,
}

impl ServiceContext {
    pub fn new(config: ServerConfig, app: ServerApp) -> Arc<Self> {
        let directory = Arc::new(DocumentDirectory::with_documents(app.documents));
        let resolver = Arc::new(ObjectResolver::new(directory.clone()));
        let dispatcher = MethodDispatcher::new(resolver.clone(), Arc::new(app.methods));
        let app_info = app.info.unwrap_or_else(|| {
            AppInfo::new(env!("CARGO_PKG_NAME"), "server", crate_version())
        });
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            sessions: Arc::new(SessionManager::new(&config)),
            config,
            app_info,
            directory,
            resolver,
            dispatcher,
            factory: Arc::new(app.factory),
            fields: FieldLookupCache::default(),
            shutdown,
        })
    }

    /// Hold the caller's session for the duration of a call.
    pub fn session(&self, uuid: &str) -> RpcResult<SessionGuard> {
        SessionGuard::acquire(&self.sessions, uuid)
    }

    /// Ask the server to stop accepting calls.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn shutdown_requested(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// Refuse mutating operations from observing sessions.
pub(crate) fn require_regular(session: &SessionGuard, operation: &str) -> RpcResult<()> {
    if session.is_observing() {
        return Err(Status::unauthenticated(format!(
            "Observing sessions may not {}",
            operation
        )));
    }
    Ok(())
}

fn crate_version() -> (u32, u32, u32) {
    let part = |s: &str| s.parse().unwrap_or(0);
    (
        part(env!("CARGO_PKG_VERSION_MAJOR")),
        part(env!("CARGO_PKG_VERSION_MINOR")),
        part(env!("CARGO_PKG_VERSION_PATCH")),
    )
}

/// Field lookups cached per owner identity.
#[derive(Debug, Default)]
pub struct FieldLookupCache {
    by_owner: Mutex<HashMap<String, HashMap<String, FieldInfo>>>,
}

impl FieldLookupCache {
    /// Scriptable field `name` on `owner`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the owner has no such field.
    pub fn lookup(&self, owner: &ObjectHandle, name: &str) -> RpcResult<FieldInfo> {
        let mut by_owner = self.by_owner.lock().unwrap_or_else(PoisonError::into_inner);
        let fields = by_owner.entry(owner.uuid().to_string()).or_default();
        if let Some(info) = fields.get(name) {
            return Ok(info.clone());
        }
        let info = owner.field_info(name).ok_or_else(|| {
            Status::not_found(format!(
                "Could not find field {} in {}",
                name,
                owner.class_keyword()
            ))
        })?;
        fields.insert(name.to_string(), info.clone());
        Ok(info)
    }

    /// Drop the entries of `root` and its descendants.
    pub fn forget_subtree(&self, root: &ObjectHandle) {
        let uuids: Vec<String> = root
            .descendants_and_self()
            .iter()
            .map(|o| o.uuid().to_string())
            .collect();
        let mut by_owner = self.by_owner.lock().unwrap_or_else(PoisonError::into_inner);
        for uuid in uuids {
            by_owner.remove(&uuid);
        }
    }

    /// Number of owners with cached lookups.
    pub fn owner_count(&self) -> usize {
        self.by_owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
