//! Application identity and session lifecycle.

use super::{expect_request, ServiceContext};
use crate::rpc::callback::CallbackInstance;
use crate::rpc::messages::{AppInfo, SessionMessage, SessionRequest};
use crate::rpc::protocol::{CallRequest, RpcMethod, UnaryReply};
use crate::session::Session;
use crate::types::RpcResult;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Serves app info, ping, quit and the session calls.
pub struct AppService {
    context: Arc<ServiceContext>,
}

impl AppService {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self { context }
    }

    pub fn app_info(&self) -> AppInfo {
        self.context.app_info.clone()
    }

    pub fn quit(&self) {
        info!("Quit requested, shutting down");
        self.context.request_shutdown();
    }

    #[instrument(skip(self))]
    pub fn ready_for_session(&self, request: SessionRequest) -> bool {
        self.context.sessions.ready_for_session(request.session_type)
    }

    #[instrument(skip(self))]
    pub fn create_session(&self, request: SessionRequest) -> RpcResult<SessionMessage> {
        self.context
            .sessions
            .create_session(request.session_type)
            .map(message)
    }

    pub fn check_session(&self, request: SessionMessage) -> RpcResult<SessionMessage> {
        self.context.sessions.check_session(&request.uuid).map(message)
    }

    pub fn keep_session_alive(&self, request: SessionMessage) -> RpcResult<SessionMessage> {
        self.context.sessions.keep_alive(&request.uuid).map(message)
    }

    #[instrument(skip(self), fields(session = %request.uuid))]
    pub fn change_session(&self, request: SessionMessage) -> RpcResult<SessionMessage> {
        let session = self
            .context
            .sessions
            .change_session(&request.uuid, request.session_type)?;
        debug!("Session is now {:?}", session.session_type);
        Ok(message(session))
    }

    #[instrument(skip(self), fields(session = %request.uuid))]
    pub fn destroy_session(&self, request: SessionMessage) {
        self.context.sessions.destroy_session(&request.uuid);
    }

    /// Bind every call of this service.
    pub fn create_callbacks(self: &Arc<Self>) -> Vec<CallbackInstance> {
        let this = self.clone();
        let app_info = CallbackInstance::unary(RpcMethod::GetAppInfo, move |_| {
            Ok(UnaryReply::AppInfo(this.app_info()))
        });
        let ping = CallbackInstance::unary(RpcMethod::Ping, |_| Ok(UnaryReply::Empty));
        let this = self.clone();
        let quit = CallbackInstance::unary(RpcMethod::Quit, move |_| {
            this.quit();
            Ok(UnaryReply::Empty)
        });
        let this = self.clone();
        let ready = CallbackInstance::unary(RpcMethod::ReadyForSession, move |request| {
            let request = expect_request!(request, CallRequest::ReadyForSession);
            Ok(UnaryReply::Ready(this.ready_for_session(request)))
        });
        let this = self.clone();
        let create = CallbackInstance::unary(RpcMethod::CreateSession, move |request| {
            let request = expect_request!(request, CallRequest::CreateSession);
            this.create_session(request).map(UnaryReply::Session)
        });
        let this = self.clone();
        let check = CallbackInstance::unary(RpcMethod::CheckSession, move |request| {
            let request = expect_request!(request, CallRequest::CheckSession);
            this.check_session(request).map(UnaryReply::Session)
        });
        let this = self.clone();
        let keep_alive = CallbackInstance::unary(RpcMethod::KeepSessionAlive, move |request| {
            let request = expect_request!(request, CallRequest::KeepSessionAlive);
            this.keep_session_alive(request).map(UnaryReply::Session)
        });
        let this = self.clone();
        let change = CallbackInstance::unary(RpcMethod::ChangeSession, move |request| {
            let request = expect_request!(request, CallRequest::ChangeSession);
            this.change_session(request).map(UnaryReply::Session)
        });
        let this = self.clone();
        let destroy = CallbackInstance::unary(RpcMethod::DestroySession, move |request| {
            let request = expect_request!(request, CallRequest::DestroySession);
            this.destroy_session(request);
            Ok(UnaryReply::Empty)
        });

        vec![
            app_info, ping, quit, ready, create, check, keep_alive, change, destroy,
        ]
    }
}

fn message(session: Session) -> SessionMessage {
    SessionMessage {
        uuid: session.uuid,
        session_type: session.session_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::services::ServerApp;
    use crate::types::{ServerConfig, SessionType, StatusCode};

    fn service() -> Arc<AppService> {
        let context = ServiceContext::new(ServerConfig::default(), ServerApp::default());
        Arc::new(AppService::new(context))
    }

    #[test]
    fn test_session_lifecycle() {
        let service = service();
        let regular = SessionRequest {
            session_type: SessionType::Regular,
        };
        assert!(service.ready_for_session(regular.clone()));

        let session = service.create_session(regular.clone()).unwrap();
        assert!(!service.ready_for_session(regular.clone()));
        assert_eq!(
            service.create_session(regular).unwrap_err().code,
            StatusCode::FailedPrecondition
        );

        let checked = service.check_session(session.clone()).unwrap();
        assert_eq!(checked.session_type, SessionType::Regular);

        let changed = service
            .change_session(SessionMessage {
                uuid: session.uuid.clone(),
                session_type: SessionType::Observing,
            })
            .unwrap();
        assert_eq!(changed.session_type, SessionType::Observing);

        service.destroy_session(session.clone());
        assert_eq!(
            service.keep_session_alive(session).unwrap_err().code,
            StatusCode::FailedPrecondition
        );
    }

    #[test]
    fn test_quit_requests_shutdown() {
        let service = service();
        let shutdown = service.context.shutdown_requested();
        assert!(!*shutdown.borrow());
        service.quit();
        assert!(*shutdown.borrow());
    }

    #[test]
    fn test_callbacks_cover_service() {
        let callbacks = service().create_callbacks();
        assert_eq!(callbacks.len(), 9);
        assert!(callbacks.iter().any(|c| c.method() == RpcMethod::Quit));
    }
}
