//! Ambient execution context.
//!
//! Two task-local slots let step-wrapped functions discover their current
//! session and parent call without threading a context argument: the active
//! [`Session`] and the id of the call whose user function is currently
//! running. Both are scoped, so the previous value is restored on every exit
//! path, and both read as absent outside a session, in which case a wrapped
//! step simply passes through to the bare function.
//!
//! Task-locals do not cross `tokio::spawn`; spawned tasks that need the
//! session use the explicit [`crate::runtime::StepHandle::call_in`] form.

use std::future::Future;
use std::sync::Arc;

use uuid::Uuid;

use crate::runtime::session::Session;

tokio::task_local! {
    static CURRENT_SESSION: Arc<Session>;
    static CURRENT_CALL_ID: Uuid;
}

/// The session owning the current task scope, if any.
#[must_use]
pub fn current_session() -> Option<Arc<Session>> {
    CURRENT_SESSION.try_with(Arc::clone).ok()
}

/// The id of the call whose user function is currently running, if any.
/// Nested step calls record this as their `parent_call_id`.
#[must_use]
pub fn current_call_id() -> Option<Uuid> {
    CURRENT_CALL_ID.try_with(|id| *id).ok()
}

/// Run `fut` with `session` published as the ambient session.
pub(crate) async fn scope_session<F>(session: Arc<Session>, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_SESSION.scope(session, fut).await
}

/// Run `fut` with `call_id` published as the ambient call id. Nested scopes
/// shadow the outer id and restore it when they finish.
pub(crate) async fn scope_call_id<F>(call_id: Uuid, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_CALL_ID.scope(call_id, fut).await
}
