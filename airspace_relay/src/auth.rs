// Login, logout, and write authorization.
//
// Bindings live on the `Session` in the registry. Login checks and sets the
// binding under a single registry write lock, so two concurrent logins on one
// session cannot both succeed. The `{auth_id}` push goes out after the lock is
// released; there is no ordering between that push and the RPC reply.
//
// Same-host trust: when `trust_same_host` is on, a control connection whose
// peer address equals the server's bind address starts out bound to
// `localhost_admin`. Any process on the host gets administrator rights this
// way, so the flag is off by default.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use airspace_protocol::{ControlMessage, PermissionTier, SessionId};
use tracing::{info, warn};

use crate::channel::ControlChannel;
use crate::error::{AuthError, RelayError};
use crate::registry::{Session, SessionRegistry};
use crate::users::{LOCALHOST_ADMIN, UserDirectory, is_default_identity};

pub fn login(
    registry: &SessionRegistry,
    users: &UserDirectory,
    session_id: SessionId,
    auth_id: &str,
) -> Result<(), RelayError> {
    let tier = users
        .tier_of(auth_id)
        .ok_or_else(|| AuthError::UnknownUser(auth_id.to_string()))?;

    let channel = registry
        .update(session_id, |session| {
            if let Some(current) = &session.auth_id {
                if current != auth_id && !is_default_identity(current) {
                    return Err(AuthError::AlreadyLoggedIn {
                        current: current.clone(),
                    });
                }
            }
            session.auth_id = Some(auth_id.to_string());
            session.tier = tier;
            Ok(session.channel.clone())
        })
        .ok_or(RelayError::UnknownSession(session_id))??;

    info!(session_id = %session_id, auth_id, ?tier, "session logged in");
    push_auth(session_id, channel, Some(auth_id));
    Ok(())
}

pub fn logout(registry: &SessionRegistry, session_id: SessionId) -> Result<(), RelayError> {
    let channel = registry
        .update(session_id, |session| {
            session.auth_id = None;
            session.tier = PermissionTier::Unauthenticated;
            session.channel.clone()
        })
        .ok_or(RelayError::UnknownSession(session_id))?;

    info!(session_id = %session_id, "session logged out");
    push_auth(session_id, channel, None);
    Ok(())
}

/// Whether a control connection from `peer` qualifies for same-host trust.
pub fn is_same_host(peer: SocketAddr, bind_address: IpAddr) -> bool {
    peer.ip() == bind_address
}

/// Bind a freshly accepted session to `localhost_admin` and tell the client.
pub fn bind_same_host(registry: &SessionRegistry, session_id: SessionId) -> Result<(), RelayError> {
    let channel = registry
        .update(session_id, |session| {
            if session.auth_id.is_none() {
                session.auth_id = Some(LOCALHOST_ADMIN.to_string());
                session.tier = PermissionTier::Administrator;
                session.channel.clone()
            } else {
                None
            }
        })
        .ok_or(RelayError::UnknownSession(session_id))?;

    if channel.is_some() {
        info!(session_id = %session_id, "same-host session bound to {LOCALHOST_ADMIN}");
        push_auth(session_id, channel, Some(LOCALHOST_ADMIN));
    }
    Ok(())
}

/// Tell the client its identity changed. The binding already stands; a dead
/// socket is left for the liveness maintainer to evict.
fn push_auth(session_id: SessionId, channel: Option<Arc<ControlChannel>>, auth_id: Option<&str>) {
    let Some(channel) = channel else {
        return;
    };
    if let Err(e) = channel.send(&ControlMessage::AuthId(auth_id.map(str::to_string))) {
        warn!(session_id = %session_id, error = %e, "auth push failed");
    }
}

/// The caller's bound identity, or `NotAuthenticated`.
pub fn require_identity(session: &Session) -> Result<&str, RelayError> {
    session
        .auth_id
        .as_deref()
        .ok_or(RelayError::Auth(AuthError::NotAuthenticated))
}

/// May `session` write an entity assigned to `assignee`?
///
/// Outside real-time runs every write is allowed. During a real-time run the
/// caller must be the assignee or hold at least `SimulationAdmin`.
pub fn authorize_write(
    session: &Session,
    entity_id: &str,
    assignee: Option<&str>,
    real_time: bool,
) -> Result<(), RelayError> {
    if !real_time || session.tier >= PermissionTier::SimulationAdmin {
        return Ok(());
    }
    let caller = require_identity(session)?;
    if assignee == Some(caller) {
        return Ok(());
    }
    Err(RelayError::Ownership(format!(
        "`{entity_id}` is not assigned to `{caller}`"
    )))
}
