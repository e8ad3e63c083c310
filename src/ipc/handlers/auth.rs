use crate::auth::{self, AuthError};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::{info, warn};

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let username = req.params.get("username").and_then(|v| v.as_str()).unwrap_or("");
    let password = req.params.get("password").and_then(|v| v.as_str()).unwrap_or("");

    match auth::authenticate(conn, username, password) {
        Ok(session) => {
            info!(username = %session.username, "login succeeded");
            let result = json!({
                "loggedIn": true,
                "username": session.username,
                "role": session.role,
            });
            state.session = Some(session);
            ok(&req.id, result)
        }
        Err(AuthError::InvalidCredentials) => {
            warn!(username, "login rejected");
            err(&req.id, "auth_failed", AuthError::InvalidCredentials.to_string(), None)
        }
        Err(e @ AuthError::Store(_)) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(s) = state.session.take() {
        info!(username = %s.username, "logged out");
    }
    ok(&req.id, json!({ "loggedIn": false }))
}

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = match state.session.as_ref() {
        Some(s) => json!({ "loggedIn": true, "username": s.username, "role": s.role }),
        None => json!({ "loggedIn": false }),
    };
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.status" => Some(handle_status(state, req)),
        _ => None,
    }
}
