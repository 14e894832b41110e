use crate::config::{self, NotificationSettings, PresenceMode, PresenceSettings};
use crate::db;
use crate::ipc::error::{err, ok, respond, HandlerErr};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::notify::{AlertDispatcher, OutboxRelay};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    // Finish the previous workspace's queued alerts before switching.
    state.alerts = None;
    state.db = None;
    state.workspace = None;

    let conn = match db::open_db(&path) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:#}"), None),
    };
    match AlertDispatcher::spawn(&path, Box::new(OutboxRelay::new(&path))) {
        Ok(d) => state.alerts = Some(d),
        // Alerts are best-effort; the workspace still opens without them.
        Err(e) => tracing::warn!(error = %format!("{e:#}"), "alert dispatcher unavailable"),
    }
    tracing::info!(workspace = %path.to_string_lossy(), "workspace selected");
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
}

#[derive(Clone, Copy)]
enum SetupSection {
    Notifications,
    Presence,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "notifications" => Some(Self::Notifications),
            "presence" => Some(Self::Presence),
            _ => None,
        }
    }
}

fn setup_get(state: &AppState, _params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let notifications = config::load_notifications(conn)?;
    let presence = config::load_presence(conn)?;
    Ok(json!({
        "notifications": {
            "enabled": notifications.enabled,
            "adminRecipients": notifications.admin_recipients,
            "effectiveAdminRecipients": notifications.admin_recipients(),
        },
        "presence": presence,
    }))
}

fn patch_notifications(
    current: &mut NotificationSettings,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    for (k, v) in patch {
        match k.as_str() {
            "enabled" => {
                current.enabled = v.as_bool().ok_or("enabled must be boolean")?;
            }
            "adminRecipients" => {
                let items = v.as_array().ok_or("adminRecipients must be an array")?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let s = item
                        .as_str()
                        .map(str::trim)
                        .ok_or("adminRecipients must contain strings")?;
                    if !s.contains('@') {
                        return Err(format!("not an email address: {}", s));
                    }
                    out.push(s.to_string());
                }
                current.admin_recipients = out;
            }
            _ => return Err(format!("unknown notifications field: {}", k)),
        }
    }
    Ok(())
}

fn patch_presence(current: &mut PresenceSettings, patch: &Map<String, Value>) -> Result<(), String> {
    for (k, v) in patch {
        match k.as_str() {
            "mode" => {
                current.mode = v
                    .as_str()
                    .and_then(PresenceMode::parse)
                    .ok_or("mode must be one of: fine, toggle")?;
            }
            _ => return Err(format!("unknown presence field: {}", k)),
        }
    }
    Ok(())
}

fn setup_update(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let section_raw = helpers::required_str(params, "section")?;
    let section = SetupSection::parse(section_raw)
        .ok_or_else(|| HandlerErr::bad_params("unknown section"))?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;

    match section {
        SetupSection::Notifications => {
            let mut current = config::load_notifications(conn)?;
            patch_notifications(&mut current, patch).map_err(HandlerErr::bad_params)?;
            config::save_notifications(conn, &current)?;
        }
        SetupSection::Presence => {
            let mut current = config::load_presence(conn)?;
            patch_presence(&mut current, patch).map_err(HandlerErr::bad_params)?;
            config::save_presence(conn, &current)?;
        }
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "setup.get" => Some(respond(&req.id, setup_get(state, &req.params))),
        "setup.update" => Some(respond(&req.id, setup_update(state, &req.params))),
        _ => None,
    }
}
