use crate::db;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

pub const NOTIFICATIONS_KEY: &str = "setup.notifications";
pub const PRESENCE_KEY: &str = "setup.presence";
pub const ADMIN_EMAIL_ENV: &str = "ROLLCALL_ADMIN_EMAIL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub admin_recipients: Vec<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            admin_recipients: Vec::new(),
        }
    }
}

impl NotificationSettings {
    /// Stored recipients plus the one from the environment, trimmed and de-duplicated.
    pub fn recipients_with(&self, env_admin: Option<&str>) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let extra = env_admin.into_iter();
        for r in self.admin_recipients.iter().map(String::as_str).chain(extra) {
            let r = r.trim();
            if r.is_empty() || out.iter().any(|o| o.eq_ignore_ascii_case(r)) {
                continue;
            }
            out.push(r.to_string());
        }
        out
    }

    pub fn admin_recipients(&self) -> Vec<String> {
        let env = std::env::var(ADMIN_EMAIL_ENV).ok();
        self.recipients_with(env.as_deref())
    }
}

/// How the entry point reports presence: fine-grained temporary exits, or a
/// single toggle button per student.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceMode {
    #[default]
    Fine,
    Toggle,
}

impl PresenceMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fine" => Some(Self::Fine),
            "toggle" => Some(Self::Toggle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceSettings {
    pub mode: PresenceMode,
}

fn load_or_default<T>(conn: &Connection, key: &str) -> anyhow::Result<T>
where
    T: Default + for<'de> Deserialize<'de>,
{
    let Some(raw) = db::settings_get_json(conn, key)? else {
        return Ok(T::default());
    };
    match serde_json::from_value(raw) {
        Ok(v) => Ok(v),
        Err(e) => {
            // Malformed historical values must not block the workspace.
            tracing::warn!(key, error = %e, "ignoring malformed setting");
            Ok(T::default())
        }
    }
}

pub fn load_notifications(conn: &Connection) -> anyhow::Result<NotificationSettings> {
    load_or_default(conn, NOTIFICATIONS_KEY)
}

pub fn save_notifications(conn: &Connection, settings: &NotificationSettings) -> anyhow::Result<()> {
    db::settings_set_json(conn, NOTIFICATIONS_KEY, &serde_json::to_value(settings)?)
}

pub fn load_presence(conn: &Connection) -> anyhow::Result<PresenceSettings> {
    load_or_default(conn, PRESENCE_KEY)
}

pub fn save_presence(conn: &Connection, settings: &PresenceSettings) -> anyhow::Result<()> {
    db::settings_set_json(conn, PRESENCE_KEY, &serde_json::to_value(settings)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_apply_when_unset_or_malformed() {
        let conn = db::open_in_memory().unwrap();
        assert_eq!(load_presence(&conn).unwrap().mode, PresenceMode::Fine);
        assert!(load_notifications(&conn).unwrap().enabled);

        db::settings_set_json(&conn, PRESENCE_KEY, &json!({ "mode": 42 })).unwrap();
        assert_eq!(load_presence(&conn).unwrap().mode, PresenceMode::Fine);

        save_presence(
            &conn,
            &PresenceSettings {
                mode: PresenceMode::Toggle,
            },
        )
        .unwrap();
        assert_eq!(load_presence(&conn).unwrap().mode, PresenceMode::Toggle);
    }

    #[test]
    fn env_recipient_is_merged_without_duplicates() {
        let s = NotificationSettings {
            enabled: true,
            admin_recipients: vec!["office@school.test".into(), " ".into()],
        };
        assert_eq!(
            s.recipients_with(Some("Office@School.test")),
            vec!["office@school.test".to_string()]
        );
        assert_eq!(
            s.recipients_with(Some("head@school.test")),
            vec!["office@school.test".to_string(), "head@school.test".to_string()]
        );
    }
}
