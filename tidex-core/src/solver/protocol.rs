//! Wire format of the challenge solver backend
//!
//! The backend exposes a single JSON endpoint at `{address}/v1` that takes a
//! command object and answers with a status, a message and, for page
//! requests, a solution.

use serde::{Deserialize, Serialize};

/// Path of the command endpoint relative to the backend address.
pub const COMMAND_PATH: &str = "/v1";

/// Status value the backend uses for successful commands.
pub const STATUS_OK: &str = "ok";

pub const CMD_LIST_SESSIONS: &str = "sessions.list";
pub const CMD_CREATE_SESSION: &str = "sessions.create";
pub const CMD_REQUEST_GET: &str = "request.get";

/// Command sent to the backend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverCommand<'a> {
    pub cmd: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_timeout: Option<u64>,
}

impl<'a> SolverCommand<'a> {
    pub fn list_sessions() -> Self {
        Self::bare(CMD_LIST_SESSIONS)
    }

    pub fn create_session() -> Self {
        Self::bare(CMD_CREATE_SESSION)
    }

    /// Loads `url` in the browser context identified by `session`.
    pub fn get(url: &'a str, session: &'a str, max_timeout_ms: u64) -> Self {
        Self {
            cmd: CMD_REQUEST_GET,
            url: Some(url),
            session: Some(session),
            max_timeout: Some(max_timeout_ms),
        }
    }

    fn bare(cmd: &'a str) -> Self {
        Self {
            cmd,
            url: None,
            session: None,
            max_timeout: None,
        }
    }
}

/// Reply to any command.
///
/// `sessions` is only present when the backend supports session listing;
/// its absence is meaningful and distinct from an empty list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SolverReply {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub sessions: Option<Vec<String>>,
    #[serde(default)]
    pub solution: Option<SolverPage>,
}

impl SolverReply {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Page rendered by the solver's browser.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverPage {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub cookies: Vec<SolverCookie>,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub response: String,
}

/// Cookie set in the solver's browser while passing the challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
}

impl SolverCookie {
    /// Renders the cookie as a `Set-Cookie` value keeping its scope.
    pub fn to_set_cookie(&self) -> String {
        let mut header = format!("{}={}", self.name, self.value);
        if !self.domain.is_empty() {
            header.push_str("; Domain=");
            header.push_str(&self.domain);
        }
        if !self.path.is_empty() {
            header.push_str("; Path=");
            header.push_str(&self.path);
        }
        header
    }
}

#[cfg(test)]
mod protocol_tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_get_command_uses_backend_field_names() {
        let command = SolverCommand::get("https://example.com/", "s-1", 60_000);
        let value = serde_json::to_value(&command).unwrap();

        assert_eq!(
            value,
            json!({
                "cmd": "request.get",
                "url": "https://example.com/",
                "session": "s-1",
                "maxTimeout": 60000
            })
        );
    }

    #[test]
    fn test_bare_commands_omit_optional_fields() {
        let value = serde_json::to_value(SolverCommand::list_sessions()).unwrap();
        assert_eq!(value, json!({ "cmd": "sessions.list" }));
    }

    #[test]
    fn test_reply_distinguishes_missing_session_list() {
        let unsupported: SolverReply =
            serde_json::from_str(r#"{"status":"ok","message":""}"#).unwrap();
        let empty: SolverReply =
            serde_json::from_str(r#"{"status":"ok","message":"","sessions":[]}"#).unwrap();

        assert!(unsupported.sessions.is_none());
        assert_eq!(empty.sessions, Some(Vec::new()));
    }

    #[test]
    fn test_solution_parses_camel_case_fields() {
        let reply: SolverReply = serde_json::from_value(json!({
            "status": "ok",
            "message": "Challenge solved!",
            "solution": {
                "url": "https://example.com/",
                "status": 200,
                "cookies": [
                    {"name": "cf_clearance", "value": "abc", "domain": ".example.com", "path": "/", "httpOnly": true}
                ],
                "userAgent": "Mozilla/5.0 Solver",
                "response": "<html><body>ok</body></html>"
            }
        }))
        .unwrap();

        assert!(reply.is_ok());
        let page = reply.solution.unwrap();
        assert_eq!(page.user_agent, "Mozilla/5.0 Solver");
        assert_eq!(page.cookies[0].name, "cf_clearance");
        assert_eq!(page.cookies[0].domain, ".example.com");
    }
}
