use tracing::{debug, info};

use crate::error::ApiError;
use crate::response::{LoginResponse, TokenQueryResponse, parse};
use crate::transport::ApiTransport;

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticated { username: String },
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    stale: bool,
}

/// Authenticated connection to one wiki plus its cached csrf token.
pub struct Session<T: ApiTransport> {
    transport: T,
    credentials: Credentials,
    auth: AuthState,
    csrf: Option<CachedToken>,
}

impl<T: ApiTransport> Session<T> {
    pub fn new(transport: T, credentials: Credentials) -> Self {
        Self {
            transport,
            credentials,
            auth: AuthState::Anonymous,
            csrf: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    pub fn auth_state(&self) -> &AuthState {
        &self.auth
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.auth, AuthState::Authenticated { .. })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn login(&mut self) -> Result<(), ApiError> {
        let token_response = self.transport.read(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = parse(token_response, "login token")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| ApiError::malformed("login token missing from response"))?;

        let login_response = self.transport.write(&[
            ("action", "login".to_string()),
            ("lgname", self.credentials.username.clone()),
            ("lgpassword", self.credentials.password.clone()),
            ("lgtoken", login_token),
        ])?;
        let login_payload: LoginResponse = parse(login_response, "login")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                let username = login_payload
                    .login
                    .lgusername
                    .unwrap_or_else(|| self.credentials.username.clone());
                info!(endpoint = self.endpoint(), username = %username, "logged in");
                self.auth = AuthState::Authenticated { username };
                self.csrf = None;
                Ok(())
            }
            other => Err(ApiError::LoginFailed(
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string()),
            )),
        }
    }

    /// Ends the server session. Local state is anonymous afterwards even
    /// when the server call fails.
    pub fn logout(&mut self) -> Result<(), ApiError> {
        if !self.is_authenticated() {
            return Ok(());
        }
        let result = self.csrf_token().and_then(|token| {
            self.transport.write(&[
                ("action", "logout".to_string()),
                ("token", token),
            ])
        });
        self.auth = AuthState::Anonymous;
        self.csrf = None;
        result.map(|_| info!(endpoint = self.endpoint(), "logged out"))
    }

    /// Cached csrf token, fetched again when absent or marked stale.
    pub fn csrf_token(&mut self) -> Result<String, ApiError> {
        if let Some(token) = &self.csrf
            && !token.stale
        {
            return Ok(token.value.clone());
        }
        if !self.is_authenticated() {
            return Err(ApiError::NotLoggedIn);
        }
        let response = self.transport.read(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse = parse(response, "csrf token")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| ApiError::malformed("csrf token missing from response"))?;
        debug!("fetched csrf token");
        self.csrf = Some(CachedToken {
            value: token.clone(),
            stale: false,
        });
        Ok(token)
    }

    pub fn mark_token_stale(&mut self) {
        if let Some(token) = &mut self.csrf {
            token.stale = true;
        }
    }

    pub fn token_is_stale(&self) -> bool {
        self.csrf.as_ref().is_none_or(|token| token.stale)
    }

    /// Force a fresh csrf token.
    pub fn refresh_token(&mut self) -> Result<String, ApiError> {
        self.mark_token_stale();
        self.csrf_token()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AuthState, Credentials, Session};
    use crate::error::ApiError;
    use crate::testing::ScriptedTransport;

    fn credentials() -> Credentials {
        Credentials {
            username: "Bot@task".to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn login_authenticates_and_csrf_is_cached() {
        let transport = ScriptedTransport::with_auth(|_| Ok(json!({})));
        let mut session = Session::new(transport, credentials());
        session.login().expect("login");
        assert_eq!(
            session.auth_state(),
            &AuthState::Authenticated {
                username: "Bot".to_string()
            }
        );

        let first = session.csrf_token().expect("token");
        let second = session.csrf_token().expect("token");
        assert_eq!(first, second);
        let token_calls = session
            .transport()
            .calls
            .iter()
            .filter(|call| call.is("meta", "tokens") && call.get("type").is_none())
            .count();
        assert_eq!(token_calls, 1);
    }

    #[test]
    fn refresh_token_refetches_after_staleness() {
        let transport = ScriptedTransport::with_auth(|_| Ok(json!({})));
        let mut session = Session::new(transport, credentials());
        session.login().expect("login");
        session.csrf_token().expect("token");
        assert!(!session.token_is_stale());

        session.mark_token_stale();
        assert!(session.token_is_stale());
        session.refresh_token().expect("refresh");
        let token_calls = session
            .transport()
            .calls
            .iter()
            .filter(|call| call.is("meta", "tokens") && call.get("type").is_none())
            .count();
        assert_eq!(token_calls, 2);
    }

    #[test]
    fn failed_login_reports_reason_and_stays_anonymous() {
        let transport = ScriptedTransport::new(|call| {
            if call.is("meta", "tokens") {
                return Ok(json!({ "query": { "tokens": { "logintoken": "t" } } }));
            }
            Ok(json!({ "login": { "result": "Failed", "reason": "Incorrect password" } }))
        });
        let mut session = Session::new(transport, credentials());
        let error = session.login().expect_err("must fail");
        assert!(matches!(error, ApiError::LoginFailed(ref reason) if reason == "Incorrect password"));
        assert_eq!(session.auth_state(), &AuthState::Anonymous);
    }

    #[test]
    fn csrf_requires_login() {
        let transport = ScriptedTransport::with_auth(|_| Ok(json!({})));
        let mut session = Session::new(transport, credentials());
        assert!(matches!(session.csrf_token(), Err(ApiError::NotLoggedIn)));
    }

    #[test]
    fn logout_resets_state_even_when_server_fails() {
        let transport = ScriptedTransport::new(|call| {
            if call.is("action", "logout") {
                return Err(ApiError::HttpStatus(502));
            }
            Ok(crate::testing::auth_response(call).unwrap_or_else(|| json!({})))
        });
        let mut session = Session::new(transport, credentials());
        session.login().expect("login");
        let error = session.logout().expect_err("server failure surfaces");
        assert!(matches!(error, ApiError::HttpStatus(502)));
        assert!(!session.is_authenticated());
        assert!(session.logout().is_ok());
    }
}
