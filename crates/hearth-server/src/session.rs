//! Session resolution from the access/refresh token cookies.
//!
//! Every protected request is resolved afresh: a valid access token wins;
//! otherwise a valid refresh token authenticates the request and a new access
//! token is written back to the response.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use thiserror::Error;
use tower_cookies::cookie::SameSite;
use tower_cookies::{Cookie, Cookies};
use tracing::{debug, error};

use hearth_shared::constants::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use hearth_shared::identity::Identity;
use hearth_shared::token::{TokenKind, TokenService};

use crate::api::AppState;
use crate::error::ServerError;

/// Tokens carried by an inbound request.
#[derive(Debug, Clone, Default)]
pub struct SessionTokens {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl SessionTokens {
    pub fn from_cookies(cookies: &Cookies) -> Self {
        Self {
            access: cookies.get(ACCESS_TOKEN_COOKIE).map(|c| c.value().to_string()),
            refresh: cookies.get(REFRESH_TOKEN_COOKIE).map(|c| c.value().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    pub identity: Identity,
    /// Set when the access token was re-issued from the refresh token.
    pub renewed_access: Option<String>,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Authentication required")]
pub struct Unauthenticated;

impl From<Unauthenticated> for ServerError {
    fn from(_: Unauthenticated) -> Self {
        ServerError::Unauthenticated
    }
}

/// Resolve the identity behind `tokens`, renewing the access token from the
/// refresh token when needed.
pub fn resolve(tokens: &SessionTokens, service: &TokenService) -> Result<ResolvedSession, Unauthenticated> {
    if let Some(access) = tokens.access.as_deref() {
        match service.verify(access) {
            Ok(claims) if claims.kind == TokenKind::Access => {
                return Ok(ResolvedSession {
                    identity: claims.identity(),
                    renewed_access: None,
                });
            }
            Ok(_) => debug!("Refresh token presented as access token"),
            Err(e) => debug!(error = %e, "Access token rejected"),
        }
    }

    let refresh = tokens.refresh.as_deref().ok_or(Unauthenticated)?;
    let claims = match service.verify(refresh) {
        Ok(claims) if claims.kind == TokenKind::Refresh => claims,
        Ok(_) => return Err(Unauthenticated),
        Err(e) => {
            debug!(error = %e, "Refresh token rejected");
            return Err(Unauthenticated);
        }
    };

    let identity = claims.identity();
    let renewed = service.issue_access_token(&identity).map_err(|e| {
        error!(error = %e, "Failed to re-issue access token");
        Unauthenticated
    })?;

    debug!(user = %identity.id, "Access token renewed from refresh token");
    Ok(ResolvedSession {
        identity,
        renewed_access: Some(renewed),
    })
}

// ---------------------------------------------------------------------------
// Cookie carrier
// ---------------------------------------------------------------------------

fn token_cookie(name: &'static str, value: String, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(secure);
    cookie.set_max_age(time::Duration::seconds(max_age_secs));
    cookie
}

pub fn set_access_cookie(cookies: &Cookies, token: String, service: &TokenService, secure: bool) {
    let ttl = service.policy().access_ttl.num_seconds();
    cookies.add(token_cookie(ACCESS_TOKEN_COOKIE, token, ttl, secure));
}

/// Issue a fresh access/refresh pair for `identity` and store both cookies.
pub fn start_session(
    cookies: &Cookies,
    identity: &Identity,
    service: &TokenService,
    secure: bool,
) -> Result<(), ServerError> {
    let access = service.issue_access_token(identity)?;
    let refresh = service.issue_refresh_token(identity)?;
    let refresh_ttl = service.policy().refresh_ttl.num_seconds();

    set_access_cookie(cookies, access, service, secure);
    cookies.add(token_cookie(REFRESH_TOKEN_COOKIE, refresh, refresh_ttl, secure));
    Ok(())
}

pub fn end_session(cookies: &Cookies) {
    for name in [ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE] {
        let mut cookie = Cookie::new(name, "");
        cookie.set_path("/");
        cookies.remove(cookie);
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// The authenticated caller of a protected route.
///
/// Rejects with 401 when neither token resolves. A renewed access token is
/// added to the response cookies before the handler runs.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let cookies = Cookies::from_request_parts(parts, state)
            .await
            .map_err(|(_, msg)| ServerError::Internal(msg.to_string()))?;

        let session = resolve(&SessionTokens::from_cookies(&cookies), &state.tokens)?;
        if let Some(renewed) = session.renewed_access {
            set_access_cookie(&cookies, renewed, &state.tokens, state.config.cookie_secure);
        }

        Ok(CurrentUser(session.identity))
    }
}
