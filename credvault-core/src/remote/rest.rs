//! HTTP clients for the hosted backend.
//!
//! The identity service follows the GoTrue API under `/auth/v1`, the
//! credential table is exposed by PostgREST under `/rest/v1/credentials`.
//! Every request carries the project's anon key in the `apikey` header and a
//! bearer token (the session's access token, or the anon key before sign-in).

use crate::models::{CredentialRow, CredentialRowPatch, NewCredentialRow, Session, User};
use crate::remote::{CredentialTable, IdentityProvider, SignUpResponse};
use crate::{Result, VaultError};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const CREDENTIALS_PATH: &str = "/rest/v1/credentials";

/// Shared HTTP client for the hosted backend
#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl RestClient {
    /// Create a new client for the project at `base_url`
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(VaultError::Config("backend_url is not set".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VaultError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            anon_key: anon_key.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, bearer: Option<&str>) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer.unwrap_or(&self.anon_key))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| VaultError::transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        let status = response.status();
        response.json::<T>().await.map_err(|e| VaultError::Remote {
            status: Some(status.as_u16()),
            message: format!("Invalid response body: {}", e),
        })
    }
}

/// Error payload shapes used by the backend's services
#[derive(Deserialize, Default)]
struct ErrorBody {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

async fn error_from_response(response: Response) -> VaultError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let message = body
        .message
        .or(body.msg)
        .or(body.error_description)
        .or(body.error)
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                status.to_string()
            } else {
                text.trim().to_string()
            }
        });

    VaultError::Remote {
        status: Some(status.as_u16()),
        message,
    }
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

/// The `credentials` table over PostgREST
#[derive(Clone)]
pub struct RestTable {
    client: RestClient,
}

impl RestTable {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }

    fn first_or_not_found(rows: Vec<CredentialRow>, id: &str) -> Result<CredentialRow> {
        rows.into_iter()
            .next()
            .ok_or_else(|| VaultError::NotFound(format!("Credential {}", id)))
    }
}

#[async_trait]
impl CredentialTable for RestTable {
    async fn select_by_owner(&self, session: &Session) -> Result<Vec<CredentialRow>> {
        debug!("Selecting credentials by owner");
        let request = self
            .client
            .request(Method::GET, CREDENTIALS_PATH, Some(&session.access_token))
            .query(&[
                ("select", "*".to_string()),
                ("user_id", eq(session.user_id())),
                ("order", "created_at.desc".to_string()),
            ]);
        self.client.send_json(request).await
    }

    async fn select_one(&self, session: &Session, id: &str) -> Result<CredentialRow> {
        let request = self
            .client
            .request(Method::GET, CREDENTIALS_PATH, Some(&session.access_token))
            .query(&[
                ("select", "*".to_string()),
                ("id", eq(id)),
                ("user_id", eq(session.user_id())),
            ]);
        let rows: Vec<CredentialRow> = self.client.send_json(request).await?;
        Self::first_or_not_found(rows, id)
    }

    async fn insert(&self, session: &Session, row: NewCredentialRow) -> Result<CredentialRow> {
        debug!("Inserting credential");
        let request = self
            .client
            .request(Method::POST, CREDENTIALS_PATH, Some(&session.access_token))
            .header("Prefer", "return=representation")
            .json(&row);
        let rows: Vec<CredentialRow> = self.client.send_json(request).await?;
        rows.into_iter().next().ok_or_else(|| VaultError::Remote {
            status: None,
            message: "Insert returned no row".to_string(),
        })
    }

    async fn update(
        &self,
        session: &Session,
        id: &str,
        patch: CredentialRowPatch,
    ) -> Result<CredentialRow> {
        debug!(id, "Updating credential");
        let request = self
            .client
            .request(Method::PATCH, CREDENTIALS_PATH, Some(&session.access_token))
            .query(&[("id", eq(id)), ("user_id", eq(session.user_id()))])
            .header("Prefer", "return=representation")
            .json(&patch);
        let rows: Vec<CredentialRow> = self.client.send_json(request).await?;
        Self::first_or_not_found(rows, id)
    }

    async fn delete(&self, session: &Session, id: &str) -> Result<()> {
        debug!(id, "Deleting credential");
        let request = self
            .client
            .request(Method::DELETE, CREDENTIALS_PATH, Some(&session.access_token))
            .query(&[("id", eq(id)), ("user_id", eq(session.user_id()))])
            .header("Prefer", "return=representation");
        let rows: Vec<CredentialRow> = self.client.send_json(request).await?;
        Self::first_or_not_found(rows, id).map(|_| ())
    }
}

#[derive(Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Token or sign-up response. A sign-up awaiting email confirmation
/// returns the bare user object instead of a session.
#[derive(Deserialize)]
struct AuthResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: Option<AuthUser>,
    id: Option<String>,
    email: Option<String>,
}

impl AuthResponse {
    fn into_parts(self) -> Result<(User, Option<Session>)> {
        let user = match (self.user, self.id) {
            (Some(user), _) => User {
                id: user.id,
                email: user.email,
            },
            (None, Some(id)) => User {
                id,
                email: self.email,
            },
            (None, None) => {
                return Err(VaultError::Remote {
                    status: None,
                    message: "Auth response carried no user".to_string(),
                })
            }
        };

        let session = self.access_token.map(|access_token| Session {
            user: user.clone(),
            access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_at
                .or_else(|| self.expires_in.map(|secs| Utc::now().timestamp() + secs)),
        });

        Ok((user, session))
    }
}

/// The identity service over the GoTrue API
#[derive(Clone)]
pub struct RestIdentity {
    client: RestClient,
}

impl RestIdentity {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdentityProvider for RestIdentity {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpResponse> {
        let request = self
            .client
            .request(Method::POST, "/auth/v1/signup", None)
            .json(&serde_json::json!({ "email": email, "password": password }));
        let response: AuthResponse = self.client.send_json(request).await?;
        let (user, session) = response.into_parts()?;
        Ok(SignUpResponse { user, session })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let request = self
            .client
            .request(Method::POST, "/auth/v1/token", None)
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({ "email": email, "password": password }));
        let response: AuthResponse = self.client.send_json(request).await?;
        let (_, session) = response.into_parts()?;
        session.ok_or_else(|| VaultError::Remote {
            status: None,
            message: "Sign-in returned no session".to_string(),
        })
    }

    async fn sign_out(&self, session: &Session) -> Result<()> {
        let request = self
            .client
            .request(Method::POST, "/auth/v1/logout", Some(&session.access_token));

        match self.client.send(request).await {
            Ok(_) => Ok(()),
            // The token is already invalid server-side
            Err(VaultError::Remote {
                status: Some(code),
                ..
            }) if code == StatusCode::UNAUTHORIZED.as_u16()
                || code == StatusCode::NOT_FOUND.as_u16() =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> RestClient {
        RestClient::new(base_url, "anon-key", Duration::from_secs(5)).unwrap()
    }

    fn test_session() -> Session {
        Session {
            user: User {
                id: "user-1".to_string(),
                email: Some("bob@example.com".to_string()),
            },
            access_token: "access-1".to_string(),
            refresh_token: None,
            expires_at: None,
        }
    }

    fn row_json(id: &str, platform: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "user_id": "user-1",
            "platform": platform,
            "username": "bob",
            "password": "sealed",
            "email": null,
            "notes": null,
            "created_at": "2024-05-01T10:00:00+00:00",
            "updated_at": "2024-05-01T10:00:00+00:00"
        })
    }

    #[test]
    fn test_empty_base_url_rejected() {
        assert!(matches!(
            RestClient::new("  ", "anon", Duration::from_secs(5)),
            Err(VaultError::Config(_))
        ));
        let client = test_client("https://example.test/");
        assert_eq!(client.base_url(), "https://example.test");
    }

    #[tokio::test]
    async fn test_select_by_owner_filters_and_orders() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/credentials"))
            .and(query_param("user_id", "eq.user-1"))
            .and(query_param("order", "created_at.desc"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer access-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([row_json("2", "Bank"), row_json("1", "Mail")])),
            )
            .mount(&server)
            .await;

        let table = RestTable::new(test_client(&server.uri()));
        let rows = table.select_by_owner(&test_session()).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].platform, "Bank");
    }

    #[tokio::test]
    async fn test_insert_sends_row_and_returns_representation() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/credentials"))
            .and(header("prefer", "return=representation"))
            .and(body_json(serde_json::json!({
                "user_id": "user-1",
                "platform": "Mail",
                "username": "bob",
                "password": "sealed"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!([row_json("9", "Mail")])))
            .mount(&server)
            .await;

        let table = RestTable::new(test_client(&server.uri()));
        let row = table
            .insert(
                &test_session(),
                NewCredentialRow {
                    user_id: "user-1".to_string(),
                    platform: "Mail".to_string(),
                    username: "bob".to_string(),
                    password: "sealed".to_string(),
                    email: None,
                    notes: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(row.id, "9");
    }

    #[tokio::test]
    async fn test_update_with_no_matching_row_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/rest/v1/credentials"))
            .and(query_param("id", "eq.42"))
            .and(query_param("user_id", "eq.user-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let table = RestTable::new(test_client(&server.uri()));
        let result = table
            .update(
                &test_session(),
                "42",
                CredentialRowPatch {
                    platform: Some("Mail".to_string()),
                    username: None,
                    password: None,
                    email: None,
                    notes: None,
                    updated_at: Utc::now(),
                },
            )
            .await;

        assert!(matches!(result, Err(VaultError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_scopes_by_id_and_owner() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/rest/v1/credentials"))
            .and(query_param("id", "eq.1"))
            .and(query_param("user_id", "eq.user-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([row_json("1", "Mail")])))
            .expect(1)
            .mount(&server)
            .await;

        let table = RestTable::new(test_client(&server.uri()));
        table.delete(&test_session(), "1").await.unwrap();
    }

    #[tokio::test]
    async fn test_backend_error_message_surfaces() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/credentials"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "code": "PGRST301",
                "message": "JWT expired"
            })))
            .mount(&server)
            .await;

        let table = RestTable::new(test_client(&server.uri()));
        let result = table.select_by_owner(&test_session()).await;

        match result {
            Err(VaultError::Remote { status, message }) => {
                assert_eq!(status, Some(401));
                assert_eq!(message, "JWT expired");
            }
            other => panic!("unexpected result: {:?}", other.map(|rows| rows.len())),
        }
    }

    #[tokio::test]
    async fn test_sign_in_returns_session() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("apikey", "anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-1",
                "refresh_token": "refresh-1",
                "expires_in": 3600,
                "token_type": "bearer",
                "user": { "id": "user-1", "email": "bob@example.com" }
            })))
            .mount(&server)
            .await;

        let identity = RestIdentity::new(test_client(&server.uri()));
        let session = identity.sign_in("bob@example.com", "account-pw").await.unwrap();

        assert_eq!(session.user.id, "user-1");
        assert_eq!(session.access_token, "access-1");
        assert!(session.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_sign_in_failure_uses_error_description() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let identity = RestIdentity::new(test_client(&server.uri()));
        let result = identity.sign_in("bob@example.com", "nope").await;

        assert!(matches!(
            result,
            Err(VaultError::Remote { status: Some(400), ref message }) if message == "Invalid login credentials"
        ));
    }

    #[tokio::test]
    async fn test_sign_up_pending_confirmation_has_no_session() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "user-2",
                "email": "new@example.com",
                "confirmation_sent_at": "2024-05-01T10:00:00Z"
            })))
            .mount(&server)
            .await;

        let identity = RestIdentity::new(test_client(&server.uri()));
        let response = identity.sign_up("new@example.com", "account-pw").await.unwrap();

        assert_eq!(response.user.id, "user-2");
        assert!(response.session.is_none());
    }

    #[tokio::test]
    async fn test_sign_out_tolerates_expired_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let identity = RestIdentity::new(test_client(&server.uri()));
        identity.sign_out(&test_session()).await.unwrap();
    }
}
