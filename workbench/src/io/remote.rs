//! Repository-hosting API client used by the backup pipeline.
//!
//! [`RemoteHost`] decouples the orchestrator from the hosting service. Tests
//! use a scripted host that returns predetermined repositories.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{Result, WorkbenchError};

/// A freshly created remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepo {
    /// URL git pushes to.
    pub clone_url: String,
    /// URL reported back to the user.
    pub html_url: String,
}

/// Abstraction over repository-hosting backends.
pub trait RemoteHost: Send + Sync {
    /// Create a private repository called `name`, authenticating with `token`.
    ///
    /// Failures map to [`WorkbenchError::RemoteCreate`] with the host's payload.
    fn create_repo<'a>(&'a self, name: &'a str, token: &'a str) -> BoxFuture<'a, Result<RemoteRepo>>;
}

#[derive(Serialize)]
struct CreateRepoRequest<'a> {
    name: &'a str,
    private: bool,
}

/// GitHub REST API (`POST /user/repos`).
#[derive(Debug, Clone)]
pub struct GitHubHost {
    client: reqwest::Client,
    api_base: String,
    user_agent: String,
}

impl GitHubHost {
    pub fn new(api_base: impl Into<String>, user_agent: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| WorkbenchError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            user_agent: user_agent.into(),
        })
    }

    #[instrument(skip_all, fields(repo = name))]
    async fn create(&self, name: &str, token: &str) -> Result<RemoteRepo> {
        let url = format!("{}/user/repos", self.api_base);
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/vnd.github+json")
            .json(&CreateRepoRequest {
                name,
                private: true,
            })
            .send()
            .await
            .map_err(|e| {
                warn!(err = %e, "repository create request failed");
                WorkbenchError::RemoteCreate {
                    status: None,
                    payload: e.to_string(),
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(status = status.as_u16(), "remote refused repository create");
            return Err(WorkbenchError::RemoteCreate {
                status: Some(status.as_u16()),
                payload: body,
            });
        }
        let repo: RemoteRepo =
            serde_json::from_str(&body).map_err(|e| WorkbenchError::RemoteCreate {
                status: Some(status.as_u16()),
                payload: format!("unexpected response ({e}): {body}"),
            })?;
        info!(url = %repo.html_url, "remote repository created");
        Ok(repo)
    }
}

impl RemoteHost for GitHubHost {
    fn create_repo<'a>(&'a self, name: &'a str, token: &'a str) -> BoxFuture<'a, Result<RemoteRepo>> {
        Box::pin(self.create(name, token))
    }
}

/// Embed `token` as the userinfo of `clone_url` for non-interactive pushes.
///
/// URLs that cannot carry credentials (local paths, `file://`) are returned
/// unchanged.
pub fn authenticated_url(clone_url: &str, token: &str) -> String {
    let Ok(mut url) = reqwest::Url::parse(clone_url) else {
        return clone_url.to_string();
    };
    if !url.has_host() || url.scheme() == "file" {
        return clone_url.to_string();
    }
    if url.set_password(None).is_err() || url.set_username(token).is_err() {
        return clone_url.to_string();
    }
    url.to_string()
}

/// Replace every occurrence of `token` in `text`.
pub fn redact(text: &str, token: &str) -> String {
    if token.is_empty() {
        return text.to_string();
    }
    text.replace(token, "***")
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;

    use super::*;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    #[test]
    fn token_goes_into_userinfo() {
        assert_eq!(
            authenticated_url("https://github.com/me/demo.git", "tok123"),
            "https://tok123@github.com/me/demo.git"
        );
        assert_eq!(
            authenticated_url("https://old:pw@github.com/me/demo.git", "tok123"),
            "https://tok123@github.com/me/demo.git"
        );
    }

    #[test]
    fn local_urls_are_left_alone() {
        assert_eq!(authenticated_url("/srv/git/demo.git", "t"), "/srv/git/demo.git");
        assert_eq!(
            authenticated_url("file:///srv/git/demo.git", "t"),
            "file:///srv/git/demo.git"
        );
    }

    #[test]
    fn redact_hides_token() {
        assert_eq!(
            redact("push to https://s3cr3t@github.com failed", "s3cr3t"),
            "push to https://***@github.com failed"
        );
        assert_eq!(redact("unchanged", ""), "unchanged");
    }

    #[tokio::test]
    async fn create_sends_bearer_token_and_parses_repo() {
        let app = Router::new().route(
            "/user/repos",
            post(|headers: HeaderMap, body: String| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                if auth != "Bearer good" || !body.contains("\"private\":true") {
                    return (StatusCode::BAD_REQUEST, String::new());
                }
                (
                    StatusCode::CREATED,
                    r#"{"clone_url":"https://h/me/demo.git","html_url":"https://h/me/demo","id":1}"#
                        .to_string(),
                )
            }),
        );
        let base = serve(app).await;
        let host = GitHubHost::new(base, "workbench-test").expect("host");

        let repo = host.create_repo("demo", "good").await.expect("create");
        assert_eq!(repo.clone_url, "https://h/me/demo.git");
        assert_eq!(repo.html_url, "https://h/me/demo");
    }

    #[tokio::test]
    async fn non_success_maps_to_remote_create_with_payload() {
        let app = Router::new().route(
            "/user/repos",
            post(|| async { (StatusCode::UNAUTHORIZED, r#"{"message":"Bad credentials"}"#) }),
        );
        let base = serve(app).await;
        let host = GitHubHost::new(format!("{base}/"), "workbench-test").expect("host");

        let err = host.create_repo("demo", "bad").await.unwrap_err();
        match err {
            WorkbenchError::RemoteCreate { status, payload } => {
                assert_eq!(status, Some(401));
                assert!(payload.contains("Bad credentials"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
