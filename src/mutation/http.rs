//! HTTP implementation of the mutation endpoint.
//!
//! Routes, relative to `base_url`. The user id is always a single
//! percent-encoded path segment:
//! - `PUT  /profiles/{user_id}`            profile document
//! - `PUT  /settings/{user_id}`            settings document
//! - `DELETE /storage/objects?url={old}`   prior avatar object
//! - `PATCH /profiles/{user_id}/avatar`    `{"avatarUrl": ...}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::json;

use crate::config::EndpointConfig;

use super::{ApplyError, AvatarUpdate, MutationEndpoint, ProfileUpdate, SettingsUpdate};

pub struct HttpMutationEndpoint {
    client: Client,
    base_url: Url,
    bearer_token: Option<String>,
}

impl HttpMutationEndpoint {
    pub fn new(config: &EndpointConfig) -> Result<Self, ApplyError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ApplyError::Permanent(format!("invalid endpoint base URL {}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApplyError::Permanent(format!(
                "endpoint base URL {} cannot carry a path",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| ApplyError::Permanent(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            bearer_token: config.bearer_token.clone(),
        })
    }

    /// `base_url` followed by `segments`, each percent-encoded on its own
    fn url(&self, segments: &[&str]) -> Result<Url, ApplyError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApplyError::Permanent(format!("endpoint base URL {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Route for one user's resource. Ids that are empty or a dot segment
    /// would address a different resource and are rejected.
    fn user_url(&self, collection: &str, user_id: &str, rest: &[&str]) -> Result<Url, ApplyError> {
        if matches!(user_id, "" | "." | "..") {
            return Err(ApplyError::Permanent(format!("invalid user id {:?}", user_id)));
        }
        let mut segments = vec![collection, user_id];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, ApplyError> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| ApplyError::Transient(e.to_string()))
    }

    async fn expect_success(response: Response) -> Result<(), ApplyError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApplyError::from_status(status.as_u16(), body))
    }
}

#[async_trait]
impl MutationEndpoint for HttpMutationEndpoint {
    async fn apply_profile_update(&self, payload: &ProfileUpdate) -> Result<(), ApplyError> {
        let url = self.user_url("profiles", &payload.user_id, &[])?;
        let response = self.execute(self.client.put(url).json(payload)).await?;
        Self::expect_success(response).await
    }

    async fn apply_settings_update(&self, payload: &SettingsUpdate) -> Result<(), ApplyError> {
        let url = self.user_url("settings", &payload.user_id, &[])?;
        let response = self.execute(self.client.put(url).json(&payload.values)).await?;
        Self::expect_success(response).await
    }

    async fn apply_avatar_update(&self, payload: &AvatarUpdate) -> Result<(), ApplyError> {
        let url = self.user_url("profiles", &payload.user_id, &["avatar"])?;

        if let Some(old) = payload.old_avatar_url.as_deref().filter(|old| *old != payload.avatar_url) {
            let request = self
                .client
                .delete(self.url(&["storage", "objects"])?)
                .query(&[("url", old)]);
            let response = self.execute(request).await?;

            // Already gone counts as deleted; a retry after a partial apply lands here
            if response.status() != StatusCode::NOT_FOUND {
                Self::expect_success(response).await?;
            }

            tracing::debug!(user_id = %payload.user_id, "Previous avatar object deleted");
        }

        let body = json!({ "avatarUrl": payload.avatar_url });
        let response = self.execute(self.client.patch(url).json(&body)).await?;
        Self::expect_success(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(base_url: &str) -> HttpMutationEndpoint {
        HttpMutationEndpoint::new(&EndpointConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let endpoint = endpoint("https://api.example.com/v1/");

        let url = endpoint.user_url("profiles", "u1", &[]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/profiles/u1");

        let url = endpoint.user_url("profiles", "u1", &["avatar"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/profiles/u1/avatar");

        let url = endpoint.url(&["storage", "objects"]).unwrap();
        assert_eq!(url.path(), "/v1/storage/objects");
    }

    #[test]
    fn test_user_id_stays_one_segment() {
        let endpoint = endpoint("http://localhost/api");

        let url = endpoint.user_url("profiles", "../settings/victim", &[]).unwrap();
        assert_eq!(url.path(), "/api/profiles/..%2Fsettings%2Fvictim");

        let url = endpoint.user_url("settings", "a?b#c d", &[]).unwrap();
        assert_eq!(url.path(), "/api/settings/a%3Fb%23c%20d");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_dot_segment_user_ids_are_rejected() {
        let endpoint = endpoint("http://localhost/api");

        for user_id in ["", ".", ".."] {
            let result = endpoint.user_url("profiles", user_id, &[]);
            assert!(matches!(result, Err(ApplyError::Permanent(_))), "{:?} accepted", user_id);
        }
    }

    /// Answer one request with 204 and hand back its request line
    async fn capture_request_line(listener: tokio::net::TcpListener) -> String {
        use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

        let (socket, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(socket);
        let mut request_line = String::new();
        reader.read_line(&mut request_line).await.unwrap();

        let mut content_length = 0;
        let mut line = String::new();
        loop {
            line.clear();
            reader.read_line(&mut line).await.unwrap();
            if line == "\r\n" || line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap();
                }
            }
        }
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).await.unwrap();
        reader
            .get_mut()
            .write_all(b"HTTP/1.1 204 No Content\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();

        request_line.trim_end().to_string()
    }

    #[tokio::test]
    async fn test_profile_write_cannot_escape_its_route() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(capture_request_line(listener));

        let endpoint = endpoint(&format!("http://{}/api", addr));
        let result = endpoint
            .apply_profile_update(&ProfileUpdate {
                user_id: "../settings/victim".to_string(),
                display_name: Some("Mallory".to_string()),
                bio: None,
                location: None,
                website: None,
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(
            server.await.unwrap(),
            "PUT /api/profiles/..%2Fsettings%2Fvictim HTTP/1.1"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = HttpMutationEndpoint::new(&EndpointConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(ApplyError::Permanent(_))));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let endpoint = HttpMutationEndpoint::new(&EndpointConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            bearer_token: None,
        })
        .unwrap();

        let result = endpoint
            .apply_settings_update(&SettingsUpdate {
                user_id: "u1".to_string(),
                values: json!({"theme": "dark"}),
            })
            .await;

        assert!(matches!(result, Err(ApplyError::Transient(_))));
    }
}
