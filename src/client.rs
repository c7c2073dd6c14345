use crate::backend::{Backend, CreatedPlugin, Enrollment, MessageResponse};
use crate::config::ConsoleConfig;
use crate::csrf::{is_mutating, CsrfToken};
use crate::error::{ConsoleError, ConsoleResult};
use crate::model::{Plugin, PluginDraft, PluginId, ResourceRecord};
use parking_lot::RwLock;
use reqwest::header::SET_COOKIE;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// reqwest-backed client for the console REST API
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    config: Arc<ConsoleConfig>,
    csrf: Arc<RwLock<Option<CsrfToken>>>,
}

impl HttpBackend {
    pub fn new(config: ConsoleConfig) -> ConsoleResult<Self> {
        config
            .validate()
            .map_err(|e| ConsoleError::Config(e.to_string()))?;
        // No client-wide timeout, an execution stream lives as long as the plugin runs
        let client = Client::builder()
            .gzip(true)
            .connect_timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
            csrf: Arc::new(RwLock::new(None)),
        })
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn set_csrf_token(&self, token: Option<CsrfToken>) {
        *self.csrf.write() = token;
    }

    pub fn csrf_token(&self) -> Option<CsrfToken> {
        self.csrf.read().clone()
    }

    /// Loads the served page and keeps the token from its meta tag, or from the cookie it sets
    pub async fn bootstrap_csrf(&self, page_path: &str) -> ConsoleResult<Option<CsrfToken>> {
        let response = self.request(Method::GET, page_path)?.send().await?;
        let cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect::<Vec<_>>();
        let html = response.text().await?;

        let token = CsrfToken::from_meta(&html).or_else(|| {
            cookies
                .iter()
                .find_map(|c| CsrfToken::from_cookie(c, &self.config.csrf_cookie_name))
        });
        match &token {
            Some(_) => debug!("CSRF token loaded from {}", page_path),
            None => warn!("No CSRF token found at {}", page_path),
        }
        self.set_csrf_token(token.clone());
        Ok(token)
    }

    /// Request builder on the configured base URL, carrying the CSRF header when the method mutates
    pub fn request(&self, method: Method, path: &str) -> ConsoleResult<RequestBuilder> {
        Ok(self
            .stream_request(method, path)?
            .timeout(self.config.request_timeout))
    }

    /// Same as `request` without the overall timeout, for long-lived response bodies
    pub fn stream_request(&self, method: Method, path: &str) -> ConsoleResult<RequestBuilder> {
        let url = self
            .config
            .endpoint(path)
            .map_err(|e| ConsoleError::Config(e.to_string()))?;
        let mutating = is_mutating(&method);
        let mut builder = self.client.request(method, url);
        if mutating {
            match self.csrf_token() {
                Some(token) => {
                    builder = builder.header(self.config.csrf_header.as_str(), token.as_str())
                }
                None => debug!("No CSRF token available for {}", path),
            }
        }
        Ok(builder)
    }

    /// Maps any non-2xx answer to `ConsoleError::Rejected`, keeping the server's message
    pub async fn check(response: Response) -> ConsoleResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!("Backend answered HTTP {}: {}", status.as_u16(), body);
        Err(ConsoleError::rejected(status.as_u16(), &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ConsoleResult<T> {
        let response = Self::check(builder.send().await?).await?;
        let body = response.text().await?;
        trace!("Backend payload: {}", body);
        Ok(serde_json::from_str(&body)?)
    }
}

impl Backend for HttpBackend {
    async fn list_resources(&self) -> ConsoleResult<Vec<ResourceRecord>> {
        self.send_json(self.request(Method::GET, "/api/resources/list/")?)
            .await
    }

    async fn save_resource(&self, enrollment: &Enrollment) -> ConsoleResult<MessageResponse> {
        self.send_json(self.request(Method::POST, "/api/resources/")?.json(enrollment))
            .await
    }

    async fn delete_resource(&self, ip_address: &str) -> ConsoleResult<MessageResponse> {
        self.send_json(
            self.request(Method::POST, "/api/resources/delete/")?
                .json(&json!({ "ip_address": ip_address })),
        )
        .await
    }

    async fn list_plugins(&self) -> ConsoleResult<Vec<Plugin>> {
        self.send_json(self.request(Method::GET, "/api/plugins/")?)
            .await
    }

    async fn create_plugin(&self, draft: &PluginDraft) -> ConsoleResult<CreatedPlugin> {
        self.send_json(self.request(Method::POST, "/api/plugins/")?.json(draft))
            .await
    }

    async fn update_plugin(
        &self,
        id: &PluginId,
        draft: &PluginDraft,
    ) -> ConsoleResult<MessageResponse> {
        let path = format!("/api/plugins/{}", id);
        self.send_json(self.request(Method::PUT, &path)?.json(draft))
            .await
    }

    async fn delete_plugin(&self, id: &PluginId) -> ConsoleResult<()> {
        let path = format!("/api/plugins/{}", id);
        Self::check(self.request(Method::DELETE, &path)?.send().await?).await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_server::*;
    use super::*;

    fn backend_for(base_url: &str) -> HttpBackend {
        HttpBackend::new(ConsoleConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_resources() {
        let body = r#"[{"ip_address": "10.0.0.1", "hostname": "web"}, {"ip_address": "10.0.0.2"}]"#;
        let (base_url, server) =
            serve_once(http_response("200 OK", "application/json", &[], body)).await;
        let backend = backend_for(&base_url);

        let records = backend.list_resources().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].hostname.as_deref(), Some("web"));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/resources/list/ HTTP/1.1"));
        assert!(!request.to_lowercase().contains("x-csrftoken"));
    }

    #[tokio::test]
    async fn test_mutating_request_carries_csrf() {
        let (base_url, server) = serve_once(http_response(
            "200 OK",
            "application/json",
            &[],
            r#"{"message": "Resource saved successfully"}"#,
        ))
        .await;
        let backend = backend_for(&base_url);
        backend.set_csrf_token(CsrfToken::new("tok42"));

        let reply = backend
            .save_resource(&Enrollment {
                ip_address: "10.0.0.9".to_string(),
                username: "root".to_string(),
                password: "pw".to_string(),
            })
            .await
            .unwrap();
        assert!(reply.is("Resource saved successfully"));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/resources/ HTTP/1.1"));
        assert!(request.to_lowercase().contains("x-csrftoken: tok42"));
        assert!(request.contains(r#""ipAddress":"10.0.0.9""#));
    }

    #[tokio::test]
    async fn test_rejected_keeps_server_message() {
        let (base_url, server) = serve_once(http_response(
            "400 Bad Request",
            "application/json",
            &[],
            r#"{"error": "Script with name disk already exists."}"#,
        ))
        .await;
        let backend = backend_for(&base_url);

        let err = backend
            .create_plugin(&PluginDraft {
                name: "disk".to_string(),
                role_config: "df -h".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConsoleError::Rejected { status: 400, .. }));
        assert_eq!(
            err.user_message("fallback"),
            "Script with name disk already exists."
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_plugin_path() {
        let (base_url, server) =
            serve_once(http_response("204 No Content", "text/plain", &[], "")).await;
        let backend = backend_for(&base_url);
        backend.delete_plugin(&PluginId::new("7")).await.unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("DELETE /api/plugins/7 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_bootstrap_csrf_from_cookie() {
        let (base_url, server) = serve_once(http_response(
            "200 OK",
            "text/html",
            &["Set-Cookie: csrftoken=cookie-token; Path=/; SameSite=Lax"],
            "<html><head></head></html>",
        ))
        .await;
        let backend = backend_for(&base_url);
        let token = backend.bootstrap_csrf("/").await.unwrap();
        assert_eq!(token.unwrap().as_str(), "cookie-token");
        assert_eq!(backend.csrf_token().unwrap().as_str(), "cookie-token");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let backend = backend_for("http://127.0.0.1:1");
        let err = backend.list_plugins().await.unwrap_err();
        assert!(matches!(err, ConsoleError::Http(_)));
    }
}
