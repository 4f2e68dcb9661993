//! Thin reqwest client for the snapfile HTTP endpoints

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::{redirect, Body, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use snapfile_core::{Session, SnapfileError, SnapfileResult};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    cookie: Option<String>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("cookie", &self.cookie.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ApiClient {
    pub fn new(base_url: &str) -> SnapfileResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("snapfile/", env!("CARGO_PKG_VERSION")))
            // /logout answers with a redirect to the login page
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| SnapfileError::Config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie: None,
        })
    }

    pub fn for_session(session: &Session) -> SnapfileResult<Self> {
        Ok(Self::new(session.server_url())?.with_cookie(session.cookie().map(str::to_string)))
    }

    pub fn with_cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie;
        self
    }

    /// Session cookie captured by the last signup/login
    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.cookie {
            Some(cookie) => builder.header(COOKIE, cookie),
            None => builder,
        }
    }

    /// Create a folder. `age` is its lifetime in seconds (server default when `None`).
    pub async fn signup(&mut self, identity: &SecretString, age: Option<u64>) -> SnapfileResult<()> {
        let mut form = vec![("identity", identity.expose_secret().to_string())];
        if let Some(age) = age {
            form.push(("age", age.to_string()));
        }
        let resp = self
            .http
            .post(self.url("/signup"))
            .form(&form)
            .send()
            .await
            .map_err(transport)?;
        let resp = check_status(resp).await?;
        self.capture_cookie(&resp);
        info!(status = resp.status().as_u16(), "folder created");
        Ok(())
    }

    /// Log in to an existing folder and keep its session cookie.
    pub async fn login(&mut self, identity: &SecretString) -> SnapfileResult<()> {
        let resp = self
            .http
            .post(self.url("/login"))
            .form(&[("identity", identity.expose_secret())])
            .send()
            .await
            .map_err(transport)?;
        let resp = check_status(resp).await?;
        self.capture_cookie(&resp);
        if self.cookie.is_none() {
            warn!("login succeeded but the server set no session cookie");
        }
        Ok(())
    }

    pub async fn logout(&mut self) -> SnapfileResult<()> {
        let resp = self
            .authed(self.http.post(self.url("/logout")))
            .send()
            .await
            .map_err(transport)?;
        // a redirect to the login page is the normal answer
        if !resp.status().is_redirection() {
            check_status(resp).await?;
        }
        self.cookie = None;
        Ok(())
    }

    /// POST an already encrypted body to `/files?name=`. Returns the server's
    /// status text.
    pub async fn upload(&self, name: &str, body: Body, content_length: u64) -> SnapfileResult<String> {
        debug!(name, content_length, "uploading");
        let resp = self
            .authed(self.http.post(self.url("/files")))
            .query(&[("name", name)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, content_length)
            .body(body)
            .send()
            .await
            .map_err(transport)?;
        let resp = check_status(resp).await?;
        resp.text().await.map_err(transport)
    }

    /// GET `/files?id=&name=`. The body is the encrypted stream.
    pub async fn download(&self, file_id: &str, name: &str) -> SnapfileResult<Response> {
        let resp = self
            .authed(self.http.get(self.url("/files")))
            .query(&[("id", file_id), ("name", name)])
            .send()
            .await
            .map_err(transport)?;
        match check_status(resp).await {
            Err(SnapfileError::UploadFailed { status, message }) => Err(SnapfileError::Transport(
                format!("download failed with status {status}: {message}"),
            )),
            other => other,
        }
    }

    fn capture_cookie(&mut self, resp: &Response) {
        if let Some(cookie) = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(session_pair)
        {
            self.cookie = Some(cookie);
        }
    }
}

/// `name=value` from a `Set-Cookie` header, attributes dropped.
fn session_pair(set_cookie: &str) -> Option<String> {
    let pair = set_cookie.split(';').next()?.trim();
    pair.contains('=').then(|| pair.to_string())
}

fn transport(e: reqwest::Error) -> SnapfileError {
    SnapfileError::Transport(e.to_string())
}

async fn check_status(resp: Response) -> SnapfileResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match status {
        StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE => Err(SnapfileError::QuotaExceeded),
        StatusCode::PAYLOAD_TOO_LARGE => Err(SnapfileError::PayloadTooLarge),
        StatusCode::UNAUTHORIZED => Err(SnapfileError::Unauthorized),
        _ => {
            let message = resp.text().await.unwrap_or_default();
            Err(SnapfileError::UploadFailed {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_pair() {
        assert_eq!(
            session_pair("AIOHTTP_SESSION=\"{}\"; Path=/; HttpOnly").as_deref(),
            Some("AIOHTTP_SESSION=\"{}\"")
        );
        assert_eq!(session_pair("sid=abc").as_deref(), Some("sid=abc"));
        assert_eq!(session_pair("garbage"), None);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let api = ApiClient::new("http://localhost:8080/").unwrap();
        assert_eq!(api.url("/files"), "http://localhost:8080/files");
    }
}
