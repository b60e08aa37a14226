use std::future::Future;
use std::time::Duration;

use tracing::trace;

use crate::Result;

pub const SESSION_COOKIE: &str = "JSESSIONID";

/// HTTP plumbing underneath a [`MaxSession`](crate::MaxSession).
///
/// Implementations own whatever keeps the server-side session alive (cookies) and report the
/// server-assigned session id after each request.
pub trait Transport: Send {
    fn get(&mut self, url: &str) -> impl Future<Output = Result<String>> + Send;

    fn post_form(
        &mut self,
        url: &str,
        params: &[(String, String)],
    ) -> impl Future<Output = Result<String>> + Send;

    fn session_id(&self) -> Option<String>;

    /// Drop the current HTTP session so the next request starts a fresh one.
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct HttpTransport {
    http: reqwest::Client,
    timeout: Option<Duration>,
    session_id: Option<String>,
}

impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            timeout,
            session_id: None,
        })
    }

    fn capture_session(&mut self, resp: &reqwest::Response) {
        if let Some(cookie) = resp.cookies().find(|c| c.name() == SESSION_COOKIE) {
            trace!(session = cookie.value(), "server assigned session");
            self.session_id = Some(cookie.value().to_string());
        }
    }
}

impl Transport for HttpTransport {
    async fn get(&mut self, url: &str) -> Result<String> {
        let resp = self.http.get(url).send().await?.error_for_status()?;
        self.capture_session(&resp);
        Ok(resp.text().await?)
    }

    async fn post_form(&mut self, url: &str, params: &[(String, String)]) -> Result<String> {
        let resp = self
            .http
            .post(url)
            .form(params)
            .send()
            .await?
            .error_for_status()?;
        self.capture_session(&resp);
        Ok(resp.text().await?)
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    fn reset(&mut self) -> Result<()> {
        self.http = build_client(self.timeout)?;
        self.session_id = None;
        Ok(())
    }
}

fn build_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().cookie_store(true);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}
