use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{RenderError, Renderer, RendererFactory};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

/// Static-fetch sessions for server-rendered pages (and tests). No script
/// runs, so the load-more control can never be advanced.
pub struct HttpRendererFactory {
    client: reqwest::Client,
    wait: Duration,
}

impl HttpRendererFactory {
    pub fn new(wait: Duration) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(wait)
            .build()
            .map_err(|e| RenderError::Session(e.to_string()))?;
        Ok(Self { client, wait })
    }
}

#[async_trait]
impl RendererFactory for HttpRendererFactory {
    async fn open_session(&self) -> Result<Box<dyn Renderer>, RenderError> {
        Ok(Box::new(HttpRenderer {
            client: self.client.clone(),
            wait: self.wait,
            last: Mutex::new(String::new()),
        }))
    }
}

pub struct HttpRenderer {
    client: reqwest::Client,
    wait: Duration,
    last: Mutex<String>,
}

impl HttpRenderer {
    fn classify(&self, e: reqwest::Error) -> RenderError {
        if e.is_timeout() {
            RenderError::Timeout(self.wait)
        } else {
            RenderError::Transient(e.to_string())
        }
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(&self, url: &str) -> Result<String, RenderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.classify(e))?;
        let body = response.text().await.map_err(|e| self.classify(e))?;
        *self.last.lock().await = body.clone();
        Ok(body)
    }

    async fn advance_pagination(&self) -> Result<bool, RenderError> {
        // A plain fetch has no clickable control; the first page is all
        // there is.
        Ok(false)
    }

    async fn document(&self) -> Result<String, RenderError> {
        Ok(self.last.lock().await.clone())
    }
}
