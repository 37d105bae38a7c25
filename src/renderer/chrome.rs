use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tracing::debug;

use super::{RenderError, Renderer, RendererFactory};

const CONTROL_POLL: Duration = Duration::from_millis(250);
const CONTROL_WAIT: Duration = Duration::from_secs(5);

// Locate the load-more control by its visible label and click it in-page.
const FIND_AND_CLICK_MORE: &str = r#"
(() => {
  const candidates = Array.from(document.querySelectorAll('button, a, div[role="button"]'));
  const control = candidates.find((el) => {
    const text = (el.textContent || '').trim().toLowerCase();
    return text.includes('더보기') || text.includes('더 보기') || text.includes('load more');
  });
  if (!control) return false;
  control.scrollIntoView({ block: 'center' });
  control.click();
  return true;
})()
"#;

/// Launches one headless Chrome and hands out a fresh tab per session.
pub struct ChromeRendererFactory {
    browser: Browser,
    wait: Duration,
    settle: Duration,
}

impl ChromeRendererFactory {
    pub async fn launch(headless: bool, wait: Duration, settle: Duration) -> Result<Self, RenderError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--blink-settings=imagesEnabled=false");
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(RenderError::Session)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Session(e.to_string()))?;

        // The CDP connection stalls unless its event stream is drained.
        tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(Self { browser, wait, settle })
    }
}

#[async_trait]
impl RendererFactory for ChromeRendererFactory {
    async fn open_session(&self) -> Result<Box<dyn Renderer>, RenderError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Session(e.to_string()))?;
        Ok(Box::new(ChromeSession {
            page,
            wait: self.wait,
            settle: self.settle,
        }))
    }
}

/// One browser tab. Navigation waits are bounded by `wait`; every
/// navigation is followed by the fixed `settle` delay so client-rendered
/// content stabilizes before the document is read.
pub struct ChromeSession {
    page: Page,
    wait: Duration,
    settle: Duration,
}

#[async_trait]
impl Renderer for ChromeSession {
    async fn render(&self, url: &str) -> Result<String, RenderError> {
        let navigation = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| RenderError::Transient(e.to_string()))?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| RenderError::Transient(e.to_string()))?;
            Ok::<(), RenderError>(())
        };
        tokio::time::timeout(self.wait, navigation)
            .await
            .map_err(|_| RenderError::Timeout(self.wait))??;

        tokio::time::sleep(self.settle).await;
        self.document().await
    }

    async fn advance_pagination(&self) -> Result<bool, RenderError> {
        let deadline = Instant::now() + CONTROL_WAIT;
        loop {
            let clicked = self
                .page
                .evaluate(FIND_AND_CLICK_MORE)
                .await
                .map_err(|e| RenderError::Transient(e.to_string()))?
                .into_value::<bool>()
                .unwrap_or(false);
            if clicked {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                debug!("load-more control not found within {CONTROL_WAIT:?}");
                return Ok(false);
            }
            tokio::time::sleep(CONTROL_POLL).await;
        }
    }

    async fn document(&self) -> Result<String, RenderError> {
        self.page
            .content()
            .await
            .map_err(|e| RenderError::Session(e.to_string()))
    }
}
