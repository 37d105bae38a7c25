pub mod chrome;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Why a render attempt produced nothing usable. `Timeout` and `Transient`
/// are try-again-later signals scoped to one page; `Session` means the
/// session itself is unusable and must be reopened.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render timed out after {0:?}")]
    Timeout(Duration),
    #[error("transient render failure: {0}")]
    Transient(String),
    #[error("renderer session lost: {0}")]
    Session(String),
}

/// One rendering session. Sessions are not thread-safe resources: every
/// worker owns its own, and a session is never shared across workers.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Navigate to `url` and return the document text once dynamic content
    /// has settled.
    async fn render(&self, url: &str) -> Result<String, RenderError>;

    /// Click the listing's load-more control once. `Ok(false)` means the
    /// control is absent or stopped responding within the bounded wait:
    /// the listing is exhausted, not broken.
    async fn advance_pagination(&self) -> Result<bool, RenderError>;

    /// The current document text, without navigating.
    async fn document(&self) -> Result<String, RenderError>;
}

/// Opens private sessions, one per worker.
#[async_trait]
pub trait RendererFactory: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn Renderer>, RenderError>;
}

// ── Test support ──

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{RenderError, Renderer, RendererFactory};

    /// Shared script for scripted sessions: a fixed document, a number of
    /// pagination advances that succeed, and counters the tests assert on.
    #[derive(Default)]
    pub struct ScriptedState {
        pub document: String,
        pub clicks_available: AtomicUsize,
        pub timeout_renders: bool,
        pub advances: AtomicUsize,
        pub renders: AtomicUsize,
        pub document_reads: AtomicUsize,
        pub sessions_opened: AtomicUsize,
    }

    pub struct ScriptedRenderer(pub Arc<ScriptedState>);

    #[async_trait]
    impl Renderer for ScriptedRenderer {
        async fn render(&self, _url: &str) -> Result<String, RenderError> {
            if self.0.timeout_renders {
                return Err(RenderError::Timeout(Duration::from_millis(10)));
            }
            self.0.renders.fetch_add(1, Ordering::SeqCst);
            Ok(self.0.document.clone())
        }

        async fn advance_pagination(&self) -> Result<bool, RenderError> {
            let clicked = self
                .0
                .clicks_available
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
                .is_ok();
            if clicked {
                self.0.advances.fetch_add(1, Ordering::SeqCst);
            }
            Ok(clicked)
        }

        async fn document(&self) -> Result<String, RenderError> {
            self.0.document_reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.0.document.clone())
        }
    }

    pub struct ScriptedFactory(pub Arc<ScriptedState>);

    #[async_trait]
    impl RendererFactory for ScriptedFactory {
        async fn open_session(&self) -> Result<Box<dyn Renderer>, RenderError> {
            self.0.sessions_opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedRenderer(Arc::clone(&self.0))))
        }
    }
}
