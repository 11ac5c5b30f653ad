//! Robust-path extraction through a headless browser.
//!
//! Every link gets its own [`BrowserSession`]: a freshly launched browser with
//! a private profile directory, torn down as soon as the page content has been
//! read. Nothing is shared between renders, so a crashed or wedged page can
//! only ever cost its own link.

use super::extract::parse_article;
use super::{PageFetcher, TierOutcome};
use crate::config::Settings;
use crate::error::FetchError;
use crate::models::CandidateLink;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

static SESSION_SEQ: AtomicUsize = AtomicUsize::new(0);

/// How long a closing browser gets to exit before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// One isolated browser process.
///
/// Prefer [`BrowserSession::close`]; if the session is dropped on an error
/// path, the browser is killed on the runtime it was launched from and the
/// profile directory is removed.
pub struct BrowserSession {
    browser: Option<Browser>,
    handler: JoinHandle<()>,
    profile_dir: PathBuf,
    runtime: tokio::runtime::Handle,
}

impl BrowserSession {
    #[instrument(level = "debug", skip_all)]
    pub async fn launch(settings: &Settings) -> Result<Self, FetchError> {
        let profile_dir = std::env::temp_dir().join(format!(
            "insightbee-browser-{}-{}",
            std::process::id(),
            SESSION_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&profile_dir)
            .request_timeout(Duration::from_secs(settings.browser.render_timeout_secs))
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", settings.extraction.user_agent));
        if settings.browser.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &settings.browser.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(FetchError::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Browser handler event error");
                }
            }
        });

        Ok(Self {
            browser: Some(browser),
            handler,
            profile_dir,
            runtime: tokio::runtime::Handle::current(),
        })
    }

    /// Load `url`, wait for the document body, and return the rendered HTML.
    pub async fn render(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| FetchError::Browser("session already closed".into()))?;

        let render = async {
            let page = browser.new_page(url).await?;
            page.find_element("body").await?;
            let html = page.content().await?;
            if let Err(e) = page.close().await {
                debug!(%url, error = %e, "Failed to close page");
            }
            Ok::<_, FetchError>(html)
        };

        tokio::time::timeout(timeout, render)
            .await
            .map_err(|_| FetchError::Timeout(timeout.as_secs()))?
    }

    /// Shut the browser down and remove its profile.
    pub async fn close(mut self) {
        if let Some(mut browser) = self.browser.take() {
            let exited = finished_within(EXIT_GRACE, async {
                browser.close().await.map_err(|e| e.to_string())?;
                browser.wait().await.map_err(|e| e.to_string())?;
                Ok::<_, String>(())
            })
            .await;
            if !exited {
                warn!("Browser did not exit cleanly; killing process");
                browser.kill().await;
            }
        }
        self.handler.abort();
        remove_profile(&self.profile_dir);
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            let profile_dir = std::mem::take(&mut self.profile_dir);
            self.runtime.spawn(async move {
                browser.kill().await;
                remove_profile(&profile_dir);
            });
        }
        self.handler.abort();
    }
}

/// Drive `exit` for at most `grace`. False when it failed or ran out of time.
async fn finished_within<F, E>(grace: Duration, exit: F) -> bool
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(grace, exit).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "Browser shutdown failed");
            false
        }
        Err(_) => {
            debug!(grace_ms = grace.as_millis() as u64, "Browser shutdown timed out");
            false
        }
    }
}

fn remove_profile(dir: &Path) {
    if dir.as_os_str().is_empty() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(dir) {
        debug!(dir = %dir.display(), error = %e, "Failed to remove browser profile");
    }
}

/// Fetches pages by rendering each one in a new [`BrowserSession`].
#[derive(Debug, Clone, Copy)]
pub struct BrowserFetcher<'a> {
    settings: &'a Settings,
}

impl<'a> BrowserFetcher<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }
}

impl PageFetcher for BrowserFetcher<'_> {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let session = BrowserSession::launch(self.settings).await?;
        let timeout = Duration::from_secs(self.settings.browser.render_timeout_secs);
        let result = session.render(url, timeout).await;
        session.close().await;
        result
    }
}

/// Try one link on the robust path.
///
/// Returns [`TierOutcome::Success`] or [`TierOutcome::Drop`]; there is no
/// further tier to retry on.
#[instrument(level = "debug", skip_all, fields(url = %link.url))]
pub async fn attempt<F: PageFetcher>(fetcher: &F, link: CandidateLink, settings: &Settings) -> TierOutcome {
    let html = match fetcher.fetch_html(&link.url).await {
        Ok(html) => html,
        Err(e) => {
            warn!(url = %link.url, error = %e, "Browser scrape failed; dropping link");
            return TierOutcome::Drop(link, e.to_string());
        }
    };

    match parse_article(&html, &link.source_host, settings) {
        Ok(content) => TierOutcome::Success(link, content),
        Err(e) => {
            warn!(url = %link.url, error = %e, "Browser extraction failed; dropping link");
            TierOutcome::Drop(link, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::fast::tests::{FakeFetcher, article_html, link};

    #[tokio::test]
    async fn test_success() {
        let fetcher = FakeFetcher::default().with("https://news.jtbc.co.kr/a", &article_html("Rendered"));
        let outcome = attempt(&fetcher, link("https://news.jtbc.co.kr/a", "jtbc.co.kr"), &Settings::default()).await;
        match outcome {
            TierOutcome::Success(_, content) => assert_eq!(content.title, "Rendered"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_render_failure_drops() {
        let fetcher = FakeFetcher::default();
        let l = link("https://news.jtbc.co.kr/gone", "jtbc.co.kr");
        let outcome = attempt(&fetcher, l.clone(), &Settings::default()).await;
        assert_eq!(outcome, TierOutcome::Drop(l, "Network error: connection refused".into()));
    }

    #[tokio::test]
    async fn test_hung_shutdown_is_abandoned() {
        let hung = std::future::pending::<Result<(), String>>();
        assert!(!finished_within(Duration::from_millis(20), hung).await);
    }

    #[tokio::test]
    async fn test_shutdown_outcomes() {
        assert!(finished_within(Duration::from_secs(1), async { Ok::<_, String>(()) }).await);
        assert!(!finished_within(Duration::from_secs(1), async { Err::<(), _>("crashed") }).await);
    }

    #[tokio::test]
    async fn test_short_render_drops() {
        let fetcher = FakeFetcher::default()
            .with("https://news.jtbc.co.kr/b", "<html><head><title>T</title></head><body><p>loading</p></body></html>");
        let outcome = attempt(&fetcher, link("https://news.jtbc.co.kr/b", "jtbc.co.kr"), &Settings::default()).await;
        assert!(matches!(outcome, TierOutcome::Drop(_, reason) if reason.contains("too short")));
    }
}
