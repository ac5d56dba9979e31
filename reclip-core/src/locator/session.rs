use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BrowserSection;

use super::error::{LocatorError, LocatorResult};

const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<BrowserSection>,
}

impl BrowserLauncher {
    pub fn new(config: Arc<BrowserSection>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BrowserSection {
        &self.config
    }

    /// Starts a fresh Chromium with a throwaway profile, so no cookies or
    /// cache leak between requests.
    pub async fn launch(&self) -> LocatorResult<BrowserSession> {
        let profile = tempfile::Builder::new().prefix("reclip-profile-").tempdir()?;
        let id = Uuid::new_v4().to_string();
        let chromium_config = self.build_chromium_config(&profile)?;
        info!(
            session = %id,
            headless = self.config.headless,
            "Launching Chromium session"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| LocatorError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        Ok(BrowserSession {
            id,
            browser,
            handler_task: Some(handler_task),
            _profile: profile,
        })
    }

    fn build_chromium_config(&self, profile: &TempDir) -> LocatorResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder()
            .user_data_dir(profile.path())
            .request_timeout(self.config.navigation_timeout());

        if let Some(executable) = &self.config.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }

        let user_agent = self
            .config
            .user_agent
            .clone()
            .unwrap_or_else(|| FALLBACK_USER_AGENT.to_string());
        builder = builder.args(vec![
            format!("--user-agent={user_agent}"),
            "--mute-audio".to_string(),
            "--no-first-run".to_string(),
            "--disable-gpu".to_string(),
            "--disable-features=AutomationControlled".to_string(),
            "--password-store=basic".to_string(),
        ]);

        builder.build().map_err(LocatorError::Configuration)
    }
}

#[derive(Debug)]
pub struct BrowserSession {
    id: String,
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    _profile: TempDir,
}

impl BrowserSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn new_page(&self) -> LocatorResult<Page> {
        Ok(self.browser.new_page("about:blank").await?)
    }

    /// Closes the browser and waits for the CDP handler to drain. Never
    /// fails: the caller already has its answer and only needs the
    /// process gone.
    pub async fn shutdown(mut self) {
        info!(session = %self.id, "Shutting down Chromium session");
        if let Err(err) = self.browser.close().await {
            warn!(session = %self.id, error = %err, "Failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Err(err)) => warn!(session = %self.id, error = %err, "Browser handler join error"),
                Err(_) => warn!(session = %self.id, "Browser handler did not stop in time"),
                Ok(Ok(())) => {}
            }
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!(session = %self.id, "BrowserSession dropped without explicit shutdown");
                handle.abort();
            }
        }
    }
}
