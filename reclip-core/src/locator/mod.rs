mod error;
mod session;

use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventRequestWillBeSent, GetCookiesParams,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Serialize;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info};

use crate::config::BrowserSection;

pub use error::{LocatorError, LocatorResult};
pub use session::{BrowserLauncher, BrowserSession};

/// Direct CDN address of a video plus the cookies the CDN expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocatedMedia {
    pub cdn_url: String,
    pub cookie_header: String,
    pub page_url: String,
}

#[async_trait]
pub trait MediaLocator: Send + Sync {
    async fn locate(&self, page_url: &str) -> LocatorResult<LocatedMedia>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Media,
    Auth,
    Other,
}

#[derive(Debug, Clone)]
pub struct RequestClassifier {
    media_markers: Vec<String>,
    auth_markers: Vec<String>,
}

impl RequestClassifier {
    pub fn new(media_markers: Vec<String>, auth_markers: Vec<String>) -> Self {
        Self {
            media_markers,
            auth_markers,
        }
    }

    pub fn from_config(config: &BrowserSection) -> Self {
        Self::new(
            config.media_url_markers.clone(),
            config.auth_url_markers.clone(),
        )
    }

    pub fn classify(&self, url: &str) -> RequestClass {
        if self.media_markers.iter().any(|marker| url.contains(marker.as_str())) {
            RequestClass::Media
        } else if self.auth_markers.iter().any(|marker| url.contains(marker.as_str())) {
            RequestClass::Auth
        } else {
            RequestClass::Other
        }
    }
}

/// Tracks outgoing requests until the first media URL shows up.
#[derive(Debug, Default)]
pub struct RequestWatch {
    media_url: Option<String>,
    auth_seen: bool,
    observed: u64,
}

impl RequestWatch {
    /// Returns `true` once a media URL has been captured; later calls are
    /// ignored so the first match wins.
    pub fn observe(&mut self, url: &str, classifier: &RequestClassifier) -> bool {
        if self.media_url.is_some() {
            return true;
        }
        self.observed += 1;
        match classifier.classify(url) {
            RequestClass::Media => {
                self.media_url = Some(url.to_string());
                true
            }
            RequestClass::Auth => {
                self.auth_seen = true;
                false
            }
            RequestClass::Other => false,
        }
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    pub fn finish(self) -> LocatorResult<String> {
        match self.media_url {
            Some(url) => Ok(url),
            None if self.auth_seen => Err(LocatorError::AuthRequired),
            None => Err(LocatorError::NotFound),
        }
    }
}

/// `name=value` pairs joined by `; `, in jar order.
pub fn cookie_header<'a, I>(cookies: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    cookies
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct BrowserMediaLocator {
    launcher: BrowserLauncher,
    classifier: RequestClassifier,
}

impl BrowserMediaLocator {
    pub fn new(config: Arc<BrowserSection>) -> Self {
        let classifier = RequestClassifier::from_config(&config);
        Self {
            launcher: BrowserLauncher::new(config),
            classifier,
        }
    }

    async fn capture(&self, session: &BrowserSession, page_url: &str) -> LocatorResult<LocatedMedia> {
        let config = self.launcher.config();
        let page = session.new_page().await?;
        page.execute(EnableParams::default()).await?;

        // The listener is registered once this await returns; only then may
        // navigation begin, or the media request could fire unobserved.
        let mut requests = page.event_listener::<EventRequestWillBeSent>().await?;

        let params = NavigateParams::builder()
            .url(page_url)
            .build()
            .map_err(LocatorError::Configuration)?;
        let navigation_timeout = config.navigation_timeout();
        timeout(navigation_timeout, page.goto(params))
            .await
            .map_err(|_| LocatorError::NavigationTimeout(navigation_timeout))??;

        let mut watch = RequestWatch::default();
        let deadline = Instant::now() + config.settle_window();
        while let Ok(Some(event)) = timeout_at(deadline, requests.next()).await {
            if watch.observe(&event.request.url, &self.classifier) {
                break;
            }
        }
        debug!(
            session = %session.id(),
            observed = watch.observed(),
            "request observation finished"
        );
        let cdn_url = watch.finish()?;
        let cookie_header = self.cookie_header_for(&page, &cdn_url).await?;
        info!(session = %session.id(), "media url captured");
        Ok(LocatedMedia {
            cdn_url,
            cookie_header,
            page_url: page_url.to_string(),
        })
    }

    async fn cookie_header_for(&self, page: &Page, url: &str) -> LocatorResult<String> {
        let mut params = GetCookiesParams::default();
        params.urls = Some(vec![url.to_string()]);
        let response = page.execute(params).await?;
        Ok(cookie_header(
            response
                .result
                .cookies
                .iter()
                .map(|cookie| (cookie.name.as_str(), cookie.value.as_str())),
        ))
    }
}

#[async_trait]
impl MediaLocator for BrowserMediaLocator {
    async fn locate(&self, page_url: &str) -> LocatorResult<LocatedMedia> {
        let session = self.launcher.launch().await?;
        let outcome = self.capture(&session, page_url).await;
        session.shutdown().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> RequestClassifier {
        RequestClassifier::new(vec!["v16-webapp-prime".into()], vec!["login".into()])
    }

    #[test]
    fn classifies_requests() {
        let classifier = classifier();
        assert_eq!(
            classifier.classify("https://v16-webapp-prime.tiktok.com/video/abc"),
            RequestClass::Media
        );
        assert_eq!(
            classifier.classify("https://www.tiktok.com/passport/web/login/"),
            RequestClass::Auth
        );
        assert_eq!(
            classifier.classify("https://www.tiktok.com/api/item"),
            RequestClass::Other
        );
    }

    #[test]
    fn first_media_match_wins() {
        let classifier = classifier();
        let mut watch = RequestWatch::default();
        assert!(!watch.observe("https://www.tiktok.com/", &classifier));
        assert!(watch.observe("https://v16-webapp-prime.tiktok.com/first", &classifier));
        assert!(watch.observe("https://v16-webapp-prime.tiktok.com/second", &classifier));
        assert_eq!(watch.observed(), 2);
        assert_eq!(
            watch.finish().unwrap(),
            "https://v16-webapp-prime.tiktok.com/first"
        );
    }

    #[test]
    fn login_before_media_means_auth_required() {
        let classifier = classifier();
        let mut watch = RequestWatch::default();
        watch.observe("https://www.tiktok.com/login?redirect=1", &classifier);
        assert!(matches!(watch.finish(), Err(LocatorError::AuthRequired)));
    }

    #[test]
    fn login_after_media_is_ignored() {
        let classifier = classifier();
        let mut watch = RequestWatch::default();
        watch.observe("https://v16-webapp-prime.tiktok.com/clip", &classifier);
        watch.observe("https://www.tiktok.com/login", &classifier);
        assert!(watch.finish().is_ok());
    }

    #[test]
    fn nothing_seen_is_not_found() {
        assert!(matches!(
            RequestWatch::default().finish(),
            Err(LocatorError::NotFound)
        ));
    }

    #[test]
    fn cookie_header_joins_pairs() {
        assert_eq!(
            cookie_header([("tt_chain_token", "abc"), ("msToken", "xyz")]),
            "tt_chain_token=abc; msToken=xyz"
        );
        assert_eq!(cookie_header(Vec::<(&str, &str)>::new()), "");
    }
}
