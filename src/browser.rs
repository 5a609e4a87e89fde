// User agents that present authorization and end-session URLs

use log::{info, warn};
use url::Url;

use crate::error::AuthError;

/// Shows a URL to the user. Implementations return once the URL has been
/// handed off; the result comes back later as a redirect.
pub trait UserAgent: Send + Sync {
    fn present(&self, url: &Url) -> Result<(), AuthError>;
}

impl<F> UserAgent for F
where
    F: Fn(&Url) -> Result<(), AuthError> + Send + Sync,
{
    fn present(&self, url: &Url) -> Result<(), AuthError> {
        self(url)
    }
}

/// The platform's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl UserAgent for SystemBrowser {
    fn present(&self, url: &Url) -> Result<(), AuthError> {
        info!("Opening system browser for {}://{}{}", url.scheme(), url.host_str().unwrap_or_default(), url.path());
        open::that(url.as_str()).map_err(|e| {
            warn!("Failed to launch system browser: {}", e);
            AuthError::BrowserNotFound(format!("Unable to open a browser: {}", e))
        })
    }
}

/// Writes the URL to stderr for the user to open by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualBrowser;

impl UserAgent for ManualBrowser {
    fn present(&self, url: &Url) -> Result<(), AuthError> {
        eprintln!("Open this URL in a browser to continue:\n\n    {}\n", url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_closure_user_agent() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = {
            let seen = Arc::clone(&seen);
            move |url: &Url| -> Result<(), AuthError> {
                seen.lock().unwrap().push(url.to_string());
                Ok(())
            }
        };

        let agent: &dyn UserAgent = &recorder;
        agent.present(&Url::parse("https://idp.example.com/authorize?x=1").unwrap()).unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), ["https://idp.example.com/authorize?x=1"]);
    }

    #[test]
    fn test_failing_user_agent_reports_browser_not_found() {
        let agent = |_: &Url| -> Result<(), AuthError> {
            Err(AuthError::BrowserNotFound("no browser".into()))
        };

        let err = agent.present(&Url::parse("https://idp.example.com").unwrap()).unwrap_err();
        assert_eq!(err.code(), "browser_not_found");
    }
}
