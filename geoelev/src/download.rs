//! Tile archive download with deferred authentication.
//!
//! NASA Earthdata style origins do not ask for credentials up front. A request
//! for a protected file is answered with a redirect to a login endpoint; once
//! the login hop accepts HTTP Basic credentials, a short chain of redirects
//! hands a session cookie back, and the original request then succeeds.
//!
//! [`AuthDownloader`] drives that exchange as an explicit state machine over an
//! [`HttpTransport`] that never follows redirects on its own and keeps cookies
//! between requests:
//!
//! ```text
//! Request ──200──────────────────────────────────────────────▶ body
//!    │ 3xx
//!    ▼
//! Authenticate (Basic auth) ─3xx─▶ Authorize ─3xx─▶ Finalize ─▶ Retry ─200─▶ body
//! ```
//!
//! A hop answering 200 ends the chain early. Anything other than 200 or a
//! redirect with a usable `Location` header is fatal for that download.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::error::{GeoElevError, Result};

#[cfg(feature = "download")]
use reqwest::blocking::{Client, ClientBuilder};

/// Default timeout for HTTP requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default delay step between retries in milliseconds.
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Login for the authentication hop.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Create credentials from a username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Both fields are non-empty.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Configuration for downloading tile archives.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Login for the authentication hop. Required.
    pub credentials: Option<Credentials>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Number of retry attempts on network errors and timeouts.
    pub max_retries: u32,
    /// Delay step between retries; attempt `n` waits `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: 0,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl DownloadConfig {
    /// Create a configuration with the given login.
    pub fn with_credentials(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: Some(Credentials::new(username, password)),
            ..Default::default()
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the maximum number of retry attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay step between retries.
    pub fn with_retry_backoff(mut self, retry_backoff_ms: u64) -> Self {
        self.retry_backoff_ms = retry_backoff_ms;
        self
    }

    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay before retry number `attempt`, saturating on overflow.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

/// The parts of an HTTP response the handshake looks at.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// `Location` header, if present and valid UTF-8.
    pub location: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A plain `200 OK` with a body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            location: None,
            body: body.into(),
        }
    }

    /// A redirect with an optional `Location`.
    pub fn redirect(status: u16, location: Option<&str>) -> Self {
        Self {
            status,
            location: location.map(str::to_string),
            body: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

/// A single `GET` without automatic redirect handling.
///
/// Implementations must keep a cookie store shared by every call made through
/// the same transport, since the login hop hands out the session cookie.
pub trait HttpTransport: Send + Sync {
    /// Issue a `GET`, adding HTTP Basic authentication when `credentials` is set.
    fn get(&self, url: &str, credentials: Option<&Credentials>) -> Result<HttpResponse>;
}

/// Capability used by the elevation store to fetch archive bytes.
pub trait TileDownloader: Send + Sync {
    /// Return the raw compressed bytes at `url`.
    fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// `reqwest`-backed transport with redirects disabled and a cookie store.
#[cfg(feature = "download")]
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

#[cfg(feature = "download")]
impl ReqwestTransport {
    /// Build a transport with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::from_builder(Self::client_builder(timeout))
    }

    /// Client builder preconfigured for the handshake: no redirects,
    /// persistent cookies, request timeout.
    pub fn client_builder(timeout: Duration) -> ClientBuilder {
        Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .cookie_store(true)
            .timeout(timeout)
    }

    /// Finish a (possibly further customized) client builder.
    pub fn from_builder(builder: ClientBuilder) -> Result<Self> {
        let client = builder.build().map_err(GeoElevError::Http)?;
        Ok(Self { client })
    }
}

#[cfg(feature = "download")]
fn transport_error(url: &str, e: reqwest::Error) -> GeoElevError {
    if e.is_timeout() {
        GeoElevError::Timeout {
            url: url.to_string(),
        }
    } else {
        GeoElevError::Http(e)
    }
}

#[cfg(feature = "download")]
impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str, credentials: Option<&Credentials>) -> Result<HttpResponse> {
        let mut request = self.client.get(url);
        if let Some(credentials) = credentials {
            request = request.basic_auth(credentials.username(), Some(credentials.password()));
        }

        let response = request.send().map_err(|e| transport_error(url, e))?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .map_err(|e| transport_error(url, e))?
            .to_vec();

        Ok(HttpResponse {
            status,
            location,
            body,
        })
    }
}

/// Position in the login redirect chain.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Handshake {
    /// Plain request for the target.
    Request,
    /// Login endpoint, queried with Basic credentials.
    Authenticate(String),
    /// Authorization-code endpoint.
    Authorize(String),
    /// Final hand-off back to the origin.
    Finalize(String),
    /// Target requested again with the established session.
    Retry,
}

/// Downloader that performs the deferred-authentication handshake.
pub struct AuthDownloader<T> {
    transport: T,
    credentials: Credentials,
    config: DownloadConfig,
}

impl<T: HttpTransport> AuthDownloader<T> {
    /// Create a downloader over `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`GeoElevError::MissingCredentials`] if the configuration has
    /// no credentials or either field is empty. No request is made.
    pub fn new(config: DownloadConfig, transport: T) -> Result<Self> {
        let credentials = config
            .credentials
            .clone()
            .filter(Credentials::is_complete)
            .ok_or(GeoElevError::MissingCredentials)?;

        Ok(Self {
            transport,
            credentials,
            config,
        })
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the handshake once, without retries.
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let mut state = Handshake::Request;

        loop {
            state = match state {
                Handshake::Request => {
                    let response = self.transport.get(url, None)?;
                    if response.is_success() {
                        return Ok(response.body);
                    }
                    let location = redirect_target(url, &response)?;
                    debug!(url, %location, "redirecting to login");
                    Handshake::Authenticate(location)
                }
                Handshake::Authenticate(hop) => {
                    let response = self.transport.get(&hop, Some(&self.credentials))?;
                    debug!(url = %hop, status = response.status, "login response");
                    next_hop(&hop, &response, Handshake::Authorize)?
                }
                Handshake::Authorize(hop) => {
                    let response = self.transport.get(&hop, None)?;
                    debug!(url = %hop, status = response.status, "authorization code response");
                    next_hop(&hop, &response, Handshake::Finalize)?
                }
                Handshake::Finalize(hop) => {
                    let response = self.transport.get(&hop, None)?;
                    debug!(url = %hop, status = response.status, "final redirect response");
                    if !response.is_success() {
                        // The last Location points back at content; the retry fetches it.
                        redirect_target(&hop, &response)?;
                    }
                    Handshake::Retry
                }
                Handshake::Retry => {
                    let response = self.transport.get(url, None)?;
                    if response.is_success() {
                        return Ok(response.body);
                    }
                    return Err(GeoElevError::DownloadFailed {
                        url: url.to_string(),
                        reason: format!("HTTP {} after authentication", response.status),
                    });
                }
            };
        }
    }
}

#[cfg(feature = "download")]
impl AuthDownloader<ReqwestTransport> {
    /// Create a downloader backed by [`ReqwestTransport`].
    ///
    /// Credentials are checked before the HTTP client is built.
    pub fn from_config(config: DownloadConfig) -> Result<Self> {
        if !config
            .credentials
            .as_ref()
            .is_some_and(Credentials::is_complete)
        {
            return Err(GeoElevError::MissingCredentials);
        }
        let transport = ReqwestTransport::new(config.timeout())?;
        Self::new(config, transport)
    }
}

impl<T: HttpTransport> TileDownloader for AuthDownloader<T> {
    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let mut attempt = 0u32;
        loop {
            match self.fetch(url) {
                Ok(bytes) => {
                    info!(url, bytes = bytes.len(), "downloaded tile archive");
                    return Ok(bytes);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(url, attempt, error = %e, "download failed, retrying");
                    std::thread::sleep(self.config.retry_delay(attempt));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Follow a redirect to `next`, or stop the chain on 200.
fn next_hop(
    hop: &str,
    response: &HttpResponse,
    next: fn(String) -> Handshake,
) -> Result<Handshake> {
    if response.is_success() {
        return Ok(Handshake::Retry);
    }
    Ok(next(redirect_target(hop, response)?))
}

/// Absolute redirect target of `response`, resolved against `from`.
fn redirect_target(from: &str, response: &HttpResponse) -> Result<String> {
    if !response.is_redirect() {
        return Err(GeoElevError::DownloadFailed {
            url: from.to_string(),
            reason: format!("unexpected HTTP {}", response.status),
        });
    }

    let missing = || GeoElevError::MissingRedirect {
        url: from.to_string(),
        status: response.status,
    };

    let location = response
        .location
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or_else(missing)?;

    let base = Url::parse(from).map_err(|e| GeoElevError::DownloadFailed {
        url: from.to_string(),
        reason: format!("invalid URL: {}", e),
    })?;
    let target = base.join(location).map_err(|_| missing())?;

    Ok(target.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    const TARGET: &str = "https://data.example.com/SRTMGL3/N45E013.hgt.zip";
    const LOGIN: &str = "https://urs.example.com/oauth/authorize?client_id=abc";
    const CODE: &str = "https://data.example.com/login?code=xyz";

    /// Transport that replays canned responses and records each call.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HttpResponse>>>,
        calls: Mutex<Vec<(String, bool)>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<HttpResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, bool)> {
            self.calls.lock().clone()
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn get(&self, url: &str, credentials: Option<&Credentials>) -> Result<HttpResponse> {
            self.calls
                .lock()
                .push((url.to_string(), credentials.is_some()));
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected request to {}", url))
        }
    }

    fn config() -> DownloadConfig {
        DownloadConfig::with_credentials("user", "secret").with_retry_backoff(0)
    }

    fn downloader(responses: Vec<Result<HttpResponse>>) -> AuthDownloader<ScriptedTransport> {
        AuthDownloader::new(config(), ScriptedTransport::new(responses)).unwrap()
    }

    #[test]
    fn test_public_tile() {
        let d = downloader(vec![Ok(HttpResponse::ok(b"zip".to_vec()))]);

        assert_eq!(d.download(TARGET).unwrap(), b"zip");
        assert_eq!(d.transport().calls(), vec![(TARGET.to_string(), false)]);
    }

    #[test]
    fn test_full_handshake() {
        let d = downloader(vec![
            Ok(HttpResponse::redirect(302, Some(LOGIN))),
            Ok(HttpResponse::redirect(302, Some(CODE))),
            Ok(HttpResponse::redirect(302, Some("/SRTMGL3/N45E013.hgt.zip"))),
            Ok(HttpResponse::redirect(302, Some(TARGET))),
            Ok(HttpResponse::ok(b"archive".to_vec())),
        ]);

        assert_eq!(d.download(TARGET).unwrap(), b"archive");
        assert_eq!(
            d.transport().calls(),
            vec![
                (TARGET.to_string(), false),
                (LOGIN.to_string(), true),
                (CODE.to_string(), false),
                (
                    "https://data.example.com/SRTMGL3/N45E013.hgt.zip".to_string(),
                    false
                ),
                (TARGET.to_string(), false),
            ]
        );
    }

    #[test]
    fn test_relative_location() {
        let d = downloader(vec![
            Ok(HttpResponse::redirect(302, Some("/login"))),
            Ok(HttpResponse::ok(Vec::new())),
            Ok(HttpResponse::ok(b"archive".to_vec())),
        ]);

        assert_eq!(d.download(TARGET).unwrap(), b"archive");
        assert_eq!(d.transport().calls()[1].0, "https://data.example.com/login");
    }

    #[test]
    fn test_login_accepts_without_redirect() {
        let d = downloader(vec![
            Ok(HttpResponse::redirect(302, Some(LOGIN))),
            Ok(HttpResponse::ok(Vec::new())),
            Ok(HttpResponse::ok(b"archive".to_vec())),
        ]);

        assert_eq!(d.download(TARGET).unwrap(), b"archive");
        assert_eq!(d.transport().calls().len(), 3);
    }

    #[test]
    fn test_redirect_without_location() {
        let d = downloader(vec![Ok(HttpResponse::redirect(302, None))]);

        let err = d.download(TARGET).unwrap_err();
        assert!(matches!(err, GeoElevError::MissingRedirect { status: 302, .. }));
        assert_eq!(err.kind(), ErrorKind::Retrieval);
    }

    #[test]
    fn test_login_redirect_without_location() {
        let d = downloader(vec![
            Ok(HttpResponse::redirect(302, Some(LOGIN))),
            Ok(HttpResponse::redirect(302, Some("  "))),
        ]);

        let err = d.download(TARGET).unwrap_err();
        assert!(matches!(err, GeoElevError::MissingRedirect { ref url, .. } if url == LOGIN));
    }

    #[test]
    fn test_not_found() {
        let d = downloader(vec![Ok(HttpResponse {
            status: 404,
            ..Default::default()
        })]);

        let err = d.download(TARGET).unwrap_err();
        assert!(matches!(err, GeoElevError::DownloadFailed { .. }));
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn test_rejected_credentials() {
        let d = downloader(vec![
            Ok(HttpResponse::redirect(302, Some(LOGIN))),
            Ok(HttpResponse {
                status: 401,
                ..Default::default()
            }),
        ]);

        let err = d.download(TARGET).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Retrieval);
        assert_eq!(d.transport().calls().len(), 2);
    }

    #[test]
    fn test_session_not_established() {
        let d = downloader(vec![
            Ok(HttpResponse::redirect(302, Some(LOGIN))),
            Ok(HttpResponse::redirect(302, Some(CODE))),
            Ok(HttpResponse::redirect(302, Some(TARGET))),
            Ok(HttpResponse::ok(Vec::new())),
            Ok(HttpResponse::redirect(302, Some(LOGIN))),
        ]);

        let err = d.download(TARGET).unwrap_err();
        assert!(err.to_string().contains("after authentication"));
    }

    #[test]
    fn test_missing_credentials() {
        let result = AuthDownloader::new(DownloadConfig::default(), ScriptedTransport::default());
        assert!(matches!(result, Err(GeoElevError::MissingCredentials)));

        let transport = ScriptedTransport::default();
        let result = AuthDownloader::new(DownloadConfig::with_credentials("user", ""), transport);
        let err = result.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_retry_on_timeout() {
        let transport = ScriptedTransport::new(vec![
            Err(GeoElevError::Timeout {
                url: TARGET.to_string(),
            }),
            Ok(HttpResponse::ok(b"archive".to_vec())),
        ]);
        let d = AuthDownloader::new(config().with_max_retries(1), transport).unwrap();

        assert_eq!(d.download(TARGET).unwrap(), b"archive");
        assert_eq!(d.transport().calls().len(), 2);
    }

    #[test]
    fn test_timeout_without_retries() {
        let d = downloader(vec![Err(GeoElevError::Timeout {
            url: TARGET.to_string(),
        })]);

        let err = d.download(TARGET).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_protocol_errors_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::redirect(302, None))]);
        let d = AuthDownloader::new(config().with_max_retries(3), transport).unwrap();

        assert!(d.download(TARGET).is_err());
        assert_eq!(d.transport().calls().len(), 1);
    }

    #[test]
    fn test_credentials_debug_masks_password() {
        let credentials = Credentials::new("user", "secret");
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("user"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_download_config_builder() {
        let config = DownloadConfig::with_credentials("u", "p")
            .with_timeout(60)
            .with_max_retries(5);

        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.max_retries, 5);
        assert!(config.credentials.unwrap().is_complete());

        let config = DownloadConfig::default();
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn test_retry_delay() {
        let config = DownloadConfig::default().with_retry_backoff(500);
        assert_eq!(config.retry_delay(0), Duration::ZERO);
        assert_eq!(config.retry_delay(3), Duration::from_millis(1500));

        let config = DownloadConfig::default().with_retry_backoff(u64::MAX);
        assert_eq!(config.retry_delay(2), Duration::from_millis(u64::MAX));
    }

    #[cfg(feature = "download")]
    #[test]
    fn test_from_config_requires_credentials() {
        let result = AuthDownloader::from_config(DownloadConfig::default());
        assert!(matches!(result, Err(GeoElevError::MissingCredentials)));
    }
}
