use std::time::Duration;

use chrono::Utc;
use reqwest::Client;

use crate::parser::{self, ParseError};
use crate::proxy::ProxyServer;
use crate::types::{Availability, ProbeReport, Route, WidgetTarget};

/// Chrome on Windows, same vintage the hosting sites serve the widget to.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36";

const SEC_CH_UA: &str = r#""Chromium";v="140", "Not=A?Brand";v="24", "Google Chrome";v="140""#;

/// Pause between the session GET and the bookings call; the real widget JS
/// does not fire both in the same instant either.
const SESSION_SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Empty response from {0}")]
    EmptyResponse(&'static str),
}

impl ClientError {
    /// Whether the provider is refusing this client rather than just
    /// misbehaving. A blocking error gets the current proxy quarantined.
    pub fn is_blocking(&self) -> bool {
        match self {
            ClientError::Http(e) => matches!(
                e.status().map(|s| s.as_u16()),
                Some(403 | 429 | 502 | 503)
            ),
            ClientError::EmptyResponse(_) => true,
            ClientError::Parse(ParseError::TokenNotFound) => true,
            ClientError::Parse(_) => false,
        }
    }
}

/// One browsing session against a hosted booking widget. Each client owns a
/// fresh cookie jar; the provider ties its tokens to the session, so clients
/// are built per probe cycle and thrown away.
#[derive(Debug, Clone)]
pub struct WidgetClient {
    client: Client,
    target: WidgetTarget,
    route: Route,
}

impl WidgetClient {
    pub fn new(target: WidgetTarget, proxy: Option<&ProxyServer>) -> Result<Self, ClientError> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(30))
            .cookie_store(true)
            .user_agent(USER_AGENT);

        let route = match proxy {
            Some(server) => {
                builder = builder.proxy(reqwest::Proxy::all(server.url())?);
                Route::Proxy(server.to_string())
            }
            None => Route::Direct,
        };

        Ok(Self {
            client: builder.build()?,
            target,
            route,
        })
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn target(&self) -> &WidgetTarget {
        &self.target
    }

    /// GET the public widget page to pick up session cookies. Returns the
    /// page HTML (the legacy flow reads the form token out of it).
    pub async fn establish_session(&self) -> Result<String, ClientError> {
        let url = self.target.widget_url();
        log::debug!("Establishing session: {}", url);
        let html = self
            .client
            .get(&url)
            .header("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7")
            .header("accept-language", "es-ES,es;q=0.9")
            .header("cache-control", "max-age=0")
            .header("upgrade-insecure-requests", "1")
            .header("sec-ch-ua", SEC_CH_UA)
            .header("sec-ch-ua-mobile", "?0")
            .header("sec-ch-ua-platform", "\"Windows\"")
            .header("sec-fetch-dest", "document")
            .header("sec-fetch-mode", "navigate")
            .header("sec-fetch-site", "none")
            .header("referer", &self.target.referer)
            .send()
            .await
            .inspect_err(|e| log::error!("Session GET failed: {e:?}"))?
            .error_for_status()?
            .text()
            .await?;

        if html.trim().is_empty() {
            return Err(ClientError::EmptyResponse("widget page"));
        }
        log::debug!("Session established: {} chars", html.len());
        Ok(html)
    }

    /// GET the bookings endpoint the way the widget's script tag does.
    /// Returns the raw JSONP body.
    pub async fn fetch_bookings(&self, callback: &str) -> Result<String, ClientError> {
        // The widget double-encodes src: the value is percent-encoded before
        // it is put on the query string. Reproduced deliberately.
        let src = urlencoding::encode(&self.target.widget_url()).into_owned();
        let cache_buster = Utc::now().timestamp_millis().to_string();

        log::debug!("Fetching bookings view (callback {})", callback);
        let body = self
            .client
            .get(self.target.bookings_url())
            .query(&[
                ("callback", callback),
                ("type", "default"),
                ("publickey", &self.target.public_key),
                ("lang", "es"),
                ("services[]", &self.target.service_id),
                ("version", "5"),
                ("src", &src),
                ("_", &cache_buster),
            ])
            .header("accept", "*/*")
            .header("accept-language", "es-ES,es;q=0.9")
            .header("referer", format!("{}/", self.target.base_url.trim_end_matches('/')))
            .header("sec-ch-ua", SEC_CH_UA)
            .header("sec-ch-ua-mobile", "?0")
            .header("sec-ch-ua-platform", "\"Windows\"")
            .header("sec-fetch-dest", "script")
            .header("sec-fetch-mode", "no-cors")
            .header("sec-fetch-site", "same-site")
            .send()
            .await
            .inspect_err(|e| log::error!("Bookings GET failed: {e:?}"))?
            .error_for_status()?
            .text()
            .await?;

        if body.is_empty() {
            return Err(ClientError::EmptyResponse("bookings endpoint"));
        }
        log::debug!("Bookings response: {} chars", body.len());
        Ok(body)
    }

    /// Full probe over the current JSONP flow: session, bookings call,
    /// classification.
    pub async fn probe(&self) -> Result<ProbeReport, ClientError> {
        self.establish_session().await?;
        tokio::time::sleep(SESSION_SETTLE).await;

        let callback = parser::jsonp_callback();
        let body = self.fetch_bookings(&callback).await?;
        let content = parser::unwrap_jsonp_lossy(&body, &callback);
        let (availability, markers) = parser::classify(&content);
        Ok(ProbeReport::new(
            availability,
            markers,
            &content,
            self.route.clone(),
        ))
    }

    /// Probe over the legacy widget flow: extract the hidden form token from
    /// the widget page, POST it back, and read the `agendas`/`dates` arrays
    /// out of the returned `bkt_init_widget` call.
    pub async fn probe_widget(&self) -> Result<ProbeReport, ClientError> {
        let page = self.establish_session().await?;
        let token = parser::extract_token(&page)?;
        log::debug!("Widget token acquired");

        let url = self.target.widget_url();
        let body = self
            .client
            .post(&url)
            .header("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("accept-language", "es-ES,es;q=0.9")
            .header("origin", self.target.base_url.trim_end_matches('/'))
            .header("referer", &url)
            .form(&[("token", token.as_str())])
            .send()
            .await
            .inspect_err(|e| log::error!("Token POST failed: {e:?}"))?
            .error_for_status()?
            .text()
            .await?;

        let (agendas, dates) = parser::extract_widget_arrays(&body)?;
        let mut markers = Vec::new();
        if !agendas.is_empty() {
            markers.push(format!("agendas:{}", agendas.len()));
        }
        if !dates.is_empty() {
            markers.push(format!("dates:{}", dates.len()));
        }
        let availability = if markers.is_empty() {
            Availability::NoSlots
        } else {
            Availability::SlotsDetected
        };
        Ok(ProbeReport::new(
            availability,
            markers,
            &body,
            self.route.clone(),
        ))
    }
}
