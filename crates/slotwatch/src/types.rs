use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A hosted booking widget, identified by the provider's public key and the
/// service (agenda) id embedded in the widget URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetTarget {
    pub base_url: String,
    pub public_key: String,
    pub service_id: String,
    /// Referer the hosting site would send; the provider checks it.
    pub referer: String,
}

impl Default for WidgetTarget {
    fn default() -> Self {
        WidgetTarget {
            base_url: crate::DEFAULT_BASE_URL.to_string(),
            public_key: "28db94e270580be60f6e00285a7d8141f".to_string(),
            service_id: "bkt873048".to_string(),
            referer: "https://www.exteriores.gob.es/".to_string(),
        }
    }
}

impl WidgetTarget {
    /// Public widget page. Visiting it establishes the session cookies the
    /// bookings endpoint expects.
    pub fn widget_url(&self) -> String {
        format!(
            "{}/es/hosteds/widgetdefault/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.public_key,
            self.service_id
        )
    }

    /// JSONP endpoint that renders the slot picker HTML.
    pub fn bookings_url(&self) -> String {
        format!(
            "{}/onlinebookings/main/",
            self.base_url.trim_end_matches('/')
        )
    }
}

/// What one probe of the widget concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// The widget rendered its no-availability notice.
    NoSlots,
    /// Slot markup was present and the notice was not.
    SlotsDetected,
    /// Non-empty response with neither the notice nor slot markup.
    Inconclusive,
    /// Blank response body.
    Empty,
}

impl Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Availability::NoSlots => write!(f, "no slots"),
            Availability::SlotsDetected => write!(f, "slots detected"),
            Availability::Inconclusive => write!(f, "inconclusive"),
            Availability::Empty => write!(f, "empty response"),
        }
    }
}

/// How a probe reached the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "via")]
pub enum Route {
    Direct,
    /// host:port only; credentials never leave the pool.
    Proxy(String),
}

impl Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Direct => write!(f, "direct"),
            Route::Proxy(endpoint) => write!(f, "proxy {}", endpoint),
        }
    }
}

/// Result of a single availability probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub availability: Availability,
    /// Slot markers found in the response, in marker-table order.
    pub markers: Vec<String>,
    pub content_len: usize,
    /// Head of the classified content, capped at 500 chars.
    pub excerpt: String,
    pub route: Route,
    pub when: DateTime<Utc>,
}

impl ProbeReport {
    pub fn new(availability: Availability, markers: Vec<String>, content: &str, route: Route) -> Self {
        let excerpt: String = content.chars().take(500).collect();
        ProbeReport {
            availability,
            markers,
            content_len: content.chars().count(),
            excerpt,
            route,
            when: Utc::now(),
        }
    }

    /// True when the response had usable content at all.
    pub fn has_content(&self) -> bool {
        self.availability != Availability::Empty
    }
}

impl Display for ProbeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} chars via {})",
            self.availability, self.content_len, self.route
        )?;
        if !self.markers.is_empty() {
            write!(f, " [markers: {}]", self.markers.join(", "))?;
        }
        Ok(())
    }
}
