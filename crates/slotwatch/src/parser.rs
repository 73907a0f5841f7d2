use std::borrow::Cow;
use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;
use scraper::{Html, Selector};

use crate::types::Availability;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Response does not start with callback '{0}'")]
    CallbackMismatch(String),
    #[error("No JSONP payload delimiters in response")]
    MissingPayload,
    #[error("JSONP payload is not a JSON string: {0}")]
    PayloadDecode(#[from] serde_json::Error),
    #[error("No input[name=\"token\"] in widget page")]
    TokenNotFound,
    #[error("Unparseable {name} literal: {snippet}")]
    BadArrayLiteral { name: &'static str, snippet: String },
}

/// The widget's "nothing bookable" notice. Provider UI string; do not
/// translate or trim the final period.
pub const NO_AVAILABILITY_NOTICE: &str = "No hay horas disponibles.";

/// Markup and UI strings the widget only emits when slots are rendered.
pub const SLOT_MARKERS: [&str; 4] = [
    "clsDivDatetimeSlot",
    "selecttime",
    "Hueco libre",
    "Huecos libres",
];

static RE_AGENDAS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"agendas:\s*(\[[\s\S]*?\])").expect("invalid regex: agendas")
});

static RE_DATES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"dates:\s*(\[[\s\S]*?\])").expect("invalid regex: dates"));

static RE_TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([\]}])").expect("invalid regex: trailing comma"));

/// Generates a jQuery-shaped JSONP callback name. The provider echoes it
/// back verbatim, so any unique token works; matching jQuery's shape keeps
/// the request indistinguishable from the real widget.
pub fn jsonp_callback() -> String {
    let digits: u64 = rand::rng().random_range(100_000_000_000_000_000..=999_999_999_999_999_999);
    format!("jQuery{}_{}", digits, chrono::Utc::now().timestamp_millis())
}

/// Strict JSONP unwrap: `callback(<json string>)` → the contained HTML.
pub fn unwrap_jsonp(body: &str, callback: &str) -> Result<String, ParseError> {
    let starts_call = body.starts_with(&format!("{}(", callback));
    let starts_assign = body.starts_with(&format!("{}=", callback));
    if !starts_call && !starts_assign {
        return Err(ParseError::CallbackMismatch(callback.to_string()));
    }

    let open = body
        .find('(')
        .or_else(|| body.find('='))
        .ok_or(ParseError::MissingPayload)?;
    let close = body.rfind(')').unwrap_or(body.len());
    let payload = body
        .get(open + 1..close)
        .ok_or(ParseError::MissingPayload)?;

    Ok(serde_json::from_str::<String>(payload)?)
}

/// Lossy variant: when the body is not well-formed JSONP, classify the raw
/// body instead of failing. The provider occasionally answers with plain
/// HTML error pages that still contain the notice.
pub fn unwrap_jsonp_lossy<'a>(body: &'a str, callback: &str) -> Cow<'a, str> {
    match unwrap_jsonp(body, callback) {
        Ok(html) => Cow::Owned(html),
        Err(e) => {
            log::debug!("JSONP unwrap failed ({}), classifying raw body", e);
            Cow::Borrowed(body)
        }
    }
}

/// Scans widget output for the no-availability notice and slot markers.
/// Returns the classification plus every marker that matched.
pub fn classify(content: &str) -> (Availability, Vec<String>) {
    if content.trim().is_empty() {
        return (Availability::Empty, Vec::new());
    }

    let markers: Vec<String> = SLOT_MARKERS
        .iter()
        .filter(|m| content.contains(*m))
        .map(|m| m.to_string())
        .collect();

    if content.contains(NO_AVAILABILITY_NOTICE) {
        // The notice wins even if stale slot markup is still in the page.
        return (Availability::NoSlots, markers);
    }
    if !markers.is_empty() {
        return (Availability::SlotsDetected, markers);
    }
    (Availability::Inconclusive, markers)
}

/// Legacy widget flow: the first GET returns a page with a hidden form token
/// that must be POSTed back.
pub fn extract_token(html: &str) -> Result<String, ParseError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"input[name="token"]"#).expect("invalid selector: token");
    document
        .select(&selector)
        .find_map(|input| input.value().attr("value"))
        .map(|v| v.to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ParseError::TokenNotFound)
}

/// Legacy widget flow: the second response inlines a `bkt_init_widget({...})`
/// call whose `agendas:` and `dates:` arrays hold the bookable units.
pub fn extract_widget_arrays(
    html: &str,
) -> Result<(Vec<serde_json::Value>, Vec<serde_json::Value>), ParseError> {
    let agendas = extract_array(html, "agendas", &RE_AGENDAS)?;
    let dates = extract_array(html, "dates", &RE_DATES)?;
    Ok((agendas, dates))
}

fn extract_array(
    html: &str,
    name: &'static str,
    re: &Regex,
) -> Result<Vec<serde_json::Value>, ParseError> {
    let Some(captures) = re.captures(html) else {
        return Ok(Vec::new());
    };
    let literal = &captures[1];

    // JS array literal, not JSON: single quotes and trailing commas allowed.
    let dequoted = literal.replace('\'', "\"");
    let normalized = RE_TRAILING_COMMA.replace_all(&dequoted, "$1");

    match serde_json::from_str(&normalized) {
        Ok(values) => Ok(values),
        Err(_) if literal.trim_start_matches('[').trim_end_matches(']').trim().is_empty() => {
            Ok(Vec::new())
        }
        Err(_) => Err(ParseError::BadArrayLiteral {
            name,
            snippet: literal.chars().take(120).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const CALLBACK: &str = "jQuery183021834580486634403_1758102489137";

    #[test]
    fn unwrap_jsonp_decodes_embedded_html() {
        let body = fs::read_to_string("fixtures/bookings_no_slots.jsonp")
            .expect("Failed to read fixture");

        let html = unwrap_jsonp(body.trim_end(), CALLBACK).expect("Should unwrap JSONP");
        assert!(html.contains(NO_AVAILABILITY_NOTICE));
        assert!(html.starts_with("<div"));
    }

    #[test]
    fn unwrap_jsonp_rejects_wrong_callback() {
        let body = fs::read_to_string("fixtures/bookings_no_slots.jsonp")
            .expect("Failed to read fixture");

        let err = unwrap_jsonp(body.trim_end(), "jQuery000_0").unwrap_err();
        assert!(matches!(err, ParseError::CallbackMismatch(_)));
    }

    #[test]
    fn unwrap_jsonp_lossy_falls_back_to_raw_body() {
        let body = "<html><body>Service Unavailable</body></html>";
        let content = unwrap_jsonp_lossy(body, CALLBACK);
        assert_eq!(content.as_ref(), body);
    }

    #[test]
    fn classify_no_slots_fixture() {
        let body = fs::read_to_string("fixtures/bookings_no_slots.jsonp")
            .expect("Failed to read fixture");
        let html = unwrap_jsonp(body.trim_end(), CALLBACK).expect("Should unwrap JSONP");

        let (availability, markers) = classify(&html);
        assert_eq!(availability, Availability::NoSlots);
        assert!(markers.is_empty());
    }

    #[test]
    fn classify_slots_fixture() {
        let body =
            fs::read_to_string("fixtures/bookings_slots.jsonp").expect("Failed to read fixture");
        let html = unwrap_jsonp(body.trim_end(), CALLBACK).expect("Should unwrap JSONP");

        let (availability, markers) = classify(&html);
        assert_eq!(availability, Availability::SlotsDetected);
        assert!(markers.contains(&"clsDivDatetimeSlot".to_string()));
        assert!(markers.contains(&"Hueco libre".to_string()));
    }

    #[test]
    fn classify_notice_beats_stale_markers() {
        let html = format!(
            "<div class=\"clsDivDatetimeSlot\"></div><p>{}</p>",
            NO_AVAILABILITY_NOTICE
        );
        let (availability, markers) = classify(&html);
        assert_eq!(availability, Availability::NoSlots);
        assert_eq!(markers, vec!["clsDivDatetimeSlot".to_string()]);
    }

    #[test]
    fn classify_empty_and_inconclusive() {
        assert_eq!(classify("   \n").0, Availability::Empty);
        assert_eq!(classify("<html>hello</html>").0, Availability::Inconclusive);
    }

    #[test]
    fn extract_token_from_fixture() {
        let html =
            fs::read_to_string("fixtures/widget_token.html").expect("Failed to read fixture");
        let token = extract_token(&html).expect("Should find token");
        assert_eq!(token, "0f7a9c41be2d4e8ab3c5d6f708192a3b");
    }

    #[test]
    fn extract_token_missing() {
        let err = extract_token("<html><body>nothing here</body></html>").unwrap_err();
        assert!(matches!(err, ParseError::TokenNotFound));
    }

    #[test]
    fn extract_widget_arrays_from_fixture() {
        let html =
            fs::read_to_string("fixtures/widget_init.html").expect("Failed to read fixture");
        let (agendas, dates) = extract_widget_arrays(&html).expect("Should parse arrays");
        assert_eq!(agendas.len(), 2);
        assert_eq!(dates.len(), 1);
        assert_eq!(agendas[0]["id"], "bkt873048");
    }

    #[test]
    fn extract_widget_arrays_empty_literals() {
        let html = "bkt_init_widget({ agendas: [], dates: [ ] });";
        let (agendas, dates) = extract_widget_arrays(html).expect("Should parse empty arrays");
        assert!(agendas.is_empty());
        assert!(dates.is_empty());
    }

    #[test]
    fn extract_widget_arrays_absent_literals() {
        let (agendas, dates) =
            extract_widget_arrays("<html>no widget here</html>").expect("Absent arrays are empty");
        assert!(agendas.is_empty());
        assert!(dates.is_empty());
    }

    #[test]
    fn extract_widget_arrays_normalizes_js_quirks() {
        let html = "bkt_init_widget({ agendas: ['bkt1', 'bkt2',], dates: ['2025-10-01',] });";
        let (agendas, dates) = extract_widget_arrays(html).expect("Should normalize JS literals");
        assert_eq!(agendas.len(), 2);
        assert_eq!(dates[0], "2025-10-01");
    }

    #[test]
    fn jsonp_callback_shape() {
        let cb = jsonp_callback();
        assert!(cb.starts_with("jQuery"));
        assert!(cb.contains('_'));
        let (head, tail) = cb.split_once('_').unwrap();
        assert_eq!(head.len(), "jQuery".len() + 18);
        assert!(tail.chars().all(|c| c.is_ascii_digit()));
    }
}
