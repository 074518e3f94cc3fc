//! The telemetry event and its wire shape
//!
//! Wire field names are short and stable; the collection endpoint has no
//! schema discovery, so renaming any of them is a protocol break.

use serde::{Deserialize, Serialize};

use crate::env::Environment;
use crate::error::{Error, Result};

/// Name of the pageview event emitted by navigation capture
pub const PAGEVIEW: &str = "$pageview";

/// Name of the click event emitted by interaction capture
pub const CLICK: &str = "$click";

/// Name of the metric event emitted by vitals capture
pub const WEB_VITAL: &str = "$web_vital";

/// Free-form event properties
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// One telemetry event, as posted to `<host>/api/event`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "n")]
    pub name: String,

    /// Page URL at track time
    #[serde(rename = "u")]
    pub url: String,

    /// Hostname of `url`
    #[serde(rename = "d")]
    pub domain: String,

    /// Document referrer; `null` on the wire when there is none
    #[serde(rename = "r")]
    pub referrer: Option<String>,

    #[serde(rename = "w")]
    pub viewport_width: u32,

    #[serde(rename = "s")]
    pub site_id: String,

    #[serde(rename = "sid")]
    pub session_id: String,

    #[serde(rename = "vid")]
    pub visitor_id: String,

    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
}

/// Fields stamped onto every event that do not come from the page
#[derive(Debug, Clone)]
pub struct EventContext<'a> {
    pub site_id: &'a str,
    pub visitor_id: String,
    pub session_id: String,
}

impl Event {
    /// Build an event from the current page state
    ///
    /// Properties pass through unvalidated.
    pub fn build(
        name: &str,
        properties: Option<Properties>,
        env: &dyn Environment,
        context: EventContext<'_>,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::MissingEventName);
        }

        let url = env.current_url();
        let domain = hostname(&url);

        Ok(Event {
            name: name.to_string(),
            domain,
            url,
            referrer: env.referrer().filter(|r| !r.is_empty()),
            viewport_width: env.viewport_width(),
            site_id: context.site_id.to_string(),
            session_id: context.session_id,
            visitor_id: context.visitor_id,
            properties,
        })
    }

    /// Compact JSON body sent over the wire
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Hostname of a URL, or an empty string when it has none
fn hostname(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessPage;
    use serde_json::json;

    fn context(site_id: &str) -> EventContext<'_> {
        EventContext {
            site_id,
            visitor_id: "vid-1".to_string(),
            session_id: "sid-1".to_string(),
        }
    }

    #[test]
    fn test_build_reads_page_state() {
        let page = HeadlessPage::builder("https://shop.example/cart?item=3")
            .referrer("https://search.example/?q=shoes")
            .viewport_width(1280)
            .build();

        let event = Event::build(PAGEVIEW, None, &page, context("abc")).unwrap();

        assert_eq!(event.name, "$pageview");
        assert_eq!(event.url, "https://shop.example/cart?item=3");
        assert_eq!(event.domain, "shop.example");
        assert_eq!(
            event.referrer.as_deref(),
            Some("https://search.example/?q=shoes")
        );
        assert_eq!(event.viewport_width, 1280);
        assert_eq!(event.site_id, "abc");
        assert_eq!(event.visitor_id, "vid-1");
        assert_eq!(event.session_id, "sid-1");
    }

    #[test]
    fn test_build_reflects_current_url() {
        let page = HeadlessPage::new("https://shop.example/");
        let first = Event::build(PAGEVIEW, None, &page, context("abc")).unwrap();
        page.navigate("https://shop.example/checkout");
        let second = Event::build(PAGEVIEW, None, &page, context("abc")).unwrap();

        assert_eq!(first.url, "https://shop.example/");
        assert_eq!(second.url, "https://shop.example/checkout");
    }

    #[test]
    fn test_build_requires_name() {
        let page = HeadlessPage::new("https://shop.example/");
        let result = Event::build("", None, &page, context("abc"));
        assert!(matches!(result, Err(Error::MissingEventName)));
    }

    #[test]
    fn test_wire_format() {
        let page = HeadlessPage::builder("https://shop.example/cart")
            .viewport_width(390)
            .build();
        let mut props = Properties::new();
        props.insert("plan".to_string(), json!("pro"));
        props.insert("seats".to_string(), json!({"count": 3}));

        let event = Event::build("signup", Some(props), &page, context("abc")).unwrap();
        let wire: serde_json::Value = serde_json::from_str(&event.to_wire().unwrap()).unwrap();

        assert_eq!(
            wire,
            json!({
                "n": "signup",
                "u": "https://shop.example/cart",
                "d": "shop.example",
                "r": null,
                "w": 390,
                "s": "abc",
                "sid": "sid-1",
                "vid": "vid-1",
                "p": {"plan": "pro", "seats": {"count": 3}},
            })
        );
    }

    #[test]
    fn test_wire_omits_missing_properties() {
        let page = HeadlessPage::new("https://shop.example/");
        let event = Event::build(PAGEVIEW, None, &page, context("abc")).unwrap();
        let wire: serde_json::Value = serde_json::from_str(&event.to_wire().unwrap()).unwrap();
        assert!(wire.get("p").is_none());
        assert!(wire["r"].is_null());
    }

    #[test]
    fn test_hostname_of_unparseable_url() {
        assert_eq!(hostname("not a url"), "");
        assert_eq!(hostname("http://localhost:3000/a"), "localhost");
    }
}
