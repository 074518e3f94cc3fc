//! Click autocapture
//!
//! One capture-phase listener on the document. A click counts when its
//! target sits inside (or is) a button, link, submit input or
//! `role="button"` element. Password inputs and anything under an element
//! carrying [`IGNORE_CLASS`] are never captured.

use std::sync::Arc;

use serde_json::Value;

use super::TrackFn;
use crate::dom::{ClickEvent, Element};
use crate::env::{Hooks, ListenerId, Phase};
use crate::event::{Properties, CLICK};
use crate::guard::{self, Boundary};

/// Class that opts an element (and its subtree) out of click capture
pub const IGNORE_CLASS: &str = "iris-ignore";

/// Maximum number of characters of element text sent with a click
pub const MAX_TEXT_CHARS: usize = 50;

/// `button, a, input[type="submit"], [role="button"]`
pub fn is_interactive(element: &Element) -> bool {
    matches!(element.tag_name().as_str(), "button" | "a")
        || element.is_submit_input()
        || element.attribute("role") == Some("button")
}

/// Properties of the `$click` event for `click`, if it is captured at all
pub fn click_properties(click: &ClickEvent) -> Option<Properties> {
    let target = click.target.as_deref()?;
    if target.is_password_input() {
        return None;
    }

    let element = target.closest(is_interactive)?;
    if element.is_password_input()
        || element
            .ancestors_inclusive()
            .any(|el| el.has_class(IGNORE_CLASS))
    {
        return None;
    }

    let tag = element.tag_name();
    let mut props = Properties::new();
    if !element.id().is_empty() {
        props.insert("$id".to_string(), Value::from(element.id()));
    }
    if !element.class_name().is_empty() {
        props.insert("$class".to_string(), Value::from(element.class_name()));
    }
    props.insert(
        "$text".to_string(),
        Value::from(excerpt(element.inner_text().unwrap_or_default())),
    );
    if tag == "a" {
        if let Some(href) = element.attribute("href").filter(|h| !h.is_empty()) {
            props.insert("$href".to_string(), Value::from(href));
        }
    }
    props.insert("$tag".to_string(), Value::from(tag));

    Some(props)
}

fn excerpt(text: &str) -> String {
    text.chars().take(MAX_TEXT_CHARS).collect()
}

/// Install the document click listener
pub fn activate(hooks: &dyn Hooks, track: TrackFn, debug: bool) -> ListenerId {
    hooks.add_click_listener(
        Arc::new(move |click: &ClickEvent| {
            let props = guard::silently(Boundary::Dom, debug, || Ok(click_properties(click)));
            if let Some(props) = props.flatten() {
                track(CLICK, Some(props));
            }
        }),
        Phase::Capture,
    )
}
