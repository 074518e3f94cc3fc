//! Core web vitals capture
//!
//! Subscribes to layout stability (CLS), interaction responsiveness (INP)
//! and largest contentful paint (LCP). Every report is forwarded at once
//! as a `$web_vital` event with its rating bucket.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TrackFn;
use crate::env::{Hooks, ListenerId, MetricListener};
use crate::error::Error;
use crate::event::{Properties, WEB_VITAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricName {
    Cls,
    Inp,
    Lcp,
}

impl MetricName {
    pub const ALL: [MetricName; 3] = [MetricName::Cls, MetricName::Inp, MetricName::Lcp];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Cls => "CLS",
            MetricName::Inp => "INP",
            MetricName::Lcp => "LCP",
        }
    }

    /// `(good, poor)` boundaries: `value <= good` is good, `value > poor` is poor
    pub fn thresholds(&self) -> (f64, f64) {
        match self {
            MetricName::Cls => (0.1, 0.25),
            MetricName::Inp => (200.0, 500.0),
            MetricName::Lcp => (2500.0, 4000.0),
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CLS" => Ok(MetricName::Cls),
            "INP" => Ok(MetricName::Inp),
            "LCP" => Ok(MetricName::Lcp),
            other => Err(Error::Config(format!("unknown metric: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rating {
    Good,
    NeedsImprovement,
    Poor,
}

impl Rating {
    pub fn classify(metric: MetricName, value: f64) -> Self {
        let (good, poor) = metric.thresholds();
        if value > poor {
            Rating::Poor
        } else if value > good {
            Rating::NeedsImprovement
        } else {
            Rating::Good
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Good => "good",
            Rating::NeedsImprovement => "needs-improvement",
            Rating::Poor => "poor",
        }
    }
}

/// One metric report from the performance observer
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReport {
    /// Unique id of this metric instance on this page load
    pub id: String,
    pub name: MetricName,
    pub value: f64,
}

impl MetricReport {
    pub fn rating(&self) -> Rating {
        Rating::classify(self.name, self.value)
    }
}

pub fn vital_properties(report: &MetricReport) -> Properties {
    let mut props = Properties::new();
    props.insert("$id".to_string(), Value::from(report.id.as_str()));
    props.insert("$name".to_string(), Value::from(report.name.as_str()));
    props.insert("$val".to_string(), Value::from(report.value));
    props.insert("$rating".to_string(), Value::from(report.rating().as_str()));
    props
}

/// Subscribe to all three metrics
pub fn activate(hooks: &dyn Hooks, track: TrackFn) -> Vec<ListenerId> {
    MetricName::ALL
        .iter()
        .map(|&metric| {
            let track = Arc::clone(&track);
            let listener: MetricListener = Arc::new(move |report: &MetricReport| {
                track(WEB_VITAL, Some(vital_properties(report)));
            });
            hooks.observe_metric(metric, listener)
        })
        .collect()
}
