//! Query, routed context, and ISO week handling

use chrono::{Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The inbound request: free text plus an optional attached file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            file_path: None,
        }
    }

    pub fn with_file(text: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            file_path: Some(file_path.into()),
        }
    }
}

/// Which class of workflow a query routes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Plot,
    PdfTracking,
    Dynamic,
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plot => write!(f, "plot"),
            Self::PdfTracking => write!(f, "pdf_tracking"),
            Self::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// Structured fields the router recognized in the query.
///
/// Unrecognized fields are absent, never null sentinels.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlet_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week_range: Option<(IsoWeek, IsoWeek)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
}

impl Context {
    /// True when no extractor recognized anything.
    pub fn is_empty(&self) -> bool {
        self.outlet_id.is_none()
            && self.week_count.is_none()
            && self.week_range.is_none()
            && self.month_count.is_none()
            && self.file_path.is_none()
            && self.product_filter.is_none()
            && self.tracking_id.is_none()
            && self.invoice_number.is_none()
    }
}

/// An ISO-8601 week: Monday start, week 1 contains the year's first Thursday.
///
/// Wire form is `YYYY-Www`, e.g. `2024-W17`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsoWeek {
    pub year: i32,
    pub week: u32,
}

impl IsoWeek {
    /// Construct a validated ISO week. Returns None for weeks that don't
    /// exist in the given ISO year (e.g. W53 in a 52-week year).
    pub fn new(year: i32, week: u32) -> Option<Self> {
        NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).map(|_| Self { year, week })
    }

    /// The ISO week containing today (UTC).
    pub fn current() -> Self {
        let iso = Utc::now().date_naive().iso_week();
        Self {
            year: iso.year(),
            week: iso.week(),
        }
    }

    /// The week `n` weeks before this one, crossing year boundaries.
    pub fn minus_weeks(self, n: u32) -> Self {
        let monday = NaiveDate::from_isoywd_opt(self.year, self.week, Weekday::Mon)
            .expect("valid ISO week");
        let shifted = monday - chrono::Duration::weeks(n as i64);
        let iso = shifted.iso_week();
        Self {
            year: iso.year(),
            week: iso.week(),
        }
    }
}

impl fmt::Display for IsoWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-W{:02}", self.year, self.week)
    }
}

impl FromStr for IsoWeek {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, week) = s
            .split_once("-W")
            .ok_or_else(|| format!("invalid ISO week `{s}`"))?;
        let year: i32 = year.parse().map_err(|_| format!("invalid ISO year in `{s}`"))?;
        let week: u32 = week.parse().map_err(|_| format!("invalid week number in `{s}`"))?;
        Self::new(year, week).ok_or_else(|| format!("no such ISO week `{s}`"))
    }
}

impl Serialize for IsoWeek {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IsoWeek {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_week_parse_display_roundtrip() {
        let week: IsoWeek = "2024-W17".parse().unwrap();
        assert_eq!(week, IsoWeek { year: 2024, week: 17 });
        assert_eq!(week.to_string(), "2024-W17");
    }

    #[test]
    fn iso_week_rejects_nonsense() {
        assert!("2024-17".parse::<IsoWeek>().is_err());
        assert!("2024-W54".parse::<IsoWeek>().is_err());
        // 2023 has 52 ISO weeks; 2020 has 53.
        assert!(IsoWeek::new(2023, 53).is_none());
        assert!(IsoWeek::new(2020, 53).is_some());
    }

    #[test]
    fn minus_weeks_crosses_year_boundary() {
        let week = IsoWeek { year: 2024, week: 2 };
        let back = week.minus_weeks(3);
        assert_eq!(back, IsoWeek { year: 2023, week: 51 });
    }

    #[test]
    fn minus_weeks_within_year() {
        let week = IsoWeek { year: 2024, week: 20 };
        assert_eq!(week.minus_weeks(3), IsoWeek { year: 2024, week: 17 });
    }

    #[test]
    fn context_empty_detection() {
        assert!(Context::default().is_empty());
        let ctx = Context {
            outlet_id: Some(42),
            ..Default::default()
        };
        assert!(!ctx.is_empty());
    }
}
