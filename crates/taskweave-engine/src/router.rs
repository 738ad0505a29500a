//! Router — classify a query into a flow and extract structured context
//!
//! Classification combines the hardwired flow vocabularies with keyword
//! scores from the capability index (a tool's tags decide which flow its
//! keyword hits vote for). Context extraction is regex over the raw text.

use std::sync::Arc;
use taskweave_core::{Context, Error, FlowKind, IsoWeek, Query, Result};
use taskweave_tools::CapabilityIndex;
use regex::{Regex, RegexBuilder};
use tracing::debug;

/// Words that follow "for" without naming a product.
const PRODUCT_STOPWORDS: &[&str] = &[
    "the", "a", "an", "this", "that", "all", "each", "every", "last", "my", "our", "outlet",
];

const PLOT_WORDS: &[&str] = &["plot", "chart", "graph", "trend", "visualize", "visualise"];
const PDF_WORDS: &[&str] = &["invoice", "tracking", "extract", "vendor"];

/// Product names recognized anywhere in the query, not only after "for".
const KNOWN_PRODUCTS: &[&str] = &["widget", "gadget", "gizmo"];

/// Tags in the capability index that vote for a flow.
const PLOT_TAGS: &[&str] = &["plot", "viz", "chart"];
const PDF_TAGS: &[&str] = &["pdf", "tracking", "document"];

#[derive(Clone, Debug)]
pub struct RouteDecision {
    pub flow_kind: FlowKind,
    pub context: Context,
    /// Tools whose keywords matched, best score first.
    pub suggested_tools: Vec<String>,
}

pub struct Router {
    index: Arc<CapabilityIndex>,
    re_show_over: Regex,
    re_last_n: Regex,
    re_outlet: Regex,
    re_product: Regex,
    re_iso_week: Regex,
}

impl Router {
    pub fn new(index: Arc<CapabilityIndex>) -> Self {
        let ci = |pattern: &str| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("static regex")
        };
        Self {
            index,
            re_show_over: ci(r"\bshow\b.*\bover\b"),
            re_last_n: ci(r"\blast\s+(\d+)\s+(week|month)s?\b"),
            re_outlet: ci(r"\boutlet\s+(\d+)\b"),
            re_product: ci(r"\bfor\s+([a-z][a-z0-9_-]*)\b"),
            re_iso_week: ci(r"\b(\d{4})-W(\d{2})\b"),
        }
    }

    /// Route with the current ISO week taken from the system clock.
    pub fn route(&self, query: &Query) -> Result<RouteDecision> {
        self.route_at(query, IsoWeek::current())
    }

    /// Route with an explicit "current" week, for deterministic callers.
    pub fn route_at(&self, query: &Query, current_week: IsoWeek) -> Result<RouteDecision> {
        let text = query.text.as_str();
        let tokens = tokenize(text);

        let mut plot_score = count_hits(&tokens, PLOT_WORDS);
        if self.re_show_over.is_match(text) {
            plot_score += 1;
        }
        let mut pdf_score = count_hits(&tokens, PDF_WORDS);

        // Capability keywords vote for the flow their tool is tagged with.
        let mut suggested: Vec<(usize, String)> = Vec::new();
        for tool in self.index.available() {
            let score = tool.keyword_score(text);
            if score == 0 {
                continue;
            }
            if PLOT_TAGS.iter().any(|t| tool.has_tag(t)) {
                plot_score += score;
            } else if PDF_TAGS.iter().any(|t| tool.has_tag(t)) {
                pdf_score += score;
            }
            suggested.push((score, tool.name.clone()));
        }
        suggested.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let suggested_tools: Vec<String> = suggested.into_iter().map(|(_, name)| name).collect();

        let pdf_file = query
            .file_path
            .as_deref()
            .map(|p| p.to_ascii_lowercase().ends_with(".pdf"))
            .unwrap_or(false);
        if pdf_file {
            pdf_score += 1;
        }

        let context = self.extract_context(query, current_week);

        let flow_kind = match (plot_score > 0, pdf_score > 0) {
            // Tie broken by the attachment: a file leans pdf_tracking.
            (true, true) => {
                if query.file_path.is_some() {
                    FlowKind::PdfTracking
                } else {
                    FlowKind::Plot
                }
            }
            (true, false) => FlowKind::Plot,
            (false, true) => FlowKind::PdfTracking,
            (false, false) => {
                if suggested_tools.is_empty() && context.is_empty() {
                    return Err(Error::AmbiguousFlow(format!(
                        "no flow keyword, capability, or extractor matched `{text}`"
                    )));
                }
                FlowKind::Dynamic
            }
        };

        debug!(%flow_kind, plot_score, pdf_score, ?suggested_tools, "routed query");
        Ok(RouteDecision {
            flow_kind,
            context,
            suggested_tools,
        })
    }

    fn extract_context(&self, query: &Query, current_week: IsoWeek) -> Context {
        let text = query.text.as_str();
        let mut ctx = Context {
            file_path: query.file_path.clone(),
            ..Default::default()
        };

        if let Some(caps) = self.re_last_n.captures(text) {
            let n: Option<u32> = caps.get(1).and_then(|m| m.as_str().parse().ok());
            let unit = caps.get(2).map(|m| m.as_str().to_ascii_lowercase());
            match (n, unit.as_deref()) {
                (Some(n), Some("week")) => ctx.week_count = Some(n),
                (Some(n), Some("month")) => ctx.month_count = Some(n),
                _ => {}
            }
        }

        if let Some(caps) = self.re_outlet.captures(text) {
            ctx.outlet_id = caps.get(1).and_then(|m| m.as_str().parse().ok());
        }

        for caps in self.re_product.captures_iter(text) {
            if let Some(word) = caps.get(1) {
                let word = word.as_str().to_ascii_lowercase();
                if !PRODUCT_STOPWORDS.contains(&word.as_str()) {
                    ctx.product_filter = Some(word);
                    break;
                }
            }
        }
        if ctx.product_filter.is_none() {
            let tokens = tokenize(text);
            ctx.product_filter = KNOWN_PRODUCTS
                .iter()
                .find(|p| tokens.iter().any(|t| t.as_str().trim_end_matches('s') == **p))
                .map(|p| p.to_string());
        }

        // Explicit ISO week tokens win over relative ranges.
        let mut weeks: Vec<IsoWeek> = self
            .re_iso_week
            .find_iter(text)
            .filter_map(|m| m.as_str().parse().ok())
            .collect();
        weeks.sort();
        match weeks.as_slice() {
            [] => {
                if let Some(n) = ctx.week_count {
                    if n > 0 {
                        ctx.week_range = Some((current_week.minus_weeks(n - 1), current_week));
                    }
                }
            }
            [only] => ctx.week_range = Some((*only, *only)),
            [first, .., last] => ctx.week_range = Some((*first, *last)),
        }

        ctx
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn count_hits(tokens: &[String], words: &[&str]) -> usize {
    tokens.iter().filter(|t| words.contains(&t.as_str())).count()
}
