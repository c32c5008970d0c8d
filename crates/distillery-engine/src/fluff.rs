//! Region-aware fluff removal.
//!
//! Content is processed line by line. Each line is assigned a [`Region`]:
//! HTML-ish input uses `<header>`, `<footer>`, `<nav>`/`<aside>` blocks; plain
//! text treats the first and last 15% of non-empty lines as header and footer.
//! A line is dropped when any pattern scoped to its region (or to `all`) matches.

use distillery_core::{FluffPattern, Region};
use regex::{Regex, RegexBuilder};

use crate::error::DistillError;

/// Share of non-empty plain-text lines treated as header (and again as footer).
const EDGE_PERCENT: usize = 15;

#[derive(Debug, Clone)]
struct FluffRule {
    region: Region,
    matcher: Regex,
}

#[derive(Debug, Clone, Default)]
pub struct FluffFilter {
    rules: Vec<FluffRule>,
}

/// Output of [`FluffFilter::filter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredContent {
    pub text: String,
    pub bytes_removed: usize,
    pub lines_removed: usize,
}

impl FluffFilter {
    /// Compile fluff patterns; keywords are escaped, all matching is case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns [`DistillError::Pattern`] if a regex pattern does not compile.
    pub fn compile(patterns: &[FluffPattern]) -> Result<Self, DistillError> {
        let rules = patterns
            .iter()
            .filter(|p| !p.pattern.trim().is_empty())
            .map(|p| {
                let source = if p.regex {
                    p.pattern.clone()
                } else {
                    regex::escape(p.pattern.trim())
                };
                let matcher = RegexBuilder::new(&source)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| DistillError::Pattern {
                        context: format!("fluff ({})", p.region),
                        pattern: p.pattern.clone(),
                        source: e,
                    })?;
                Ok(FluffRule {
                    region: p.region,
                    matcher,
                })
            })
            .collect::<Result<Vec<_>, DistillError>>()?;
        Ok(Self { rules })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[must_use]
    pub fn filter(&self, content: &str) -> FilteredContent {
        if self.rules.is_empty() {
            return FilteredContent {
                text: content.to_string(),
                bytes_removed: 0,
                lines_removed: 0,
            };
        }

        let lines: Vec<&str> = content.lines().collect();
        let regions = classify_lines(&lines);
        let mut kept = Vec::with_capacity(lines.len());
        let mut lines_removed = 0;

        for (line, region) in lines.iter().zip(regions) {
            let is_fluff = self.rules.iter().any(|rule| {
                (rule.region == Region::All || rule.region == region)
                    && rule.matcher.is_match(line)
            });
            if is_fluff {
                lines_removed += 1;
            } else {
                kept.push(*line);
            }
        }

        let mut text = kept.join("\n");
        if content.ends_with('\n') && !text.is_empty() {
            text.push('\n');
        }
        FilteredContent {
            bytes_removed: content.len().saturating_sub(text.len()),
            text,
            lines_removed,
        }
    }
}

fn looks_like_html(lines: &[&str]) -> bool {
    lines.iter().any(|line| {
        let lower = line.to_ascii_lowercase();
        ["<header", "<footer", "<nav", "<aside"]
            .iter()
            .any(|tag| lower.contains(tag))
    })
}

/// Assign a region to every line.
fn classify_lines(lines: &[&str]) -> Vec<Region> {
    if looks_like_html(lines) {
        classify_html(lines)
    } else {
        classify_plain(lines)
    }
}

fn classify_html(lines: &[&str]) -> Vec<Region> {
    let mut regions = Vec::with_capacity(lines.len());
    let mut open: Option<Region> = None;

    for line in lines {
        let lower = line.to_ascii_lowercase();
        match open {
            Some(region) => {
                regions.push(region);
                if closes(region, &lower) {
                    open = None;
                }
            }
            None => {
                let region = opens(&lower).unwrap_or(Region::Body);
                regions.push(region);
                if region != Region::Body && !closes(region, &lower) {
                    open = Some(region);
                }
            }
        }
    }
    regions
}

fn opens(lower: &str) -> Option<Region> {
    if lower.contains("<header") {
        Some(Region::Header)
    } else if lower.contains("<footer") {
        Some(Region::Footer)
    } else if lower.contains("<nav") || lower.contains("<aside") {
        Some(Region::Sidebar)
    } else {
        None
    }
}

fn closes(region: Region, lower: &str) -> bool {
    match region {
        Region::Header => lower.contains("</header"),
        Region::Footer => lower.contains("</footer"),
        Region::Sidebar => lower.contains("</nav") || lower.contains("</aside"),
        Region::Body | Region::All => true,
    }
}

fn classify_plain(lines: &[&str]) -> Vec<Region> {
    let non_empty = lines.iter().filter(|l| !l.trim().is_empty()).count();
    let edge = if non_empty < 2 {
        0
    } else {
        (non_empty * EDGE_PERCENT).div_ceil(100)
    };

    let mut seen = 0;
    lines
        .iter()
        .map(|line| {
            if line.trim().is_empty() {
                return Region::Body;
            }
            let index = seen;
            seen += 1;
            if index < edge {
                Region::Header
            } else if index >= non_empty - edge {
                Region::Footer
            } else {
                Region::Body
            }
        })
        .collect()
}
