use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::ListingSelectors;
use crate::types::{NaturalKey, RawAssignmentEntry};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid selector '{0}'")]
    Selector(String),
    #[error("Failed to parse URL: {0}")]
    UrlParse(String),
    #[error("No /projects/<id>/tasks/<id> segment in {0}")]
    MissingIdentifiers(String),
}

static RE_TASK_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"projects/(\d+)/tasks/(\d+)").expect("invalid regex: task path")
});

static RE_LOGIN_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/login").expect("invalid regex: login path"));

static RE_LOGIN_QUERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[?&]login").expect("invalid regex: login query"));

static RE_HEADER_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\(.*\)$").expect("invalid regex: header suffix"));

fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|_| ParseError::Selector(css.to_string()))
}

fn elem_text(element: ElementRef) -> String {
    element.text().collect::<String>()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether a page URL is the login page, regardless of host: the path starts
/// with `/login` or the URL carries a `login` query parameter.
pub fn is_login_url(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    };
    RE_LOGIN_PATH.is_match(&path) || RE_LOGIN_QUERY.is_match(url)
}

/// `"Acme Corp (12)"` → `"Acme Corp"`.
pub fn project_name_from_header(header: &str) -> String {
    RE_HEADER_SUFFIX.replace(header, "").trim().to_string()
}

pub fn parse_natural_key(absolute_url: &str) -> Result<NaturalKey, ParseError> {
    let url = Url::parse(absolute_url).map_err(|e| ParseError::UrlParse(format!("{absolute_url}: {e}")))?;
    let caps = RE_TASK_PATH
        .captures(url.path())
        .ok_or_else(|| ParseError::MissingIdentifiers(absolute_url.to_string()))?;

    Ok(NaturalKey {
        project_id: caps[1].to_string(),
        parent_id: caps[2].to_string(),
    })
}

/// Scans the grouped assignments report in document order.
pub fn parse_assignment_listing(
    html: &str,
    page_url: &str,
    selectors: &ListingSelectors,
) -> Result<Vec<RawAssignmentEntry>, ParseError> {
    let document = Html::parse_document(html);
    let group_sel = selector(&selectors.group)?;
    let header_sel = selector(&selectors.header)?;
    let anchor_sel = selector(&selectors.anchor)?;
    let base = Url::parse(page_url).ok();

    let mut entries = Vec::new();
    for (group_idx, group) in document.select(&group_sel).enumerate() {
        let group_header = group
            .select(&header_sel)
            .next()
            .map(|h| normalize_whitespace(&elem_text(h)))
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| format!("Group {}", group_idx + 1));
        let project_name = project_name_from_header(&group_header);

        for (link_idx, link) in group.select(&anchor_sel).enumerate() {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let displayed_name = Some(normalize_whitespace(&elem_text(link)))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| format!("Task {}", link_idx + 1));
            let absolute_url = match &base {
                Some(base) => base
                    .join(href)
                    .map(|u| u.to_string())
                    .unwrap_or_else(|_| href.to_string()),
                None => href.to_string(),
            };
            let object_modal = link
                .value()
                .attr(&selectors.modal_attribute)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);

            entries.push(RawAssignmentEntry {
                group_header: group_header.clone(),
                project_name: project_name.clone(),
                displayed_name,
                href: href.to_string(),
                absolute_url,
                object_modal,
            });
        }
    }

    Ok(entries)
}
