use std::collections::HashSet;

use scraper::{Html, Selector};
use serde::Deserialize;
use tof_storage::Url;

use crate::CollaboratorError;

/// Canonical form used to compare a thread permalink with a search result:
/// no scheme, no `www.`/`old.`/`m.` host prefix, no query, fragment or
/// trailing slash, lowercase.
pub fn normalize_link(link: &str) -> String {
    let trimmed = link.trim();
    let Ok(url) = Url::parse(trimmed) else {
        return trimmed.trim_end_matches('/').to_lowercase();
    };
    let host = url.host_str().unwrap_or_default().to_lowercase();
    let host = ["www.", "old.", "m."]
        .iter()
        .find_map(|prefix| host.strip_prefix(prefix))
        .unwrap_or(&host)
        .to_string();
    format!("{}{}", host, url.path().trim_end_matches('/')).to_lowercase()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchItem {
    Link(String),
    Object {
        #[serde(alias = "link")]
        url: String,
    },
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    #[serde(default, alias = "organic_results")]
    results: Vec<SearchItem>,
}

fn unwrap_redirect(href: &str) -> Option<String> {
    if href.starts_with("/url?") {
        let url = Url::parse("https://search.invalid").ok()?.join(href).ok()?;
        return url
            .query_pairs()
            .find(|(k, _)| k == "q" || k == "url")
            .map(|(_, v)| v.into_owned());
    }
    Some(href.to_string())
}

fn is_result_link(link: &str) -> bool {
    Url::parse(link)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Result links from a search response body, which is either a JSON document
/// or an HTML result page. Order is preserved; only exact repeats of a URL and
/// non-http(s) links are dropped, so positions match the engine's ranking.
pub fn parse_search_links(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<Vec<String>, CollaboratorError> {
    let is_html = content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("html"));
    let candidates = if is_html {
        let text = String::from_utf8_lossy(body);
        let document = Html::parse_document(&text);
        let selector = Selector::parse("a[href]")
            .map_err(|e| CollaboratorError::InvalidPayload(e.to_string()))?;
        document
            .select(&selector)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(unwrap_redirect)
            .collect::<Vec<_>>()
    } else {
        let payload: SearchPayload = serde_json::from_slice(body)
            .map_err(|e| CollaboratorError::InvalidPayload(e.to_string()))?;
        payload
            .results
            .into_iter()
            .map(|item| match item {
                SearchItem::Link(link) => link,
                SearchItem::Object { url } => url,
            })
            .collect()
    };

    let mut seen = HashSet::new();
    Ok(candidates
        .into_iter()
        .filter(|link| is_result_link(link))
        .filter(|link| seen.insert(link.clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_links_ignore_cosmetic_differences() {
        let a = normalize_link("https://www.reddit.com/r/homelab/comments/a1/best_nas/");
        let b = normalize_link("http://old.reddit.com/r/HomeLab/comments/a1/best_nas?utm_source=x#top");
        assert_eq!(a, b);
        assert_eq!(a, "reddit.com/r/homelab/comments/a1/best_nas");
    }

    #[test]
    fn html_result_pages_yield_ordered_unique_links() {
        let html = r#"
            <html><body>
              <a href="/url?q=https://www.reddit.com/r/homelab/comments/a1/best_nas/&sa=U">Best NAS</a>
              <a href="https://example.com/review">Review</a>
              <a href="https://www.reddit.com/r/homelab/comments/a1/best_nas/">dup</a>
              <a href="/preferences">Settings</a>
              <a href="https://forum.example.org/t/9">Forum</a>
            </body></html>
        "#;
        let links = parse_search_links(Some("text/html; charset=utf-8"), html.as_bytes()).unwrap();
        assert_eq!(
            links,
            vec![
                "https://www.reddit.com/r/homelab/comments/a1/best_nas/".to_string(),
                "https://example.com/review".to_string(),
                "https://forum.example.org/t/9".to_string(),
            ]
        );
    }

    #[test]
    fn json_payloads_accept_strings_and_objects() {
        let body = br#"{"organic_results": [
            {"link": "https://example.com/a"},
            "https://example.com/b",
            {"url": "https://example.com/c"}
        ]}"#;
        let links = parse_search_links(Some("application/json"), body).unwrap();
        assert_eq!(links.len(), 3);
        assert_eq!(links[1], "https://example.com/b");
    }

    #[test]
    fn query_only_differences_keep_their_own_rank() {
        let body = br#"{"results": [
            "https://news.ycombinator.com/item?id=1",
            "https://news.ycombinator.com/item?id=2",
            "https://www.reddit.com/r/homelab/comments/a1/best_nas/"
        ]}"#;
        let links = parse_search_links(Some("application/json"), body).unwrap();
        assert_eq!(links.len(), 3);
        let target = normalize_link("https://www.reddit.com/r/homelab/comments/a1/best_nas/");
        let position = links.iter().position(|l| normalize_link(l) == target);
        assert_eq!(position, Some(2));
    }

    #[test]
    fn malformed_json_is_an_invalid_payload() {
        let err = parse_search_links(None, b"not json").unwrap_err();
        assert!(matches!(err, CollaboratorError::InvalidPayload(_)));
    }
}
