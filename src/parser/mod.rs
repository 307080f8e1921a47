pub mod audit;

pub use audit::{SiteAudit, SiteAuditor};

use scraper::{Html, Selector};
use serde_json::{json, Value};
use url::Url;

use crate::error::{Result, ScrapeError};
use crate::job::ExtractTarget;

const SOCIAL_DOMAINS: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "youtube.com",
    "pinterest.com",
    "tiktok.com",
    "snapchat.com",
    "reddit.com",
    "tumblr.com",
    "quora.com",
    "medium.com",
];

pub(crate) fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| ScrapeError::Extraction(format!("Invalid selector '{}': {}", selector, e)))
}

/// Pull a single value out of a document per the extract target. The
/// document is parsed and dropped inside this call so no `Html` (which is
/// not `Send`) ever crosses an await point.
pub fn extract(html: &str, target: &ExtractTarget, base_url: Option<&str>) -> Result<Value> {
    match target {
        ExtractTarget::Text { selector } => {
            let sel = parse_selector(selector)?;
            let document = Html::parse_document(html);
            let element = document.select(&sel).next().ok_or_else(|| {
                ScrapeError::Extraction(format!("No element matching '{}'", selector))
            })?;
            let text = element.text().collect::<String>();
            Ok(json!(text.trim()))
        }
        ExtractTarget::Attribute {
            selector,
            attribute,
        } => {
            let sel = parse_selector(selector)?;
            let document = Html::parse_document(html);
            let element = document.select(&sel).next().ok_or_else(|| {
                ScrapeError::Extraction(format!("No element matching '{}'", selector))
            })?;
            Ok(element
                .value()
                .attr(attribute)
                .map(|v| json!(v))
                .unwrap_or(Value::Null))
        }
        ExtractTarget::Html { selector } => {
            let sel = parse_selector(selector)?;
            let document = Html::parse_document(html);
            let element = document.select(&sel).next().ok_or_else(|| {
                ScrapeError::Extraction(format!("No element matching '{}'", selector))
            })?;
            Ok(json!(element.inner_html()))
        }
        ExtractTarget::Count { selector } => {
            let sel = parse_selector(selector)?;
            let document = Html::parse_document(html);
            Ok(json!(document.select(&sel).count()))
        }
        ExtractTarget::PageAudit => {
            let auditor = SiteAuditor::new()?;
            let audit = auditor.audit(html, base_url.unwrap_or(""));
            Ok(serde_json::to_value(audit)?)
        }
    }
}

/// Prefix a scheme-less URL with https, leaving anything else untouched.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    }
}

pub fn is_valid_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .map(|h| h.trim_start_matches("www.").to_string())
}

pub fn is_social_url(url: &str) -> bool {
    match extract_domain(url) {
        Some(domain) => SOCIAL_DOMAINS
            .iter()
            .any(|social| domain == *social || domain.ends_with(&format!(".{}", social))),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
        <html><head><title>Acme Widgets</title></head>
        <body>
            <h1 class="hero">Welcome</h1>
            <a href="/about" id="about">About</a>
            <ul><li>one</li><li>two</li><li>three</li></ul>
        </body></html>
    "#;

    #[test]
    fn test_extract_text() {
        let target = ExtractTarget::Text {
            selector: "h1.hero".to_string(),
        };
        let value = extract(DOC, &target, None).unwrap();
        assert_eq!(value, json!("Welcome"));
    }

    #[test]
    fn test_extract_attribute() {
        let target = ExtractTarget::Attribute {
            selector: "#about".to_string(),
            attribute: "href".to_string(),
        };
        let value = extract(DOC, &target, None).unwrap();
        assert_eq!(value, json!("/about"));

        let missing = ExtractTarget::Attribute {
            selector: "#about".to_string(),
            attribute: "rel".to_string(),
        };
        assert_eq!(extract(DOC, &missing, None).unwrap(), Value::Null);
    }

    #[test]
    fn test_extract_count() {
        let target = ExtractTarget::Count {
            selector: "li".to_string(),
        };
        assert_eq!(extract(DOC, &target, None).unwrap(), json!(3));
    }

    #[test]
    fn test_extract_no_match_is_error() {
        let target = ExtractTarget::Text {
            selector: ".missing".to_string(),
        };
        assert!(extract(DOC, &target, None).is_err());
    }

    #[test]
    fn test_extract_invalid_selector() {
        let target = ExtractTarget::Text {
            selector: ":::".to_string(),
        };
        assert!(extract(DOC, &target, None).is_err());
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(normalize_url("  example.com"), "https://example.com");
    }

    #[test]
    fn test_is_valid_url() {
        assert!(is_valid_url("https://example.com/page"));
        assert!(is_valid_url("http://example.com"));
        assert!(!is_valid_url("ftp://example.com"));
        assert!(!is_valid_url("example.com"));
        assert!(!is_valid_url(""));
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://www.example.com/a/b").as_deref(),
            Some("example.com")
        );
        assert_eq!(extract_domain("not a url"), None);
    }

    #[test]
    fn test_is_social_url() {
        assert!(is_social_url("https://www.instagram.com/acme"));
        assert!(is_social_url("https://linkedin.com/company/acme"));
        assert!(!is_social_url("https://example.com/instagram.com"));
    }
}
