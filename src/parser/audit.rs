use std::collections::BTreeMap;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::parser::{extract_domain, is_social_url, parse_selector};

const OG_PROPERTIES: &[&str] = &[
    "og:title",
    "og:description",
    "og:image",
    "og:url",
    "og:type",
    "og:site_name",
];

/// SEO snapshot of one rendered page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteAudit {
    pub url: String,
    pub https: bool,
    pub title: Option<String>,
    pub title_length: usize,
    pub meta_description: Option<String>,
    pub meta_description_length: usize,
    pub canonical_url: Option<String>,
    pub headings: BTreeMap<String, Vec<String>>,
    pub images_count: usize,
    pub images_missing_alt: usize,
    pub internal_links: usize,
    pub external_links: usize,
    pub social_links: Vec<String>,
    pub schema_markup: Vec<String>,
    pub og_tags: BTreeMap<String, String>,
}

/// Builds `SiteAudit`s from raw HTML. Selectors are compiled once up front.
pub struct SiteAuditor {
    title: Selector,
    meta_description: Selector,
    canonical: Selector,
    headings: Vec<(String, Selector)>,
    images: Selector,
    anchors: Selector,
    json_ld: Selector,
    microdata: Selector,
    rdfa: Selector,
    og_meta: Selector,
}

impl SiteAuditor {
    pub fn new() -> Result<Self> {
        let mut headings = Vec::with_capacity(6);
        for level in 1..=6 {
            let tag = format!("h{}", level);
            headings.push((tag.clone(), parse_selector(&tag)?));
        }

        Ok(Self {
            title: parse_selector("title")?,
            meta_description: parse_selector("meta[name='description']")?,
            canonical: parse_selector("link[rel='canonical']")?,
            headings,
            images: parse_selector("img")?,
            anchors: parse_selector("a[href]")?,
            json_ld: parse_selector("script[type='application/ld+json']")?,
            microdata: parse_selector("[itemtype]")?,
            rdfa: parse_selector("meta[property][content]")?,
            og_meta: parse_selector("meta[property^='og:']")?,
        })
    }

    pub fn audit(&self, html: &str, url: &str) -> SiteAudit {
        let document = Html::parse_document(html);

        let title = self
            .first_text(&document, &self.title)
            .filter(|t| !t.is_empty());
        let meta_description = document
            .select(&self.meta_description)
            .next()
            .and_then(|e| e.value().attr("content"))
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let canonical_url = document
            .select(&self.canonical)
            .next()
            .and_then(|e| e.value().attr("href"))
            .map(str::to_string);

        let mut headings = BTreeMap::new();
        for (tag, selector) in &self.headings {
            let texts: Vec<String> = document
                .select(selector)
                .map(|e| e.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            headings.insert(tag.clone(), texts);
        }

        let mut images_count = 0;
        let mut images_missing_alt = 0;
        for img in document.select(&self.images) {
            images_count += 1;
            match img.value().attr("alt") {
                Some(alt) if !alt.trim().is_empty() => {}
                _ => images_missing_alt += 1,
            }
        }

        let domain = extract_domain(url);
        let mut internal_links = 0;
        let mut external_links = 0;
        let mut social_links = Vec::new();
        for anchor in document.select(&self.anchors) {
            let href = match anchor.value().attr("href") {
                Some(href) => href,
                None => continue,
            };
            if href.starts_with('/') {
                internal_links += 1;
                continue;
            }
            if !href.starts_with("http") {
                // fragments, mailto:, javascript: and friends
                continue;
            }
            let same_site = matches!(
                (&domain, extract_domain(href)),
                (Some(base), Some(target)) if *base == target
            );
            if same_site {
                internal_links += 1;
            } else {
                external_links += 1;
            }
            if is_social_url(href) && !social_links.contains(&href.to_string()) {
                social_links.push(href.to_string());
            }
        }

        let mut schema_markup = Vec::new();
        if document.select(&self.json_ld).next().is_some() {
            schema_markup.push("JSON-LD".to_string());
        }
        if document.select(&self.microdata).next().is_some() {
            schema_markup.push("Microdata".to_string());
        }
        if document.select(&self.rdfa).next().is_some() {
            schema_markup.push("RDFa".to_string());
        }

        let mut og_tags = BTreeMap::new();
        for meta in document.select(&self.og_meta) {
            let (property, content) = match (
                meta.value().attr("property"),
                meta.value().attr("content"),
            ) {
                (Some(p), Some(c)) => (p, c),
                _ => continue,
            };
            if OG_PROPERTIES.contains(&property) && !og_tags.contains_key(property) {
                og_tags.insert(property.to_string(), content.to_string());
            }
        }

        debug!(
            "Audited {}: {} headings levels, {} images, {}/{} internal/external links",
            url,
            headings.values().filter(|v| !v.is_empty()).count(),
            images_count,
            internal_links,
            external_links
        );

        SiteAudit {
            url: url.to_string(),
            https: url.starts_with("https://"),
            title_length: title.as_deref().map(str::len).unwrap_or(0),
            title,
            meta_description_length: meta_description.as_deref().map(str::len).unwrap_or(0),
            meta_description,
            canonical_url,
            headings,
            images_count,
            images_missing_alt,
            internal_links,
            external_links,
            social_links,
            schema_markup,
            og_tags,
        }
    }

    fn first_text(&self, document: &Html, selector: &Selector) -> Option<String> {
        document
            .select(selector)
            .next()
            .map(|e| e.text().collect::<String>().trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html>
        <head>
            <title> Acme Widgets - Home </title>
            <meta name="description" content="Widgets for every occasion.">
            <link rel="canonical" href="https://acme.example/">
            <meta property="og:title" content="Acme Widgets">
            <meta property="og:type" content="website">
            <script type="application/ld+json">{"@type": "Organization"}</script>
        </head>
        <body>
            <h1>Acme</h1>
            <h2>Products</h2>
            <h2>Contact</h2>
            <img src="/logo.png" alt="Acme logo">
            <img src="/banner.png" alt="">
            <img src="/pixel.gif">
            <a href="/products">Products</a>
            <a href="https://acme.example/contact">Contact</a>
            <a href="https://partner.example/deal">Partner</a>
            <a href="https://www.instagram.com/acme">Instagram</a>
            <a href="mailto:hi@acme.example">Mail</a>
        </body>
        </html>
    "#;

    fn audit_page() -> SiteAudit {
        let auditor = SiteAuditor::new().unwrap();
        auditor.audit(PAGE, "https://acme.example/")
    }

    #[test]
    fn test_title_and_meta() {
        let audit = audit_page();
        assert_eq!(audit.title.as_deref(), Some("Acme Widgets - Home"));
        assert_eq!(audit.title_length, "Acme Widgets - Home".len());
        assert_eq!(
            audit.meta_description.as_deref(),
            Some("Widgets for every occasion.")
        );
        assert!(audit.https);
        assert_eq!(audit.canonical_url.as_deref(), Some("https://acme.example/"));
    }

    #[test]
    fn test_headings() {
        let audit = audit_page();
        assert_eq!(audit.headings["h1"], vec!["Acme"]);
        assert_eq!(audit.headings["h2"], vec!["Products", "Contact"]);
        assert!(audit.headings["h3"].is_empty());
    }

    #[test]
    fn test_images() {
        let audit = audit_page();
        assert_eq!(audit.images_count, 3);
        // empty alt counts as missing
        assert_eq!(audit.images_missing_alt, 2);
    }

    #[test]
    fn test_link_classification() {
        let audit = audit_page();
        // "/products" and same-domain absolute link are internal; partner and
        // instagram are external; mailto is skipped
        assert_eq!(audit.internal_links, 2);
        assert_eq!(audit.external_links, 2);
        assert_eq!(audit.social_links, vec!["https://www.instagram.com/acme"]);
    }

    #[test]
    fn test_schema_and_og() {
        let audit = audit_page();
        assert!(audit.schema_markup.contains(&"JSON-LD".to_string()));
        // og:title metas are property+content pairs, so RDFa is flagged too
        assert!(audit.schema_markup.contains(&"RDFa".to_string()));
        assert_eq!(audit.og_tags["og:title"], "Acme Widgets");
        assert_eq!(audit.og_tags["og:type"], "website");
        assert!(!audit.og_tags.contains_key("og:image"));
    }

    #[test]
    fn test_empty_document() {
        let auditor = SiteAuditor::new().unwrap();
        let audit = auditor.audit("<html></html>", "http://plain.example");
        assert!(audit.title.is_none());
        assert_eq!(audit.title_length, 0);
        assert!(!audit.https);
        assert_eq!(audit.images_count, 0);
        assert_eq!(audit.internal_links, 0);
    }
}
