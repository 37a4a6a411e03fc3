//! Visible-text and link extraction from fetched HTML.

use ego_tree::NodeRef;
use scraper::{Html, Node, Selector};
use url::Url;

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "tr", "td", "th", "section", "article", "header", "footer", "nav",
    "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "table", "form", "address",
];

/// Visible text of a document: script/style dropped, runs of spaces
/// collapsed, block boundaries kept as line breaks so numbers on adjacent
/// lines do not merge.
pub fn extract_visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::new();
    collect_text(document.tree.root(), &mut raw);

    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_text(node: NodeRef<'_, Node>, out: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(&text.text);
                out.push(' ');
            }
            Node::Element(element) => {
                let name = element.name();
                if SKIPPED_ELEMENTS.contains(&name) {
                    continue;
                }
                collect_text(child, out);
                if BLOCK_ELEMENTS.contains(&name) {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

/// One anchor found on a page, href resolved against the base URL.
#[derive(Debug, Clone)]
pub struct PageLink {
    pub url: Url,
    pub text: String,
}

pub fn extract_links(html: &str, base_url: &Url) -> Vec<PageLink> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|element| {
            let href = element.value().attr("href")?;
            if href.starts_with("javascript:")
                || href.starts_with("mailto:")
                || href.starts_with("tel:")
                || href.starts_with("data:")
                || href.starts_with('#')
                || href == "/"
            {
                return None;
            }
            let resolved = base_url.join(href).ok()?;
            if !matches!(resolved.scheme(), "http" | "https") {
                return None;
            }
            Some(PageLink {
                url: resolved,
                text: element.text().collect::<String>().trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: &str = r#"<html><head><title>Acme</title><style>body{color:red}</style></head>
        <body>
          <script>var tracking = "0301234567";</script>
          <h1>Acme GmbH</h1>
          <p>Telefon: +49 30 123456</p>
          <p>Fax:     030 654321</p>
          <a href="/kontakt">Kontakt</a>
          <a href="/impressum#top">Impressum</a>
          <a href="mailto:info@acme.de">Mail</a>
          <a href="tel:+4930123456">Call</a>
          <a href="https://other.example/partner">Partner</a>
        </body></html>"#;

    #[test]
    fn script_and_style_content_is_dropped() {
        let text = extract_visible_text(HTML);
        assert!(!text.contains("tracking"), "script text leaked: {text}");
        assert!(!text.contains("color:red"));
        assert!(text.contains("Telefon: +49 30 123456"));
    }

    #[test]
    fn block_elements_keep_line_boundaries() {
        let text = extract_visible_text(HTML);
        let phone_line = text.lines().find(|l| l.contains("Telefon")).unwrap();
        assert_eq!(phone_line, "Telefon: +49 30 123456");
        let fax_line = text.lines().find(|l| l.contains("Fax")).unwrap();
        assert_eq!(fax_line, "Fax: 030 654321");
    }

    #[test]
    fn links_resolve_and_skip_non_crawlable_schemes() {
        let base = Url::parse("http://acme.de/").unwrap();
        let links = extract_links(HTML, &base);
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert!(urls.contains(&"http://acme.de/kontakt"));
        assert!(urls.contains(&"http://acme.de/impressum#top"));
        assert!(urls.contains(&"https://other.example/partner"));
        assert!(!urls.iter().any(|u| u.starts_with("mailto:") || u.starts_with("tel:")));
    }

    #[test]
    fn link_text_is_captured() {
        let base = Url::parse("http://acme.de/").unwrap();
        let links = extract_links(HTML, &base);
        let kontakt = links.iter().find(|l| l.url.path() == "/kontakt").unwrap();
        assert_eq!(kontakt.text, "Kontakt");
    }
}
