use scraper::{ElementRef, Html, Selector};

use crate::error::{Result, TripwireError};
use crate::fetch::PageContent;
use crate::model::{Extraction, SelectorStrategy};
use crate::normalize::{collapse_whitespace, hash_content};

/// Number of leading characters hashed when a record carries no id attribute
const RECORD_HASH_PREFIX: usize = 100;

/// One postable item found on a feed page
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRecord {
    pub id: String,
    pub text: String,
}

/// The match target derived from a fetched page
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Document(String),
    Feed(Vec<FeedRecord>),
}

/// Extract content from a page based on the extraction strategy
pub fn extract(content: &PageContent, strategy: &Extraction) -> Result<Extracted> {
    match strategy {
        Extraction::Document => Ok(Extracted::Document(content.html.clone())),
        Extraction::Feed { strategies, id_attributes, limit } => {
            let records = extract_feed(&content.html, strategies, id_attributes, *limit)?;
            Ok(Extracted::Feed(records))
        }
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| TripwireError::ExtractionError(format!("Invalid selector '{}': {:?}", selector, e)))
}

/// Walk the strategy chain; the first container selector with any hit wins.
/// A page with no hits at all yields no records.
fn extract_feed(
    html: &str,
    strategies: &[SelectorStrategy],
    id_attributes: &[String],
    limit: usize,
) -> Result<Vec<FeedRecord>> {
    let document = Html::parse_document(html);

    for strategy in strategies {
        let container = parse_selector(&strategy.container)?;
        let text_selectors = strategy
            .text
            .iter()
            .map(|s| parse_selector(s))
            .collect::<Result<Vec<_>>>()?;

        let elements: Vec<ElementRef> = document.select(&container).collect();
        if elements.is_empty() {
            continue;
        }

        let records = elements
            .into_iter()
            .take(limit)
            .filter_map(|el| {
                let text = record_text(el, &text_selectors);
                if text.is_empty() {
                    return None;
                }
                let id = record_id(el, id_attributes, &text);
                Some(FeedRecord { id, text })
            })
            .collect();
        return Ok(records);
    }

    Ok(Vec::new())
}

fn record_text(el: ElementRef, text_selectors: &[Selector]) -> String {
    let source = text_selectors
        .iter()
        .find_map(|sel| el.select(sel).next())
        .unwrap_or(el);
    collapse_whitespace(&source.text().collect::<Vec<_>>().join(" "))
}

fn record_id(el: ElementRef, id_attributes: &[String], text: &str) -> String {
    id_attributes
        .iter()
        .filter_map(|attr| el.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let prefix: String = text.chars().take(RECORD_HASH_PREFIX).collect();
            hash_content(&prefix)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(html: &str) -> PageContent {
        PageContent {
            url: "https://example.com".to_string(),
            html: html.to_string(),
        }
    }

    fn feed_records(html: &str) -> Vec<FeedRecord> {
        match extract(&page(html), &Extraction::feed()).unwrap() {
            Extracted::Feed(records) => records,
            other => panic!("expected feed, got {:?}", other),
        }
    }

    #[test]
    fn test_document_is_raw_html() {
        let html = "<html><body><p>Hello</p></body></html>";
        let extracted = extract(&page(html), &Extraction::Document).unwrap();
        assert_eq!(extracted, Extracted::Document(html.to_string()));
    }

    #[test]
    fn test_feed_uses_text_subselector_and_id_attr() {
        let html = r#"
            <article mid="111"><header>Alice</header><div class="txt">First   post</div></article>
            <article data-mid="222"><div class="content">Second post</div></article>
        "#;
        let records = feed_records(html);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], FeedRecord { id: "111".into(), text: "First post".into() });
        assert_eq!(records[1], FeedRecord { id: "222".into(), text: "Second post".into() });
    }

    #[test]
    fn test_feed_falls_back_through_chain() {
        let html = r#"
            <div class="card-wrap"><div class="Feed_body">From card wrap</div></div>
            <div class="weibo-card">Ignored because an earlier strategy matched</div>
        "#;
        let records = feed_records(html);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "From card wrap");
    }

    #[test]
    fn test_feed_whole_element_text_and_hash_id() {
        let html = r#"<div class="weibo-card"><span>Plain</span> <b>text</b></div>"#;
        let records = feed_records(html);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "Plain text");
        assert_eq!(records[0].id, hash_content("Plain text"));
    }

    #[test]
    fn test_feed_hash_uses_first_hundred_chars() {
        let long_a = format!("{}tail-a", "x".repeat(100));
        let long_b = format!("{}tail-b", "x".repeat(100));
        let html = format!("<article>{}</article><article>{}</article>", long_a, long_b);
        let records = feed_records(&html);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, records[1].id);
    }

    #[test]
    fn test_feed_skips_empty_and_limits() {
        let mut html = String::from("<article>   </article>");
        for i in 0..15 {
            html.push_str(&format!("<article>post {}</article>", i));
        }
        let records = feed_records(&html);
        // the empty container counts toward the limit
        assert_eq!(records.len(), 9);
        assert_eq!(records[0].text, "post 0");
    }

    #[test]
    fn test_feed_no_containers() {
        assert!(feed_records("<p>nothing</p>").is_empty());
    }

    #[test]
    fn test_invalid_selector() {
        let extraction = Extraction::Feed {
            strategies: vec![SelectorStrategy::new("div[", &[])],
            id_attributes: vec![],
            limit: 10,
        };
        assert!(extract(&page("<div></div>"), &extraction).is_err());
    }
}
