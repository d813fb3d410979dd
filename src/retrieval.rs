//! Product-manual search exposed to the model as the `searchManual` tool.
//!
//! The search engine itself is a collaborator behind [`ManualSearch`]; this
//! module only shapes its results for the model and, optionally, reports
//! each search to the host as [`ReplyItem`]s.

use crate::reply::{ReplyItem, SearchResultRef};
use crate::tools::{FunctionDefinition, function};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Results handed back to the model per search
pub const MAX_SEARCH_RESULTS: usize = 3;

pub const SEARCH_MANUAL_TOOL: &str = "searchManual";

/// One passage from a product manual
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: i64,
    pub text: String,
    /// Where the passage came from, e.g. `productid:42`
    pub source_tag: String,
    /// Location within the source, e.g. `pagenumber:7`
    pub page_tag: String,
    pub score: f32,
}

impl SearchResult {
    pub fn product_id(&self) -> Option<i64> {
        tagged_number(&self.source_tag, "productid:")
    }

    pub fn page_number(&self) -> Option<i64> {
        tagged_number(&self.page_tag, "pagenumber:")
    }

    fn reference(&self) -> SearchResultRef {
        SearchResultRef {
            search_result_id: self.id,
            product_id: self.product_id(),
            page_number: self.page_number(),
        }
    }
}

fn tagged_number(tag: &str, prefix: &str) -> Option<i64> {
    let start = tag.find(prefix)? + prefix.len();
    let digits: String = tag[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Semantic search over product manuals
#[async_trait]
pub trait ManualSearch: Send + Sync {
    /// Passages relevant to `query`, best first. `product_id` narrows the
    /// search to one product's manual.
    async fn search(&self, query: &str, product_id: Option<i64>) -> Result<Vec<SearchResult>>;
}

/// Keep the best [`MAX_SEARCH_RESULTS`] passages for `product_id`
pub fn select_results(mut results: Vec<SearchResult>, product_id: Option<i64>) -> Vec<SearchResult> {
    if let Some(product_id) = product_id {
        results.retain(|r| r.product_id() == Some(product_id));
    }
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(MAX_SEARCH_RESULTS);
    results
}

/// The `searchManual` function
pub fn search_manual_tool(searcher: Arc<dyn ManualSearch>) -> FunctionDefinition {
    build_tool(searcher, None)
}

/// The `searchManual` function, also reporting each search and its hits on
/// `events`
pub fn search_manual_tool_with_events(
    searcher: Arc<dyn ManualSearch>,
    events: UnboundedSender<ReplyItem>,
) -> FunctionDefinition {
    build_tool(searcher, Some(events))
}

fn build_tool(
    searcher: Arc<dyn ManualSearch>,
    events: Option<UnboundedSender<ReplyItem>>,
) -> FunctionDefinition {
    function(
        SEARCH_MANUAL_TOOL,
        "Searches the specified product manual, or all product manuals, to find information about a given phrase.",
    )
    .described_param("searchPhrase", "string", "A phrase to use when searching the manual")
    .described_param("productId", "integer", "ID for the product whose manual to search")
    .build(move |args: Value| {
        let searcher = searcher.clone();
        let events = events.clone();
        async move {
            let phrase = args["searchPhrase"]
                .as_str()
                .ok_or_else(|| Error::invalid_input("searchPhrase must be a string"))?
                .to_string();
            let product_id = args["productId"].as_i64();

            notify(&events, ReplyItem::Search { phrase: phrase.clone() });

            let results = select_results(searcher.search(&phrase, product_id).await?, product_id);
            log::debug!("searchManual '{}' returned {} result(s)", phrase, results.len());

            notify(
                &events,
                ReplyItem::SearchResults {
                    results: results.iter().map(SearchResult::reference).collect(),
                },
            );

            Ok(Value::Array(
                results
                    .iter()
                    .map(|r| {
                        json!({
                            "productId": r.product_id(),
                            "searchResultId": r.id,
                            "text": r.text,
                        })
                    })
                    .collect(),
            ))
        }
    })
}

fn notify(events: &Option<UnboundedSender<ReplyItem>>, item: ReplyItem) {
    if let Some(tx) = events {
        // receiver gone means the host stopped listening; the search still counts
        if tx.send(item).is_err() {
            log::debug!("reply listener dropped before search events were delivered");
        }
    }
}

/// Scores passages by how many query words they contain.
///
/// For demos and tests; real deployments put a vector index behind
/// [`ManualSearch`].
#[derive(Debug, Clone, Default)]
pub struct KeywordManualSearch {
    passages: Vec<SearchResult>,
}

impl KeywordManualSearch {
    pub fn new(passages: Vec<SearchResult>) -> Self {
        Self { passages }
    }
}

#[async_trait]
impl ManualSearch for KeywordManualSearch {
    async fn search(&self, query: &str, product_id: Option<i64>) -> Result<Vec<SearchResult>> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();

        let mut hits: Vec<SearchResult> = self
            .passages
            .iter()
            .filter(|p| product_id.is_none() || p.product_id() == product_id)
            .filter_map(|p| {
                let text = p.text.to_lowercase();
                let matched = terms.iter().filter(|t| text.contains(t.as_str())).count();
                (matched > 0).then(|| SearchResult {
                    score: matched as f32 / terms.len() as f32,
                    ..p.clone()
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(id: i64, product: i64, page: i64, text: &str) -> SearchResult {
        SearchResult {
            id,
            text: text.to_string(),
            source_tag: format!("productid:{}", product),
            page_tag: format!("pagenumber:{}", page),
            score: 0.0,
        }
    }

    fn manual() -> Arc<dyn ManualSearch> {
        Arc::new(KeywordManualSearch::new(vec![
            passage(1, 7, 2, "Charge the battery fully before first use"),
            passage(2, 7, 3, "The battery lasts eight hours"),
            passage(3, 7, 9, "Battery warranty covers two years"),
            passage(4, 7, 11, "Replace the battery cover gently"),
            passage(5, 8, 1, "Battery life on the other product"),
        ]))
    }

    #[test]
    fn test_tags_parse() {
        let p = passage(1, 42, 7, "x");
        assert_eq!(p.product_id(), Some(42));
        assert_eq!(p.page_number(), Some(7));

        let untagged = SearchResult {
            source_tag: "manual.pdf".to_string(),
            page_tag: String::new(),
            ..p
        };
        assert_eq!(untagged.product_id(), None);
        assert_eq!(untagged.page_number(), None);
    }

    #[test]
    fn test_select_results_filters_and_limits() {
        let mut results: Vec<SearchResult> = (1..=5).map(|i| passage(i, 7, 1, "t")).collect();
        for (i, r) in results.iter_mut().enumerate() {
            r.score = i as f32;
        }
        results.push(SearchResult {
            score: 100.0,
            ..passage(99, 8, 1, "other product")
        });

        let selected = select_results(results, Some(7));
        let ids: Vec<i64> = selected.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
    }

    #[test]
    fn test_tool_schema() {
        let tool = search_manual_tool(manual());
        let schema = tool.parameters_schema();

        assert_eq!(tool.name(), "searchManual");
        assert_eq!(schema["properties"]["searchPhrase"]["type"], "string");
        assert_eq!(schema["properties"]["productId"]["type"], "integer");
        assert_eq!(schema["required"], json!(["searchPhrase", "productId"]));
    }

    #[tokio::test]
    async fn test_tool_returns_top_three_for_product() {
        let tool = search_manual_tool(manual());
        let result = tool
            .invoke(json!({"searchPhrase": "battery", "productId": "7"}))
            .await
            .unwrap();

        let hits = result.as_array().unwrap();
        assert_eq!(hits.len(), MAX_SEARCH_RESULTS);
        assert!(hits.iter().all(|h| h["productId"] == 7));
        assert!(hits[0]["text"].as_str().unwrap().to_lowercase().contains("battery"));
    }

    #[tokio::test]
    async fn test_tool_reports_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let tool = search_manual_tool_with_events(manual(), tx);

        tool.invoke(json!({"searchPhrase": "warranty", "productId": 7}))
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(ReplyItem::Search {
                phrase: "warranty".to_string()
            })
        );
        match rx.recv().await {
            Some(ReplyItem::SearchResults { results }) => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].search_result_id, 3);
                assert_eq!(results[0].page_number, Some(9));
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tool_missing_phrase_is_invalid_input() {
        let tool = search_manual_tool(manual());
        let err = tool.invoke(json!({"productId": 7})).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
