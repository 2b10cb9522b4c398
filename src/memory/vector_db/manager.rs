// Qdrant implementation of the vector store contract
#![allow(deprecated)]

use async_trait::async_trait;
use qdrant_client::{
    client::QdrantClient,
    qdrant::{
        condition::ConditionOneOf, payload_index_params::IndexParams, point_id::PointIdOptions,
        points_selector::PointsSelectorOneOf, r#match::MatchValue, value::Kind,
        vectors_config::Config, with_payload_selector::SelectorOptions, Condition,
        CreateCollection, Distance as QdrantDistance, FieldCondition, FieldType, Filter, Match,
        PayloadIndexParams, PointId, PointStruct, PointsSelector, ScrollPoints, SearchPoints,
        TextIndexParams, TokenizerType, Value as QdrantValue, VectorParams, VectorsConfig,
        WithPayloadSelector,
    },
};
use std::collections::HashMap;
use tracing::debug;

use super::{
    CollectionInfo, Distance, NewPoint, PointFilter, ScoredPoint, ScrollPage, StoredPoint,
    VectorStore, TEXT_KEY,
};
use crate::errors::{RagError, Result};

/// Vector store backed by a Qdrant server (gRPC)
pub struct QdrantVectorStore {
    client: QdrantClient,
    url: String,
}

impl QdrantVectorStore {
    pub fn connect(url: &str) -> Result<Self> {
        let client = QdrantClient::from_url(url)
            .build()
            .map_err(|e| RagError::UpstreamFailure(format!("Failed to create Qdrant client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn upstream(context: &str) -> impl FnOnce(anyhow::Error) -> RagError + '_ {
    move |e| RagError::UpstreamFailure(format!("{}: {}", context, e))
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .list_collections()
            .await
            .map_err(upstream("Failed to list collections"))?;

        Ok(response.collections.into_iter().map(|c| c.name).collect())
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        if !self.collection_exists(name).await? {
            return Ok(None);
        }

        let info = self
            .client
            .collection_info(name)
            .await
            .map_err(upstream("Failed to get collection info"))?
            .result;

        let points = info.as_ref().and_then(|r| r.points_count).unwrap_or(0);
        let dimension = info
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|config| match config {
                Config::Params(params) => Some(params.size as usize),
                Config::ParamsMap(_) => None,
            })
            .ok_or_else(|| {
                RagError::UpstreamFailure(format!(
                    "Collection '{}' has no single unnamed vector configuration",
                    name
                ))
            })?;

        Ok(Some(CollectionInfo {
            name: name.to_string(),
            dimension,
            points,
        }))
    }

    async fn create_collection(&self, name: &str, dimension: usize, distance: Distance) -> Result<()> {
        let distance = match distance {
            Distance::Cosine => QdrantDistance::Cosine,
            Distance::Dot => QdrantDistance::Dot,
            Distance::Euclid => QdrantDistance::Euclid,
        };

        self.client
            .create_collection(&CreateCollection {
                collection_name: name.to_string(),
                vectors_config: Some(VectorsConfig {
                    config: Some(Config::Params(VectorParams {
                        size: dimension as u64,
                        distance: distance.into(),
                        ..Default::default()
                    })),
                }),
                ..Default::default()
            })
            .await
            .map_err(upstream("Failed to create collection"))?;

        // Without a full-text index a text match is a whole-string substring
        // test; with it every query word must occur in the passage.
        self.client
            .create_field_index(
                name,
                TEXT_KEY,
                FieldType::Text,
                Some(&text_index_params()),
                None,
            )
            .await
            .map_err(upstream("Failed to create text index"))?;

        debug!(collection = name, dimension, "Created collection with text index");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &PointFilter,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>> {
        let response = self
            .client
            .search_points(&SearchPoints {
                collection_name: collection.to_string(),
                vector: vector.to_vec(),
                limit: limit as u64,
                filter: to_qdrant_filter(filter),
                with_payload: Some(with_payload()),
                score_threshold,
                ..Default::default()
            })
            .await
            .map_err(upstream("Failed to search points"))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| ScoredPoint {
                id: point_id_to_string(&point.id),
                text: payload_text(&point.payload),
                score: point.score,
            })
            .collect())
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &PointFilter,
        page_limit: u32,
        cursor: Option<String>,
    ) -> Result<ScrollPage> {
        let response = self
            .client
            .scroll(&ScrollPoints {
                collection_name: collection.to_string(),
                filter: to_qdrant_filter(filter),
                offset: cursor.map(|c| string_to_point_id(&c)),
                limit: Some(page_limit),
                with_payload: Some(with_payload()),
                ..Default::default()
            })
            .await
            .map_err(upstream("Failed to scroll points"))?;

        let points = response
            .result
            .into_iter()
            .map(|point| StoredPoint {
                id: point_id_to_string(&point.id),
                text: payload_text(&point.payload),
            })
            .collect();

        Ok(ScrollPage {
            points,
            next_cursor: response.next_page_offset.map(|id| point_id_to_string(&Some(id))),
        })
    }

    async fn upsert(&self, collection: &str, points: Vec<NewPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let count = points.len();

        let points: Vec<PointStruct> = points
            .into_iter()
            .map(|p| {
                let mut payload: HashMap<String, QdrantValue> = HashMap::new();
                payload.insert(TEXT_KEY.to_string(), QdrantValue::from(p.text));
                if let Some((key, scope_id)) = p.scope {
                    payload.insert(key, scope_value(&scope_id));
                }
                PointStruct::new(string_to_point_id(&p.id), p.vector, payload)
            })
            .collect();

        self.client
            .upsert_points_blocking(collection, None, points, None)
            .await
            .map_err(upstream("Failed to upsert points"))?;

        debug!(collection, count, "Upserted points");
        Ok(())
    }

    async fn delete(&self, collection: &str, filter: &PointFilter) -> Result<()> {
        if !self.collection_exists(collection).await? {
            return Err(RagError::not_found("collection", collection));
        }
        let filter = to_qdrant_filter(filter).unwrap_or_default();

        self.client
            .delete_points(
                collection,
                None,
                &PointsSelector {
                    points_selector_one_of: Some(PointsSelectorOneOf::Filter(filter)),
                },
                None,
            )
            .await
            .map_err(upstream("Failed to delete points"))?;

        Ok(())
    }
}

fn text_index_params() -> PayloadIndexParams {
    PayloadIndexParams {
        index_params: Some(IndexParams::TextIndexParams(TextIndexParams {
            tokenizer: TokenizerType::Word as i32,
            lowercase: Some(true),
            ..Default::default()
        })),
    }
}

fn with_payload() -> WithPayloadSelector {
    WithPayloadSelector {
        selector_options: Some(SelectorOptions::Enable(true)),
    }
}

fn field(key: &str, value: MatchValue) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: key.to_string(),
            r#match: Some(Match {
                match_value: Some(value),
            }),
            ..Default::default()
        })),
    }
}

fn to_qdrant_filter(filter: &PointFilter) -> Option<Filter> {
    if filter.is_empty() {
        return None;
    }

    let mut must = Vec::new();
    if let Some((key, scope_id)) = &filter.scope {
        let value = match scope_id.parse::<i64>() {
            Ok(n) => MatchValue::Integer(n),
            Err(_) => MatchValue::Keyword(scope_id.clone()),
        };
        must.push(field(key, value));
    }
    if let Some(text) = &filter.text {
        must.push(field(TEXT_KEY, MatchValue::Text(text.clone())));
    }

    Some(Filter {
        must,
        ..Default::default()
    })
}

// Integer scope ids are stored as integers so they match integer filters
fn scope_value(scope_id: &str) -> QdrantValue {
    match scope_id.parse::<i64>() {
        Ok(n) => QdrantValue::from(n),
        Err(_) => QdrantValue::from(scope_id.to_string()),
    }
}

fn payload_text(payload: &HashMap<String, QdrantValue>) -> String {
    payload
        .get(TEXT_KEY)
        .and_then(|v| match &v.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

fn string_to_point_id(id: &str) -> PointId {
    match id.parse::<u64>() {
        Ok(n) => PointId::from(n),
        Err(_) => PointId::from(id.to_string()),
    }
}

fn point_id_to_string(point_id: &Option<PointId>) -> String {
    point_id
        .as_ref()
        .and_then(|id| id.point_id_options.as_ref())
        .map(|options| match options {
            PointIdOptions::Num(n) => n.to_string(),
            PointIdOptions::Uuid(u) => u.clone(),
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_round_trip() {
        assert_eq!(point_id_to_string(&Some(string_to_point_id("42"))), "42");
        let uuid = "5c56c793-69f3-4fbf-87e6-c4bf54c28c26";
        assert_eq!(point_id_to_string(&Some(string_to_point_id(uuid))), uuid);
        assert_eq!(point_id_to_string(&None), "unknown");
    }

    #[test]
    fn test_filter_translation() {
        assert!(to_qdrant_filter(&PointFilter::default()).is_none());

        let filter = to_qdrant_filter(&PointFilter::default().scoped("id", "7").matching_text("rust"))
            .unwrap();
        assert_eq!(filter.must.len(), 2);
    }

    #[test]
    fn test_text_index_is_word_tokenized_and_lowercased() {
        match text_index_params().index_params {
            Some(IndexParams::TextIndexParams(params)) => {
                assert_eq!(params.tokenizer, TokenizerType::Word as i32);
                assert_eq!(params.lowercase, Some(true));
            }
            other => panic!("unexpected index params: {:?}", other),
        }
    }

    #[test]
    fn test_payload_text_missing() {
        assert_eq!(payload_text(&HashMap::new()), "");
    }

    #[tokio::test]
    #[ignore] // Integration test - requires Qdrant
    async fn test_create_upsert_search() {
        let store = QdrantVectorStore::connect("http://localhost:6334").unwrap();
        let name = format!("test_{}", uuid::Uuid::new_v4().simple());
        store.create_collection(&name, 4, Distance::Cosine).await.unwrap();

        store
            .upsert(
                &name,
                vec![NewPoint {
                    id: "1".to_string(),
                    vector: vec![0.5; 4],
                    text: "hello world".to_string(),
                    scope: Some(("id".to_string(), "9".to_string())),
                }],
            )
            .await
            .unwrap();

        let info = store.collection_info(&name).await.unwrap().unwrap();
        assert_eq!(info.dimension, 4);

        let hits = store
            .search(&name, &[0.5; 4], &PointFilter::default().scoped("id", "9"), 5, None)
            .await
            .unwrap();
        assert_eq!(hits[0].id, "1");
        assert_eq!(hits[0].text, "hello world");

        // words match individually, in any order
        let page = store
            .scroll(&name, &PointFilter::default().matching_text("World Hello"), 10, None)
            .await
            .unwrap();
        assert_eq!(page.points.len(), 1);
    }
}
