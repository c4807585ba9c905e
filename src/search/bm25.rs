//! Lexical store built on tantivy.
//!
//! Documents are indexed under the vector store's chunk ids so the hybrid
//! layer can merge the two result sets. BM25 scores are clamped to [0, 1]
//! before they leave this module.

use async_trait::async_trait;
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexWriter, ReloadPolicy, TantivyDocument};

use crate::error::{Error, Result};
use crate::models::{LexicalHit, Metadata};
use crate::search::LexicalStore;

pub struct Bm25Index {
    index: Index,
    f_id: Field,
    f_content: Field,
    f_title: Field,
    f_metadata: Field,
}

impl Bm25Index {
    /// Create or open a BM25 index at the given directory.
    pub fn open_or_create(index_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;

        let mut schema_builder = Schema::builder();
        let f_id = schema_builder.add_text_field("id", STRING | STORED);
        let f_content = schema_builder.add_text_field("content", TEXT | STORED);
        let f_title = schema_builder.add_text_field("title", TEXT | STORED);
        // metadata is carried as a JSON string, stored but not searched
        let f_metadata = schema_builder.add_text_field("metadata", STORED);
        let schema = schema_builder.build();

        let index = if index_dir.join("meta.json").exists() {
            Index::open_in_dir(index_dir)
                .map_err(|e| Error::Internal(format!("failed to open lexical index: {e}")))?
        } else {
            Index::create_in_dir(index_dir, schema)
                .map_err(|e| Error::Internal(format!("failed to create lexical index: {e}")))?
        };

        Ok(Self {
            index,
            f_id,
            f_content,
            f_title,
            f_metadata,
        })
    }

    fn writer(&self) -> Result<IndexWriter> {
        self.index
            .writer(50_000_000)
            .map_err(|e| Error::Internal(format!("failed to create index writer: {e}")))
    }
}

#[async_trait]
impl LexicalStore for Bm25Index {
    async fn index(
        &self,
        id: &str,
        content: &str,
        title: &str,
        metadata: &Metadata,
    ) -> Result<()> {
        let mut writer = self.writer()?;

        // Replace any previous document under the same id; relational
        // backends hand deleted ids to new rows.
        let term = tantivy::Term::from_field_text(self.f_id, id);
        writer.delete_term(term);

        let metadata_json = serde_json::to_string(metadata)?;
        writer
            .add_document(doc!(
                self.f_id => id,
                self.f_content => content,
                self.f_title => title,
                self.f_metadata => metadata_json,
            ))
            .map_err(|e| Error::Internal(format!("failed to index document: {e}")))?;

        writer
            .commit()
            .map_err(|e| Error::Internal(format!("failed to commit index: {e}")))?;
        Ok(())
    }

    async fn remove(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer()?;
        for id in ids {
            let term = tantivy::Term::from_field_text(self.f_id, id);
            writer.delete_term(term);
        }
        writer
            .commit()
            .map_err(|e| Error::Internal(format!("failed to commit delete: {e}")))?;
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let mut writer = self.writer()?;
        writer
            .delete_all_documents()
            .map_err(|e| Error::Internal(format!("failed to clear lexical index: {e}")))?;
        writer
            .commit()
            .map_err(|e| Error::Internal(format!("failed to commit clear: {e}")))?;
        Ok(())
    }

    async fn search(&self, query_str: &str, k: usize) -> Result<Vec<LexicalHit>> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| Error::Internal(format!("failed to create reader: {e}")))?;

        let searcher = reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.f_content, self.f_title]);
        let query = query_parser
            .parse_query(query_str)
            .map_err(|e| Error::Invalid(format!("failed to parse search query: {e}")))?;

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(k.max(1)))
            .map_err(|e| Error::Internal(format!("lexical search failed: {e}")))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| Error::Internal(format!("failed to retrieve document: {e}")))?;

            let id = doc
                .get_first(self.f_id)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if id.is_empty() {
                continue;
            }

            let content = doc
                .get_first(self.f_content)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            let title = doc
                .get_first(self.f_title)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            let metadata: Metadata = doc
                .get_first(self.f_metadata)
                .and_then(|v| v.as_str())
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default();

            // BM25 is unbounded; saturate at 1 so fusion weights stay
            // comparable with cosine similarity.
            hits.push(LexicalHit {
                id,
                content,
                title,
                metadata,
                score: score.min(1.0),
            });
        }

        Ok(hits)
    }
}
