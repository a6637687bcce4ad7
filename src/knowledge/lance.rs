//! LanceDB Vector Index - 영속 벡터 검색
//!
//! 한 문서의 청크는 하나의 RecordBatch로 `add` 되어 하나의 커밋이 됩니다.
//! 검색은 커밋 단위 스냅샷을 읽으므로 일부 청크만 보이는 상태는 없습니다.
//! ref: https://lancedb.github.io/lancedb/

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    UInt32Array,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;
use tokio::sync::Mutex;

use super::vector::{
    check_dimensions, sort_ranked, ChunkMetadata, EmbeddingEntry, ScoredEntry, SearchFilter,
    VectorIndex,
};
use crate::collector::DocumentFormat;
use crate::error::IndexError;

/// 청크 테이블 이름
const TABLE_NAME: &str = "chunks";

// ============================================================================
// LanceVectorIndex
// ============================================================================

/// LanceDB 벡터 인덱스 구현
///
/// 코사인 거리로 검색하며 점수는 `1 - distance`로 변환합니다.
pub struct LanceVectorIndex {
    db: Connection,
    dimension: usize,
    timeout: Duration,
    /// 쓰기 직렬화 (테이블 최초 생성 경쟁 방지)
    write_lock: Mutex<()>,
}

impl LanceVectorIndex {
    /// LanceDB 인덱스 열기
    ///
    /// 기존 테이블의 벡터 차원이 `dimension`과 다르면 DimensionMismatch.
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베더 출력 차원
    /// * `timeout` - 개별 I/O 호출 타임아웃
    pub async fn open(path: &Path, dimension: usize, timeout: Duration) -> Result<Self, IndexError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| IndexError::Unavailable(format!("create {:?}: {}", parent, e)))?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| IndexError::Unavailable("Invalid path encoding".to_string()))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .map_err(|e| IndexError::Unavailable(format!("connect: {}", e)))?;

        let index = Self {
            db,
            dimension,
            timeout,
            write_lock: Mutex::new(()),
        };

        if let Some(existing) = index.stored_dimension().await? {
            if existing != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: existing,
                    actual: dimension,
                });
            }
        }

        tracing::debug!("LanceDB index opened at {:?} (dimension {})", path, dimension);
        Ok(index)
    }

    /// 타임아웃 + 에러 변환
    async fn guarded<T, F>(&self, what: &str, fut: F) -> Result<T, IndexError>
    where
        F: Future<Output = lancedb::Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(IndexError::Unavailable(format!("{}: {}", what, e))),
            Err(_) => Err(IndexError::Unavailable(format!(
                "{}: timed out after {:?}",
                what, self.timeout
            ))),
        }
    }

    /// 청크 테이블 스키마
    fn schema(dimension: usize) -> Schema {
        Schema::new(vec![
            Field::new("fingerprint", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("relative_path", DataType::Utf8, false),
            Field::new("format", DataType::Utf8, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("chunk_count", DataType::UInt32, false),
            Field::new("token_count", DataType::UInt32, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(&self, entries: &[EmbeddingEntry]) -> Result<RecordBatch, IndexError> {
        let strings = |f: fn(&EmbeddingEntry) -> &str| {
            Arc::new(StringArray::from(entries.iter().map(f).collect::<Vec<_>>()))
        };
        let numbers = |f: fn(&EmbeddingEntry) -> u32| {
            Arc::new(UInt32Array::from(entries.iter().map(f).collect::<Vec<_>>()))
        };

        let flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.vector.iter().copied())
            .collect();
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
            None,
        )
        .map_err(|e| IndexError::Unavailable(format!("vector array: {}", e)))?;

        RecordBatch::try_new(
            Arc::new(Self::schema(self.dimension)),
            vec![
                strings(|e| e.metadata.fingerprint.as_str()),
                strings(|e| e.metadata.source.as_str()),
                strings(|e| e.metadata.relative_path.as_str()),
                strings(|e| e.metadata.format.as_str()),
                numbers(|e| e.metadata.chunk_index),
                numbers(|e| e.metadata.chunk_count),
                numbers(|e| e.metadata.token_count),
                strings(|e| e.text.as_str()),
                Arc::new(vectors),
            ],
        )
        .map_err(|e| IndexError::Unavailable(format!("record batch: {}", e)))
    }

    /// 테이블 열기 (없으면 None)
    async fn open_table(&self) -> Result<Option<lancedb::table::Table>, IndexError> {
        let names = self
            .guarded("list tables", self.db.table_names().execute())
            .await?;
        if !names.iter().any(|n| n == TABLE_NAME) {
            return Ok(None);
        }

        let table = self
            .guarded("open table", self.db.open_table(TABLE_NAME).execute())
            .await?;
        Ok(Some(table))
    }

    /// 저장된 테이블의 벡터 차원
    async fn stored_dimension(&self) -> Result<Option<usize>, IndexError> {
        let Some(table) = self.open_table().await? else {
            return Ok(None);
        };

        let schema = self.guarded("read schema", table.schema()).await?;
        match schema.field_with_name("vector").map(|f| f.data_type().clone()) {
            Ok(DataType::FixedSizeList(_, size)) => Ok(Some(size as usize)),
            _ => Err(IndexError::Unavailable(
                "table schema has no fixed-size 'vector' column".to_string(),
            )),
        }
    }
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    async fn upsert(&self, entries: &[EmbeddingEntry]) -> Result<usize, IndexError> {
        if entries.is_empty() {
            return Ok(0);
        }
        check_dimensions(self.dimension, entries)?;

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let _guard = self.write_lock.lock().await;

        match self.open_table().await? {
            Some(table) => {
                self.guarded("add rows", table.add(batches).execute()).await?;
            }
            None => {
                self.guarded(
                    "create table",
                    self.db.create_table(TABLE_NAME, batches).execute(),
                )
                .await?;
            }
        }

        Ok(entries.len())
    }

    async fn delete_by_fingerprint(&self, fingerprint: &str) -> Result<usize, IndexError> {
        let _guard = self.write_lock.lock().await;

        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        let filter = eq_filter("fingerprint", fingerprint);
        let before = self
            .guarded("count rows", table.count_rows(Some(filter.clone())))
            .await?;
        if before == 0 {
            return Ok(0);
        }

        self.guarded("delete rows", table.delete(&filter)).await?;
        Ok(before)
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredEntry>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if top_k == 0 {
            return Ok(vec![]);
        }

        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };

        let mut search = table
            .vector_search(query.to_vec())
            .map_err(|e| IndexError::Unavailable(format!("vector search: {}", e)))?
            .distance_type(DistanceType::Cosine)
            .limit(top_k);

        if let Some(predicate) = filter_predicate(filter) {
            search = search.only_if(predicate);
        }

        let batches: Vec<RecordBatch> = self
            .guarded("search", async {
                let stream = search.execute().await?;
                stream.try_collect::<Vec<_>>().await
            })
            .await?;

        let mut results = Vec::new();
        for batch in &batches {
            results.extend(batch_to_results(batch)?);
        }

        sort_ranked(&mut results);
        results.truncate(top_k);
        Ok(results)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        match self.open_table().await? {
            Some(table) => self.guarded("count rows", table.count_rows(None)).await,
            None => Ok(0),
        }
    }

    async fn has_fingerprint(&self, fingerprint: &str) -> Result<bool, IndexError> {
        let Some(table) = self.open_table().await? else {
            return Ok(false);
        };

        let count = self
            .guarded(
                "count rows",
                table.count_rows(Some(eq_filter("fingerprint", fingerprint))),
            )
            .await?;
        Ok(count > 0)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "lancedb"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// SQL 문자열 리터럴 이스케이프 후 등호 조건 생성
fn eq_filter(column: &str, value: &str) -> String {
    format!("{} = '{}'", column, value.replace('\'', "''"))
}

fn filter_predicate(filter: &SearchFilter) -> Option<String> {
    let mut clauses = Vec::new();
    if let Some(ref source) = filter.source {
        clauses.push(eq_filter("source", source));
    }
    if let Some(ref fingerprint) = filter.fingerprint {
        clauses.push(eq_filter("fingerprint", fingerprint));
    }

    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(" AND "))
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, IndexError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| IndexError::Unavailable(format!("Missing {} column", name)))
}

/// 검색 결과 RecordBatch -> ScoredEntry
fn batch_to_results(batch: &RecordBatch) -> Result<Vec<ScoredEntry>, IndexError> {
    let fingerprints = column::<StringArray>(batch, "fingerprint")?;
    let sources = column::<StringArray>(batch, "source")?;
    let paths = column::<StringArray>(batch, "relative_path")?;
    let formats = column::<StringArray>(batch, "format")?;
    let chunk_indices = column::<UInt32Array>(batch, "chunk_index")?;
    let chunk_counts = column::<UInt32Array>(batch, "chunk_count")?;
    let token_counts = column::<UInt32Array>(batch, "token_count")?;
    let texts = column::<StringArray>(batch, "text")?;
    let vectors = column::<FixedSizeListArray>(batch, "vector")?;
    // _distance 컬럼 (LanceDB가 자동 추가)
    let distances = column::<Float32Array>(batch, "_distance")?;

    let mut results = Vec::with_capacity(batch.num_rows());

    for i in 0..batch.num_rows() {
        let vector = vectors
            .value(i)
            .as_any()
            .downcast_ref::<Float32Array>()
            .map(|a| a.values().to_vec())
            .unwrap_or_default();

        let format = DocumentFormat::parse(formats.value(i))
            .ok_or_else(|| IndexError::Unavailable(format!("unknown format {}", formats.value(i))))?;

        results.push(ScoredEntry {
            entry: EmbeddingEntry {
                vector,
                text: texts.value(i).to_string(),
                metadata: ChunkMetadata {
                    source: sources.value(i).to_string(),
                    relative_path: paths.value(i).to_string(),
                    fingerprint: fingerprints.value(i).to_string(),
                    chunk_index: chunk_indices.value(i),
                    chunk_count: chunk_counts.value(i),
                    format,
                    token_count: token_counts.value(i),
                },
            },
            // 코사인 거리 -> 코사인 유사도
            score: 1.0 - distances.value(i),
        });
    }

    Ok(results)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 4;
    const TIMEOUT: Duration = Duration::from_secs(30);

    fn create_test_entry(fingerprint: &str, chunk_index: u32, vector: Vec<f32>) -> EmbeddingEntry {
        EmbeddingEntry {
            vector,
            text: format!("Test chunk {} for {}", chunk_index, fingerprint),
            metadata: ChunkMetadata {
                source: format!("{}.txt", fingerprint),
                relative_path: format!("docs/{}.txt", fingerprint),
                fingerprint: fingerprint.to_string(),
                chunk_index,
                chunk_count: 2,
                format: DocumentFormat::Text,
                token_count: 5,
            },
        }
    }

    #[tokio::test]
    async fn test_lance_index_basic() {
        let temp_dir = TempDir::new().unwrap();
        let index = LanceVectorIndex::open(&temp_dir.path().join("test.lance"), DIM, TIMEOUT)
            .await
            .unwrap();

        assert_eq!(index.count().await.unwrap(), 0);
        let empty = index
            .search(&[1.0, 0.0, 0.0, 0.0], 3, &SearchFilter::default())
            .await
            .unwrap();
        assert!(empty.is_empty());

        let entries = vec![
            create_test_entry("fp1", 0, vec![1.0, 0.0, 0.0, 0.0]),
            create_test_entry("fp1", 1, vec![0.0, 1.0, 0.0, 0.0]),
        ];
        assert_eq!(index.upsert(&entries).await.unwrap(), 2);
        assert_eq!(index.count().await.unwrap(), 2);
        assert!(index.has_fingerprint("fp1").await.unwrap());
        assert!(!index.has_fingerprint("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_lance_search_ranking() {
        let temp_dir = TempDir::new().unwrap();
        let index = LanceVectorIndex::open(&temp_dir.path().join("search.lance"), DIM, TIMEOUT)
            .await
            .unwrap();

        index
            .upsert(&[
                create_test_entry("fp1", 0, vec![1.0, 0.0, 0.0, 0.0]),
                create_test_entry("fp2", 0, vec![0.0, 1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let results = index
            .search(&[0.9, 0.1, 0.0, 0.0], 10, &SearchFilter::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entry.metadata.fingerprint, "fp1");
        assert!(results[0].score > results[1].score);
        assert!((results[0].score - 0.9939).abs() < 0.01);
        assert_eq!(results[0].entry.metadata.relative_path, "docs/fp1.txt");
        assert_eq!(results[0].entry.vector.len(), DIM);
    }

    #[tokio::test]
    async fn test_lance_delete_and_filter() {
        let temp_dir = TempDir::new().unwrap();
        let index = LanceVectorIndex::open(&temp_dir.path().join("delete.lance"), DIM, TIMEOUT)
            .await
            .unwrap();

        index
            .upsert(&[
                create_test_entry("fp1", 0, vec![1.0, 0.0, 0.0, 0.0]),
                create_test_entry("fp1", 1, vec![1.0, 1.0, 0.0, 0.0]),
                create_test_entry("o'brien", 0, vec![0.0, 0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let filter = SearchFilter {
            source: Some("o'brien.txt".to_string()),
            fingerprint: None,
        };
        let filtered = index.search(&[1.0, 0.0, 0.0, 0.0], 10, &filter).await.unwrap();
        assert_eq!(filtered.len(), 1);

        assert_eq!(index.delete_by_fingerprint("fp1").await.unwrap(), 2);
        assert_eq!(index.count().await.unwrap(), 1);
        assert_eq!(index.delete_by_fingerprint("fp1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lance_persists_and_checks_dimension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("persist.lance");

        {
            let index = LanceVectorIndex::open(&path, DIM, TIMEOUT).await.unwrap();
            index
                .upsert(&[create_test_entry("fp1", 0, vec![1.0, 0.0, 0.0, 0.0])])
                .await
                .unwrap();
        }

        let reopened = LanceVectorIndex::open(&path, DIM, TIMEOUT).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);

        let mismatch = LanceVectorIndex::open(&path, 8, TIMEOUT).await;
        assert!(matches!(
            mismatch,
            Err(IndexError::DimensionMismatch { expected: 4, actual: 8 })
        ));
    }

    #[test]
    fn test_filter_predicate() {
        assert_eq!(filter_predicate(&SearchFilter::default()), None);
        let filter = SearchFilter {
            source: Some("it's.md".to_string()),
            fingerprint: Some("abc".to_string()),
        };
        assert_eq!(
            filter_predicate(&filter).unwrap(),
            "source = 'it''s.md' AND fingerprint = 'abc'"
        );
    }
}
