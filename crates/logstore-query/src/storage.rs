//! In-memory log storage with LogsQL execution.
//!
//! Ingested batches become immutable [`Part`]s. Queries fan the blocks of all
//! parts out to blocking workers which run the filter, then push the matching
//! rows through the pipe chain. `in(<subquery>)` filters are resolved first, in
//! a separate pass over the storage.
//!
//! Merges rewrite a set of parts into one part. A merge may carry a row drop
//! filter, which is how delete tasks are applied. Only one merge runs at a
//! time, so every source part is replaced exactly once.

use crate::bitmap::Bitmap;
use crate::block_result::{BlockResult, BlockResultColumn};
use crate::block_search::BlockSearch;
use crate::error::{QueryError, Result};
use crate::fields_set::FieldsSet;
use crate::filter::Filter;
use crate::parser::parse_query_at_timestamp;
use crate::pipes::{lock, new_processor_chain, Pipe, PipeProcessor, PipeSink, PipeUniq};
use crate::query::{subquery_cache_key, Query};
use crate::stop::StopSignal;
use futures::future::{BoxFuture, FutureExt};
use logstore_core::{StreamId, TenantId, MSG_FIELD_NAME, STREAM_FIELD_NAME, STREAM_ID_FIELD_NAME, TIME_FIELD_NAME};
use logstore_observability::metrics::{BLOCKS_SCANNED_TOTAL, QUERIES_TOTAL, QUERY_DURATION};
use logstore_storage::{
    merge_block_streams, BlockHeader, BlockStreamReader, BlockStreamWriter, DeleteTask, DeleteTasks, LogRows,
    MergeStats, Part, RowDropFilter, Rows, StorageConfig, StreamInfo,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex, MutexGuard, RwLock};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// A field name or value together with the number of rows it was seen in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueWithHits {
    pub value: String,
    pub hits: u64,
}

/// Blocks of one part queued for the query workers.
struct BlockBatch {
    part: Arc<Part>,
    headers: Vec<BlockHeader>,
}

pub struct Storage {
    config: StorageConfig,
    parts: RwLock<Vec<Arc<Part>>>,
    streams: RwLock<HashMap<StreamId, StreamInfo>>,
    delete_tasks: Mutex<DeleteTasks>,
    next_part_id: AtomicU64,
    /// Held by a merge from picking its source parts until they are replaced.
    merge_lock: Mutex<()>,
    /// Set on shutdown; interrupts running merges.
    merge_stop: Arc<AtomicBool>,
}

impl Storage {
    pub fn new(config: StorageConfig) -> Result<Self> {
        let delete_tasks = DeleteTasks::open(config.delete_tasks_path.clone())?;
        if !delete_tasks.list().is_empty() {
            info!(tasks = delete_tasks.list().len(), "Loaded pending delete tasks");
        }
        Ok(Self {
            config,
            parts: RwLock::new(Vec::new()),
            streams: RwLock::new(HashMap::new()),
            delete_tasks: Mutex::new(delete_tasks),
            next_part_id: AtomicU64::new(1),
            merge_lock: Mutex::new(()),
            merge_stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Stops running merges. Parts of an interrupted merge stay as they were.
    pub fn stop(&self) {
        self.merge_stop.store(true, Ordering::Release);
    }

    fn next_part_name(&self) -> String {
        format!("part-{:016X}", self.next_part_id.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn parts_count(&self) -> usize {
        self.parts.read().await.len()
    }

    pub async fn rows_count(&self) -> u64 {
        self.parts.read().await.iter().map(|p| p.header().rows_count).sum()
    }

    /// Writes the rows as a new part.
    ///
    /// Once more than `merge_batch_size` parts exist, the oldest ones are merged,
    /// unless another merge is running. The next added part retries then.
    pub async fn must_add_rows(&self, mut lr: LogRows) -> Result<()> {
        if lr.is_empty() {
            return Ok(());
        }
        let streams = lr.streams().clone();
        let rows = lr.len();
        let part = Part::open(self.next_part_name(), lr.to_in_memory_part())?;
        debug!(part = part.name(), rows, blocks = part.header().blocks_count, "Added part");

        self.streams.write().await.extend(streams);
        let batch = self.config.merge_batch_size.max(2);
        {
            let mut parts = self.parts.write().await;
            parts.push(Arc::new(part));
            if parts.len() <= batch {
                return Ok(());
            }
        }

        let Ok(guard) = self.merge_lock.try_lock() else {
            debug!("Another merge is running; skipping the automatic merge");
            return Ok(());
        };
        let to_merge = {
            let parts = self.parts.read().await;
            if parts.len() <= batch {
                return Ok(());
            }
            parts[..batch].to_vec()
        };
        self.merge_parts(&guard, to_merge, None).await?;
        Ok(())
    }

    /// Merges all the parts into a single part.
    ///
    /// Waits for a running merge or delete task to finish first.
    pub async fn force_merge(&self) -> Result<MergeStats> {
        let guard = self.merge_lock.lock().await;
        let parts = self.parts.read().await.clone();
        if parts.len() < 2 {
            return Ok(MergeStats::default());
        }
        self.merge_parts(&guard, parts, None).await
    }

    /// Replaces `parts` with their merge. The caller holds `merge_lock`, so no
    /// other merge can replace any of `parts` meanwhile.
    async fn merge_parts(
        &self,
        _merge_guard: &MutexGuard<'_, ()>,
        parts: Vec<Arc<Part>>,
        drop_filter: Option<Arc<dyn RowDropFilter>>,
    ) -> Result<MergeStats> {
        let name = self.next_part_name();
        let stop = self.merge_stop.clone();
        let sources = parts.clone();
        let joined = tokio::task::spawn_blocking(move || -> Result<(MergeStats, Option<Part>)> {
            let readers = sources.into_iter().map(BlockStreamReader::new).collect();
            let mut bsw = BlockStreamWriter::new();
            let stats = merge_block_streams(&mut bsw, readers, drop_filter.as_deref(), &stop);
            let data = bsw.finalize();
            if stats.stopped || data.header.rows_count == 0 {
                return Ok((stats, None));
            }
            Ok((stats, Some(Part::open(name, data)?)))
        })
        .await;
        let (stats, merged) = join_blocking(joined)?;
        if stats.stopped {
            warn!(parts = parts.len(), "Merge interrupted; keeping the source parts");
            return Ok(stats);
        }

        let mut current = self.parts.write().await;
        let before = current.len();
        current.retain(|p| !parts.iter().any(|m| Arc::ptr_eq(p, m)));
        if before - current.len() != parts.len() {
            panic!(
                "BUG: only {} of {} merged parts were still present at replacement",
                before - current.len(),
                parts.len()
            );
        }
        if let Some(part) = merged {
            current.push(Arc::new(part));
        }
        debug!(
            source_parts = parts.len(),
            parts = current.len(),
            rows_read = stats.rows_read,
            rows_dropped = stats.rows_dropped,
            "Replaced merged parts"
        );
        Ok(stats)
    }

    /// Runs `q` over the rows of `tenant_ids`, or over all tenants when empty.
    ///
    /// `write_block` receives the output blocks, possibly concurrently from
    /// several workers.
    pub async fn run_query(
        &self,
        tenant_ids: &[TenantId],
        q: &Query,
        write_block: impl Fn(usize, BlockResult) + Send + Sync + 'static,
    ) -> Result<()> {
        let start = Instant::now();
        QUERIES_TOTAL.inc();
        let q = self.resolve_subqueries(tenant_ids, q).await?;
        let result = self.run_resolved_query(tenant_ids, &q, Arc::new(PipeSink::new(write_block))).await;
        let elapsed = start.elapsed();
        QUERY_DURATION.observe(elapsed.as_secs_f64());
        debug!(query = %q, duration_ms = elapsed.as_millis() as u64, ok = result.is_ok(), "Query finished");
        result
    }

    /// Replaces `in(<subquery>)` filters of `q` with the values the subqueries return.
    fn resolve_subqueries<'a>(&'a self, tenant_ids: &'a [TenantId], q: &'a Query) -> BoxFuture<'a, Result<Query>> {
        async move {
            if !q.has_filter_in_with_query() {
                return Ok(q.clone());
            }
            let mut cache: HashMap<String, Vec<String>> = HashMap::new();
            for (sq, field) in q.filter_in_subqueries() {
                let key = subquery_cache_key(&sq, &field);
                if cache.contains_key(&key) {
                    continue;
                }
                let values = self.subquery_values(tenant_ids, &sq, &field).await?;
                debug!(subquery = %sq, field = %field, values = values.len(), "Resolved subquery");
                cache.insert(key, values);
            }
            q.init_filter_in_values(&cache)
        }
        .boxed()
    }

    async fn subquery_values(&self, tenant_ids: &[TenantId], sq: &Query, field: &str) -> Result<Vec<String>> {
        let sq = self.resolve_subqueries(tenant_ids, sq).await?;
        let values = Arc::new(std::sync::Mutex::new(BTreeSet::new()));
        let sink_values = values.clone();
        let field_name = field.to_string();
        let sink = PipeSink::new(move |_, br: BlockResult| {
            let c = br.column(&field_name);
            let mut values = lock(&sink_values);
            for i in 0..br.rows_len() {
                values.insert(c.value(i).to_string());
            }
        });
        self.run_resolved_query(tenant_ids, &sq, Arc::new(sink)).await?;
        let values = std::mem::take(&mut *lock(&values));
        Ok(values.into_iter().collect())
    }

    async fn run_resolved_query(&self, tenant_ids: &[TenantId], q: &Query, sink: Arc<dyn PipeProcessor>) -> Result<()> {
        let mut needed = FieldsSet::all();
        for p in q.pipes.iter().rev() {
            p.update_needed_fields(&mut needed);
        }
        let workers = q.get_concurrency().min(self.config.concurrency()).max(1);
        let query_stop = StopSignal::new();
        let (first, scope) =
            new_processor_chain(&q.pipes, workers, &query_stop, self.config.max_state_size_bytes, sink);

        let parts = self.parts.read().await.clone();
        let (min_timestamp, max_timestamp) = q.get_filter_time_range();
        let search = Arc::new(BlockSearchContext {
            filter: q.filter.clone(),
            needed,
            streams: self.streams.read().await.clone(),
            tenant_ids: tenant_ids.to_vec(),
            min_timestamp,
            max_timestamp,
            first: first.clone(),
            scope,
        });

        let (tx, rx) = mpsc::channel::<BlockBatch>(workers * 2);
        let rx = Arc::new(std::sync::Mutex::new(rx));
        let handles: Vec<_> = (0..workers)
            .map(|worker_id| {
                let search = search.clone();
                let rx = rx.clone();
                tokio::task::spawn_blocking(move || search.run_worker(worker_id, &rx))
            })
            .collect();

        let sent = search.send_batches(&parts, &tx).await;
        drop(tx);
        for h in handles {
            join_blocking(h.await);
        }
        sent?;
        first.flush()
    }

    /// Returns the names of the fields in the rows `q` selects, with the number
    /// of rows holding a non-empty value for each.
    pub async fn get_field_names(&self, tenant_ids: &[TenantId], q: &Query) -> Result<Vec<ValueWithHits>> {
        let names = Arc::new(std::sync::Mutex::new(HashMap::<String, u64>::new()));
        let sink_names = names.clone();
        self.run_query(tenant_ids, q, move |_, br| {
            let mut names = lock(&sink_names);
            for c in br.columns() {
                let hits = (0..br.rows_len()).filter(|&i| !c.value(i).is_empty()).count() as u64;
                if hits > 0 {
                    *names.entry(c.name().to_string()).or_insert(0) += hits;
                }
            }
        })
        .await?;
        let names = std::mem::take(&mut *lock(&names));
        let mut result: Vec<ValueWithHits> = names.into_iter().map(|(value, hits)| ValueWithHits { value, hits }).collect();
        result.sort_unstable_by(|a, b| a.value.cmp(&b.value));
        Ok(result)
    }

    /// Returns up to `limit` distinct values of `field`, most frequent first.
    ///
    /// A zero `limit` returns all the values.
    pub async fn get_field_values(
        &self,
        tenant_ids: &[TenantId],
        q: &Query,
        field: &str,
        limit: u64,
    ) -> Result<Vec<ValueWithHits>> {
        let mut hits_field = "hits".to_string();
        while hits_field == field {
            hits_field.push('s');
        }
        let mut q = q.clone();
        q.pipes.push(Pipe::Uniq(PipeUniq {
            by_fields: vec![field.to_string()],
            hits_field: Some(hits_field.clone()),
            limit,
        }));

        let values = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink_values = values.clone();
        let field_name = field.to_string();
        self.run_query(tenant_ids, &q, move |_, br| {
            let value = br.column(&field_name);
            let hits = br.column(&hits_field);
            let mut values = lock(&sink_values);
            for i in 0..br.rows_len() {
                values.push(ValueWithHits {
                    value: value.value(i).to_string(),
                    hits: hits.value(i).parse().unwrap_or(0),
                });
            }
        })
        .await?;
        let mut result = std::mem::take(&mut *lock(&values));
        result.sort_unstable_by(|a, b| b.hits.cmp(&a.hits).then_with(|| a.value.cmp(&b.value)));
        Ok(result)
    }

    /// Returns up to `limit` streams of the rows `q` selects, most frequent first.
    pub async fn get_streams(&self, tenant_ids: &[TenantId], q: &Query, limit: u64) -> Result<Vec<ValueWithHits>> {
        self.get_field_values(tenant_ids, q, STREAM_FIELD_NAME, limit).await
    }

    /// Lists the delete tasks which did not finish yet.
    pub async fn delete_tasks(&self) -> Vec<DeleteTask> {
        self.delete_tasks.lock().await.list().to_vec()
    }

    /// Deletes the rows of `tenant_ids` matching `filter` with timestamps up to `timestamp`.
    ///
    /// The task is recorded before the parts are rewritten and removed once
    /// they are, so an interrupted task can be resumed with
    /// [`Storage::run_pending_delete_tasks`]. Returns the number of deleted rows.
    pub async fn delete_run_task(
        &self,
        task_id: &str,
        timestamp: i64,
        tenant_ids: &[TenantId],
        filter: &str,
    ) -> Result<u64> {
        let task = DeleteTask {
            task_id: task_id.to_string(),
            tenant_ids: tenant_ids.to_vec(),
            filter: filter.to_string(),
            start_time: i64::MIN,
            end_time: timestamp,
        };
        let drop_filter = self.new_delete_filter(&task).await?;
        self.delete_tasks.lock().await.add(task)?;
        self.apply_delete_task(task_id, drop_filter).await
    }

    /// Runs the delete tasks left over from a previous run.
    pub async fn run_pending_delete_tasks(&self) -> Result<u64> {
        let tasks = self.delete_tasks().await;
        let mut deleted = 0;
        for task in tasks {
            let drop_filter = self.new_delete_filter(&task).await?;
            deleted += self.apply_delete_task(&task.task_id, drop_filter).await?;
        }
        Ok(deleted)
    }

    async fn new_delete_filter(&self, task: &DeleteTask) -> Result<DeleteRowsFilter> {
        if task.start_time > task.end_time {
            return Err(QueryError::InvalidQuery(format!(
                "delete task {:?}: start time {} exceeds end time {}",
                task.task_id, task.start_time, task.end_time
            )));
        }
        let q = parse_query_at_timestamp(&task.filter, task.end_time)?;
        if !q.pipes.is_empty() {
            return Err(QueryError::InvalidQuery(format!(
                "delete filter cannot contain pipes; got {:?}",
                task.filter
            )));
        }
        let q = self.resolve_subqueries(&task.tenant_ids, &q).await?;
        let (min_timestamp, max_timestamp) = q.get_filter_time_range();
        Ok(DeleteRowsFilter {
            filter: q.filter.clone(),
            tenant_ids: task.tenant_ids.clone(),
            streams: self.streams.read().await.clone(),
            min_timestamp: min_timestamp.max(task.start_time),
            max_timestamp: max_timestamp.min(task.end_time),
        })
    }

    async fn apply_delete_task(&self, task_id: &str, drop_filter: DeleteRowsFilter) -> Result<u64> {
        let guard = self.merge_lock.lock().await;
        let parts = self.parts.read().await.clone();
        let stats = if parts.is_empty() {
            MergeStats::default()
        } else {
            self.merge_parts(&guard, parts, Some(Arc::new(drop_filter))).await?
        };
        drop(guard);
        if stats.stopped {
            return Err(QueryError::InvalidQuery(format!("delete task {task_id:?} was interrupted")));
        }
        self.delete_tasks.lock().await.remove(task_id)?;
        info!(task_id, rows_deleted = stats.rows_dropped, "Finished delete task");
        Ok(stats.rows_dropped)
    }
}

/// Re-raises panics of blocking tasks, so `FATAL:` panics reach the caller.
fn join_blocking<T>(res: std::result::Result<T, JoinError>) -> T {
    match res {
        Ok(v) => v,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => panic!("FATAL: blocking task was cancelled: {err}"),
    }
}

/// State shared by the workers of a single query.
struct BlockSearchContext {
    filter: Arc<Filter>,
    needed: FieldsSet,
    streams: HashMap<StreamId, StreamInfo>,
    tenant_ids: Vec<TenantId>,
    min_timestamp: i64,
    max_timestamp: i64,
    first: Arc<dyn PipeProcessor>,
    /// Stopped by `limit` and similar pipes once they need no more input.
    scope: StopSignal,
}

impl BlockSearchContext {
    fn match_stream(&self, stream_id: StreamId) -> bool {
        match self.streams.get(&stream_id) {
            Some(si) => self.tenant_ids.is_empty() || self.tenant_ids.contains(&si.tenant_id),
            None => self.tenant_ids.is_empty(),
        }
    }

    fn match_time_range(&self, min_timestamp: i64, max_timestamp: i64) -> bool {
        min_timestamp <= self.max_timestamp && max_timestamp >= self.min_timestamp
    }

    async fn send_batches(&self, parts: &[Arc<Part>], tx: &mpsc::Sender<BlockBatch>) -> Result<()> {
        for part in parts {
            let ph = part.header();
            if !self.match_time_range(ph.min_timestamp, ph.max_timestamp) {
                continue;
            }
            for ibh in part.index_block_headers() {
                if self.scope.is_stopped() {
                    return Ok(());
                }
                if !self.match_time_range(ibh.min_timestamp, ibh.max_timestamp) {
                    continue;
                }
                let headers: Vec<BlockHeader> = part
                    .read_block_headers(ibh)?
                    .into_iter()
                    .filter(|bh| {
                        self.match_stream(bh.stream_id)
                            && self.match_time_range(bh.timestamps_header.min_timestamp, bh.timestamps_header.max_timestamp)
                    })
                    .collect();
                if headers.is_empty() {
                    continue;
                }
                let batch = BlockBatch {
                    part: part.clone(),
                    headers,
                };
                if tx.send(batch).await.is_err() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn run_worker(&self, worker_id: usize, rx: &std::sync::Mutex<mpsc::Receiver<BlockBatch>>) {
        loop {
            let batch = lock(rx).blocking_recv();
            let Some(batch) = batch else {
                return;
            };
            for bh in &batch.headers {
                if self.scope.is_stopped() {
                    break;
                }
                self.search_block(worker_id, &batch.part, bh);
            }
        }
    }

    fn search_block(&self, worker_id: usize, part: &Part, bh: &BlockHeader) {
        let tags = self.streams.get(&bh.stream_id).map(|si| &si.tags);
        let bs = BlockSearch::new(part, bh, tags);
        let mut bm = Bitmap::new_set(bs.rows_count());
        self.filter.apply_to_block_search(&bs, &mut bm);
        BLOCKS_SCANNED_TOTAL.inc();
        if bm.is_zero() {
            return;
        }
        let br = BlockResult::from_block_search(&bs, &bm, &self.needed);
        self.first.write_block(worker_id, br);
    }
}

/// Drops the rows matching a delete task during a merge.
struct DeleteRowsFilter {
    filter: Arc<Filter>,
    tenant_ids: Vec<TenantId>,
    streams: HashMap<StreamId, StreamInfo>,
    min_timestamp: i64,
    max_timestamp: i64,
}

impl DeleteRowsFilter {
    fn rows_to_block_result(&self, stream_id: StreamId, rows: &Rows) -> BlockResult {
        let rows_len = rows.len();
        let mut br = BlockResult::new(rows_len);
        br.add_column(BlockResultColumn::new_time(TIME_FIELD_NAME, rows.timestamps.clone()));
        if let Some(si) = self.streams.get(&stream_id) {
            br.add_const_column(STREAM_FIELD_NAME, si.tags.to_string());
        }
        br.add_const_column(STREAM_ID_FIELD_NAME, stream_id.to_string());

        let mut names: Vec<&str> = rows.rows.iter().flatten().map(|f| f.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        for name in names {
            let values = rows
                .rows
                .iter()
                .map(|fields| {
                    fields
                        .iter()
                        .find(|f| f.name == name)
                        .map(|f| f.value.clone())
                        .unwrap_or_default()
                })
                .collect();
            let name = if name.is_empty() { MSG_FIELD_NAME } else { name };
            br.add_result_column(name, values);
        }
        br
    }
}

impl RowDropFilter for DeleteRowsFilter {
    fn match_stream_id(&self, stream_id: StreamId) -> bool {
        match self.streams.get(&stream_id) {
            Some(si) => self.tenant_ids.is_empty() || self.tenant_ids.contains(&si.tenant_id),
            None => false,
        }
    }

    fn match_time_range(&self, min_timestamp: i64, max_timestamp: i64) -> bool {
        min_timestamp <= self.max_timestamp && max_timestamp >= self.min_timestamp
    }

    fn drops_whole_block(&self) -> bool {
        false
    }

    fn drop_rows(&self, stream_id: StreamId, rows: &mut Rows) -> usize {
        if rows.is_empty() {
            return 0;
        }
        let br = self.rows_to_block_result(stream_id, rows);
        let mut bm = Bitmap::new_set(rows.len());
        self.filter.apply_to_block_result(&br, &mut bm);

        let mut i = 0;
        rows.retain(|ts, _| {
            let matched = bm.is_set(i) && ts >= self.min_timestamp && ts <= self.max_timestamp;
            i += 1;
            !matched
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query;
    use logstore_core::Field;

    fn field(name: &str, value: &str) -> Field {
        Field {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn rows_with_streams(tenant: TenantId, rows: &[(i64, &str, &str)]) -> LogRows {
        let mut lr = LogRows::with_time_bounds(i64::MIN, i64::MAX);
        for (ts, host, msg) in rows {
            lr.must_add(tenant, *ts, vec![field("host", host), field("", msg)], &["host"]);
        }
        lr
    }

    #[test]
    fn test_delete_filter_drops_matching_rows() {
        let tenant = TenantId::new(0, 0);
        let lr = rows_with_streams(tenant, &[(1, "a", "keep me"), (2, "a", "obsolete entry"), (3, "a", "obsolete entry")]);
        let stream_id = lr.rows()[0].stream_id;
        let q = parse_query("obsolete").unwrap();
        let filter = DeleteRowsFilter {
            filter: q.filter.clone(),
            tenant_ids: vec![tenant],
            streams: lr.streams().clone(),
            min_timestamp: i64::MIN,
            max_timestamp: 2,
        };

        assert!(filter.match_stream_id(stream_id));
        assert!(!filter.match_stream_id(StreamId(12345)));
        assert!(!filter.match_time_range(3, 10));

        let mut rows = Rows::new();
        for r in lr.rows() {
            rows.push(r.timestamp, r.fields.clone());
        }
        assert_eq!(filter.drop_rows(stream_id, &mut rows), 1);
        assert_eq!(rows.timestamps, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_run_query_filters_tenants() {
        let storage = Storage::new(StorageConfig::default()).unwrap();
        storage
            .must_add_rows(rows_with_streams(TenantId::new(1, 0), &[(10, "a", "error one"), (20, "b", "info")]))
            .await
            .unwrap();
        storage
            .must_add_rows(rows_with_streams(TenantId::new(2, 0), &[(30, "c", "error two")]))
            .await
            .unwrap();

        let q = parse_query("error | fields host").unwrap();
        let rows = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink_rows = rows.clone();
        storage
            .run_query(&[TenantId::new(1, 0)], &q, move |_, br| {
                let c = br.column("host");
                let mut rows = sink_rows.lock().unwrap();
                for i in 0..br.rows_len() {
                    rows.push(c.value(i).to_string());
                }
            })
            .await
            .unwrap();
        assert_eq!(*rows.lock().unwrap(), vec!["a".to_string()]);

        let names = storage.get_field_names(&[], &parse_query("*").unwrap()).await.unwrap();
        let names: Vec<&str> = names.iter().map(|v| v.value.as_str()).collect();
        assert_eq!(names, vec!["_msg", "_stream", "_stream_id", "_time", "host"]);
    }

    #[tokio::test]
    async fn test_merge_parts_on_ingest() {
        let config = StorageConfig {
            merge_batch_size: 2,
            ..StorageConfig::default()
        };
        let storage = Storage::new(config).unwrap();
        for i in 0..5 {
            storage
                .must_add_rows(rows_with_streams(TenantId::new(0, 0), &[(i, "a", "msg")]))
                .await
                .unwrap();
        }
        assert!(storage.parts_count().await <= 3);
        assert_eq!(storage.rows_count().await, 5);

        storage.force_merge().await.unwrap();
        assert_eq!(storage.parts_count().await, 1);
        assert_eq!(storage.rows_count().await, 5);
    }
}
