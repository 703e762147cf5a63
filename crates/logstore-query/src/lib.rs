//! Logstore Query Engine
//!
//! LogsQL parsing and execution over logstore parts.
//!
//! ## Query Pipeline
//!
//! ```text
//! "error _time:5m | stats by (host) count() c | sort by (c desc)"
//!            │
//!            ▼
//!      ┌──────────┐   tokens    ┌──────────┐   Query { filter, pipes }
//!      │  Lexer   │ ──────────▶ │  Parser  │ ───────────────────────┐
//!      └──────────┘             └──────────┘                        │
//!                                                                   ▼
//!   ┌─────────┐  blocks  ┌──────────────┐  bitmap  ┌─────────────┐  rows  ┌───────┐
//!   │ Storage │ ───────▶ │ BlockSearch  │ ───────▶ │ BlockResult │ ─────▶ │ Pipes │ ──▶ sink
//!   └─────────┘          │ + Filter     │          └─────────────┘        └───────┘
//!                        └──────────────┘
//! ```
//!
//! 1. The [`lexer`] splits the query text into tokens and the [`parser`]
//!    builds a [`Query`]: a filter tree plus a list of pipes.
//! 2. [`Storage`] hands the blocks of every part to worker threads. For each
//!    block the [`Filter`] clears the bits of non-matching rows in a [`Bitmap`],
//!    consulting bloom filters and column min/max values before decoding values.
//! 3. The matching rows become a [`BlockResult`], which flows through the pipe
//!    processors (`stats`, `sort`, `uniq`, `limit`, ...) to the caller's sink.
//!
//! Queries print back in canonical form: `parse_query(&q.to_string())` yields
//! an equivalent query.
//!
//! # Example
//!
//! ```no_run
//! use logstore_query::{parse_query, Storage};
//! use logstore_storage::StorageConfig;
//!
//! # async fn run() -> logstore_query::Result<()> {
//! let storage = Storage::new(StorageConfig::default())?;
//! let q = parse_query("error | stats by (host) count() hits")?;
//! storage
//!     .run_query(&[], &q, |_, br| {
//!         for i in 0..br.rows_len() {
//!             println!("{:?}", br.row(i));
//!         }
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod bitmap;
pub mod block_result;
pub mod block_search;
pub mod bucket;
pub mod error;
pub mod fields_set;
pub mod filter;
pub mod lexer;
pub mod parser;
pub mod pipes;
pub mod query;
pub mod quote;
pub mod stop;
pub mod storage;

pub use bitmap::Bitmap;
pub use block_result::{BlockResult, BlockResultColumn};
pub use block_search::BlockSearch;
pub use bucket::Bucket;
pub use error::{QueryError, Result};
pub use fields_set::FieldsSet;
pub use filter::Filter;
pub use parser::{parse_filter, parse_query, parse_query_at_timestamp};
pub use pipes::{new_processor_chain, Pipe, PipeProcessor, PipeSink};
pub use query::{Query, QueryOptions};
pub use stop::StopSignal;
pub use storage::{Storage, ValueWithHits};
