//! Vigil: Distributed Health-Check Monitor
//!
//! Periodically evaluates user-defined health checks ("jobs") against
//! time-series metrics fetched from an external backend, on a cluster of
//! cooperating nodes, and raises alerts when a check fails.
//!
//! # How a run happens
//!
//! - Every node ticks on the same fixed interval and derives the tick's
//!   whole minute as the scheduled time
//! - Nodes race to claim each due (job, scheduled time) pair; the claim
//!   coordinator guarantees exactly one winner cluster-wide
//! - A claimed run flows through the pipeline: fetch the job's metric
//!   series, evaluate its expression in a deadline-bounded sandbox,
//!   dispatch alerts on the status transition, record the outcome
//!
//! # Example
//!
//! ```no_run
//! use vigil::model::Job;
//! use vigil::store::{JobStore, MemoryStore};
//!
//! # async fn example() {
//! let store = MemoryStore::new();
//!
//! let job = Job::new("ops", "API latency", "* * * * *", "service.latency")
//!     .with_expression("max(latency) < 100")
//!     .with_lookback(15);
//! let job = store.put_job(job).await.unwrap();
//!
//! assert!(job.id.is_some());
//! # }
//! ```

pub mod alerts;
pub mod cluster;
pub mod exec;
pub mod expr;
pub mod metrics;
pub mod model;
pub mod node;
pub mod sched;
pub mod store;

// Re-export commonly used types
pub use model::{AnalysisResult, Job, JobError, JobId, JobStatus, TimeSeries};
pub use node::{run_node, NodeConfig};
pub use store::{JobStore, StoreError};
