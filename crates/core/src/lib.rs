//! Worker-internal core: the resilient extraction pipeline.
//!
//! The pipeline is built leaf-first: [`retry`] is a pure backoff
//! calculator, [`session`] persists the authenticated browser session,
//! [`extract`] runs the ordered strategy chain against a live page, and
//! [`scheduler`] drives periodic non-overlapping runs, persisting one
//! record per run through [`storage`].
//!
//! Browser specifics stay outside this crate: callers supply a
//! [`page::PageContext`] implementation, so the whole pipeline is
//! testable against HTML fixtures.

pub mod error;
pub mod extract;
pub mod page;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod storage;

pub use error::ScrapeError;
pub use extract::{ExtractionEngine, StrategyOutcome};
pub use page::{PageContext, PageProvider};
pub use retry::{AttemptRecord, RetryError, RetryFailure, RetryPolicy};
pub use scheduler::{CycleOutcome, Scheduler, SchedulerConfig, SchedulerHandle};
pub use session::{Session, SessionStore};
pub use storage::RecordStore;
