pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod job;
pub mod logging;
pub mod materialize;
pub mod notify;
pub mod portal;
pub mod processor;
pub mod session;

pub mod util {
    pub mod env;
}

pub use checkpoint::{CheckpointStore, FileCheckpoint, ResumePlan};
pub use dataset::{Dataset, ProductRecord};
pub use processor::{RowProcessor, RunSummary};
pub use session::SessionCookies;
