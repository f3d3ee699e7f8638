//! featuresync offline side: historical queries and model training
//!
//! - [`DuckDbQueryService`]: a local [`featuresync_core::QueryService`] that
//!   runs historical queries against the offline table in the background
//! - [`ResultMaterializer`]: turns result and transaction files into events
//! - [`train_linear`] / [`LinearModel`]: reference model implementing
//!   [`featuresync_core::Scorer`]
//! - [`LocalArtifactStore`]: where trained models are kept
//!
//! ## Training pipeline
//!
//! ```rust,ignore
//! let poller = JobPoller::new(Arc::new(DuckDbQueryService::new(config)), PollConfig::default());
//! let job_id = poller.submit(&query.to_request()?).await?;
//! let location = poller.await_completion(&job_id).await?;
//!
//! let events = ResultMaterializer::default().load_events(&location).await?;
//! let model = train_linear(&events, &TrainConfig::default())?;
//! artifacts.put("saved_models/model.json", model.to_json()?).await?;
//! ```

pub mod artifact;
pub mod materialize;
pub mod query_service;
pub mod trainer;

pub use artifact::{ArtifactStore, LocalArtifactStore};
pub use materialize::{ColumnMapping, ResultMaterializer};
pub use query_service::{DuckDbQueryConfig, DuckDbQueryService};
pub use trainer::{train_linear, LinearModel, TrainConfig};
