pub mod backfill;
pub mod broadcast;
pub mod classifier;
pub mod config;
pub mod enricher;
pub mod grammar;
pub mod ingest;
pub mod relparse;
pub mod session;
pub mod store;
pub mod testing;

pub use backfill::SrrdbBackfill;
pub use broadcast::{Broadcaster, CanonicalEvent, EventSink, OutboundLine, OutputRoute};
pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use enricher::MetadataEnricher;
pub use ingest::IngestPipeline;
pub use relparse::{CommandClassifier, ReleaseClassifier};
pub use session::{LineHandler, SessionManager, Transport};
pub use store::{NukeLedger, ReleaseStore};
