//! Stream verification engine.
//!
//! Reads extended M3U playlists, probes every entry over HTTP(S) with bounded
//! concurrency, and writes back only the entries that deliver media fast
//! enough, grouped and ordered deterministically.
//!
//! ```no_run
//! use streamcheck_engine::{Classifier, ClassifierConfig, ProbeConfig, ProbeDispatcher, playlist};
//!
//! # async fn run(text: &str) -> Result<String, streamcheck_engine::ProbeError> {
//! let document = playlist::parse_document(text)?;
//! let dispatcher = ProbeDispatcher::http(ProbeConfig::default())?;
//! let results = dispatcher.run(document.candidates).await;
//!
//! let mut output = Classifier::new(ClassifierConfig::default()).classify(results);
//! output.header = document.header;
//! Ok(output.to_m3u())
//! # }
//! ```

pub mod classifier;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod host_gate;
pub mod playlist;
pub mod probe;
pub mod proxy;
pub mod retry;
pub mod stats;

pub use classifier::{Classifier, Group, Playlist};
pub use config::{ClassifierConfig, GroupRule, ProbeConfig, SortOrder};
pub use dispatcher::{ProbeDispatcher, ProgressCallback};
pub use error::ProbeError;
pub use host_gate::{HostAdmission, HostCacheEntry, HostMemoCache};
pub use playlist::{Candidate, PlaylistDocument, PlaylistHeader, VlcOption};
pub use probe::{FailureKind, HttpProber, Outcome, ProbeResult, ProbeVerdict, StreamProber};
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
pub use stats::RunStatsSnapshot;
