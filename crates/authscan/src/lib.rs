//! AuthScan: find login forms, OAuth/SSO buttons and passwordless flows in
//! rendered web pages.
//!
//! The [`Detector`] classifies auth UI with an inference service when one is
//! configured and falls back to fixed patterns otherwise, then extracts a
//! sanitized snippet for every component from the live page. A static-DOM
//! scorer and containment resolver provide the same output offline.

pub mod ai;
pub mod config;
pub mod containment;
pub mod dedup;
pub mod error;
pub mod heuristic;
pub mod inference;
pub mod pattern;
pub mod pipeline;
pub mod pool;
pub mod renderer;
pub mod resolver;
pub mod sanitize;
pub mod scoring;
pub mod types;

pub use config::AuthScanConfig;
pub use error::{AiPathError, InferenceError, PipelineError, PoolError, ResponseFormatError};
pub use inference::{GeminiClient, InferenceService};
pub use pipeline::{detect_offline, Detector};
pub use pool::{EngineLauncher, EnginePool, PooledContext};
pub use renderer::{LiveDocument, Locator, RenderContext, Renderer, ResolvedElement};
pub use types::*;
