//! Extraction strategies that turn a web page URL into something the
//! download engine can fetch: a playlist, a media file, or a short list of
//! media files.

pub mod default;
pub mod error;
pub mod extractor;
pub mod media;
pub mod registry;
pub mod strategies;
pub mod utils;

pub use default::default_registry;
pub use error::ExtractorError;
pub use extractor::{Extractor, MediaExtractor};
pub use media::{MANIFEST_EXTENSIONS, MEDIA_EXTENSIONS, ResolvedTarget, TargetKind};
pub use registry::ExtractorRegistry;
