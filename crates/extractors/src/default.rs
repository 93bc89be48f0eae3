use std::sync::Arc;

use crate::registry::ExtractorRegistry;
use crate::strategies::{ContentTypeProbe, HtmlMediaExtractor};

/// Registry with the built-in generic strategies.
///
/// Site-specific strategies are registered on top of this by callers.
pub fn default_registry() -> ExtractorRegistry {
    let mut registry = ExtractorRegistry::new();
    registry
        .register(Arc::new(ContentTypeProbe))
        .register(Arc::new(HtmlMediaExtractor));
    registry
}
