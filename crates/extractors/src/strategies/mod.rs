pub mod content_type;
pub mod html;

pub use content_type::ContentTypeProbe;
pub use html::HtmlMediaExtractor;
