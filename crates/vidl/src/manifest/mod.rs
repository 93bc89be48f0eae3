//! Playlist parsing: master/media playlists into ordered segment descriptors.

pub mod loader;
pub mod model;
pub mod parser;

pub use loader::{MAX_PLAYLIST_DEPTH, ManifestLoader};
pub use model::{
    ByteRange, EncryptionMethod, InitSection, KeyInfo, MediaManifest, SegmentDescriptor,
    VariantInfo, VariantSelectionPolicy,
};
pub use parser::{ParsedPlaylist, parse_playlist, select_variant};
