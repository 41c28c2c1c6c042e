//! bgm data models.
//!
//! Small tagged enums that cross every layer: the content kind that picks a
//! backend, the interruption events fanned out to listeners, and the
//! serialisable playback snapshot handed to embedders.

pub mod content;
pub mod interruption;
pub mod snapshot;

pub use content::AudioContentKind;
pub use interruption::Interruption;
pub use snapshot::PlaybackSnapshot;
