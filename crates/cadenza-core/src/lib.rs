//! Cadenza Core - Playback engine
//!
//! This crate provides the catalog loader, the playback state machine
//! with its position persistence, the media session boundary and a native
//! media session that plays through the default audio device.

pub mod catalog;
pub mod command;
pub mod decoder;
pub mod engine;
pub mod media;
pub mod output;
pub mod session;
pub mod store;

pub use catalog::{ CatalogLoader, CatalogSource, DirectorySource, FetchError, Playlist, Song, SongList };
pub use command::{ Command, CommandError, SeekTarget };
pub use engine::{ EngineError, NowPlaying, PlaybackEngine, PlaybackState, Transport, TransportState };
pub use media::{ MediaError, MediaEvent, MediaSession };
pub use session::DeviceSession;
pub use store::{ FileStore, MemoryStore, Snapshot, SnapshotStore, StorageError };
