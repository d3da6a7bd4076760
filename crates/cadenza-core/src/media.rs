//! Media session boundary
//!
//! The engine drives exactly one media session: it loads a reference,
//! plays, pauses and seeks it, and consumes its time-update and ended
//! signals. `DeviceSession` is the native implementation; tests script
//! their own.

use thiserror::Error;


/// Errors raised by a media session.
#[derive( Debug, Error )]
pub enum MediaError {
    #[error( "Failed to open media: {0}" )]
    Open( String ),

    #[error( "Decode error: {0}" )]
    Decode( String ),

    #[error( "Audio output error: {0}" )]
    Output( String ),

    #[error( "No media loaded" )]
    NoSource,
}


/// Signals emitted by a media session.
#[derive( Debug, Clone, Copy, PartialEq )]
pub enum MediaEvent {
    /// Playback position moved. `duration` is `None` until metadata is known.
    TimeUpdate { current_time: f64, duration: Option<f64> },

    /// The loaded source played through to its end.
    Ended,
}


/// A single playable media element.
pub trait MediaSession {
    /// Points the session at a new source, replacing any previous one.
    ///
    /// The new source starts paused at position zero.
    fn load( &mut self, media_ref: &str ) -> Result<(), MediaError>;

    /// Starts or continues playback of the loaded source.
    fn play( &mut self ) -> Result<(), MediaError>;

    fn pause( &mut self );

    /// Moves the playback position, in seconds from the start.
    fn seek( &mut self, seconds: f64 ) -> Result<(), MediaError>;

    /// Current position in seconds.
    fn current_time( &self ) -> f64;

    /// Total length in seconds, once known.
    fn duration( &self ) -> Option<f64>;

    /// True when a source has been loaded.
    fn has_source( &self ) -> bool;

    fn is_paused( &self ) -> bool;

    /// Takes the next pending signal, if any.
    fn poll_event( &mut self ) -> Option<MediaEvent>;
}
