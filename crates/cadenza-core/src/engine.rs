//! Playback engine
//!
//! Owns the active song list, the current index and the one media session,
//! and is the only thing that mutates them. Transport requests arrive as
//! method calls or as [`Transport`] messages; media signals arrive through
//! [`PlaybackEngine::pump`].

use thiserror::Error;

use crate::catalog::{ CatalogLoader, CatalogSource, Song, SongList };
use crate::media::{ MediaError, MediaEvent, MediaSession };
use crate::store::{ Snapshot, SnapshotStore };


/// Seconds of playback between position snapshots.
pub const SNAPSHOT_INTERVAL_SECS: u64 = 5;

/// Cover shown when the active playlist has none.
pub const DEFAULT_COVER: &str = "./images/music.svg";


/// Errors returned by transport operations.
#[derive( Debug, Error )]
pub enum EngineError {
    #[error( "Song index {index} out of range for a list of {len}" )]
    IndexOutOfRange { index: usize, len: usize },

    #[error( transparent )]
    Media( #[from] MediaError ),
}


/// Transport classification of the media session.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum TransportState {
    /// Nothing selected yet this session.
    #[default]
    Idle,
    Paused,
    Playing,
}


/// One named transport request.
#[derive( Debug, Clone, Copy, PartialEq )]
pub enum Transport {
    Play( usize ),
    TogglePlayPause,
    Next,
    Previous,
    /// Fraction of the song's duration, `0.0..=1.0`.
    Seek( f64 ),
}


/// Display fields for the song in the media session.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    pub cover_ref: String,
}


impl NowPlaying {
    fn new( song: &Song, cover_ref: Option<&str> ) -> Self {
        Self {
            title: song.title.clone(),
            artist: song.artist.clone(),
            cover_ref: cover_ref.unwrap_or( DEFAULT_COVER ).to_string(),
        }
    }
}


/// Position within the active song list.
#[derive( Debug, Clone, Default )]
pub struct PlaybackState {
    list: Option<SongList>,
    current_index: Option<usize>,
    elapsed_seconds: f64,
    cover_ref: Option<String>,
}


impl PlaybackState {
    /// Reference of the active song list, if one is selected.
    pub fn active_list_ref( &self ) -> Option<&str> {
        self.list.as_ref().map( |l| l.source_ref() )
    }


    pub fn songs( &self ) -> &[Song] {
        self.list.as_ref().map( |l| l.songs() ).unwrap_or( &[] )
    }


    /// Always a valid index into [`songs`](Self::songs) when `Some`.
    pub fn current_index( &self ) -> Option<usize> {
        self.current_index
    }


    pub fn elapsed_seconds( &self ) -> f64 {
        self.elapsed_seconds
    }


    pub fn cover_ref( &self ) -> Option<&str> {
        self.cover_ref.as_deref()
    }


    fn len( &self ) -> usize {
        self.list.as_ref().map_or( 0, |l| l.len() )
    }
}


/// Lowest multiple of the snapshot interval at or below `seconds`.
fn watermark_for( seconds: f64 ) -> u64 {
    let whole = seconds.max( 0.0 ).floor() as u64;
    whole - whole % SNAPSHOT_INTERVAL_SECS
}


fn known_duration( duration: Option<f64> ) -> Option<f64> {
    duration.filter( |d| d.is_finite() && *d > 0.0 )
}


fn non_empty( s: String ) -> Option<String> {
    if s.is_empty() { None } else { Some( s ) }
}


/// The playback state machine.
///
/// `Idle` until the first `play` or a successful `resume`; afterwards it
/// moves between `Paused` and `Playing` for the rest of the session.
pub struct PlaybackEngine<M, S> {
    media: M,
    store: S,
    state: PlaybackState,
    transport: TransportState,
    now_playing: Option<NowPlaying>,
    progress: Option<f64>,
    /// Last snapshot boundary written, in whole seconds.
    watermark: u64,
}


impl<M: MediaSession, S: SnapshotStore> PlaybackEngine<M, S> {
    /// Creates an idle engine around a media session and a snapshot store.
    pub fn new( media: M, store: S ) -> Self {
        Self {
            media,
            store,
            state: PlaybackState::default(),
            transport: TransportState::Idle,
            now_playing: None,
            progress: None,
            watermark: 0,
        }
    }


    pub fn transport( &self ) -> TransportState {
        self.transport
    }


    pub fn state( &self ) -> &PlaybackState {
        &self.state
    }


    pub fn now_playing( &self ) -> Option<&NowPlaying> {
        self.now_playing.as_ref()
    }


    /// Progress through the current song as a percentage, once duration is known.
    pub fn progress( &self ) -> Option<f64> {
        self.progress
    }


    pub fn current_song( &self ) -> Option<&Song> {
        self.state.current_index.and_then( |i| self.state.songs().get( i ) )
    }


    pub fn songs( &self ) -> &[Song] {
        self.state.songs()
    }


    pub fn media( &self ) -> &M {
        &self.media
    }


    pub fn media_mut( &mut self ) -> &mut M {
        &mut self.media
    }


    pub fn store( &self ) -> &S {
        &self.store
    }


    /// Makes `list` the active song list without starting playback.
    ///
    /// The current index is cleared until a song is chosen. A song already
    /// in the media session keeps playing.
    pub fn select_song_list( &mut self, list: SongList, cover_ref: Option<String> ) {
        tracing::info!( "Selected song list {} ({} songs)", list.source_ref(), list.len() );
        self.state.list = Some( list );
        self.state.current_index = None;
        self.state.cover_ref = cover_ref.and_then( non_empty );
    }


    /// Loads and starts the song at `index` of the active list.
    ///
    /// A media load failure leaves the engine exactly as it was.
    pub fn play( &mut self, index: usize ) -> Result<(), EngineError> {
        let len = self.state.len();
        let song = self.state.songs()
            .get( index )
            .cloned()
            .ok_or( EngineError::IndexOutOfRange { index, len } )?;

        if let Err( e ) = self.media.load( &song.media_ref ) {
            tracing::warn!( "Failed to load {}: {}", song.media_ref, e );
            return Err( e.into() );
        }

        self.state.current_index = Some( index );
        self.state.elapsed_seconds = 0.0;
        self.now_playing = Some( NowPlaying::new( &song, self.state.cover_ref() ) );
        self.progress = known_duration( self.media.duration() ).map( |_| 0.0 );
        self.watermark = 0;

        // Start the media before touching storage
        let started = self.media.play();
        self.persist( 0.0 );

        if let Err( e ) = started {
            tracing::warn!( "Failed to start {}: {}", song.media_ref, e );
            self.transport = TransportState::Paused;
            return Err( e.into() );
        }

        self.transport = TransportState::Playing;
        tracing::info!( "Playing [{}] {} - {}", index, song.artist, song.title );
        Ok(())
    }


    /// Pauses when playing, continues when paused; nothing without media.
    pub fn toggle_play_pause( &mut self ) {
        if !self.media.has_source() {
            return;
        }

        match self.transport {
            TransportState::Playing => {
                self.media.pause();
                self.transport = TransportState::Paused;
                tracing::info!( "Paused" );
            }
            TransportState::Paused => match self.media.play() {
                Ok(()) => {
                    self.transport = TransportState::Playing;
                    tracing::info!( "Resumed" );
                }
                Err( e ) => tracing::warn!( "Failed to resume playback: {}", e ),
            },
            TransportState::Idle => {}
        }
    }


    /// Plays the following song, wrapping to the first.
    pub fn next( &mut self ) {
        self.step( 1 );
    }


    /// Plays the preceding song, wrapping to the last.
    pub fn previous( &mut self ) {
        self.step( -1 );
    }


    /// Moves the current index by `offset` around the list and plays it.
    ///
    /// @returns true if a song was started
    fn step( &mut self, offset: isize ) -> bool {
        let len = self.state.len();
        let Some( current ) = self.state.current_index else {
            return false;
        };
        if len == 0 {
            return false;
        }

        let target = ( current as isize + offset ).rem_euclid( len as isize ) as usize;
        match self.play( target ) {
            Ok(()) => true,
            Err( e ) => {
                tracing::warn!( "Could not move to song {}: {}", target, e );
                false
            }
        }
    }


    /// Moves to `fraction` of the current song's duration.
    ///
    /// Does nothing until the duration is known.
    pub fn seek( &mut self, fraction: f64 ) {
        if !self.media.has_source() || !fraction.is_finite() {
            return;
        }
        let Some( duration ) = known_duration( self.media.duration() ) else {
            tracing::debug!( "Seek ignored: duration unknown" );
            return;
        };

        let position = fraction.clamp( 0.0, 1.0 ) * duration;
        match self.media.seek( position ) {
            Ok(()) => {
                self.state.elapsed_seconds = position;
                self.progress = Some( position / duration * 100.0 );
            }
            Err( e ) => tracing::warn!( "Seek to {:.1}s failed: {}", position, e ),
        }
    }


    /// Handles a time update from the media session.
    ///
    /// Each time the position enters a new snapshot interval the position is
    /// persisted once; repeated updates within the same interval write nothing.
    pub fn on_progress( &mut self, current_time: f64, duration: Option<f64> ) {
        if !current_time.is_finite() {
            return;
        }

        let current_time = current_time.max( 0.0 );
        self.state.elapsed_seconds = current_time;
        self.progress = known_duration( duration )
            .map( |d| ( current_time / d * 100.0 ).clamp( 0.0, 100.0 ) );

        if self.state.current_index.is_none() {
            return;
        }

        let boundary = watermark_for( current_time );
        if boundary != self.watermark {
            tracing::debug!( "Watermark {}s -> {}s", self.watermark, boundary );
            self.watermark = boundary;
            self.persist( current_time );
        }
    }


    /// Handles the end of the current song by advancing.
    ///
    /// A single-song list replays the same song.
    pub fn on_ended( &mut self ) {
        tracing::debug!( "Song ended" );
        if !self.step( 1 ) {
            self.transport = TransportState::Paused;
        }
    }


    /// Restores the last persisted position without starting playback.
    ///
    /// Only meaningful at startup, while the engine is idle.
    ///
    /// @param loader - Catalog loader used to fetch the saved song list again
    ///
    /// @returns true if a session was restored
    pub fn resume<C: CatalogSource>( &mut self, loader: &CatalogLoader<C> ) -> bool {
        if self.transport != TransportState::Idle {
            tracing::warn!( "Resume skipped: engine already active" );
            return false;
        }

        let snapshot = match self.store.load() {
            Ok( Some( s ) ) => s,
            Ok( None ) => {
                tracing::debug!( "No saved position" );
                return false;
            }
            Err( e ) => {
                tracing::warn!( "Failed to read saved position: {}", e );
                return false;
            }
        };

        let Ok( list ) = loader.load_song_list( &snapshot.playlist_path ) else {
            return false;
        };
        let Some( song ) = list.get( snapshot.song_index ).cloned() else {
            tracing::warn!(
                "Saved song {} no longer exists in {} ({} songs)",
                snapshot.song_index,
                snapshot.playlist_path,
                list.len()
            );
            return false;
        };

        if let Err( e ) = self.media.load( &song.media_ref ) {
            tracing::warn!( "Failed to load {}: {}", song.media_ref, e );
            return false;
        }

        let position = if snapshot.current_time.is_finite() {
            snapshot.current_time.max( 0.0 )
        } else {
            0.0
        };
        if let Err( e ) = self.media.seek( position ) {
            tracing::warn!( "Failed to restore position {:.1}s: {}", position, e );
        }

        let cover_ref = non_empty( snapshot.cover_img );
        self.now_playing = Some( NowPlaying::new( &song, cover_ref.as_deref() ) );
        self.progress = known_duration( self.media.duration() )
            .map( |d| ( position / d * 100.0 ).clamp( 0.0, 100.0 ) );
        self.state = PlaybackState {
            list: Some( list ),
            current_index: Some( snapshot.song_index ),
            elapsed_seconds: position,
            cover_ref,
        };
        self.watermark = watermark_for( position );
        self.transport = TransportState::Paused;

        tracing::info!(
            "Restored session: {} song {} at {:.1}s",
            snapshot.playlist_path,
            snapshot.song_index,
            position
        );
        true
    }


    /// Applies one transport request.
    pub fn dispatch( &mut self, request: Transport ) -> Result<(), EngineError> {
        match request {
            Transport::Play( index ) => return self.play( index ),
            Transport::TogglePlayPause => self.toggle_play_pause(),
            Transport::Next => self.next(),
            Transport::Previous => self.previous(),
            Transport::Seek( fraction ) => self.seek( fraction ),
        }
        Ok(())
    }


    /// Drains pending media signals into the engine.
    ///
    /// @returns The number of signals handled
    pub fn pump( &mut self ) -> usize {
        let mut handled = 0;
        while let Some( event ) = self.media.poll_event() {
            handled += 1;
            match event {
                MediaEvent::TimeUpdate { current_time, duration } => {
                    self.on_progress( current_time, duration );
                }
                MediaEvent::Ended => self.on_ended(),
            }
        }
        handled
    }


    /// Persists the current position immediately, regardless of the watermark.
    pub fn checkpoint( &mut self ) {
        let position = self.state.elapsed_seconds;
        self.persist( position );
    }


    fn persist( &mut self, current_time: f64 ) {
        let ( Some( list ), Some( index ) ) = ( self.state.list.as_ref(), self.state.current_index ) else {
            return;
        };

        let snapshot = Snapshot {
            playlist_path: list.source_ref().to_string(),
            song_index: index,
            current_time,
            cover_img: self.state.cover_ref.clone().unwrap_or_default(),
        };

        match self.store.save( &snapshot ) {
            Ok(()) => tracing::debug!( "Saved position: song {} at {:.1}s", index, current_time ),
            Err( e ) => tracing::warn!( "Failed to save position: {}", e ),
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::store::{ MemoryStore, StorageError };


    type CallLog = Rc<RefCell<Vec<&'static str>>>;


    /// Media session that accepts everything and remembers the last call.
    #[derive( Default )]
    struct NullMedia {
        source: Option<String>,
        paused: bool,
        position: f64,
        duration: Option<f64>,
        refuse_play: bool,
        log: Option<CallLog>,
    }

    impl MediaSession for NullMedia {
        fn load( &mut self, media_ref: &str ) -> Result<(), MediaError> {
            self.source = Some( media_ref.to_string() );
            self.paused = true;
            self.position = 0.0;
            Ok(())
        }

        fn play( &mut self ) -> Result<(), MediaError> {
            if let Some( log ) = &self.log {
                log.borrow_mut().push( "play" );
            }
            if self.refuse_play {
                return Err( MediaError::Output( "device busy".into() ) );
            }
            self.paused = false;
            Ok(())
        }

        fn pause( &mut self ) {
            self.paused = true;
        }

        fn seek( &mut self, seconds: f64 ) -> Result<(), MediaError> {
            self.position = seconds;
            Ok(())
        }

        fn current_time( &self ) -> f64 {
            self.position
        }

        fn duration( &self ) -> Option<f64> {
            self.duration
        }

        fn has_source( &self ) -> bool {
            self.source.is_some()
        }

        fn is_paused( &self ) -> bool {
            self.paused
        }

        fn poll_event( &mut self ) -> Option<MediaEvent> {
            None
        }
    }


    /// Store that only records when it was written.
    struct LoggingStore( CallLog );

    impl SnapshotStore for LoggingStore {
        fn save( &mut self, _: &Snapshot ) -> Result<(), StorageError> {
            self.0.borrow_mut().push( "save" );
            Ok(())
        }

        fn load( &self ) -> Result<Option<Snapshot>, StorageError> {
            Ok( None )
        }
    }


    fn list( n: usize ) -> SongList {
        let songs = ( 0..n )
            .map( |i| Song {
                title: format!( "Song {}", i ),
                artist: "Artist".into(),
                media_ref: format!( "audio/{}.mp3", i ),
            })
            .collect();
        SongList::new( "songs.json", songs )
    }


    fn engine( n: usize ) -> PlaybackEngine<NullMedia, MemoryStore> {
        let mut engine = PlaybackEngine::new( NullMedia::default(), MemoryStore::new() );
        engine.select_song_list( list( n ), Some( "cover.png".into() ) );
        engine
    }


    #[test]
    fn test_new_engine_is_idle() {
        let engine = PlaybackEngine::new( NullMedia::default(), MemoryStore::new() );
        assert_eq!( engine.transport(), TransportState::Idle );
        assert!( engine.state().current_index().is_none() );
        assert!( engine.now_playing().is_none() );
    }


    #[test]
    fn test_play_sets_index_display_and_snapshot() {
        let mut engine = engine( 3 );
        engine.play( 1 ).unwrap();

        assert_eq!( engine.transport(), TransportState::Playing );
        assert_eq!( engine.state().current_index(), Some( 1 ) );
        assert_eq!( engine.media().source.as_deref(), Some( "audio/1.mp3" ) );

        let now = engine.now_playing().unwrap();
        assert_eq!( now.title, "Song 1" );
        assert_eq!( now.cover_ref, "cover.png" );

        let saved = engine.store().snapshot().unwrap();
        assert_eq!( saved.song_index, 1 );
        assert_eq!( saved.current_time, 0.0 );
        assert_eq!( saved.playlist_path, "songs.json" );
    }


    #[test]
    fn test_play_starts_media_before_saving() {
        let log = CallLog::default();
        let media = NullMedia { log: Some( Rc::clone( &log ) ), ..NullMedia::default() };
        let mut engine = PlaybackEngine::new( media, LoggingStore( Rc::clone( &log ) ) );
        engine.select_song_list( list( 2 ), None );

        engine.play( 1 ).unwrap();
        assert_eq!( *log.borrow(), vec![ "play", "save" ] );
    }


    #[test]
    fn test_refused_start_still_records_song_as_paused() {
        let media = NullMedia { refuse_play: true, ..NullMedia::default() };
        let mut engine = PlaybackEngine::new( media, MemoryStore::new() );
        engine.select_song_list( list( 3 ), None );

        assert!( matches!( engine.play( 2 ), Err( EngineError::Media( _ ) ) ) );
        assert_eq!( engine.transport(), TransportState::Paused );
        assert_eq!( engine.state().current_index(), Some( 2 ) );
        assert_eq!( engine.store().snapshot().unwrap().song_index, 2 );
    }


    #[test]
    fn test_play_out_of_range_changes_nothing() {
        let mut engine = engine( 2 );
        let err = engine.play( 2 ).unwrap_err();
        assert!( matches!( err, EngineError::IndexOutOfRange { index: 2, len: 2 } ) );
        assert_eq!( engine.transport(), TransportState::Idle );
        assert_eq!( engine.store().writes(), 0 );
    }


    #[test]
    fn test_missing_cover_falls_back_to_placeholder() {
        let mut engine = PlaybackEngine::new( NullMedia::default(), MemoryStore::new() );
        engine.select_song_list( list( 1 ), Some( String::new() ) );
        engine.play( 0 ).unwrap();
        assert_eq!( engine.now_playing().unwrap().cover_ref, DEFAULT_COVER );
    }


    #[test]
    fn test_toggle_alternates_between_playing_and_paused() {
        let mut engine = engine( 2 );
        engine.play( 0 ).unwrap();

        engine.toggle_play_pause();
        assert_eq!( engine.transport(), TransportState::Paused );
        assert!( engine.media().is_paused() );

        engine.toggle_play_pause();
        assert_eq!( engine.transport(), TransportState::Playing );
        assert!( !engine.media().is_paused() );
    }


    #[test]
    fn test_next_and_previous_wrap() {
        let mut engine = engine( 3 );
        engine.play( 2 ).unwrap();
        engine.next();
        assert_eq!( engine.state().current_index(), Some( 0 ) );
        engine.previous();
        assert_eq!( engine.state().current_index(), Some( 2 ) );
    }


    #[test]
    fn test_selecting_a_list_clears_index_and_disables_stepping() {
        let mut engine = engine( 3 );
        engine.play( 1 ).unwrap();
        engine.select_song_list( list( 4 ), None );

        assert!( engine.state().current_index().is_none() );
        engine.next();
        assert!( engine.state().current_index().is_none() );
        assert_eq!( engine.media().source.as_deref(), Some( "audio/1.mp3" ) );
    }


    #[test]
    fn test_seek_maps_fraction_to_duration() {
        let mut engine = engine( 1 );
        engine.play( 0 ).unwrap();
        engine.media_mut().duration = Some( 200.0 );

        engine.seek( 0.25 );
        assert!( ( engine.media().current_time() - 50.0 ).abs() < 1e-9 );

        engine.seek( 1.5 );
        assert!( ( engine.media().current_time() - 200.0 ).abs() < 1e-9 );
    }


    #[test]
    fn test_seek_without_duration_is_noop() {
        let mut engine = engine( 1 );
        engine.play( 0 ).unwrap();
        engine.media_mut().position = 12.0;

        engine.seek( 0.5 );
        assert_eq!( engine.media().current_time(), 12.0 );
    }


    #[test]
    fn test_progress_percentage() {
        let mut engine = engine( 1 );
        engine.play( 0 ).unwrap();
        engine.on_progress( 30.0, Some( 120.0 ) );
        assert_eq!( engine.progress(), Some( 25.0 ) );
        engine.on_progress( 31.0, None );
        assert_eq!( engine.progress(), None );
    }


    #[test]
    fn test_watermark_boundaries() {
        assert_eq!( watermark_for( 0.0 ), 0 );
        assert_eq!( watermark_for( 4.99 ), 0 );
        assert_eq!( watermark_for( 5.0 ), 5 );
        assert_eq!( watermark_for( 37.5 ), 35 );
        assert_eq!( watermark_for( -3.0 ), 0 );
    }


    #[test]
    fn test_checkpoint_writes_current_position() {
        let mut engine = engine( 2 );
        engine.play( 1 ).unwrap();
        engine.on_progress( 3.2, Some( 100.0 ) );
        engine.checkpoint();

        let saved = engine.store().snapshot().unwrap();
        assert_eq!( saved.current_time, 3.2 );
        assert_eq!( engine.store().writes(), 2 );
    }


    #[test]
    fn test_dispatch_routes_requests() {
        let mut engine = engine( 3 );
        engine.dispatch( Transport::Play( 0 ) ).unwrap();
        engine.dispatch( Transport::Next ).unwrap();
        assert_eq!( engine.state().current_index(), Some( 1 ) );
        engine.dispatch( Transport::TogglePlayPause ).unwrap();
        assert_eq!( engine.transport(), TransportState::Paused );
        assert!( engine.dispatch( Transport::Play( 9 ) ).is_err() );
    }
}
