//! Shared fixtures for engine tests.

#![allow( dead_code )]

use std::collections::{ HashMap, VecDeque };

use cadenza_core::{
    CatalogLoader, CatalogSource, FetchError, MediaError, MediaEvent, MediaSession,
    MemoryStore, PlaybackEngine, Song, SongList,
};


/// Media session driven entirely by the test.
#[derive( Debug, Default )]
pub struct ScriptedSession {
    pub source: Option<String>,
    pub loads: Vec<String>,
    pub paused: bool,
    pub position: f64,
    pub duration: Option<f64>,
    pub events: VecDeque<MediaEvent>,
    /// References whose load is rejected.
    pub broken: Vec<String>,
}


impl ScriptedSession {
    pub fn with_duration( duration: f64 ) -> Self {
        Self { duration: Some( duration ), ..Self::default() }
    }


    pub fn push( &mut self, event: MediaEvent ) {
        self.events.push_back( event );
    }


    pub fn tick( &mut self, current_time: f64 ) {
        self.position = current_time;
        let duration = self.duration;
        self.push( MediaEvent::TimeUpdate { current_time, duration } );
    }
}


impl MediaSession for ScriptedSession {
    fn load( &mut self, media_ref: &str ) -> Result<(), MediaError> {
        if self.broken.iter().any( |b| b == media_ref ) {
            return Err( MediaError::Open( media_ref.to_string() ) );
        }
        self.source = Some( media_ref.to_string() );
        self.loads.push( media_ref.to_string() );
        self.paused = true;
        self.position = 0.0;
        self.events.clear();
        Ok(())
    }

    fn play( &mut self ) -> Result<(), MediaError> {
        if self.source.is_none() {
            return Err( MediaError::NoSource );
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
        self.events.pop_front()
    }
}


/// Catalog documents held in memory.
#[derive( Debug, Default )]
pub struct MapSource {
    docs: HashMap<String, String>,
}


impl MapSource {
    pub fn with( mut self, reference: &str, body: String ) -> Self {
        self.docs.insert( reference.to_string(), body );
        self
    }
}


impl CatalogSource for MapSource {
    fn fetch( &self, reference: &str ) -> Result<String, FetchError> {
        self.docs.get( reference ).cloned().ok_or_else( || FetchError::Io {
            reference: reference.to_string(),
            source: std::io::Error::from( std::io::ErrorKind::NotFound ),
        })
    }
}


pub fn song( i: usize ) -> Song {
    Song {
        title: format!( "Track {}", i ),
        artist: "Band".into(),
        media_ref: format!( "audio/{}.mp3", i ),
    }
}


pub fn song_list( source_ref: &str, len: usize ) -> SongList {
    SongList::new( source_ref, ( 0..len ).map( song ).collect() )
}


/// JSON song-list document with `len` songs.
pub fn song_list_json( len: usize ) -> String {
    let songs: Vec<_> = ( 0..len ).map( song ).collect();
    serde_json::to_string( &songs ).unwrap()
}


pub fn loader_with_list( source_ref: &str, len: usize ) -> CatalogLoader<MapSource> {
    CatalogLoader::new( MapSource::default().with( source_ref, song_list_json( len ) ) )
}


/// Engine with a song list selected and nothing played yet.
pub fn engine_with_list( len: usize ) -> PlaybackEngine<ScriptedSession, MemoryStore> {
    let mut engine = PlaybackEngine::new( ScriptedSession::with_duration( 180.0 ), MemoryStore::new() );
    engine.select_song_list( song_list( "songs/mix.json", len ), Some( "covers/mix.png".into() ) );
    engine
}
