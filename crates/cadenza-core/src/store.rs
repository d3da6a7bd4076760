//! Playback position persistence
//!
//! Holds a single record: where the last session left off. Saving
//! overwrites it; there is no history.

use std::fs;
use std::path::{ Path, PathBuf };

use serde::{ Deserialize, Serialize };
use thiserror::Error;


/// Errors that can occur reading or writing the snapshot.
#[derive( Debug, Error )]
pub enum StorageError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Malformed snapshot: {0}" )]
    Json( #[from] serde_json::Error ),

    #[error( "Storage unavailable" )]
    Unavailable,
}


/// The persisted record of the last playback position.
///
/// Records without a time or cover still load: time starts at zero and the
/// cover is left empty.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( rename_all = "camelCase" )]
pub struct Snapshot {
    /// Song-list reference the session was playing from.
    pub playlist_path: String,
    pub song_index: usize,
    /// Elapsed seconds in the song.
    #[serde( default )]
    pub current_time: f64,
    #[serde( default )]
    pub cover_img: String,
}


/// Durable home for the single snapshot record.
pub trait SnapshotStore {
    /// Overwrites the stored record.
    fn save( &mut self, snapshot: &Snapshot ) -> Result<(), StorageError>;

    /// Returns the last saved record, or `None` if nothing was ever saved.
    fn load( &self ) -> Result<Option<Snapshot>, StorageError>;
}


impl<T: SnapshotStore + ?Sized> SnapshotStore for Box<T> {
    fn save( &mut self, snapshot: &Snapshot ) -> Result<(), StorageError> {
        ( **self ).save( snapshot )
    }


    fn load( &self ) -> Result<Option<Snapshot>, StorageError> {
        ( **self ).load()
    }
}


/// Snapshot stored as a JSON file.
#[derive( Debug, Clone )]
pub struct FileStore {
    path: PathBuf,
}


impl FileStore {
    pub fn new( path: impl Into<PathBuf> ) -> Self {
        Self { path: path.into() }
    }


    /// Store at the platform's local data directory, if one exists.
    pub fn default_location() -> Option<Self> {
        Self::default_path().map( Self::new )
    }


    /// `<data_local_dir>/cadenza/player-state.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_local_dir().map( |d| d.join( "cadenza" ).join( "player-state.json" ) )
    }


    pub fn path( &self ) -> &Path {
        &self.path
    }


    fn temp_path( &self ) -> PathBuf {
        let mut name = self.path.file_name()
            .map( |n| n.to_os_string() )
            .unwrap_or_default();
        name.push( ".tmp" );
        self.path.with_file_name( name )
    }
}


impl SnapshotStore for FileStore {
    fn save( &mut self, snapshot: &Snapshot ) -> Result<(), StorageError> {
        if let Some( parent ) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all( parent )?;
            }
        }

        // Write beside the target and rename so readers never see half a record
        let json = serde_json::to_string_pretty( snapshot )?;
        let temp = self.temp_path();
        fs::write( &temp, json )?;
        fs::rename( &temp, &self.path )?;
        Ok(())
    }


    fn load( &self ) -> Result<Option<Snapshot>, StorageError> {
        let contents = match fs::read_to_string( &self.path ) {
            Ok( c ) => c,
            Err( e ) if e.kind() == std::io::ErrorKind::NotFound => return Ok( None ),
            Err( e ) => return Err( StorageError::Io( e ) ),
        };
        Ok( Some( serde_json::from_str( &contents )? ) )
    }
}


/// Snapshot kept in memory for the lifetime of the process.
///
/// Stands in when persistence is switched off, and lets tests count writes.
#[derive( Debug, Clone, Default )]
pub struct MemoryStore {
    record: Option<Snapshot>,
    writes: usize,
    unavailable: bool,
}


impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }


    /// A store seeded with an existing record.
    pub fn with_snapshot( snapshot: Snapshot ) -> Self {
        Self { record: Some( snapshot ), ..Self::default() }
    }


    /// A store that rejects every read and write, like a disabled or full backend.
    pub fn unavailable() -> Self {
        Self { unavailable: true, ..Self::default() }
    }


    /// Number of successful saves.
    pub fn writes( &self ) -> usize {
        self.writes
    }


    pub fn snapshot( &self ) -> Option<&Snapshot> {
        self.record.as_ref()
    }
}


impl SnapshotStore for MemoryStore {
    fn save( &mut self, snapshot: &Snapshot ) -> Result<(), StorageError> {
        if self.unavailable {
            return Err( StorageError::Unavailable );
        }
        self.record = Some( snapshot.clone() );
        self.writes += 1;
        Ok(())
    }


    fn load( &self ) -> Result<Option<Snapshot>, StorageError> {
        if self.unavailable {
            return Err( StorageError::Unavailable );
        }
        Ok( self.record.clone() )
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use proptest::prelude::*;


    fn sample() -> Snapshot {
        Snapshot {
            playlist_path: "p1.json".into(),
            song_index: 2,
            current_time: 37.5,
            cover_img: "c.png".into(),
        }
    }


    #[test]
    fn test_snapshot_uses_camel_case_keys() {
        let json = serde_json::to_value( sample() ).unwrap();
        assert_eq!( json[ "playlistPath" ], "p1.json" );
        assert_eq!( json[ "songIndex" ], 2 );
        assert_eq!( json[ "currentTime" ], 37.5 );
        assert_eq!( json[ "coverImg" ], "c.png" );
    }


    #[test]
    fn test_file_store_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new( dir.path().join( "state.json" ) );
        assert!( store.load().unwrap().is_none() );
    }


    #[test]
    fn test_file_store_overwrites_single_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new( dir.path().join( "nested" ).join( "state.json" ) );

        store.save( &sample() ).unwrap();
        let mut later = sample();
        later.song_index = 4;
        later.current_time = 10.0;
        store.save( &later ).unwrap();

        assert_eq!( store.load().unwrap(), Some( later ) );
        assert!( !store.temp_path().exists() );
    }


    #[test]
    fn test_file_store_corrupt_record_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "state.json" );
        fs::write( &path, "{ truncated" ).unwrap();
        let store = FileStore::new( path );
        assert!( matches!( store.load(), Err( StorageError::Json( _ ) ) ) );
    }


    #[test]
    fn test_record_without_cover_or_time_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "state.json" );
        fs::write( &path, r#"{"playlistPath":"p1.json","songIndex":2}"# ).unwrap();

        let loaded = FileStore::new( path ).load().unwrap().unwrap();
        assert_eq!( loaded.song_index, 2 );
        assert_eq!( loaded.current_time, 0.0 );
        assert!( loaded.cover_img.is_empty() );
    }


    #[test]
    fn test_unavailable_memory_store_rejects_everything() {
        let mut store = MemoryStore::unavailable();
        assert!( matches!( store.save( &sample() ), Err( StorageError::Unavailable ) ) );
        assert!( matches!( store.load(), Err( StorageError::Unavailable ) ) );
        assert_eq!( store.writes(), 0 );
    }


    proptest! {
        #[test]
        fn file_store_round_trips_any_snapshot(
            playlist_path in "[a-z0-9/_.-]{1,40}",
            song_index in 0usize..10_000,
            current_time in 0.0f64..1e6,
            cover_img in "[a-z0-9/_.-]{0,40}",
        ) {
            let dir = tempfile::tempdir().unwrap();
            let mut store = FileStore::new( dir.path().join( "state.json" ) );
            let snapshot = Snapshot { playlist_path, song_index, current_time, cover_img };

            store.save( &snapshot ).unwrap();
            prop_assert_eq!( store.load().unwrap(), Some( snapshot ) );
        }
    }
}
