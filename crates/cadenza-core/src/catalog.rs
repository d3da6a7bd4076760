//! Catalog loading
//!
//! Reads the playlists document and per-playlist song lists from a
//! catalog source. No playback logic lives here.

use std::fs;
use std::path::{ Component, Path, PathBuf };

use serde::{ Deserialize, Serialize };
use thiserror::Error;


/// Default reference of the playlists document.
pub const DEFAULT_PLAYLISTS_REF: &str = "playlists.json";


/// Errors that can occur while fetching or parsing catalog documents.
#[derive( Debug, Error )]
pub enum FetchError {
    #[error( "Failed to read {reference}: {source}" )]
    Io {
        reference: String,
        #[source]
        source: std::io::Error,
    },

    #[error( "Malformed document {reference}: {source}" )]
    Json {
        reference: String,
        #[source]
        source: serde_json::Error,
    },

    #[error( "Reference escapes the catalog root: {0}" )]
    OutsideRoot( String ),
}


/// A catalog entry pointing at a song list and a cover image.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
pub struct Playlist {
    pub name: String,
    pub genre: String,
    #[serde( rename = "cover" )]
    pub cover_ref: String,
    #[serde( rename = "songsPath" )]
    pub songs_ref: String,
}


/// A playable song.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
pub struct Song {
    pub title: String,
    pub artist: String,
    #[serde( rename = "path" )]
    pub media_ref: String,
}


/// Ordered songs loaded from one playlist's song-list document.
#[derive( Debug, Clone, Default, PartialEq, Eq )]
pub struct SongList {
    source_ref: String,
    songs: Vec<Song>,
}


impl SongList {
    /// Creates a song list for the given source reference.
    pub fn new( source_ref: impl Into<String>, songs: Vec<Song> ) -> Self {
        Self { source_ref: source_ref.into(), songs }
    }


    /// The reference this list was loaded from.
    pub fn source_ref( &self ) -> &str {
        &self.source_ref
    }


    pub fn songs( &self ) -> &[Song] {
        &self.songs
    }


    pub fn get( &self, index: usize ) -> Option<&Song> {
        self.songs.get( index )
    }


    pub fn len( &self ) -> usize {
        self.songs.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.songs.is_empty()
    }
}


/// Something that can hand out catalog documents by reference.
pub trait CatalogSource {
    /// Returns the raw text of the document behind `reference`.
    fn fetch( &self, reference: &str ) -> Result<String, FetchError>;
}


/// Catalog source backed by a directory, laid out like a static web root.
///
/// References are relative paths (`playlists.json`, `songs/chill.json`).
/// A leading `./` is accepted; anything that would leave the root is not.
#[derive( Debug, Clone )]
pub struct DirectorySource {
    root: PathBuf,
}


impl DirectorySource {
    pub fn new( root: impl Into<PathBuf> ) -> Self {
        Self { root: root.into() }
    }


    pub fn root( &self ) -> &Path {
        &self.root
    }


    /// Resolves a reference to a path under the root.
    ///
    /// @param reference - Relative reference as found in catalog documents
    ///
    /// @returns The joined path, or `OutsideRoot` for absolute or escaping references
    pub fn resolve( &self, reference: &str ) -> Result<PathBuf, FetchError> {
        let relative = Path::new( reference );
        let mut resolved = self.root.clone();

        for component in relative.components() {
            match component {
                Component::Normal( part ) => resolved.push( part ),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix( _ ) => {
                    return Err( FetchError::OutsideRoot( reference.to_string() ) );
                }
            }
        }

        Ok( resolved )
    }
}


impl CatalogSource for DirectorySource {
    fn fetch( &self, reference: &str ) -> Result<String, FetchError> {
        let path = self.resolve( reference )?;
        tracing::debug!( "Fetching {:?}", path );
        fs::read_to_string( &path ).map_err( |source| FetchError::Io {
            reference: reference.to_string(),
            source,
        })
    }
}


/// Loads playlists and song lists from a catalog source.
///
/// Nothing is cached: every call goes back to the source.
#[derive( Debug, Clone )]
pub struct CatalogLoader<S> {
    source: S,
    playlists_ref: String,
}


impl<S: CatalogSource> CatalogLoader<S> {
    /// Creates a loader that reads the playlists document from the default reference.
    pub fn new( source: S ) -> Self {
        Self::with_playlists_ref( source, DEFAULT_PLAYLISTS_REF )
    }


    pub fn with_playlists_ref( source: S, playlists_ref: impl Into<String> ) -> Self {
        Self { source, playlists_ref: playlists_ref.into() }
    }


    pub fn source( &self ) -> &S {
        &self.source
    }


    /// Fetches the playlists document.
    pub fn load_playlists( &self ) -> Result<Vec<Playlist>, FetchError> {
        let playlists: Vec<Playlist> = self.fetch_json( &self.playlists_ref )
            .inspect_err( |e| tracing::warn!( "Error loading playlists: {}", e ) )?;
        tracing::info!( "Loaded {} playlists", playlists.len() );
        Ok( playlists )
    }


    /// Fetches the song list behind a playlist's `songs_ref`.
    pub fn load_song_list( &self, source_ref: &str ) -> Result<SongList, FetchError> {
        let songs: Vec<Song> = self.fetch_json( source_ref )
            .inspect_err( |e| tracing::warn!( "Error loading songs: {}", e ) )?;
        tracing::info!( "Loaded {} songs from {}", songs.len(), source_ref );
        Ok( SongList::new( source_ref, songs ) )
    }


    fn fetch_json<T: for<'de> Deserialize<'de>>( &self, reference: &str ) -> Result<T, FetchError> {
        let text = self.source.fetch( reference )?;
        serde_json::from_str( &text ).map_err( |source| FetchError::Json {
            reference: reference.to_string(),
            source,
        })
    }
}


/// Finds the catalog entry whose song list lives at `songs_ref`.
pub fn find_playlist<'a>( playlists: &'a [Playlist], songs_ref: &str ) -> Option<&'a Playlist> {
    playlists.iter().find( |p| p.songs_ref == songs_ref )
}


#[cfg( test )]
mod tests {
    use super::*;

    use std::collections::HashMap;


    /// In-memory source keyed by reference.
    struct MapSource( HashMap<String, String> );

    impl CatalogSource for MapSource {
        fn fetch( &self, reference: &str ) -> Result<String, FetchError> {
            self.0.get( reference ).cloned().ok_or_else( || FetchError::Io {
                reference: reference.to_string(),
                source: std::io::Error::from( std::io::ErrorKind::NotFound ),
            })
        }
    }


    fn loader( docs: &[( &str, &str )] ) -> CatalogLoader<MapSource> {
        let map = docs.iter().map( |( k, v )| ( k.to_string(), v.to_string() ) ).collect();
        CatalogLoader::new( MapSource( map ) )
    }


    #[test]
    fn test_load_playlists() {
        let loader = loader( &[(
            "playlists.json",
            r#"[{"name":"Chill","genre":"Lo-fi","cover":"img/chill.png","songsPath":"songs/chill.json"}]"#,
        )] );

        let playlists = loader.load_playlists().unwrap();
        assert_eq!( playlists.len(), 1 );
        assert_eq!( playlists[ 0 ].name, "Chill" );
        assert_eq!( playlists[ 0 ].cover_ref, "img/chill.png" );
        assert_eq!( playlists[ 0 ].songs_ref, "songs/chill.json" );
    }


    #[test]
    fn test_load_song_list_keeps_order_and_source() {
        let loader = loader( &[(
            "songs/chill.json",
            r#"[
                {"title":"One","artist":"A","path":"audio/1.mp3"},
                {"title":"Two","artist":"B","path":"audio/2.mp3"}
            ]"#,
        )] );

        let list = loader.load_song_list( "songs/chill.json" ).unwrap();
        assert_eq!( list.source_ref(), "songs/chill.json" );
        assert_eq!( list.len(), 2 );
        assert_eq!( list.get( 1 ).unwrap().media_ref, "audio/2.mp3" );
    }


    #[test]
    fn test_missing_document_is_fetch_error() {
        let loader = loader( &[] );
        assert!( matches!( loader.load_playlists(), Err( FetchError::Io { .. } ) ) );
    }


    #[test]
    fn test_malformed_document_is_json_error() {
        let loader = loader( &[( "playlists.json", r#"{"not":"an array"}"# )] );
        assert!( matches!( loader.load_playlists(), Err( FetchError::Json { .. } ) ) );
    }


    #[test]
    fn test_resolve_rejects_escaping_references() {
        let source = DirectorySource::new( "/srv/www" );
        assert_eq!( source.resolve( "./songs/a.json" ).unwrap(), PathBuf::from( "/srv/www/songs/a.json" ) );
        assert!( matches!( source.resolve( "../etc/passwd" ), Err( FetchError::OutsideRoot( _ ) ) ) );
        assert!( matches!( source.resolve( "/etc/passwd" ), Err( FetchError::OutsideRoot( _ ) ) ) );
    }


    #[test]
    fn test_directory_source_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir( dir.path().join( "songs" ) ).unwrap();
        std::fs::write(
            dir.path().join( "songs" ).join( "a.json" ),
            r#"[{"title":"T","artist":"A","path":"a.mp3"}]"#,
        ).unwrap();

        let loader = CatalogLoader::new( DirectorySource::new( dir.path() ) );
        let list = loader.load_song_list( "songs/a.json" ).unwrap();
        assert_eq!( list.songs()[ 0 ].title, "T" );
    }


    #[test]
    fn test_find_playlist_by_songs_ref() {
        let playlists = vec![
            Playlist { name: "A".into(), genre: "g".into(), cover_ref: "a.png".into(), songs_ref: "a.json".into() },
            Playlist { name: "B".into(), genre: "g".into(), cover_ref: "b.png".into(), songs_ref: "b.json".into() },
        ];
        assert_eq!( find_playlist( &playlists, "b.json" ).map( |p| p.name.as_str() ), Some( "B" ) );
        assert!( find_playlist( &playlists, "c.json" ).is_none() );
    }
}
