//! Application settings management
//!
//! Persistent preferences for session restore, position tracking and volume.

use std::fs;
use std::path::{ Path, PathBuf };

use serde::{ Deserialize, Serialize };


/// Application settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Restore the last playback position on startup
    pub resume_on_start: bool,

    /// Remember the playback position while playing
    pub persist_position: bool,

    /// Output volume, 0.0 to 1.0
    pub volume: f32,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            resume_on_start: true,
            persist_position: true,
            volume: 1.0,
        }
    }
}


impl Settings {
    /// Returns the path to the settings file.
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "cadenza" ).join( "settings.json" ) )
    }


    /// Loads settings from the default location, or returns defaults.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some( path ) => Self::load_from( &path ),
            None => Self::default(),
        }
    }


    /// Loads settings from `path`, falling back to defaults on any problem.
    pub fn load_from( path: &Path ) -> Self {
        if !path.exists() {
            return Self::default();
        }

        let settings: Self = match fs::read_to_string( path ) {
            Ok( contents ) => serde_json::from_str( &contents ).unwrap_or_else( |e| {
                tracing::warn!( "Ignoring malformed settings {}: {}", path.display(), e );
                Self::default()
            }),
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        };

        let volume = if settings.volume.is_finite() { settings.volume.clamp( 0.0, 1.0 ) } else { 1.0 };
        Self { volume, ..settings }
    }


    /// Saves settings to `path`.
    pub fn save_to( &self, path: &Path ) {
        // Create parent directory if needed
        if let Some( parent ) = path.parent() {
            if !parent.exists() {
                if let Err( e ) = fs::create_dir_all( parent ) {
                    tracing::warn!( "Failed to create settings directory: {}", e );
                    return;
                }
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                }
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
            }
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from( &dir.path().join( "settings.json" ) );
        assert_eq!( settings, Settings::default() );
    }


    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, r#"{ "resume_on_start": false }"# ).unwrap();

        let settings = Settings::load_from( &path );
        assert!( !settings.resume_on_start );
        assert!( settings.persist_position );
        assert_eq!( settings.volume, 1.0 );
    }


    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, "not json" ).unwrap();
        assert_eq!( Settings::load_from( &path ), Settings::default() );
    }


    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "nested" ).join( "settings.json" );
        let settings = Settings { resume_on_start: false, persist_position: false, volume: 0.5 };

        settings.save_to( &path );
        assert_eq!( Settings::load_from( &path ), settings );
    }


    #[test]
    fn test_volume_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, r#"{ "volume": 3.0 }"# ).unwrap();
        assert_eq!( Settings::load_from( &path ).volume, 1.0 );
    }


    #[test]
    fn test_overflowing_volume_falls_back_to_unity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        // Parses to an infinite f32
        fs::write( &path, r#"{ "volume": 1e39, "persist_position": false }"# ).unwrap();

        let settings = Settings::load_from( &path );
        assert_eq!( settings.volume, 1.0 );
        assert!( !settings.persist_position );
    }
}
