//! Command-line argument parsing for Cadenza.

use std::path::PathBuf;

use clap::Parser;

use cadenza_core::catalog::DEFAULT_PLAYLISTS_REF;


/// Cadenza - A catalog-driven command shell music player.
#[derive( Parser, Debug )]
#[command( name = "cadenza" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Directory holding the catalog documents and media files.
    #[arg( short, long, default_value = "public" )]
    pub root: PathBuf,

    /// Playlists document, relative to the root.
    #[arg( short, long, default_value = DEFAULT_PLAYLISTS_REF )]
    pub catalog: String,

    /// Where to keep the playback position instead of the default location.
    #[arg( long )]
    pub state_file: Option<PathBuf>,

    /// Do not restore the last position on startup.
    #[arg( long )]
    pub no_resume: bool,

    /// Do not remember the playback position.
    #[arg( long )]
    pub no_persist: bool,

    /// Log at debug level.
    #[arg( short, long )]
    pub verbose: bool,
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_defaults() {
        let args = Args::parse_from( [ "cadenza" ] );
        assert_eq!( args.root, PathBuf::from( "public" ) );
        assert_eq!( args.catalog, "playlists.json" );
        assert!( args.state_file.is_none() );
        assert!( !args.no_resume && !args.no_persist && !args.verbose );
    }


    #[test]
    fn test_flags() {
        let args = Args::parse_from( [
            "cadenza", "--root", "/srv/music", "--state-file", "/tmp/state.json", "--no-resume", "-v",
        ] );
        assert_eq!( args.root, PathBuf::from( "/srv/music" ) );
        assert_eq!( args.state_file, Some( PathBuf::from( "/tmp/state.json" ) ) );
        assert!( args.no_resume );
        assert!( args.verbose );
    }
}
