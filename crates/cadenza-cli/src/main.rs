//! Cadenza CLI - Command shell music player

mod cli;
mod settings;

use std::io::{ self, BufRead, Write };
use std::sync::mpsc::{ self, RecvTimeoutError };
use std::thread;
use std::time::Duration;

use anyhow::{ anyhow, Result };
use clap::Parser;
use tracing_subscriber::{ layer::SubscriberExt, util::SubscriberInitExt, EnvFilter };

use cli::Args;
use settings::Settings;

use cadenza_core::{
    catalog::find_playlist,
    command::{ self, Command },
    CatalogLoader, DeviceSession, DirectorySource, FileStore, MediaSession, MemoryStore,
    PlaybackEngine, Playlist, SnapshotStore, TransportState,
};


/// How long the shell waits for input before draining media signals.
const TICK: Duration = Duration::from_millis( 250 );


type Engine = PlaybackEngine<DeviceSession, Box<dyn SnapshotStore>>;


/// Formats seconds as `m:ss`.
fn format_time( seconds: f64 ) -> String {
    let secs = if seconds.is_finite() { seconds.max( 0.0 ) as u64 } else { 0 };
    format!( "{}:{:02}", secs / 60, secs % 60 )
}


/// Picks where playback positions are remembered.
fn open_store( args: &Args, settings: &Settings ) -> Box<dyn SnapshotStore> {
    if args.no_persist || !settings.persist_position {
        tracing::info!( "Position persistence disabled" );
        return Box::new( MemoryStore::new() );
    }

    match args.state_file.clone().map( FileStore::new ).or_else( FileStore::default_location ) {
        Some( store ) => {
            tracing::info!( "Position file: {}", store.path().display() );
            Box::new( store )
        }
        None => {
            tracing::warn!( "No data directory available; position will not be remembered" );
            Box::new( MemoryStore::new() )
        }
    }
}


/// Application state.
struct App {
    engine: Engine,
    loader: CatalogLoader<DirectorySource>,
    playlists: Vec<Playlist>,
    should_quit: bool,

    /// Song last announced, so auto-advance can be reported
    announced: Option<usize>,
}


impl App {
    /// Creates a new App instance.
    fn new( args: &Args, settings: &Settings ) -> Self {
        let root = DirectorySource::new( &args.root );
        let loader = CatalogLoader::with_playlists_ref( root.clone(), args.catalog.clone() );

        let mut session = DeviceSession::new( root );
        session.set_volume( settings.volume );

        let engine = PlaybackEngine::new( session, open_store( args, settings ) );

        Self {
            engine,
            loader,
            playlists: Vec::new(),
            should_quit: false,
            announced: None,
        }
    }


    /// Loads the catalog and restores the last position if asked to.
    fn start( &mut self, resume: bool ) {
        match self.loader.load_playlists() {
            Ok( playlists ) => self.playlists = playlists,
            Err( e ) => println!( "Could not load playlists: {}", e ),
        }

        if resume && self.engine.resume( &self.loader ) {
            self.announced = self.engine.state().current_index();
            println!( "Restored last session (paused). Type 'play' to continue." );
            self.print_status();
        }
    }


    fn execute_command( &mut self, input: &str ) {
        if input.trim().is_empty() {
            return;
        }

        match Command::parse( input ) {
            Ok( cmd ) => {
                if let Err( e ) = self.run_command( cmd ) {
                    println!( "Error: {}", e );
                }
            }
            Err( e ) => {
                println!( "{}", e );
            }
        }
    }


    fn run_command( &mut self, cmd: Command ) -> Result<()> {
        match cmd {
            Command::Playlists => {
                if self.playlists.is_empty() {
                    self.playlists = self.loader.load_playlists()?;
                }
                self.print_playlists();
            }
            Command::Open { playlist } => {
                if self.playlists.is_empty() {
                    self.playlists = self.loader.load_playlists()?;
                }
                let entry = self.playlists.get( playlist )
                    .cloned()
                    .ok_or_else( || anyhow!( "No playlist {}", playlist + 1 ) )?;

                let list = self.loader.load_song_list( &entry.songs_ref )?;
                self.engine.select_song_list( list, Some( entry.cover_ref ) );
                println!( "Opened {} ({})", entry.name, entry.genre );
                self.print_songs();
            }
            Command::Songs => {
                self.print_songs();
            }
            Command::Status => {
                self.print_status();
            }
            Command::Help => {
                println!( "{}", command::help_text() );
            }
            Command::Quit => {
                self.should_quit = true;
            }
            transport => {
                let duration = self.engine.media().duration();
                match transport.transport( duration ) {
                    Some( request ) => {
                        self.engine.dispatch( request )?;
                        self.print_status();
                    }
                    None => println!( "Duration not known yet" ),
                }
            }
        }
        Ok(())
    }


    /// Drains media signals and reports automatic song changes.
    fn tick( &mut self ) {
        self.engine.pump();

        let current = self.engine.state().current_index();
        if current != self.announced {
            self.announced = current;
            if current.is_some() && self.engine.transport() == TransportState::Playing {
                self.print_status();
            }
        }
    }


    fn print_playlists( &self ) {
        if self.playlists.is_empty() {
            println!( "No playlists" );
            return;
        }
        for ( i, p ) in self.playlists.iter().enumerate() {
            println!( "{:>3}. {} [{}]", i + 1, p.name, p.genre );
        }
    }


    fn print_songs( &self ) {
        let songs = self.engine.songs();
        if songs.is_empty() {
            println!( "No songs. Use 'open <n>' to choose a playlist." );
            return;
        }

        let current = self.engine.state().current_index();
        for ( i, song ) in songs.iter().enumerate() {
            let marker = if current == Some( i ) { '>' } else { ' ' };
            println!( "{} {:>3}. {} - {}", marker, i + 1, song.artist, song.title );
        }
    }


    fn print_status( &self ) {
        let Some( now ) = self.engine.now_playing() else {
            println!( "Nothing playing" );
            return;
        };

        let state = match self.engine.transport() {
            TransportState::Playing => "Playing",
            TransportState::Paused => "Paused",
            TransportState::Idle => "Idle",
        };
        let elapsed = format_time( self.engine.media().current_time() );
        let timing = match ( self.engine.media().duration(), self.engine.progress() ) {
            ( Some( d ), Some( pct ) ) => format!( "{} / {} ({:.0}%)", elapsed, format_time( d ), pct ),
            _ => elapsed,
        };
        let playlist = self.engine.state()
            .active_list_ref()
            .and_then( |r| find_playlist( &self.playlists, r ) )
            .map( |p| format!( " from {}", p.name ) )
            .unwrap_or_default();

        println!( "{}: {} - {}{}  {}  [cover: {}]", state, now.artist, now.title, playlist, timing, now.cover_ref );
    }
}


/// Reads stdin lines on a separate thread so playback keeps advancing.
fn spawn_input_reader() -> mpsc::Receiver<String> {
    let ( tx, rx ) = mpsc::channel();
    thread::spawn( move || {
        for line in io::stdin().lock().lines() {
            let Ok( line ) = line else { break };
            if tx.send( line ).is_err() {
                break;
            }
        }
    });
    rx
}


fn prompt() -> io::Result<()> {
    let mut stdout = io::stdout();
    write!( stdout, "> " )?;
    stdout.flush()
}


fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so they stay out of the shell output
    let filter = if args.verbose {
        EnvFilter::new( "cadenza=debug" )
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else( |_| EnvFilter::new( "cadenza=info" ) )
    };
    tracing_subscriber::registry()
        .with( filter )
        .with( tracing_subscriber::fmt::layer().with_writer( io::stderr ) )
        .init();

    let settings = Settings::load();
    if let Some( path ) = Settings::settings_path().filter( |p| !p.exists() ) {
        settings.save_to( &path );
    }

    tracing::info!( "Starting Cadenza {} with root {}", env!( "CARGO_PKG_VERSION" ), args.root.display() );

    let mut app = App::new( &args, &settings );
    app.start( settings.resume_on_start && !args.no_resume );

    println!( "Type 'help' for commands." );
    prompt()?;

    let input = spawn_input_reader();
    loop {
        match input.recv_timeout( TICK ) {
            Ok( line ) => {
                app.execute_command( &line );
                if !app.should_quit {
                    prompt()?;
                }
            }
            Err( RecvTimeoutError::Timeout ) => {}
            Err( RecvTimeoutError::Disconnected ) => app.should_quit = true,
        }

        app.tick();

        if app.should_quit {
            // Save position before quitting
            app.engine.checkpoint();
            break;
        }
    }

    Ok(())
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_format_time() {
        assert_eq!( format_time( 0.0 ), "0:00" );
        assert_eq!( format_time( 37.5 ), "0:37" );
        assert_eq!( format_time( 185.0 ), "3:05" );
        assert_eq!( format_time( f64::NAN ), "0:00" );
    }


    #[test]
    fn test_store_disabled_by_flag() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join( "state.json" );
        let args = Args::parse_from( [
            "cadenza", "--no-persist", "--state-file", state.to_str().unwrap(),
        ] );

        let mut store = open_store( &args, &Settings::default() );
        store.save( &cadenza_core::Snapshot {
            playlist_path: "p.json".into(),
            song_index: 0,
            current_time: 1.0,
            cover_img: String::new(),
        }).unwrap();

        assert!( !state.exists() );
    }


    #[test]
    fn test_store_uses_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join( "state.json" );
        let args = Args::parse_from( [ "cadenza", "--state-file", state.to_str().unwrap() ] );

        let mut store = open_store( &args, &Settings::default() );
        store.save( &cadenza_core::Snapshot {
            playlist_path: "p.json".into(),
            song_index: 2,
            current_time: 10.0,
            cover_img: "c.png".into(),
        }).unwrap();

        assert!( state.exists() );
        assert_eq!( store.load().unwrap().unwrap().song_index, 2 );
    }
}
