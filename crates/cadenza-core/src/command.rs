//! Shell command parsing
//!
//! Turns a line of user input into a [`Command`]. Transport commands
//! convert directly into engine [`Transport`] requests; the rest are
//! handled by the front end (catalog browsing, status, help).

use std::str::FromStr;

use thiserror::Error;

use crate::engine::Transport;


/// Errors that can occur during command parsing.
#[derive( Debug, Error )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// Where a seek should land.
#[derive( Debug, Clone, Copy, PartialEq )]
pub enum SeekTarget {
    /// Fraction of the duration, `0.0..=1.0`.
    Fraction( f64 ),
    /// Absolute position in seconds.
    Time( f64 ),
}


impl SeekTarget {
    /// Resolves the target to a fraction of `duration`.
    ///
    /// Absolute times need a known, non-zero duration.
    pub fn fraction( self, duration: Option<f64> ) -> Option<f64> {
        match self {
            SeekTarget::Fraction( f ) => Some( f ),
            SeekTarget::Time( secs ) => duration
                .filter( |d| *d > 0.0 )
                .map( |d| ( secs / d ).clamp( 0.0, 1.0 ) ),
        }
    }
}


impl FromStr for SeekTarget {
    type Err = CommandError;


    /// Accepts a percentage (`42`, `42.5%`) or a time (`1:30`).
    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some(( min, sec )) = s.split_once( ':' ) {
            let minutes: u64 = min.parse()
                .map_err( |_| CommandError::InvalidArgument( format!( "Invalid minutes: {}", min ) ) )?;
            let seconds: u64 = sec.parse()
                .map_err( |_| CommandError::InvalidArgument( format!( "Invalid seconds: {}", sec ) ) )?;
            if seconds >= 60 {
                return Err( CommandError::InvalidArgument( format!( "Invalid seconds: {}", sec ) ) );
            }
            return Ok( SeekTarget::Time( ( minutes * 60 + seconds ) as f64 ) );
        }

        let percent: f64 = s.trim_end_matches( '%' ).trim().parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid position: {}", s ) ) )?;
        if !( 0.0..=100.0 ).contains( &percent ) {
            return Err( CommandError::InvalidArgument( format!( "Position must be 0-100%, got {}", s ) ) );
        }
        Ok( SeekTarget::Fraction( percent / 100.0 ) )
    }
}


/// Parsed shell command.
///
/// Song and playlist numbers are zero-based here; input is one-based.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    // Catalog
    Playlists,
    Open { playlist: usize },
    Songs,

    // Transport
    Play { song: usize },
    Toggle,
    Next,
    Prev,
    Seek { target: SeekTarget },

    // Shell
    Status,
    Help,
    Quit,
}


/// Parses a one-based list position into a zero-based index.
fn parse_position( arg: Option<&str>, what: &str ) -> Result<usize, CommandError> {
    let arg = arg.ok_or_else( || CommandError::MissingArgument( what.into() ) )?;
    match arg.parse::<usize>() {
        Ok( n ) if n >= 1 => Ok( n - 1 ),
        _ => Err( CommandError::InvalidArgument( format!( "Invalid {}: {}", what, arg ) ) ),
    }
}


impl Command {
    /// Parses a command line.
    ///
    /// A leading `/` is accepted and ignored.
    ///
    /// @param input - The command string to parse
    ///
    /// @returns The parsed command or an error
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let input = input.strip_prefix( '/' ).unwrap_or( input );
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( |s| s.trim() ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            "playlists" | "ls" | "catalog" => Ok( Command::Playlists ),
            "open" | "o" => Ok( Command::Open { playlist: parse_position( args, "playlist number" )? } ),
            "songs" | "list" => Ok( Command::Songs ),

            "play" | "p" => match args {
                Some( _ ) => Ok( Command::Play { song: parse_position( args, "song number" )? } ),
                None => Ok( Command::Toggle ),
            },
            "pause" | "pa" | "toggle" | "t" => Ok( Command::Toggle ),
            "next" | "n" => Ok( Command::Next ),
            "prev" | "previous" | "pr" => Ok( Command::Prev ),
            "seek" | "sk" => {
                let arg = args.ok_or_else( || CommandError::MissingArgument( "position".into() ) )?;
                Ok( Command::Seek { target: arg.parse()? } )
            }

            "status" | "st" | "now" => Ok( Command::Status ),
            "help" | "h" | "?" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }


    /// The engine request for transport commands.
    ///
    /// Absolute seeks need the current duration to become a fraction; without
    /// one they produce no request.
    pub fn transport( &self, duration: Option<f64> ) -> Option<Transport> {
        match self {
            Command::Play { song } => Some( Transport::Play( *song ) ),
            Command::Toggle => Some( Transport::TogglePlayPause ),
            Command::Next => Some( Transport::Next ),
            Command::Prev => Some( Transport::Previous ),
            Command::Seek { target } => target.fraction( duration ).map( Transport::Seek ),
            _ => None,
        }
    }


    /// Returns a brief description of the command for help text.
    pub fn description( &self ) -> &'static str {
        match self {
            Command::Playlists => "List playlists",
            Command::Open { .. } => "Open a playlist",
            Command::Songs => "List songs",
            Command::Play { .. } => "Play a song",
            Command::Toggle => "Toggle play/pause",
            Command::Next => "Next song",
            Command::Prev => "Previous song",
            Command::Seek { .. } => "Seek to position",
            Command::Status => "Show now playing",
            Command::Help => "Show help",
            Command::Quit => "Quit",
        }
    }
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Catalog:
  playlists        List playlists                 [ls]
  open <n>         Load the songs of playlist n   [o]
  songs            List songs of the open list

Playback:
  play <n>         Play song n                    [p]
  play / pause     Toggle play/pause              [t]
  next             Next song (wraps)              [n]
  prev             Previous song (wraps)          [pr]
  seek <pos>       Seek to 0-100% or mm:ss        [sk]

Other:
  status           Now playing and progress       [st]
  help             Show this help                 [?]
  quit             Save position and exit         [q]"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_open_is_one_based() {
        assert_eq!( Command::parse( "open 2" ).unwrap(), Command::Open { playlist: 1 } );
        assert_eq!( Command::parse( "/o 1" ).unwrap(), Command::Open { playlist: 0 } );
    }


    #[test]
    fn test_parse_play_with_and_without_number() {
        assert_eq!( Command::parse( "play 3" ).unwrap(), Command::Play { song: 2 } );
        assert_eq!( Command::parse( "play" ).unwrap(), Command::Toggle );
        assert_eq!( Command::parse( "PAUSE" ).unwrap(), Command::Toggle );
    }


    #[test]
    fn test_parse_zero_position_is_invalid() {
        assert!( matches!( Command::parse( "play 0" ), Err( CommandError::InvalidArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "open x" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_seek_percentage() {
        assert_eq!(
            Command::parse( "seek 25%" ).unwrap(),
            Command::Seek { target: SeekTarget::Fraction( 0.25 ) }
        );
        assert_eq!(
            Command::parse( "sk 50" ).unwrap(),
            Command::Seek { target: SeekTarget::Fraction( 0.5 ) }
        );
        assert!( matches!( Command::parse( "seek 150" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_seek_time() {
        assert_eq!(
            Command::parse( "seek 1:30" ).unwrap(),
            Command::Seek { target: SeekTarget::Time( 90.0 ) }
        );
        assert!( matches!( Command::parse( "seek 1:75" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_seek_time_needs_duration() {
        let cmd = Command::parse( "seek 1:00" ).unwrap();
        assert_eq!( cmd.transport( None ), None );
        assert_eq!( cmd.transport( Some( 240.0 ) ), Some( Transport::Seek( 0.25 ) ) );
    }


    #[test]
    fn test_transport_mapping() {
        assert_eq!( Command::Next.transport( None ), Some( Transport::Next ) );
        assert_eq!( Command::Prev.transport( None ), Some( Transport::Previous ) );
        assert_eq!( Command::Play { song: 4 }.transport( None ), Some( Transport::Play( 4 ) ) );
        assert_eq!( Command::Songs.transport( None ), None );
    }


    #[test]
    fn test_parse_unknown() {
        assert!( matches!( Command::parse( "foobar" ), Err( CommandError::Unknown( _ ) ) ) );
        assert!( matches!( Command::parse( "   " ), Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        assert!( matches!( Command::parse( "open" ), Err( CommandError::MissingArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "seek" ), Err( CommandError::MissingArgument( _ ) ) ) );
    }
}
