//! Native media session
//!
//! Plays catalog media references on the default output device. Each
//! loaded source gets its own decode thread; loading another source or
//! seeking tears the pipeline down and builds a new one, so only the most
//! recent request is ever audible.

use std::path::{ Path, PathBuf };
use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::thread;
use std::time::Duration;

use rubato::{ FastFixedOut, PolynomialDegree, Resampler };

use crate::catalog::DirectorySource;
use crate::decoder::TrackDecoder;
use crate::media::{ MediaError, MediaEvent, MediaSession };
use crate::output::{ AudioOutput, PcmQueue };


/// Minimum position change between two time-update signals.
const PROGRESS_STEP_SECS: f64 = 0.25;

/// Output chunk size handed to the resampler.
const RESAMPLE_CHUNK: usize = 1024;


/// Converts planar samples back to interleaved order.
fn interleave( channels: &[Vec<f32>] ) -> Vec<f32> {
    let frames = channels.first().map_or( 0, |c| c.len() );
    let mut out = Vec::with_capacity( frames * channels.len() );
    for f in 0..frames {
        out.extend( channels.iter().map( |ch| ch[ f ] ) );
    }
    out
}


/// Pushes all of `samples` unless asked to stop. Returns false when stopped.
fn feed( queue: &PcmQueue, samples: &[f32], stop: &AtomicBool ) -> bool {
    let mut offset = 0;
    while offset < samples.len() {
        if stop.load( Ordering::Relaxed ) {
            return false;
        }
        let pushed = queue.push( &samples[ offset.. ] );
        offset += pushed;
        if pushed == 0 {
            thread::sleep( Duration::from_millis( 5 ) );
        }
    }
    true
}


/// Decode thread body: decode, resample if needed, queue for the device.
fn decode_loop(
    mut decoder: TrackDecoder,
    queue: Arc<PcmQueue>,
    stop: Arc<AtomicBool>,
    mut resampler: Option<FastFixedOut<f32>>,
    high_water: usize,
    finished: Arc<AtomicBool>,
) {
    let channels = decoder.channels();
    let mut pending: Vec<Vec<f32>> = vec![ Vec::new(); channels ];

    loop {
        if stop.load( Ordering::Relaxed ) {
            return;
        }
        if queue.is_paused() || queue.len() > high_water {
            thread::sleep( Duration::from_millis( 5 ) );
            continue;
        }

        match decoder.decode_next() {
            Ok( Some( samples ) ) => {
                let ready = match resampler.as_mut() {
                    None => samples,
                    Some( resampler ) => {
                        for frame in samples.chunks( channels ) {
                            for ( ch, sample ) in frame.iter().enumerate() {
                                pending[ ch ].push( *sample );
                            }
                        }

                        let mut out = Vec::new();
                        while pending[ 0 ].len() >= resampler.input_frames_next() {
                            let needed = resampler.input_frames_next();
                            let chunk: Vec<Vec<f32>> = pending
                                .iter_mut()
                                .map( |ch| ch.drain( ..needed ).collect() )
                                .collect();
                            match resampler.process( &chunk, None ) {
                                Ok( resampled ) => out.extend( interleave( &resampled ) ),
                                Err( e ) => {
                                    tracing::error!( "Resample error: {}", e );
                                    break;
                                }
                            }
                        }
                        out
                    }
                };

                if !feed( &queue, &ready, &stop ) {
                    return;
                }
            }
            Ok( None ) => {
                if let Some( resampler ) = resampler.as_mut() {
                    if !pending[ 0 ].is_empty() {
                        match resampler.process_partial( Some( pending.as_slice() ), None ) {
                            Ok( resampled ) => {
                                if !feed( &queue, &interleave( &resampled ), &stop ) {
                                    return;
                                }
                            }
                            Err( e ) => tracing::error!( "Final resample error: {}", e ),
                        }
                    }
                }

                while !queue.is_empty() && !stop.load( Ordering::Relaxed ) {
                    thread::sleep( Duration::from_millis( 10 ) );
                }
                finished.store( true, Ordering::Relaxed );
                tracing::debug!( "Decode loop: end of stream" );
                return;
            }
            Err( e ) => {
                tracing::error!( "Decode error: {}", e );
                finished.store( true, Ordering::Relaxed );
                return;
            }
        }
    }
}


/// A running decode thread plus the device stream it feeds.
struct Pipeline {
    stop: Arc<AtomicBool>,
    queue: Arc<PcmQueue>,
    // Dropping the output stops the device stream
    _output: AudioOutput,
    thread: Option<thread::JoinHandle<()>>,
    /// Where the device's first frame sits in the song, in seconds
    start_position: f64,
    device_rate: u32,
    finished: Arc<AtomicBool>,
}


impl Pipeline {
    /// Starts decoding `decoder` from `position` seconds.
    fn start( mut decoder: TrackDecoder, position: f64, paused: bool, volume: f32 ) -> Result<Self, MediaError> {
        if position > 0.0 {
            decoder.seek( position ).map_err( |e| MediaError::Decode( e.to_string() ) )?;
        }

        let source_rate = decoder.sample_rate();
        let channels = decoder.channels();

        let ( output, queue ) = AudioOutput::open( source_rate, channels as u16 )
            .map_err( |e| MediaError::Output( e.to_string() ) )?;
        queue.set_volume( volume );
        queue.set_paused( paused );
        output.start().map_err( |e| MediaError::Output( e.to_string() ) )?;

        let device_rate = output.sample_rate();
        let resampler = if device_rate != source_rate {
            tracing::debug!( "Resampling: {} Hz -> {} Hz", source_rate, device_rate );
            let resampler = FastFixedOut::<f32>::new(
                device_rate as f64 / source_rate as f64,
                2.0,
                PolynomialDegree::Cubic,
                RESAMPLE_CHUNK,
                channels,
            ).map_err( |e| MediaError::Output( format!( "Failed to create resampler: {}", e ) ) )?;
            Some( resampler )
        } else {
            None
        };

        let stop = Arc::new( AtomicBool::new( false ) );
        // Roughly 50ms ahead of the device, counted in queued device-rate samples
        let high_water = device_rate as usize * channels / 20;
        let finished = Arc::new( AtomicBool::new( false ) );

        let thread = {
            let queue = Arc::clone( &queue );
            let stop = Arc::clone( &stop );
            let finished = Arc::clone( &finished );
            thread::spawn( move || {
                decode_loop( decoder, queue, stop, resampler, high_water, finished );
            })
        };

        Ok( Self {
            stop,
            queue,
            _output: output,
            thread: Some( thread ),
            start_position: position.max( 0.0 ),
            device_rate,
            finished,
        })
    }


    fn position( &self ) -> f64 {
        self.start_position + self.queue.played_frames() as f64 / self.device_rate.max( 1 ) as f64
    }


    fn is_finished( &self ) -> bool {
        self.finished.load( Ordering::Relaxed )
    }
}


impl Drop for Pipeline {
    fn drop( &mut self ) {
        self.stop.store( true, Ordering::Relaxed );
        self.queue.clear();
        if let Some( thread ) = self.thread.take() {
            let _ = thread.join();
        }
    }
}


/// The source currently loaded into the session.
struct LoadedSource {
    path: PathBuf,
    duration: Option<f64>,
    /// Position to report while no pipeline is running.
    parked_at: f64,
    pipeline: Option<Pipeline>,
}


/// Media session that plays through the default audio device.
///
/// Media references are resolved against the same root as the catalog.
pub struct DeviceSession {
    resolver: DirectorySource,
    volume: f32,
    source: Option<LoadedSource>,
    last_reported: Option<f64>,
    ended_reported: bool,
}


impl DeviceSession {
    pub fn new( resolver: DirectorySource ) -> Self {
        Self {
            resolver,
            volume: 1.0,
            source: None,
            last_reported: None,
            ended_reported: false,
        }
    }


    /// Sets the volume for this and every later source (0.0 = mute, 1.0 = unity).
    pub fn set_volume( &mut self, volume: f32 ) {
        self.volume = if volume.is_finite() { volume.clamp( 0.0, 1.0 ) } else { 1.0 };
        if let Some( pipeline ) = self.source.as_ref().and_then( |s| s.pipeline.as_ref() ) {
            pipeline.queue.set_volume( self.volume );
        }
    }


    pub fn volume( &self ) -> f32 {
        self.volume
    }


    fn open( path: &Path ) -> Result<TrackDecoder, MediaError> {
        TrackDecoder::open( path ).map_err( |e| MediaError::Open( format!( "{}: {}", path.display(), e ) ) )
    }


    fn pipeline( &self ) -> Option<&Pipeline> {
        self.source.as_ref().and_then( |s| s.pipeline.as_ref() )
    }


    /// Replaces the running pipeline with one starting at `position`.
    fn restart( &mut self, position: f64, paused: bool ) -> Result<(), MediaError> {
        let source = self.source.as_mut().ok_or( MediaError::NoSource )?;
        let decoder = Self::open( &source.path )?;

        source.pipeline = None;
        source.parked_at = position;
        source.pipeline = Some( Pipeline::start( decoder, position, paused, self.volume )? );
        self.last_reported = None;
        self.ended_reported = false;
        Ok(())
    }
}


impl MediaSession for DeviceSession {
    fn load( &mut self, media_ref: &str ) -> Result<(), MediaError> {
        let path = self.resolver
            .resolve( media_ref )
            .map_err( |e| MediaError::Open( e.to_string() ) )?;

        // Probe before touching the current source so a bad file changes nothing
        let decoder = Self::open( &path )?;
        let duration = decoder.duration();

        self.source = None;
        self.last_reported = None;
        self.ended_reported = false;

        tracing::debug!( "Loading {:?}", path );
        let pipeline = Pipeline::start( decoder, 0.0, true, self.volume )?;
        self.source = Some( LoadedSource {
            path,
            duration,
            parked_at: 0.0,
            pipeline: Some( pipeline ),
        });
        Ok(())
    }


    fn play( &mut self ) -> Result<(), MediaError> {
        let source = self.source.as_ref().ok_or( MediaError::NoSource )?;
        let restart_at = match source.pipeline.as_ref() {
            Some( pipeline ) if !pipeline.is_finished() => {
                pipeline.queue.set_paused( false );
                return Ok(());
            }
            // Playing again after the end starts over
            Some( _ ) => 0.0,
            None => source.parked_at,
        };
        self.restart( restart_at, false )
    }


    fn pause( &mut self ) {
        if let Some( pipeline ) = self.pipeline() {
            pipeline.queue.set_paused( true );
        }
    }


    fn seek( &mut self, seconds: f64 ) -> Result<(), MediaError> {
        let paused = self.is_paused();
        let position = match self.duration() {
            Some( d ) => seconds.clamp( 0.0, d ),
            None => seconds.max( 0.0 ),
        };
        tracing::debug!( "Seeking to {:.1}s", position );
        self.restart( position, paused )
    }


    fn current_time( &self ) -> f64 {
        match self.source.as_ref() {
            Some( LoadedSource { pipeline: Some( p ), .. } ) => p.position(),
            Some( source ) => source.parked_at,
            None => 0.0,
        }
    }


    fn duration( &self ) -> Option<f64> {
        self.source.as_ref().and_then( |s| s.duration )
    }


    fn has_source( &self ) -> bool {
        self.source.is_some()
    }


    fn is_paused( &self ) -> bool {
        self.pipeline().map_or( true, |p| p.queue.is_paused() || p.is_finished() )
    }


    fn poll_event( &mut self ) -> Option<MediaEvent> {
        let pipeline = self.pipeline()?;

        if pipeline.is_finished() {
            if self.ended_reported {
                return None;
            }
            self.ended_reported = true;
            return Some( MediaEvent::Ended );
        }

        let now = pipeline.position();
        let moved = self.last_reported.map_or( true, |last| ( now - last ).abs() >= PROGRESS_STEP_SECS );
        if !moved {
            return None;
        }

        self.last_reported = Some( now );
        Some( MediaEvent::TimeUpdate { current_time: now, duration: self.duration() } )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_interleave_planar_channels() {
        let planar = vec![ vec![ 1.0, 2.0 ], vec![ -1.0, -2.0 ] ];
        assert_eq!( interleave( &planar ), vec![ 1.0, -1.0, 2.0, -2.0 ] );
        assert!( interleave( &[] ).is_empty() );
    }


    #[test]
    fn test_fresh_session_has_nothing_to_report() {
        let mut session = DeviceSession::new( DirectorySource::new( "." ) );
        assert!( !session.has_source() );
        assert!( session.is_paused() );
        assert_eq!( session.current_time(), 0.0 );
        assert!( session.poll_event().is_none() );
        assert!( matches!( session.play(), Err( MediaError::NoSource ) ) );
    }


    #[test]
    fn test_loading_a_missing_file_keeps_session_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = DeviceSession::new( DirectorySource::new( dir.path() ) );
        assert!( matches!( session.load( "audio/missing.mp3" ), Err( MediaError::Open( _ ) ) ) );
        assert!( !session.has_source() );
    }


    #[test]
    fn test_loading_an_escaping_reference_is_rejected() {
        let mut session = DeviceSession::new( DirectorySource::new( "/srv/www" ) );
        assert!( matches!( session.load( "../secret.mp3" ), Err( MediaError::Open( _ ) ) ) );
    }


    #[test]
    fn test_volume_is_clamped() {
        let mut session = DeviceSession::new( DirectorySource::new( "." ) );
        session.set_volume( 3.0 );
        assert_eq!( session.volume(), 1.0 );
        session.set_volume( -1.0 );
        assert_eq!( session.volume(), 0.0 );
    }


    #[test]
    fn test_non_finite_volume_falls_back_to_unity() {
        let mut session = DeviceSession::new( DirectorySource::new( "." ) );
        session.set_volume( 0.3 );
        session.set_volume( f32::NAN );
        assert_eq!( session.volume(), 1.0 );
        session.set_volume( f32::INFINITY );
        assert_eq!( session.volume(), 1.0 );
    }
}
