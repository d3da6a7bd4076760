//! Audio output via cpal
//!
//! A shared PCM queue sits between the decode thread (producer) and the
//! device callback (consumer).

use std::collections::VecDeque;
use std::sync::{ Arc, Mutex, PoisonError };
use std::sync::atomic::{ AtomicBool, AtomicU32, AtomicU64, Ordering };

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use thiserror::Error;


/// Errors that can occur with audio output.
#[derive( Debug, Error )]
pub enum OutputError {
    #[error( "No output device available" )]
    NoDevice,

    #[error( "Failed to get stream config: {0}" )]
    StreamConfig( String ),

    #[error( "Failed to build output stream: {0}" )]
    BuildStream( String ),

    #[error( "Failed to start stream: {0}" )]
    PlayStream( String ),
}


/// Interleaved samples waiting for the device, with channel remapping.
pub struct PcmQueue {
    samples: Mutex<VecDeque<f32>>,
    capacity: usize,
    paused: AtomicBool,
    /// f32 bits
    volume: AtomicU32,
    /// Frames handed to the device so far
    played: AtomicU64,
    source_channels: usize,
    output_channels: usize,
}


impl PcmQueue {
    /// @param capacity - Maximum number of buffered source samples
    /// @param source_channels - Channels produced by the decoder
    /// @param output_channels - Channels the device expects
    pub fn new( capacity: usize, source_channels: u16, output_channels: u16 ) -> Self {
        Self {
            samples: Mutex::new( VecDeque::with_capacity( capacity ) ),
            capacity,
            paused: AtomicBool::new( false ),
            volume: AtomicU32::new( 1.0_f32.to_bits() ),
            played: AtomicU64::new( 0 ),
            source_channels: source_channels.max( 1 ) as usize,
            output_channels: output_channels.max( 1 ) as usize,
        }
    }


    fn lock( &self ) -> std::sync::MutexGuard<'_, VecDeque<f32>> {
        self.samples.lock().unwrap_or_else( PoisonError::into_inner )
    }


    /// Queues as many samples as fit. Returns how many were taken.
    pub fn push( &self, samples: &[f32] ) -> usize {
        let mut queue = self.lock();
        let room = self.capacity.saturating_sub( queue.len() );
        let taken = samples.len().min( room );
        queue.extend( &samples[ ..taken ] );
        taken
    }


    /// Fills `output` with device frames, padding with silence.
    ///
    /// Missing output channels repeat the last source channel; extra source
    /// channels are folded into the last output channel.
    pub fn pop( &self, output: &mut [f32] ) -> usize {
        output.fill( 0.0 );
        if self.paused.load( Ordering::Relaxed ) {
            return 0;
        }

        let volume = self.volume();
        let src = self.source_channels;
        let out = self.output_channels;
        let mut queue = self.lock();

        let frames = ( output.len() / out ).min( queue.len() / src );
        let mut frame_buf = vec![ 0.0_f32; src ];

        for frame in 0..frames {
            for slot in frame_buf.iter_mut() {
                *slot = queue.pop_front().unwrap_or( 0.0 );
            }

            let dest = &mut output[ frame * out..( frame + 1 ) * out ];
            if src == out {
                dest.copy_from_slice( &frame_buf );
            } else if src < out {
                for ( ch, sample ) in dest.iter_mut().enumerate() {
                    *sample = frame_buf[ ch.min( src - 1 ) ];
                }
            } else {
                dest[ ..out - 1 ].copy_from_slice( &frame_buf[ ..out - 1 ] );
                let tail = &frame_buf[ out - 1.. ];
                dest[ out - 1 ] = tail.iter().sum::<f32>() / tail.len() as f32;
            }
        }

        drop( queue );
        self.played.fetch_add( frames as u64, Ordering::Relaxed );

        let written = frames * out;
        if volume != 1.0 {
            output[ ..written ].iter_mut().for_each( |s| *s *= volume );
        }
        written
    }


    pub fn len( &self ) -> usize {
        self.lock().len()
    }


    pub fn is_empty( &self ) -> bool {
        self.lock().is_empty()
    }


    pub fn clear( &self ) {
        self.lock().clear();
    }


    pub fn set_paused( &self, paused: bool ) {
        self.paused.store( paused, Ordering::Relaxed );
    }


    pub fn is_paused( &self ) -> bool {
        self.paused.load( Ordering::Relaxed )
    }


    /// 0.0 = mute, 1.0 = unity.
    pub fn set_volume( &self, volume: f32 ) {
        self.volume.store( volume.to_bits(), Ordering::Relaxed );
    }


    pub fn volume( &self ) -> f32 {
        f32::from_bits( self.volume.load( Ordering::Relaxed ) )
    }


    /// Frames actually delivered to the device, excluding padding silence.
    pub fn played_frames( &self ) -> u64 {
        self.played.load( Ordering::Relaxed )
    }
}


/// An open stream on the default output device.
///
/// Not `Send`: keep it on the thread that created it.
pub struct AudioOutput {
    stream: cpal::Stream,
    sample_rate: u32,
}


impl AudioOutput {
    /// Opens the default device for the given source format.
    ///
    /// Prefers a config matching both rate and channel count, then any
    /// config with the rate, then the device default (the caller resamples).
    pub fn open(
        source_rate: u32,
        source_channels: u16,
    ) -> Result<( Self, Arc<PcmQueue> ), OutputError> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or( OutputError::NoDevice )?;

        tracing::debug!( "Using output device: {:?}", device.name() );

        let supported: Vec<_> = device
            .supported_output_configs()
            .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?
            .collect();
        let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate().0 <= source_rate && c.max_sample_rate().0 >= source_rate
        };

        let config = match supported
            .iter()
            .find( |c| c.channels() == source_channels && supports_rate( *c ) )
            .or_else( || supported.iter().find( |c| supports_rate( *c ) ) )
        {
            Some( range ) => range.clone().with_sample_rate( cpal::SampleRate( source_rate ) ).config(),
            None => device
                .default_output_config()
                .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?
                .config(),
        };

        tracing::debug!( "Output config: {} Hz, {} channels", config.sample_rate.0, config.channels );

        // About half a second of audio at the device rate
        let capacity = config.sample_rate.0 as usize * source_channels.max( 1 ) as usize / 2;
        let queue = Arc::new( PcmQueue::new( capacity, source_channels, config.channels ) );
        let consumer = Arc::clone( &queue );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    consumer.pop( data );
                },
                |err| tracing::error!( "Audio output error: {}", err ),
                None,
            )
            .map_err( |e| OutputError::BuildStream( e.to_string() ) )?;

        Ok(( Self { stream, sample_rate: config.sample_rate.0 }, queue ))
    }


    pub fn start( &self ) -> Result<(), OutputError> {
        self.stream.play().map_err( |e| OutputError::PlayStream( e.to_string() ) )
    }


    /// Device sample rate actually in use.
    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_push_respects_capacity() {
        let queue = PcmQueue::new( 4, 2, 2 );
        assert_eq!( queue.push( &[ 0.1; 6 ] ), 4 );
        assert_eq!( queue.len(), 4 );
    }


    #[test]
    fn test_pop_mono_to_stereo_duplicates() {
        let queue = PcmQueue::new( 16, 1, 2 );
        queue.push( &[ 0.5, -0.5 ] );

        let mut out = [ 1.0; 6 ];
        assert_eq!( queue.pop( &mut out ), 4 );
        assert_eq!( out, [ 0.5, 0.5, -0.5, -0.5, 0.0, 0.0 ] );
    }


    #[test]
    fn test_pop_stereo_to_mono_mixes() {
        let queue = PcmQueue::new( 16, 2, 1 );
        queue.push( &[ 1.0, 0.0, 0.5, 0.5 ] );

        let mut out = [ 0.0; 2 ];
        queue.pop( &mut out );
        assert_eq!( out, [ 0.5, 0.5 ] );
    }


    #[test]
    fn test_paused_queue_outputs_silence_and_keeps_samples() {
        let queue = PcmQueue::new( 16, 2, 2 );
        queue.push( &[ 0.3; 4 ] );
        queue.set_paused( true );

        let mut out = [ 1.0; 4 ];
        assert_eq!( queue.pop( &mut out ), 0 );
        assert_eq!( out, [ 0.0; 4 ] );
        assert_eq!( queue.len(), 4 );
        assert_eq!( queue.played_frames(), 0 );
    }


    #[test]
    fn test_played_frames_counts_only_delivered_audio() {
        let queue = PcmQueue::new( 64, 2, 2 );
        queue.push( &[ 0.1; 12 ] );
        assert_eq!( queue.played_frames(), 0 );

        let mut out = [ 0.0; 8 ];
        queue.pop( &mut out );
        assert_eq!( queue.played_frames(), 4 );

        // Only two frames left; the rest of the buffer is silence
        queue.pop( &mut out );
        assert_eq!( queue.played_frames(), 6 );
    }


    #[test]
    fn test_volume_scales_output() {
        let queue = PcmQueue::new( 16, 1, 1 );
        queue.set_volume( 0.5 );
        queue.push( &[ 0.8 ] );

        let mut out = [ 0.0; 1 ];
        queue.pop( &mut out );
        assert!( ( out[ 0 ] - 0.4 ).abs() < 1e-6 );
    }
}
