//! End-to-end engine behaviour against a scripted media session.

mod common;

use cadenza_core::{
    CatalogLoader, EngineError, FileStore, MediaEvent, MemoryStore, PlaybackEngine, Snapshot,
    SnapshotStore, Transport, TransportState,
};

use common::{ engine_with_list, loader_with_list, song_list, MapSource, ScriptedSession };


fn saved( snapshot: Snapshot ) -> MemoryStore {
    MemoryStore::with_snapshot( snapshot )
}


// ===== Resume =====

#[test]
fn resume_restores_position_without_playing() {
    let store = saved( Snapshot {
        playlist_path: "p1.json".into(),
        song_index: 2,
        current_time: 37.5,
        cover_img: "c.png".into(),
    });
    let mut engine = PlaybackEngine::new( ScriptedSession::with_duration( 200.0 ), store );

    assert!( engine.resume( &loader_with_list( "p1.json", 5 ) ) );

    assert_eq!( engine.state().current_index(), Some( 2 ) );
    assert_eq!( engine.state().active_list_ref(), Some( "p1.json" ) );
    assert_eq!( engine.media().position, 37.5 );
    assert_eq!( engine.media().source.as_deref(), Some( "audio/2.mp3" ) );
    assert!( engine.media().paused );
    assert_eq!( engine.transport(), TransportState::Paused );

    let now = engine.now_playing().unwrap();
    assert_eq!( now.title, "Track 2" );
    assert_eq!( now.cover_ref, "c.png" );
    assert_eq!( engine.store().writes(), 0 );
}


#[test]
fn resume_then_toggle_starts_playback() {
    let store = saved( Snapshot {
        playlist_path: "p1.json".into(),
        song_index: 0,
        current_time: 12.0,
        cover_img: String::new(),
    });
    let mut engine = PlaybackEngine::new( ScriptedSession::with_duration( 100.0 ), store );
    assert!( engine.resume( &loader_with_list( "p1.json", 1 ) ) );
    assert_eq!( engine.now_playing().unwrap().cover_ref, cadenza_core::engine::DEFAULT_COVER );

    engine.toggle_play_pause();
    assert_eq!( engine.transport(), TransportState::Playing );
    assert!( !engine.media().paused );
}


#[test]
fn resume_from_record_without_cover_uses_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join( "player-state.json" );
    std::fs::write( &path, r#"{"playlistPath":"p1.json","songIndex":2,"currentTime":37.5}"# ).unwrap();

    let mut engine = PlaybackEngine::new( ScriptedSession::with_duration( 200.0 ), FileStore::new( &path ) );
    assert!( engine.resume( &loader_with_list( "p1.json", 5 ) ) );

    assert_eq!( engine.state().current_index(), Some( 2 ) );
    assert_eq!( engine.media().position, 37.5 );
    assert_eq!( engine.transport(), TransportState::Paused );
    assert_eq!( engine.now_playing().unwrap().cover_ref, cadenza_core::engine::DEFAULT_COVER );
}


#[test]
fn resume_without_snapshot_stays_idle() {
    let mut engine = PlaybackEngine::new( ScriptedSession::default(), MemoryStore::new() );
    assert!( !engine.resume( &loader_with_list( "p1.json", 3 ) ) );
    assert_eq!( engine.transport(), TransportState::Idle );
    assert!( engine.media().loads.is_empty() );
}


#[test]
fn resume_with_stale_index_stays_idle() {
    let store = saved( Snapshot {
        playlist_path: "p1.json".into(),
        song_index: 7,
        current_time: 3.0,
        cover_img: "c.png".into(),
    });
    let mut engine = PlaybackEngine::new( ScriptedSession::default(), store );

    assert!( !engine.resume( &loader_with_list( "p1.json", 3 ) ) );
    assert_eq!( engine.transport(), TransportState::Idle );
    assert!( engine.state().current_index().is_none() );
}


#[test]
fn resume_with_missing_song_list_stays_idle() {
    let store = saved( Snapshot {
        playlist_path: "gone.json".into(),
        song_index: 0,
        current_time: 0.0,
        cover_img: String::new(),
    });
    let mut engine = PlaybackEngine::new( ScriptedSession::default(), store );

    assert!( !engine.resume( &CatalogLoader::new( MapSource::default() ) ) );
    assert_eq!( engine.transport(), TransportState::Idle );
}


#[test]
fn resume_with_unavailable_storage_stays_idle() {
    let mut engine = PlaybackEngine::new( ScriptedSession::default(), MemoryStore::unavailable() );
    assert!( !engine.resume( &loader_with_list( "p1.json", 3 ) ) );
    assert_eq!( engine.transport(), TransportState::Idle );
}


#[test]
fn resume_is_ignored_once_playing() {
    let mut engine = engine_with_list( 3 );
    engine.play( 1 ).unwrap();
    assert!( !engine.resume( &loader_with_list( "songs/mix.json", 3 ) ) );
    assert_eq!( engine.state().current_index(), Some( 1 ) );
    assert_eq!( engine.transport(), TransportState::Playing );
}


#[test]
fn resumed_watermark_does_not_rewrite_the_same_interval() {
    let store = saved( Snapshot {
        playlist_path: "p1.json".into(),
        song_index: 1,
        current_time: 37.5,
        cover_img: "c.png".into(),
    });
    let mut engine = PlaybackEngine::new( ScriptedSession::with_duration( 200.0 ), store );
    engine.resume( &loader_with_list( "p1.json", 3 ) );
    engine.toggle_play_pause();

    engine.media_mut().tick( 38.0 );
    engine.media_mut().tick( 39.5 );
    engine.pump();
    assert_eq!( engine.store().writes(), 0 );

    engine.media_mut().tick( 40.1 );
    engine.pump();
    assert_eq!( engine.store().writes(), 1 );
    assert_eq!( engine.store().snapshot().unwrap().current_time, 40.1 );
}


// ===== Ended =====

#[test]
fn ended_on_last_song_wraps_to_first_and_plays() {
    let mut engine = engine_with_list( 3 );
    engine.play( 2 ).unwrap();

    engine.media_mut().push( MediaEvent::Ended );
    assert_eq!( engine.pump(), 1 );

    assert_eq!( engine.state().current_index(), Some( 0 ) );
    assert_eq!( engine.transport(), TransportState::Playing );
    assert_eq!( engine.media().source.as_deref(), Some( "audio/0.mp3" ) );
    assert!( !engine.media().paused );
}


#[test]
fn ended_on_single_song_list_replays_it() {
    let mut engine = engine_with_list( 1 );
    engine.play( 0 ).unwrap();

    engine.on_ended();
    assert_eq!( engine.state().current_index(), Some( 0 ) );
    assert_eq!( engine.media().loads, vec![ "audio/0.mp3", "audio/0.mp3" ] );
    assert_eq!( engine.transport(), TransportState::Playing );
}


#[test]
fn ended_with_no_current_song_pauses() {
    let mut engine = engine_with_list( 2 );
    engine.play( 0 ).unwrap();
    engine.select_song_list( song_list( "songs/other.json", 4 ), None );

    engine.on_ended();
    assert_eq!( engine.transport(), TransportState::Paused );
    assert!( engine.state().current_index().is_none() );
}


// ===== Empty engine =====

#[test]
fn transport_on_empty_engine_is_noop() {
    let mut engine = PlaybackEngine::new( ScriptedSession::default(), MemoryStore::new() );

    engine.next();
    engine.previous();
    engine.toggle_play_pause();
    engine.seek( 0.5 );
    engine.on_progress( 10.0, Some( 20.0 ) );

    assert_eq!( engine.transport(), TransportState::Idle );
    assert!( engine.state().current_index().is_none() );
    assert!( engine.media().loads.is_empty() );
    assert_eq!( engine.store().writes(), 0 );
    assert!( matches!( engine.play( 0 ), Err( EngineError::IndexOutOfRange { index: 0, len: 0 } ) ) );
}


#[test]
fn transport_on_empty_selected_list_is_noop() {
    let mut engine = engine_with_list( 0 );
    engine.dispatch( Transport::Next ).unwrap();
    engine.dispatch( Transport::Previous ).unwrap();
    engine.dispatch( Transport::TogglePlayPause ).unwrap();
    assert_eq!( engine.transport(), TransportState::Idle );
    assert!( engine.media().loads.is_empty() );
}


// ===== Snapshot throttling =====

#[test]
fn continuous_playback_writes_once_per_interval() {
    let mut engine = engine_with_list( 2 );
    engine.play( 0 ).unwrap();
    assert_eq!( engine.store().writes(), 1 );

    // Four updates per second for just over twelve seconds
    for step in 1..=49 {
        engine.media_mut().tick( step as f64 * 0.25 );
        engine.pump();
    }

    // play + crossings of 5 and 10
    assert_eq!( engine.store().writes(), 3 );
    let last = engine.store().snapshot().unwrap();
    assert_eq!( last.current_time, 10.0 );
    assert_eq!( last.song_index, 0 );
}


#[test]
fn repeated_updates_within_a_second_write_once() {
    let mut engine = engine_with_list( 1 );
    engine.play( 0 ).unwrap();

    for t in [ 5.0, 5.1, 5.4, 5.9, 5.95 ] {
        engine.on_progress( t, Some( 180.0 ) );
    }
    assert_eq!( engine.store().writes(), 2 );
}


#[test]
fn skipped_boundaries_write_once_on_arrival() {
    let mut engine = engine_with_list( 1 );
    engine.play( 0 ).unwrap();

    engine.on_progress( 4.9, Some( 180.0 ) );
    engine.on_progress( 10.2, Some( 180.0 ) );
    engine.on_progress( 11.0, Some( 180.0 ) );

    assert_eq!( engine.store().writes(), 2 );
    assert_eq!( engine.store().snapshot().unwrap().current_time, 10.2 );
}


#[test]
fn song_change_always_writes_with_zero_time() {
    let mut engine = engine_with_list( 3 );
    engine.play( 0 ).unwrap();
    engine.on_progress( 7.0, Some( 180.0 ) );
    engine.next();

    let last = engine.store().snapshot().unwrap();
    assert_eq!( last.song_index, 1 );
    assert_eq!( last.current_time, 0.0 );
    assert_eq!( last.playlist_path, "songs/mix.json" );
    assert_eq!( last.cover_img, "covers/mix.png" );

    // Watermark restarts with the new song
    engine.on_progress( 5.0, Some( 180.0 ) );
    assert_eq!( engine.store().writes(), 4 );
}


// ===== Failure containment =====

#[test]
fn storage_failure_does_not_affect_playback() {
    let mut engine = PlaybackEngine::new( ScriptedSession::with_duration( 60.0 ), MemoryStore::unavailable() );
    engine.select_song_list( song_list( "p.json", 2 ), None );

    engine.play( 1 ).unwrap();
    engine.on_progress( 5.0, Some( 60.0 ) );
    engine.next();

    assert_eq!( engine.transport(), TransportState::Playing );
    assert_eq!( engine.state().current_index(), Some( 0 ) );
}


#[test]
fn media_load_failure_leaves_state_unchanged() {
    let mut engine = engine_with_list( 3 );
    engine.media_mut().broken.push( "audio/1.mp3".into() );
    engine.play( 0 ).unwrap();

    assert!( matches!( engine.play( 1 ), Err( EngineError::Media( _ ) ) ) );
    engine.next();

    assert_eq!( engine.state().current_index(), Some( 0 ) );
    assert_eq!( engine.transport(), TransportState::Playing );
    assert_eq!( engine.now_playing().unwrap().title, "Track 0" );
    assert_eq!( engine.media().source.as_deref(), Some( "audio/0.mp3" ) );
    assert_eq!( engine.store().writes(), 1 );
}


#[test]
fn latest_request_wins() {
    let mut engine = engine_with_list( 4 );
    engine.dispatch( Transport::Play( 0 ) ).unwrap();
    engine.dispatch( Transport::Play( 3 ) ).unwrap();
    engine.dispatch( Transport::Next ).unwrap();
    engine.dispatch( Transport::Previous ).unwrap();
    engine.dispatch( Transport::Previous ).unwrap();

    assert_eq!( engine.state().current_index(), Some( 2 ) );
    assert_eq!( engine.media().source.as_deref(), Some( "audio/2.mp3" ) );
}


// ===== Seek =====

#[test]
fn seek_without_known_duration_leaves_position() {
    let mut engine = PlaybackEngine::new( ScriptedSession::default(), MemoryStore::new() );
    engine.select_song_list( song_list( "p.json", 1 ), None );
    engine.play( 0 ).unwrap();
    engine.media_mut().position = 8.0;

    engine.dispatch( Transport::Seek( 0.5 ) ).unwrap();
    assert_eq!( engine.media().position, 8.0 );
}


// ===== Persistence across restarts =====

#[test]
fn position_survives_restart_through_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join( "player-state.json" );
    let loader = loader_with_list( "songs/mix.json", 3 );

    {
        let mut engine = PlaybackEngine::new( ScriptedSession::with_duration( 180.0 ), FileStore::new( &path ) );
        engine.select_song_list( song_list( "songs/mix.json", 3 ), Some( "covers/mix.png".into() ) );
        engine.play( 1 ).unwrap();
        engine.media_mut().tick( 6.0 );
        engine.media_mut().tick( 12.5 );
        engine.pump();
        engine.checkpoint();
    }

    let saved = FileStore::new( &path ).load().unwrap().unwrap();
    assert_eq!( saved.current_time, 12.5 );

    let mut engine = PlaybackEngine::new( ScriptedSession::with_duration( 180.0 ), FileStore::new( &path ) );
    assert!( engine.resume( &loader ) );
    assert_eq!( engine.state().current_index(), Some( 1 ) );
    assert_eq!( engine.media().position, 12.5 );
    assert_eq!( engine.now_playing().unwrap().cover_ref, "covers/mix.png" );
    assert_eq!( engine.transport(), TransportState::Paused );
}
