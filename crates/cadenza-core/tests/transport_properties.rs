//! Property tests for list navigation and seeking.

mod common;

use proptest::prelude::*;

use cadenza_core::Transport;

use common::engine_with_list;


proptest! {
    #[test]
    fn next_stays_in_range_and_cycles( len in 1usize..12, start in 0usize..12, steps in 0usize..40 ) {
        let start = start % len;
        let mut engine = engine_with_list( len );
        engine.play( start ).unwrap();

        for _ in 0..steps {
            engine.next();
            let index = engine.state().current_index().unwrap();
            prop_assert!( index < len );
        }
        prop_assert_eq!( engine.state().current_index(), Some( ( start + steps ) % len ) );

        for _ in 0..( len - steps % len ) % len {
            engine.next();
        }
        prop_assert_eq!( engine.state().current_index(), Some( start ) );
    }


    #[test]
    fn previous_undoes_next( len in 1usize..12, start in 0usize..12 ) {
        let start = start % len;
        let mut engine = engine_with_list( len );
        engine.play( start ).unwrap();

        engine.next();
        engine.previous();
        prop_assert_eq!( engine.state().current_index(), Some( start ) );

        engine.previous();
        engine.next();
        prop_assert_eq!( engine.state().current_index(), Some( start ) );
    }


    #[test]
    fn seek_lands_at_fraction_of_duration( fraction in 0.0f64..=1.0 ) {
        let mut engine = engine_with_list( 1 );
        engine.play( 0 ).unwrap();

        engine.dispatch( Transport::Seek( fraction ) ).unwrap();
        let expected = fraction * 180.0;
        prop_assert!( ( engine.media().position - expected ).abs() < 1e-9 );
        prop_assert!( ( engine.state().elapsed_seconds() - expected ).abs() < 1e-9 );
    }


    #[test]
    fn progress_writes_at_most_once_per_interval( times in prop::collection::vec( 0.0f64..60.0, 1..80 ) ) {
        let mut sorted = times;
        sorted.sort_by( |a, b| a.total_cmp( b ) );

        let mut engine = engine_with_list( 1 );
        engine.play( 0 ).unwrap();
        for t in &sorted {
            engine.on_progress( *t, Some( 180.0 ) );
        }

        // One write per distinct non-zero interval reached, plus the one from play
        let mut intervals: Vec<u64> = sorted.iter()
            .map( |t| ( t.floor() as u64 ) / 5 )
            .filter( |i| *i > 0 )
            .collect();
        intervals.dedup();
        prop_assert_eq!( engine.store().writes(), intervals.len() + 1 );
    }
}
