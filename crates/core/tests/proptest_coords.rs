//! Property-based tests for chunk coordinate reconstruction
//!
//! Critical invariants:
//! - A coordinate rebuilt from its low bytes matches the original whenever it
//!   lies within 127 chunks of the reference, negative axes included
//! - Super-chunk truncation floors toward negative infinity

use proptest::prelude::*;
use voxsync_core::{truncate_to_super_chunk, ChunkCoord, SCH_SIZE, SCH_VOLUME};

proptest! {
    /// Property: LSB reconstruction recovers any target near the reference
    #[test]
    fn update_lsb_recovers_nearby_target(
        rx in -100_000i32..100_000,
        ry in -100_000i32..100_000,
        rz in -100_000i32..100_000,
        dx in -127i32..=127,
        dy in -127i32..=127,
        dz in -127i32..=127,
    ) {
        let reference = ChunkCoord::new(rx, ry, rz);
        let target = reference.offset(dx, dy, dz);
        let (x, y, z) = target.lsb();

        prop_assert_eq!(reference.update_lsb(x, y, z), target);
    }

    /// Property: Reconstruction never moves further than 128 chunks from the reference
    #[test]
    fn update_lsb_stays_near_reference(
        rx in any::<i16>(),
        lsb in any::<u8>(),
    ) {
        let reference = ChunkCoord::new(rx as i32, 0, 0);
        let rebuilt = reference.update_lsb(lsb, 0, 0);

        prop_assert!((rebuilt.x - reference.x).abs() <= 128);
        prop_assert_eq!(rebuilt.x as u8, lsb);
    }

    /// Property: Truncation yields the aligned origin below or at the value
    #[test]
    fn truncation_is_floor(value in -1_000_000i32..1_000_000) {
        let origin = truncate_to_super_chunk(value);

        prop_assert_eq!(origin.rem_euclid(SCH_SIZE), 0);
        prop_assert!(origin <= value);
        prop_assert!(value - origin < SCH_SIZE);
    }

    /// Property: Every chunk maps to a valid slot of its super-chunk
    #[test]
    fn super_chunk_index_in_range(
        x in -10_000i32..10_000,
        y in -10_000i32..10_000,
        z in -10_000i32..10_000,
    ) {
        let coord = ChunkCoord::new(x, y, z);
        prop_assert!(coord.super_chunk_index() < SCH_VOLUME);
    }

    /// Property: Truncation and table lookup are total over every chunk coordinate
    #[test]
    fn super_chunk_math_total_over_i32(
        x in any::<i32>(),
        y in any::<i32>(),
        z in any::<i32>(),
    ) {
        let coord = ChunkCoord::new(x, y, z);
        let origin = coord.super_chunk_origin();

        prop_assert!(coord.super_chunk_index() < SCH_VOLUME);
        prop_assert_eq!(origin.super_chunk_origin(), origin);
        prop_assert_eq!(origin.x.rem_euclid(SCH_SIZE), 0);
        prop_assert!(origin.x <= x || x < i32::MIN + SCH_SIZE);
        prop_assert!((x as i64 - origin.x as i64).abs() < SCH_SIZE as i64);
    }
}
