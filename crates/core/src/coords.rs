//! Chunk grid coordinates.
//!
//! The world is a grid of cubic chunks, `CHUNK_SIZE` voxels per axis. Chunks
//! are in turn grouped into super-chunks of `SCH_SIZE` chunks per axis, which
//! is the unit the server summarizes metadata in.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Voxels per chunk axis.
pub const CHUNK_SIZE: usize = 32;
/// Voxels per chunk.
pub const CHUNK_VOLUME: usize = CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE;
/// Chunks per super-chunk axis.
pub const SCH_SIZE: i32 = 10;
/// Chunks per super-chunk.
pub const SCH_VOLUME: usize = (SCH_SIZE * SCH_SIZE * SCH_SIZE) as usize;

/// Round `value` down to the nearest multiple of `SCH_SIZE`.
///
/// Rounds toward negative infinity, so `-1` lands on `-SCH_SIZE`. The few
/// values below the lowest representable multiple share that multiple's
/// super-chunk.
#[inline]
pub const fn truncate_to_super_chunk(value: i32) -> i32 {
    let size = SCH_SIZE as i64;
    let floor = (value as i64).div_euclid(size) * size;
    if floor < i32::MIN as i64 {
        (floor + size) as i32
    } else {
        floor as i32
    }
}

/// One of the six faces of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Face {
    /// Towards decreasing x.
    NegX,
    /// Towards increasing x.
    PosX,
    /// Towards decreasing y.
    NegY,
    /// Towards increasing y.
    PosY,
    /// Towards decreasing z.
    NegZ,
    /// Towards increasing z.
    PosZ,
}

impl Face {
    /// Unit offset of the chunk across this face.
    pub const fn offset(self) -> (i32, i32, i32) {
        match self {
            Face::NegX => (-1, 0, 0),
            Face::PosX => (1, 0, 0),
            Face::NegY => (0, -1, 0),
            Face::PosY => (0, 1, 0),
            Face::NegZ => (0, 0, -1),
            Face::PosZ => (0, 0, 1),
        }
    }
}

/// Chunk coordinate in chunk space.
///
/// Implements Ord so containers keyed by it iterate deterministically.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ChunkCoord {
    /// Chunk index along x.
    pub x: i32,
    /// Chunk index along y.
    pub y: i32,
    /// Chunk index along z.
    pub z: i32,
}

impl ChunkCoord {
    /// Construct from chunk indices.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Chunk containing the world voxel at `(x, y, z)`.
    pub const fn from_block(x: i32, y: i32, z: i32) -> Self {
        let size = CHUNK_SIZE as i32;
        Self {
            x: x.div_euclid(size),
            y: y.div_euclid(size),
            z: z.div_euclid(size),
        }
    }

    /// Coordinate displaced by a number of chunks per axis.
    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x.wrapping_add(dx),
            y: self.y.wrapping_add(dy),
            z: self.z.wrapping_add(dz),
        }
    }

    /// Chunk sharing `face` with this one.
    pub const fn neighbor(self, face: Face) -> Self {
        let (dx, dy, dz) = face.offset();
        self.offset(dx, dy, dz)
    }

    /// Rebuild a coordinate from the low byte of each axis.
    ///
    /// The server sends only the low 8 bits of coordinates close to one the
    /// client already knows. Each axis of `self` has its low byte replaced and
    /// is then moved by 256 to whichever representative lies nearest to the
    /// reference. Exact for targets within 127 chunks of the reference.
    pub const fn update_lsb(self, x_lsb: u8, y_lsb: u8, z_lsb: u8) -> Self {
        Self {
            x: update_axis_lsb(self.x, x_lsb),
            y: update_axis_lsb(self.y, y_lsb),
            z: update_axis_lsb(self.z, z_lsb),
        }
    }

    /// Low byte of each axis, the inverse of [`ChunkCoord::update_lsb`].
    pub const fn lsb(self) -> (u8, u8, u8) {
        (self.x as u8, self.y as u8, self.z as u8)
    }

    /// Origin of the super-chunk containing this chunk.
    pub const fn super_chunk_origin(self) -> Self {
        Self {
            x: truncate_to_super_chunk(self.x),
            y: truncate_to_super_chunk(self.y),
            z: truncate_to_super_chunk(self.z),
        }
    }

    /// Index of this chunk inside its super-chunk's entry table.
    pub const fn super_chunk_index(self) -> usize {
        let dx = self.x.rem_euclid(SCH_SIZE) as usize;
        let dy = self.y.rem_euclid(SCH_SIZE) as usize;
        let dz = self.z.rem_euclid(SCH_SIZE) as usize;
        let size = SCH_SIZE as usize;
        (dx * size + dy) * size + dz
    }
}

const fn update_axis_lsb(reference: i32, lsb: u8) -> i32 {
    let mut value = (reference & !0xFF) | lsb as i32;
    let diff = reference as i64 - value as i64;
    if diff > 127 {
        value = value.wrapping_add(256);
    } else if diff < -127 {
        value = value.wrapping_sub(256);
    }
    value
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Voxel position inside a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalPos {
    /// Voxel x inside the chunk.
    pub x: u8,
    /// Voxel y inside the chunk.
    pub y: u8,
    /// Voxel z inside the chunk.
    pub z: u8,
}

impl LocalPos {
    /// Local position, or `None` when any axis is outside the chunk.
    pub fn new(x: u8, y: u8, z: u8) -> Option<Self> {
        let limit = CHUNK_SIZE as u8;
        (x < limit && y < limit && z < limit).then_some(Self { x, y, z })
    }

    /// Position of the voxel at dense array `index`.
    pub fn from_index(index: usize) -> Option<Self> {
        if index >= CHUNK_VOLUME {
            return None;
        }
        Some(Self {
            x: (index / (CHUNK_SIZE * CHUNK_SIZE)) as u8,
            y: (index / CHUNK_SIZE % CHUNK_SIZE) as u8,
            z: (index % CHUNK_SIZE) as u8,
        })
    }

    /// Linear index into the dense voxel array.
    #[inline]
    pub fn index(self) -> usize {
        debug_assert!((self.x as usize) < CHUNK_SIZE);
        debug_assert!((self.y as usize) < CHUNK_SIZE);
        debug_assert!((self.z as usize) < CHUNK_SIZE);
        (self.x as usize * CHUNK_SIZE + self.y as usize) * CHUNK_SIZE + self.z as usize
    }

    /// Faces of the chunk this voxel touches. Interior voxels touch none.
    pub fn boundary_faces(self) -> impl Iterator<Item = Face> {
        const LAST: u8 = CHUNK_SIZE as u8 - 1;
        let axis = |v: u8, neg: Face, pos: Face| match v {
            0 => Some(neg),
            LAST => Some(pos),
            _ => None,
        };
        [
            axis(self.x, Face::NegX, Face::PosX),
            axis(self.y, Face::NegY, Face::PosY),
            axis(self.z, Face::NegZ, Face::PosZ),
        ]
        .into_iter()
        .flatten()
    }
}

impl fmt::Display for LocalPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.x, self.y, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_rounds_toward_negative_infinity() {
        assert_eq!(truncate_to_super_chunk(-1), -SCH_SIZE);
        assert_eq!(truncate_to_super_chunk(0), 0);
        assert_eq!(truncate_to_super_chunk(SCH_SIZE - 1), 0);
        assert_eq!(truncate_to_super_chunk(SCH_SIZE), SCH_SIZE);
        assert_eq!(truncate_to_super_chunk(-SCH_SIZE - 1), -2 * SCH_SIZE);
    }

    #[test]
    fn truncation_concrete_values() {
        assert_eq!(truncate_to_super_chunk(-1), -10);
        assert_eq!(truncate_to_super_chunk(9), 0);
        assert_eq!(truncate_to_super_chunk(10), 10);
        assert_eq!(truncate_to_super_chunk(-11), -20);
    }

    #[test]
    fn truncation_at_i32_limits() {
        assert_eq!(truncate_to_super_chunk(i32::MIN), -2_147_483_640);
        assert_eq!(truncate_to_super_chunk(i32::MIN + 7), -2_147_483_640);
        assert_eq!(truncate_to_super_chunk(i32::MIN + 8), -2_147_483_640);
        assert_eq!(truncate_to_super_chunk(i32::MAX), 2_147_483_640);

        let edge = ChunkCoord::new(i32::MIN, i32::MAX, 0);
        assert!(edge.super_chunk_index() < SCH_VOLUME);
        assert_eq!(edge.super_chunk_origin().super_chunk_origin(), edge.super_chunk_origin());
    }

    #[test]
    fn super_chunk_index_covers_table() {
        let origin = ChunkCoord::new(-10, 0, 20);
        assert_eq!(origin.super_chunk_index(), 0);
        let last = origin.offset(SCH_SIZE - 1, SCH_SIZE - 1, SCH_SIZE - 1);
        assert_eq!(last.super_chunk_origin(), origin);
        assert_eq!(last.super_chunk_index(), SCH_VOLUME - 1);
    }

    #[test]
    fn update_lsb_same_window() {
        let reference = ChunkCoord::new(300, 5, -2);
        let target = ChunkCoord::new(310, 1, -7);
        let (x, y, z) = target.lsb();
        assert_eq!(reference.update_lsb(x, y, z), target);
    }

    #[test]
    fn update_lsb_crosses_byte_boundary() {
        let reference = ChunkCoord::new(250, -250, 0);
        let target = ChunkCoord::new(260, -260, -3);
        let (x, y, z) = target.lsb();
        assert_eq!(reference.update_lsb(x, y, z), target);

        let reference = ChunkCoord::new(260, -260, -3);
        let target = ChunkCoord::new(250, -250, 2);
        let (x, y, z) = target.lsb();
        assert_eq!(reference.update_lsb(x, y, z), target);
    }

    #[test]
    fn from_block_uses_floor_division() {
        assert_eq!(ChunkCoord::from_block(0, 31, 32), ChunkCoord::new(0, 0, 1));
        assert_eq!(ChunkCoord::from_block(-1, -32, -33), ChunkCoord::new(-1, -1, -2));
    }

    #[test]
    fn local_pos_rejects_out_of_range() {
        assert!(LocalPos::new(0, 0, 0).is_some());
        assert!(LocalPos::new(31, 31, 31).is_some());
        assert!(LocalPos::new(32, 0, 0).is_none());
    }

    #[test]
    fn local_pos_index_roundtrip() {
        let pos = LocalPos::new(3, 17, 30).unwrap();
        assert_eq!(LocalPos::from_index(pos.index()), Some(pos));
        assert_eq!(LocalPos::from_index(CHUNK_VOLUME), None);
    }

    #[test]
    fn boundary_faces_for_corner_and_interior() {
        let interior = LocalPos::new(5, 6, 7).unwrap();
        assert_eq!(interior.boundary_faces().count(), 0);

        let corner = LocalPos::new(0, 31, 4).unwrap();
        let faces: Vec<_> = corner.boundary_faces().collect();
        assert_eq!(faces, vec![Face::NegX, Face::PosY]);
    }

    #[test]
    fn chunk_coord_display() {
        assert_eq!(ChunkCoord::new(2, 3, -1).to_string(), "(2, 3, -1)");
    }
}
