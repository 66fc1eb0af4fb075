//! Block type codes and the static property catalog.
//!
//! Block ids are the same bytes on the wire and in memory. Bytes without a
//! named constant are carried through untouched and classify as opaque.

/// Block type code.
pub type BlockId = u8;

/// Empty space.
pub const BLOCK_AIR: BlockId = 0;
/// Water.
pub const BLOCK_WATER: BlockId = 1;
/// Soil.
pub const BLOCK_SOIL: BlockId = 2;
/// Stone.
pub const BLOCK_STONE: BlockId = 3;
/// Brick.
pub const BLOCK_BRICK: BlockId = 4;
/// Sand.
pub const BLOCK_SAND: BlockId = 5;
/// Wood planks.
pub const BLOCK_WOOD: BlockId = 6;
/// Glass.
pub const BLOCK_GLASS: BlockId = 7;
/// Light emitting lamp.
pub const BLOCK_LAMP: BlockId = 8;
/// Sign carrying an activator text message.
pub const BLOCK_TEXT: BlockId = 9;
/// Invisible trigger volume.
pub const BLOCK_TRIGGER: BlockId = 10;
/// Invisible link between activators.
pub const BLOCK_LINK: BlockId = 11;
/// Teleport marker.
pub const BLOCK_TELEPORT: BlockId = 12;
/// Ladder.
pub const BLOCK_LADDER: BlockId = 13;
/// Tree foliage.
pub const BLOCK_TREE: BlockId = 14;
/// Cosmetic variant of stone, never sent by the server.
pub const BLOCK_STONE_VARIANT: BlockId = 15;
/// Grass covered soil.
pub const BLOCK_TOP_SOIL: BlockId = 16;
/// Hedge.
pub const BLOCK_HEDGE: BlockId = 17;
/// Window.
pub const BLOCK_WINDOW: BlockId = 18;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    /// Classification bits for a block type.
    pub struct BlockFlags: u8 {
        /// Neighbouring faces stay visible through this block.
        const SEMI_TRANSPARENT = 0b0000_0001;
        /// Nothing is drawn for this block.
        const FULLY_TRANSPARENT = 0b0000_0010;
        /// Collides with players and monsters.
        const RIGID = 0b0000_0100;
        /// Players may add or remove it in construction mode.
        const PLASTIC = 0b0000_1000;
    }
}

const TRANSPARENT: BlockFlags = BlockFlags::SEMI_TRANSPARENT.union(BlockFlags::FULLY_TRANSPARENT);
const BUILDING: BlockFlags = BlockFlags::RIGID.union(BlockFlags::PLASTIC);

/// Declarative block property list the catalog is built from.
const BLOCK_PROPERTIES: &[(BlockId, BlockFlags)] = &[
    (BLOCK_AIR, TRANSPARENT),
    (BLOCK_WATER, BlockFlags::SEMI_TRANSPARENT),
    (BLOCK_SOIL, BUILDING),
    (BLOCK_STONE, BUILDING),
    (BLOCK_BRICK, BUILDING),
    (BLOCK_SAND, BUILDING),
    (BLOCK_WOOD, BUILDING),
    (BLOCK_GLASS, BUILDING.union(BlockFlags::SEMI_TRANSPARENT)),
    (BLOCK_LAMP, BUILDING),
    (BLOCK_TEXT, BlockFlags::SEMI_TRANSPARENT.union(BlockFlags::PLASTIC)),
    (BLOCK_TRIGGER, TRANSPARENT.union(BlockFlags::PLASTIC)),
    (BLOCK_LINK, TRANSPARENT.union(BlockFlags::PLASTIC)),
    (BLOCK_TELEPORT, BlockFlags::SEMI_TRANSPARENT),
    (BLOCK_LADDER, BlockFlags::SEMI_TRANSPARENT.union(BlockFlags::PLASTIC)),
    (BLOCK_TREE, BUILDING.union(BlockFlags::SEMI_TRANSPARENT)),
    (BLOCK_STONE_VARIANT, BUILDING),
    (BLOCK_TOP_SOIL, BUILDING),
    (BLOCK_HEDGE, BUILDING.union(BlockFlags::SEMI_TRANSPARENT)),
    (BLOCK_WINDOW, BUILDING.union(BlockFlags::SEMI_TRANSPARENT)),
];

/// Immutable 256-entry lookup table of block properties.
///
/// Built once and shared by reference with everything that classifies blocks.
#[derive(Debug, Clone)]
pub struct BlockCatalog {
    flags: [BlockFlags; 256],
}

impl BlockCatalog {
    /// Build the catalog from the built-in property list.
    pub fn new() -> Self {
        Self::from_properties(BLOCK_PROPERTIES)
    }

    /// Build a catalog from an explicit `(block, flags)` list.
    ///
    /// Later entries for the same block replace earlier ones.
    pub fn from_properties(properties: &[(BlockId, BlockFlags)]) -> Self {
        let mut flags = [BlockFlags::empty(); 256];
        for &(block, bits) in properties {
            flags[block as usize] = bits;
        }
        Self { flags }
    }

    /// Property bits of `block`.
    #[inline]
    pub fn flags(&self, block: BlockId) -> BlockFlags {
        self.flags[block as usize]
    }

    /// True for blocks that leave neighbouring faces visible.
    #[inline]
    pub fn is_semi_transparent(&self, block: BlockId) -> bool {
        self.flags(block).contains(BlockFlags::SEMI_TRANSPARENT)
    }

    /// True for blocks that are not drawn at all.
    #[inline]
    pub fn is_fully_transparent(&self, block: BlockId) -> bool {
        self.flags(block).contains(BlockFlags::FULLY_TRANSPARENT)
    }

    /// True for blocks that collide.
    #[inline]
    pub fn is_rigid(&self, block: BlockId) -> bool {
        self.flags(block).contains(BlockFlags::RIGID)
    }

    /// True for blocks players can build with.
    #[inline]
    pub fn is_plastic(&self, block: BlockId) -> bool {
        self.flags(block).contains(BlockFlags::PLASTIC)
    }
}

impl Default for BlockCatalog {
    fn default() -> Self {
        Self::new()
    }
}
