//! # skein-layout — Passage placement for the story map
//!
//! Resolves spatial collisions between passage rectangles and snaps
//! positions to an optional grid. Pure geometry: no knowledge of
//! stories, passages, or the wire protocol — callers hand in rectangles
//! and get rectangles back.
//!
//! ```text
//! candidate rect ──► resolve_position ──► displaced + snapped rect
//!                        │
//!                        └── displace()   axis-of-minimum-overlap push
//!                        └── snap_to_grid()  round to grid multiples
//! ```
//!
//! Determinism matters here: every replica runs the same resolution for
//! the same passage ordering and candidate rect, so the story map stays
//! visually identical across clients without transmitting positions
//! twice.

mod rect;
mod resolve;

pub use rect::Rect;
pub use resolve::{
    displace, linked_positions, resolve_position, snap_to_grid, LayoutError,
    DISPLACEMENT_SPACING, LINK_GUTTER, PASSAGE_UNIT,
};
