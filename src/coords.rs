use crate::cell::CellId;
use crate::math::{Point2, Vector2};
use crate::universe::UniverseId;

/// One level of a point's position in the universe hierarchy.
///
/// A `Universe` frame holds the point in that universe's coordinate system
/// and, once located, the cell resolved at that level. A `Lattice` frame
/// additionally pins the lattice cell indices the point falls in.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Universe {
        universe: UniverseId,
        point: Point2,
        cell: Option<CellId>,
    },
    Lattice {
        lattice: UniverseId,
        point: Point2,
        i: usize,
        j: usize,
    },
}

impl Frame {
    #[must_use]
    pub fn point(&self) -> &Point2 {
        match self {
            Frame::Universe { point, .. } | Frame::Lattice { point, .. } => point,
        }
    }

    /// Id of the universe this frame's coordinates are expressed in. For a
    /// lattice frame this is the lattice's own universe id.
    #[must_use]
    pub fn universe(&self) -> UniverseId {
        match self {
            Frame::Universe { universe, .. } => *universe,
            Frame::Lattice { lattice, .. } => *lattice,
        }
    }

    #[must_use]
    pub fn is_lattice(&self) -> bool {
        matches!(self, Frame::Lattice { .. })
    }

    fn translate(&mut self, delta: &Vector2) {
        match self {
            Frame::Universe { point, .. } | Frame::Lattice { point, .. } => {
                point.x += delta.x;
                point.y += delta.y;
            }
        }
    }
}

/// Chain of per-level coordinate frames, head first.
///
/// The head frame is always expressed in the root universe's coordinate
/// system; each following frame descends one universe level. The chain is
/// never empty. Frames hold translations only (lattice tilings are
/// axis-aligned), so moving the whole chain is a uniform shift of every
/// level by the same world vector.
#[derive(Debug, Clone)]
pub struct LocalCoords {
    frames: Vec<Frame>,
}

impl LocalCoords {
    /// Creates a chain with a single head frame at `(x, y)` in `universe`.
    #[must_use]
    pub fn new(universe: UniverseId, x: f64, y: f64) -> Self {
        Self {
            frames: vec![Frame::Universe {
                universe,
                point: Point2::new(x, y),
                cell: None,
            }],
        }
    }

    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub fn head(&self) -> &Frame {
        &self.frames[0]
    }

    /// The tail of the chain: the most deeply nested frame.
    #[must_use]
    pub fn lowest_level(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    pub fn lowest_level_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub fn frame_mut(&mut self, level: usize) -> &mut Frame {
        &mut self.frames[level]
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Destroys every frame below `level`, making it the new tail.
    pub fn prune_below(&mut self, level: usize) {
        self.frames.truncate(level + 1);
    }

    /// Collapses the chain back to its head frame, clearing any resolved
    /// cell so the next descent starts fresh.
    pub fn prune_to_head(&mut self) {
        self.frames.truncate(1);
        let universe = self.frames[0].universe();
        let point = *self.frames[0].point();
        self.frames[0] = Frame::Universe {
            universe,
            point,
            cell: None,
        };
    }

    /// Translates every frame in the chain by the same world vector.
    pub fn adjust_coords(&mut self, delta: &Vector2) {
        for frame in &mut self.frames {
            frame.translate(delta);
        }
    }

    /// Moves the tail to `point` (in the tail's frame) and shifts every
    /// ancestor by the same delta, keeping the chain consistent without
    /// recomputing local coordinates level by level.
    pub fn update_most_local(&mut self, point: &Point2) {
        let tail = self.lowest_level().point();
        let delta = Vector2::new(point.x - tail.x, point.y - tail.y);
        self.adjust_coords(&delta);
    }

    /// Deep-copies this chain into `other`.
    pub fn copy_coords(&self, other: &mut LocalCoords) {
        other.frames.clone_from(&self.frames);
    }
}
