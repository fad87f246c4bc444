//! Pictures as held by the picture manager, and their motion fields.

use std::fmt;
use std::sync::Arc;

use transcode_core::{ChromaFormat, ImageBuffer};

use crate::error::{EvcError, Result};
use crate::nal::SliceType;
use crate::{LOG2_SCU, REFI_INVALID};

/// List 0 index.
pub const LIST_0: usize = 0;
/// List 1 index.
pub const LIST_1: usize = 1;

/// Motion vector in quarter-sample luma units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Mv {
    /// Horizontal component.
    pub x: i16,
    /// Vertical component.
    pub y: i16,
}

impl Mv {
    /// Zero vector.
    pub const ZERO: Mv = Mv { x: 0, y: 0 };

    /// Create a vector.
    pub const fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }

    /// Component-wise sum, saturating at the i16 range.
    pub fn add(self, other: Mv) -> Mv {
        Mv::new(self.x.saturating_add(other.x), self.y.saturating_add(other.y))
    }

    /// Component-wise difference, saturating at the i16 range.
    pub fn sub(self, other: Mv) -> Mv {
        Mv::new(self.x.saturating_sub(other.x), self.y.saturating_sub(other.y))
    }
}

impl fmt::Display for Mv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Per-4x4 motion of a coded picture, kept for collocated prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionField {
    /// Width in 4x4 units.
    pub w_scu: usize,
    /// Height in 4x4 units.
    pub h_scu: usize,
    mv: Vec<[Mv; 2]>,
    refi: Vec<[i8; 2]>,
}

impl MotionField {
    /// Create an empty field for a picture of the given luma size.
    pub fn new(width: usize, height: usize) -> Self {
        let w_scu = (width + (1 << LOG2_SCU) - 1) >> LOG2_SCU;
        let h_scu = (height + (1 << LOG2_SCU) - 1) >> LOG2_SCU;
        Self {
            w_scu,
            h_scu,
            mv: vec![[Mv::ZERO; 2]; w_scu * h_scu],
            refi: vec![[REFI_INVALID; 2]; w_scu * h_scu],
        }
    }

    /// Get the motion vectors of a 4x4 block.
    pub fn mv(&self, scup: usize) -> [Mv; 2] {
        self.mv[scup]
    }

    /// Get the reference indices of a 4x4 block.
    pub fn refi(&self, scup: usize) -> [i8; 2] {
        self.refi[scup]
    }

    /// Store the motion of a 4x4 block.
    pub fn set(&mut self, scup: usize, mv: [Mv; 2], refi: [i8; 2]) {
        self.mv[scup] = mv;
        self.refi[scup] = refi;
    }

    /// Reset every block to "no motion".
    pub fn clear(&mut self) {
        self.mv.fill([Mv::ZERO; 2]);
        self.refi.fill([REFI_INVALID; 2]);
    }
}

/// Geometry and format of the pictures handed out by an allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureLayout {
    /// Luma width.
    pub width: usize,
    /// Luma height.
    pub height: usize,
    /// Chroma format.
    pub chroma_format: ChromaFormat,
    /// Sample bit depth.
    pub bit_depth: u8,
}

/// Source of picture sample buffers for the picture manager.
pub trait PictureAllocator: Send {
    /// Allocate a picture buffer with the given layout.
    fn allocate(&mut self, layout: &PictureLayout) -> Result<ImageBuffer>;
}

/// Heap allocator for planar buffers with an optional allocation budget.
#[derive(Debug, Clone, Default)]
pub struct PlanarAllocator {
    limit: Option<usize>,
    allocated: usize,
}

impl PlanarAllocator {
    /// Create an allocator without a budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an allocator that fails after `limit` buffers.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            allocated: 0,
        }
    }

    /// Number of buffers allocated so far.
    pub fn allocated(&self) -> usize {
        self.allocated
    }
}

impl PictureAllocator for PlanarAllocator {
    fn allocate(&mut self, layout: &PictureLayout) -> Result<ImageBuffer> {
        if self.limit.is_some_and(|limit| self.allocated >= limit) {
            return Err(EvcError::OutOfMemory(format!(
                "picture budget of {} buffers spent",
                self.allocated
            )));
        }
        let mid = 1u16 << (layout.bit_depth - 1);
        let image = ImageBuffer::try_filled(
            layout.width,
            layout.height,
            layout.chroma_format,
            layout.bit_depth,
            mid,
        )
        .map_err(|e| EvcError::OutOfMemory(e.to_string()))?;
        self.allocated += 1;
        Ok(image)
    }
}

/// A picture slot of the picture manager.
#[derive(Debug, Clone)]
pub struct Picture {
    pub(crate) id: u64,
    /// Reconstructed samples.
    pub image: Arc<ImageBuffer>,
    /// Motion of every 4x4 block.
    pub motion: Arc<MotionField>,
    /// Picture order count.
    pub poc: i32,
    /// Temporal layer id.
    pub temporal_id: u8,
    /// Slice type the picture was coded with.
    pub slice_type: SliceType,
    /// POCs of the list-0 references used when coding this picture.
    pub list_poc: Arc<[i32]>,
    pub(crate) is_ref: bool,
    pub(crate) need_for_out: bool,
    pub(crate) epoch: u32,
}

impl Picture {
    pub(crate) fn new(id: u64, image: ImageBuffer, motion: MotionField) -> Self {
        Self {
            id,
            image: Arc::new(image),
            motion: Arc::new(motion),
            poc: 0,
            temporal_id: 0,
            slice_type: SliceType::I,
            list_poc: Arc::from(Vec::<i32>::new()),
            is_ref: false,
            need_for_out: false,
            epoch: 0,
        }
    }

    /// Check whether the picture is marked as used for reference.
    pub fn is_ref(&self) -> bool {
        self.is_ref
    }

    /// Check whether the picture is waiting for output.
    pub fn need_for_out(&self) -> bool {
        self.need_for_out
    }

    /// Get mutable access to the samples and motion of a leased picture.
    ///
    /// Fails if another owner still shares either buffer.
    pub fn buffers_mut(&mut self) -> Result<(&mut ImageBuffer, &mut MotionField)> {
        let image = Arc::get_mut(&mut self.image)
            .ok_or_else(|| EvcError::LeaseViolation("picture samples are shared".into()))?;
        let motion = Arc::get_mut(&mut self.motion)
            .ok_or_else(|| EvcError::LeaseViolation("motion field is shared".into()))?;
        Ok((image, motion))
    }

    /// Check whether the sample buffer is held only by this slot.
    pub(crate) fn is_exclusive(&self) -> bool {
        Arc::strong_count(&self.image) == 1
    }
}

/// A reference picture as seen by prediction.
#[derive(Debug, Clone)]
pub struct RefPic {
    /// Picture order count.
    pub poc: i32,
    /// Temporal layer id.
    pub temporal_id: u8,
    /// Reconstructed samples.
    pub image: Arc<ImageBuffer>,
    /// Stored motion.
    pub motion: Arc<MotionField>,
    /// List-0 POCs the picture itself referenced.
    pub list_poc: Arc<[i32]>,
}

impl RefPic {
    pub(crate) fn from_picture(pic: &Picture) -> Self {
        Self {
            poc: pic.poc,
            temporal_id: pic.temporal_id,
            image: Arc::clone(&pic.image),
            motion: Arc::clone(&pic.motion),
            list_poc: Arc::clone(&pic.list_poc),
        }
    }
}

/// Reference picture lists of the current slice.
#[derive(Debug, Clone, Default)]
pub struct RefLists {
    lists: [Vec<RefPic>; 2],
}

impl RefLists {
    /// Create lists from their entries.
    pub fn new(l0: Vec<RefPic>, l1: Vec<RefPic>) -> Self {
        Self { lists: [l0, l1] }
    }

    /// Get a list.
    pub fn list(&self, lidx: usize) -> &[RefPic] {
        &self.lists[lidx]
    }

    /// Get one reference.
    pub fn get(&self, lidx: usize, refi: i8) -> Option<&RefPic> {
        if refi < 0 {
            return None;
        }
        self.lists[lidx].get(refi as usize)
    }

    /// Number of entries in a list.
    pub fn len(&self, lidx: usize) -> usize {
        self.lists[lidx].len()
    }

    /// Check whether both lists are empty.
    pub fn is_empty(&self) -> bool {
        self.lists.iter().all(Vec::is_empty)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        for list in &mut self.lists {
            list.clear();
        }
    }

    /// POCs of a list, in order.
    pub fn pocs(&self, lidx: usize) -> Vec<i32> {
        self.lists[lidx].iter().map(|r| r.poc).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> PictureLayout {
        PictureLayout {
            width: 16,
            height: 8,
            chroma_format: ChromaFormat::Yuv420,
            bit_depth: 10,
        }
    }

    #[test]
    fn test_allocator_budget() {
        let mut alloc = PlanarAllocator::with_limit(1);
        let image = alloc.allocate(&layout()).unwrap();
        assert_eq!(image.plane(0).get(0, 0), 512);
        assert!(matches!(
            alloc.allocate(&layout()),
            Err(EvcError::OutOfMemory(_))
        ));
    }

    #[test]
    fn test_allocator_reports_oversized_layout() {
        let mut alloc = PlanarAllocator::new();
        let huge = PictureLayout {
            width: 1 << 31,
            height: 1 << 31,
            chroma_format: ChromaFormat::Yuv400,
            bit_depth: 8,
        };
        assert!(matches!(
            alloc.allocate(&huge),
            Err(EvcError::OutOfMemory(_))
        ));
        assert_eq!(alloc.allocated(), 0);
    }

    #[test]
    fn test_motion_field() {
        let mut field = MotionField::new(18, 8);
        assert_eq!((field.w_scu, field.h_scu), (5, 2));
        assert_eq!(field.refi(3), [REFI_INVALID; 2]);
        field.set(3, [Mv::new(4, -8), Mv::ZERO], [0, REFI_INVALID]);
        assert_eq!(field.mv(3)[0], Mv::new(4, -8));
        field.clear();
        assert_eq!(field.mv(3)[0], Mv::ZERO);
    }

    #[test]
    fn test_buffers_mut_requires_exclusive() {
        let mut alloc = PlanarAllocator::new();
        let image = alloc.allocate(&layout()).unwrap();
        let mut pic = Picture::new(1, image, MotionField::new(16, 8));
        assert!(pic.buffers_mut().is_ok());

        let shared = RefPic::from_picture(&pic);
        assert!(!pic.is_exclusive());
        assert!(matches!(pic.buffers_mut(), Err(EvcError::LeaseViolation(_))));
        drop(shared);
        assert!(pic.is_exclusive());
    }

    #[test]
    fn test_mv_arithmetic() {
        let a = Mv::new(i16::MAX, -3);
        assert_eq!(a.add(Mv::new(1, 1)), Mv::new(i16::MAX, -2));
        assert_eq!(Mv::new(5, 5).sub(Mv::new(2, 7)), Mv::new(3, -2));
        assert_eq!(Mv::new(1, -1).to_string(), "(1, -1)");
    }
}
