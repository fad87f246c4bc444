//! Picture manager: the decoded picture buffer of the decoder and the
//! reference picture buffer of the encoder.
//!
//! Pictures live in a fixed array of [`MAX_PB_SIZE`] slots. Reference
//! pictures are kept at the front in insertion order; marking decisions
//! scan the array in that order, not in POC order. A picture handed out by
//! [`PictureManager::get_empty`] is leased until it is committed with
//! [`PictureManager::put`] or handed back with
//! [`PictureManager::return_unused`].

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{codes, EvcError, Result};
use crate::nal::SliceType;
use crate::picture::{
    MotionField, Picture, PictureAllocator, PictureLayout, RefLists, RefPic, LIST_0,
};
use crate::{MAX_NUM_ACTIVE_REF_FRAME, MAX_NUM_REF_PICS, MAX_PB_SIZE};

/// Result of asking for the next picture in output order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputStatus<T> {
    /// The next picture in output order.
    Picture(T),
    /// Pictures are pending but the next one has not been decoded yet.
    FrameDelayed,
    /// Nothing is pending output.
    NoMoreFrames,
}

impl<T> OutputStatus<T> {
    /// Get the numeric return code.
    pub fn code(&self) -> i32 {
        match self {
            OutputStatus::Picture(_) => codes::OK,
            OutputStatus::FrameDelayed => codes::OK_FRM_DELAYED,
            OutputStatus::NoMoreFrames => codes::OK_NO_MORE_FRM,
        }
    }

    /// Convert into the picture, if any.
    pub fn into_picture(self) -> Option<T> {
        match self {
            OutputStatus::Picture(p) => Some(p),
            _ => None,
        }
    }
}

/// Per-picture parameters for [`PictureManager::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutParams {
    /// Picture order count.
    pub poc: i32,
    /// Temporal layer id.
    pub temporal_id: u8,
    /// Slice type the picture was coded with.
    pub slice_type: SliceType,
    /// Instantaneous decoder refresh.
    pub is_idr: bool,
    /// Keep the picture as a reference.
    pub is_ref: bool,
    /// Queue the picture for output.
    pub need_for_out: bool,
    /// Discard pictures still waiting for output (IDR only).
    pub no_output_of_prior_pics: bool,
}

/// Picture manager.
pub struct PictureManager {
    pool: Vec<Option<Picture>>,
    capacity: usize,
    max_num_ref_pics: usize,
    cur_num_ref: usize,
    ref_pic_gap: i32,
    layout: PictureLayout,
    allocator: Box<dyn PictureAllocator>,
    lease: Option<u64>,
    next_id: u64,
    ref_lists: RefLists,
    next_output_poc: i32,
    output_poc_increment: i32,
    epoch: u32,
    bumping: bool,
}

impl fmt::Debug for PictureManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PictureManager")
            .field("capacity", &self.capacity)
            .field("resident", &self.num_resident())
            .field("cur_num_ref", &self.cur_num_ref)
            .field("lease", &self.lease)
            .finish()
    }
}

impl PictureManager {
    /// Create a manager holding at most `capacity` pictures.
    pub fn new(
        capacity: usize,
        max_num_ref_pics: usize,
        layout: PictureLayout,
        allocator: Box<dyn PictureAllocator>,
    ) -> Result<Self> {
        if capacity == 0 || capacity > MAX_PB_SIZE {
            return Err(EvcError::unsupported(format!(
                "picture buffer size {capacity} (maximum {MAX_PB_SIZE})"
            )));
        }
        if max_num_ref_pics > MAX_NUM_REF_PICS {
            return Err(EvcError::unsupported(format!(
                "{max_num_ref_pics} reference pictures (maximum {MAX_NUM_REF_PICS})"
            )));
        }
        Ok(Self {
            pool: vec![None; MAX_PB_SIZE],
            capacity,
            max_num_ref_pics,
            cur_num_ref: 0,
            ref_pic_gap: 0,
            layout,
            allocator,
            lease: None,
            next_id: 1,
            ref_lists: RefLists::default(),
            next_output_poc: 0,
            output_poc_increment: 1,
            epoch: 0,
            bumping: false,
        })
    }

    /// Set how far the output cursor moves past each released POC.
    pub fn set_output_poc_increment(&mut self, increment: i32) -> Result<()> {
        if increment <= 0 {
            return Err(EvcError::invalid(format!(
                "output POC increment {increment} must be positive"
            )));
        }
        self.output_poc_increment = increment;
        Ok(())
    }

    /// Set the reference picture gap length used by marking (0 disables it).
    pub fn set_ref_pic_gap(&mut self, gap: i32) {
        self.ref_pic_gap = gap;
    }

    /// Get the pool capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the picture layout.
    pub fn layout(&self) -> &PictureLayout {
        &self.layout
    }

    /// Number of pictures resident in the pool (excluding a leased one).
    pub fn num_resident(&self) -> usize {
        self.pool.iter().filter(|s| s.is_some()).count()
    }

    /// Number of pictures marked as reference.
    pub fn num_refs(&self) -> usize {
        self.cur_num_ref
    }

    /// Check whether a picture is currently leased.
    pub fn has_lease(&self) -> bool {
        self.lease.is_some()
    }

    /// Resident pictures in pool order.
    pub fn pictures(&self) -> impl Iterator<Item = &Picture> {
        self.pool.iter().flatten()
    }

    /// Get the reference lists built by the last [`PictureManager::init_ref_lists`].
    pub fn ref_lists(&self) -> &RefLists {
        &self.ref_lists
    }

    /// Lease a picture to fill with new samples.
    ///
    /// A resident picture is reused when it is neither a reference nor
    /// pending output and nobody outside the manager shares its samples.
    pub fn get_empty(&mut self) -> Result<Picture> {
        if self.lease.is_some() {
            return Err(EvcError::LeaseViolation(
                "a picture is already leased".into(),
            ));
        }

        let reusable = self.pool.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|p| !p.is_ref && !p.need_for_out && p.is_exclusive())
        });

        let pic = match reusable {
            Some(i) => {
                let slot = self.pool.remove(i);
                self.pool.push(None);
                let mut pic = slot.ok_or_else(|| EvcError::unexpected("empty reusable slot"))?;
                pic.id = self.next_id;
                pic.list_poc = Arc::from(Vec::<i32>::new());
                pic
            }
            None => {
                if self.num_resident() >= self.capacity {
                    return Err(EvcError::CapacityExceeded {
                        capacity: self.capacity,
                    });
                }
                let image = self.allocator.allocate(&self.layout)?;
                let motion = MotionField::new(self.layout.width, self.layout.height);
                Picture::new(self.next_id, image, motion)
            }
        };

        self.lease = Some(pic.id);
        self.next_id += 1;
        Ok(pic)
    }

    /// Hand back a leased picture that will not be committed.
    pub fn return_unused(&mut self, pic: Picture) -> Result<()> {
        self.check_lease(&pic)?;
        self.lease = None;
        Ok(())
    }

    fn check_lease(&self, pic: &Picture) -> Result<()> {
        match self.lease {
            Some(id) if id == pic.id => Ok(()),
            Some(id) => Err(EvcError::LeaseViolation(format!(
                "picture {} returned while {id} is leased",
                pic.id
            ))),
            None => Err(EvcError::LeaseViolation(format!(
                "picture {} was not leased",
                pic.id
            ))),
        }
    }

    /// Commit a filled picture into the pool.
    pub fn put(&mut self, mut pic: Picture, params: PutParams) -> Result<()> {
        self.check_lease(&pic)?;

        if params.is_idr {
            self.unmark_all();
            if params.no_output_of_prior_pics {
                for p in self.pool.iter_mut().flatten() {
                    p.need_for_out = false;
                }
            }
            self.epoch += 1;
            self.next_output_poc = 0;
        } else if params.temporal_id == 0 {
            self.mark_no_rpl();
        }

        pic.is_ref = params.is_ref;
        pic.temporal_id = params.temporal_id;
        pic.poc = params.poc;
        pic.need_for_out = params.need_for_out;
        pic.slice_type = params.slice_type;
        pic.epoch = self.epoch;
        pic.list_poc = self.ref_lists.pocs(LIST_0).into();

        if !self.pool.iter().any(Option::is_none) {
            return Err(EvcError::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        debug!(
            poc = params.poc,
            tid = params.temporal_id,
            is_ref = params.is_ref,
            num_refs = self.cur_num_ref,
            "put picture"
        );

        if pic.is_ref {
            let pos = self.cur_num_ref;
            self.insert_at(pos, pic);
            self.cur_num_ref += 1;
        } else if let Some(i) = self.pool.iter().rposition(Option::is_none) {
            self.pool[i] = Some(pic);
        }

        self.lease = None;
        self.ref_lists.clear();
        Ok(())
    }

    /// Place a picture at `pos`, shifting occupied slots towards a free one.
    fn insert_at(&mut self, pos: usize, pic: Picture) {
        if self.pool[pos].is_none() {
            self.pool[pos] = Some(pic);
            return;
        }
        self.pool.insert(pos, Some(pic));
        if let Some(i) = self.pool[pos + 1..].iter().position(Option::is_none) {
            self.pool.remove(pos + 1 + i);
        } else if let Some(i) = self.pool[..pos].iter().rposition(Option::is_none) {
            self.pool.remove(i);
        }
    }

    fn unmark_all(&mut self) {
        for pic in self.pool.iter_mut().flatten() {
            pic.is_ref = false;
        }
        self.cur_num_ref = 0;
    }

    /// Sliding-window marking without reference picture lists.
    ///
    /// References with a non-zero temporal id, or off the reference gap
    /// grid (except in the first slot), are unmarked and moved to the end
    /// of the array. Then the oldest references are dropped until fewer
    /// than [`MAX_NUM_ACTIVE_REF_FRAME`] remain.
    fn mark_no_rpl(&mut self) {
        let gap = self.ref_pic_gap;
        let mut kept: Vec<Option<Picture>> = Vec::with_capacity(MAX_PB_SIZE);
        let mut removed: Vec<Option<Picture>> = Vec::new();

        for slot in self.pool.drain(..) {
            let pos = kept.len();
            match slot {
                Some(mut pic)
                    if pic.is_ref
                        && (pic.temporal_id > 0
                            || (pos > 0 && gap > 0 && pic.poc % gap != 0)) =>
                {
                    pic.is_ref = false;
                    self.cur_num_ref = self.cur_num_ref.saturating_sub(1);
                    removed.push(Some(pic));
                }
                other => kept.push(other),
            }
        }
        kept.extend(removed);
        self.pool = kept;

        while self.cur_num_ref >= MAX_NUM_ACTIVE_REF_FRAME {
            let Some(i) = self
                .pool
                .iter()
                .position(|s| s.as_ref().is_some_and(|p| p.is_ref))
            else {
                break;
            };
            let mut slot = self.pool.remove(i);
            if let Some(pic) = slot.as_mut() {
                debug!(poc = pic.poc, "unmark oldest reference");
                pic.is_ref = false;
            }
            self.pool.push(slot);
            self.cur_num_ref -= 1;
        }
    }

    /// Build the reference lists of the next slice.
    pub fn init_ref_lists(
        &mut self,
        slice_type: SliceType,
        poc: i32,
        last_intra_poc: i32,
        temporal_id: u8,
    ) -> Result<()> {
        self.ref_lists.clear();
        if slice_type.is_intra() {
            return Ok(());
        }

        let mut refs: Vec<&Picture> = self.pool.iter().flatten().filter(|p| p.is_ref).collect();
        if refs.is_empty() {
            return Err(EvcError::unexpected("inter slice without reference pictures"));
        }
        refs.sort_by(|a, b| b.poc.cmp(&a.poc));

        let max = self.max_num_ref_pics;
        let tid = temporal_id;
        let before_intra = |r: &Picture| poc >= last_intra_poc && r.poc < last_intra_poc;
        let mut l0: Vec<&Picture> = Vec::new();
        let mut l1: Vec<&Picture> = Vec::new();

        if slice_type == SliceType::P {
            for r in refs.iter().copied() {
                if l0.len() >= max {
                    break;
                }
                let pick = if tid == 0 {
                    !before_intra(r) && r.poc < poc
                } else if tid == 1 {
                    r.poc < poc && r.temporal_id <= 1
                } else if l0.is_empty() {
                    r.poc < poc
                } else {
                    r.poc < poc && r.temporal_id <= 1
                };
                if pick {
                    l0.push(r);
                }
            }
        } else {
            // forward list: past pictures first, then future ones
            collect_layered(&mut l0, refs.iter().copied(), max, tid, |r| {
                !before_intra(r) && r.poc < poc
            });
            if l0.len() < max {
                collect_layered(&mut l0, refs.iter().rev().copied(), max, tid, |r| {
                    !before_intra(r) && r.poc > poc
                });
            }
            collect_layered(&mut l1, refs.iter().rev().copied(), max, tid, |r| {
                !before_intra(r) && r.poc > poc
            });
            if l1.len() < max {
                collect_layered(&mut l1, refs.iter().copied(), max, tid, |r| {
                    !before_intra(r) && r.poc < poc
                });
            }
            if l1.is_empty() {
                return Err(EvcError::unexpected(format!(
                    "empty list 1 for poc {poc}"
                )));
            }
        }
        if l0.is_empty() {
            return Err(EvcError::unexpected(format!("empty list 0 for poc {poc}")));
        }

        let l0: Vec<RefPic> = l0.into_iter().map(RefPic::from_picture).collect();
        let l1: Vec<RefPic> = l1.into_iter().map(RefPic::from_picture).collect();
        self.ref_lists = RefLists::new(l0, l1);
        debug!(
            poc,
            ?slice_type,
            l0 = ?self.ref_lists.pocs(0),
            l1 = ?self.ref_lists.pocs(1),
            "reference lists"
        );
        Ok(())
    }

    /// Release the next picture in output order.
    ///
    /// Pictures of an earlier IDR period always go first. Within the current
    /// period a picture is released once its POC reaches the output cursor,
    /// or unconditionally after [`PictureManager::flush`].
    pub fn output(&mut self) -> OutputStatus<Picture> {
        let next = self
            .pool
            .iter_mut()
            .flatten()
            .filter(|p| p.need_for_out)
            .min_by_key(|p| (p.epoch, p.poc));

        let Some(pic) = next else {
            return OutputStatus::NoMoreFrames;
        };
        let eligible =
            pic.epoch < self.epoch || self.bumping || pic.poc <= self.next_output_poc;
        if !eligible {
            return OutputStatus::FrameDelayed;
        }

        pic.need_for_out = false;
        if pic.epoch == self.epoch {
            self.next_output_poc = pic.poc + self.output_poc_increment;
        }
        OutputStatus::Picture(pic.clone())
    }

    /// Switch output to bumping: every pending picture becomes eligible.
    pub fn flush(&mut self) {
        self.bumping = true;
    }

    /// Drop every picture, including a leased one.
    pub fn deinit(&mut self) {
        self.pool.iter_mut().for_each(|s| *s = None);
        self.ref_lists.clear();
        self.cur_num_ref = 0;
        self.lease = None;
    }
}

/// Fill `list` from `candidates` with the temporal-layer priority rule:
/// each pick must not sit above the layer allowed so far, which drops to
/// one below the picked picture's own layer.
fn collect_layered<'p>(
    list: &mut Vec<&'p Picture>,
    candidates: impl Iterator<Item = &'p Picture>,
    max: usize,
    temporal_id: u8,
    accept: impl Fn(&Picture) -> bool,
) {
    let mut next_layer = temporal_id.saturating_sub(1);
    for r in candidates {
        if list.len() >= max {
            break;
        }
        if accept(r) && r.temporal_id <= next_layer {
            list.push(r);
            next_layer = r.temporal_id.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picture::PlanarAllocator;
    use transcode_core::ChromaFormat;

    fn manager(capacity: usize) -> PictureManager {
        let layout = PictureLayout {
            width: 8,
            height: 8,
            chroma_format: ChromaFormat::Yuv420,
            bit_depth: 8,
        };
        PictureManager::new(capacity, 4, layout, Box::new(PlanarAllocator::new())).unwrap()
    }

    fn params(poc: i32, tid: u8, is_ref: bool) -> PutParams {
        PutParams {
            poc,
            temporal_id: tid,
            slice_type: SliceType::B,
            is_idr: poc == 0,
            is_ref,
            need_for_out: true,
            no_output_of_prior_pics: false,
        }
    }

    fn put(pm: &mut PictureManager, poc: i32, tid: u8, is_ref: bool) {
        let pic = pm.get_empty().unwrap();
        pm.put(pic, params(poc, tid, is_ref)).unwrap();
    }

    fn ref_pocs(pm: &PictureManager) -> Vec<i32> {
        pm.pictures().filter(|p| p.is_ref()).map(|p| p.poc).collect()
    }

    #[test]
    fn test_init_limits() {
        let layout = *manager(1).layout();
        assert!(PictureManager::new(23, 4, layout, Box::new(PlanarAllocator::new())).is_err());
        assert!(PictureManager::new(8, 18, layout, Box::new(PlanarAllocator::new())).is_err());
    }

    #[test]
    fn test_lease_rules() {
        let mut pm = manager(4);
        let pic = pm.get_empty().unwrap();
        assert!(matches!(pm.get_empty(), Err(EvcError::LeaseViolation(_))));
        pm.return_unused(pic.clone()).unwrap();
        assert!(matches!(
            pm.put(pic, params(0, 0, true)),
            Err(EvcError::LeaseViolation(_))
        ));
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut pm = manager(2);
        put(&mut pm, 0, 0, true);
        put(&mut pm, 1, 0, true);
        let err = pm.get_empty().unwrap_err();
        assert!(matches!(err, EvcError::CapacityExceeded { capacity: 2 }));
        assert_eq!(pm.num_resident(), 2);
    }

    #[test]
    fn test_reuse_requires_exclusive_samples() {
        let mut pm = manager(1);
        let pic = pm.get_empty().unwrap();
        pm.put(pic, params(0, 0, false)).unwrap();

        let out = pm.output().into_picture().unwrap();
        // the caller still holds the output picture
        assert!(pm.get_empty().is_err());
        drop(out);
        assert!(pm.get_empty().is_ok());
    }

    #[test]
    fn test_sliding_window_marking() {
        let mut pm = manager(8);
        put(&mut pm, 0, 0, true);
        for poc in 1..=6 {
            let mut p = params(poc, 0, true);
            p.is_idr = false;
            let pic = pm.get_empty().unwrap();
            pm.put(pic, p).unwrap();
            while pm.output().into_picture().is_some() {}
        }
        assert_eq!(pm.num_refs(), 5);
        assert_eq!(ref_pocs(&pm), vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_marking_drops_higher_layers() {
        let mut pm = manager(8);
        put(&mut pm, 0, 0, true);
        let mut p = params(4, 0, true);
        p.is_idr = false;
        let pic = pm.get_empty().unwrap();
        pm.put(pic, p).unwrap();
        let mut p = params(2, 1, true);
        p.is_idr = false;
        let pic = pm.get_empty().unwrap();
        pm.put(pic, p).unwrap();
        assert_eq!(ref_pocs(&pm), vec![0, 4, 2]);

        let mut p = params(8, 0, true);
        p.is_idr = false;
        let pic = pm.get_empty().unwrap();
        pm.put(pic, p).unwrap();
        assert_eq!(ref_pocs(&pm), vec![0, 4, 8]);
    }

    #[test]
    fn test_idr_unmarks_everything() {
        let mut pm = manager(8);
        put(&mut pm, 0, 0, true);
        let mut p = params(1, 0, true);
        p.is_idr = false;
        let pic = pm.get_empty().unwrap();
        pm.put(pic, p).unwrap();
        put(&mut pm, 0, 0, true);
        assert_eq!(pm.num_refs(), 1);
    }

    #[test]
    fn test_ref_lists_hierarchical_b() {
        let mut pm = manager(8);
        put(&mut pm, 0, 0, true);
        let mut p = params(8, 0, true);
        p.is_idr = false;
        pm.init_ref_lists(SliceType::B, 8, 0, 0).unwrap();
        assert_eq!(pm.ref_lists().pocs(0), vec![0]);
        assert_eq!(pm.ref_lists().pocs(1), vec![0]);
        let pic = pm.get_empty().unwrap();
        pm.put(pic, p).unwrap();
        let stored: Vec<_> = pm.pictures().find(|p| p.poc == 8).unwrap().list_poc.to_vec();
        assert_eq!(stored, vec![0]);

        let mut p = params(4, 1, true);
        p.is_idr = false;
        let pic = pm.get_empty().unwrap();
        pm.put(pic, p).unwrap();

        // short lists are completed from the other direction
        pm.init_ref_lists(SliceType::B, 2, 0, 2).unwrap();
        assert_eq!(pm.ref_lists().pocs(0), vec![0, 4, 8]);
        assert_eq!(pm.ref_lists().pocs(1), vec![4, 8, 0]);

        // lists are deterministic
        pm.init_ref_lists(SliceType::B, 2, 0, 2).unwrap();
        assert_eq!(pm.ref_lists().pocs(1), vec![4, 8, 0]);
    }

    #[test]
    fn test_ref_lists_p_skips_before_last_intra() {
        let mut pm = manager(8);
        put(&mut pm, 0, 0, true);
        for poc in [1, 2] {
            let mut p = params(poc, 0, true);
            p.is_idr = false;
            let pic = pm.get_empty().unwrap();
            pm.put(pic, p).unwrap();
        }
        pm.init_ref_lists(SliceType::P, 3, 2, 0).unwrap();
        assert_eq!(pm.ref_lists().pocs(0), vec![2]);
        pm.init_ref_lists(SliceType::P, 3, 0, 0).unwrap();
        assert_eq!(pm.ref_lists().pocs(0), vec![2, 1, 0]);
        assert!(pm.ref_lists().pocs(1).is_empty());
    }

    #[test]
    fn test_ref_lists_without_refs_fail() {
        let mut pm = manager(4);
        assert!(matches!(
            pm.init_ref_lists(SliceType::P, 1, 0, 0),
            Err(EvcError::Unexpected(_))
        ));
        assert!(pm.init_ref_lists(SliceType::I, 1, 0, 0).is_ok());
    }

    #[test]
    fn test_output_order_and_delay() {
        let mut pm = manager(8);
        put(&mut pm, 0, 0, true);
        assert_eq!(pm.output().into_picture().map(|p| p.poc), Some(0));
        for (poc, tid) in [(4, 0), (2, 1)] {
            let mut p = params(poc, tid, true);
            p.is_idr = false;
            let pic = pm.get_empty().unwrap();
            pm.put(pic, p).unwrap();
        }
        assert!(matches!(pm.output(), OutputStatus::FrameDelayed));
        assert_eq!(pm.output().code(), 202);

        let mut p = params(1, 2, false);
        p.is_idr = false;
        let pic = pm.get_empty().unwrap();
        pm.put(pic, p).unwrap();
        let pocs: Vec<i32> = std::iter::from_fn(|| pm.output().into_picture().map(|p| p.poc)).collect();
        assert_eq!(pocs, vec![1, 2]);

        pm.flush();
        assert_eq!(pm.output().into_picture().map(|p| p.poc), Some(4));
        assert!(matches!(pm.output(), OutputStatus::NoMoreFrames));
    }

    #[test]
    fn test_output_finishes_previous_idr_period() {
        let mut pm = manager(8);
        put(&mut pm, 0, 0, true);
        let mut p = params(8, 0, true);
        p.is_idr = false;
        let pic = pm.get_empty().unwrap();
        pm.put(pic, p).unwrap();
        assert_eq!(pm.output().into_picture().map(|p| p.poc), Some(0));
        assert!(matches!(pm.output(), OutputStatus::FrameDelayed));

        put(&mut pm, 0, 0, true);
        assert_eq!(pm.output().into_picture().map(|p| p.poc), Some(8));
        assert_eq!(pm.output().into_picture().map(|p| p.poc), Some(0));
    }

    #[test]
    fn test_output_poc_increment() {
        let mut pm = manager(8);
        assert!(pm.set_output_poc_increment(0).is_err());
        pm.set_output_poc_increment(2).unwrap();

        put(&mut pm, 0, 0, true);
        assert_eq!(pm.output().into_picture().map(|p| p.poc), Some(0));
        for poc in [2, 5] {
            let mut p = params(poc, 0, true);
            p.is_idr = false;
            let pic = pm.get_empty().unwrap();
            pm.put(pic, p).unwrap();
        }
        // the cursor sits at 2 after poc 0, then at 4 after poc 2
        assert_eq!(pm.output().into_picture().map(|p| p.poc), Some(2));
        assert!(matches!(pm.output(), OutputStatus::FrameDelayed));
    }

    #[test]
    fn test_deinit_drops_everything() {
        let mut pm = manager(4);
        put(&mut pm, 0, 0, true);
        let _leased = pm.get_empty().unwrap();
        pm.deinit();
        assert_eq!(pm.num_resident(), 0);
        assert_eq!(pm.num_refs(), 0);
        assert!(!pm.has_lease());
        assert_eq!(pm.output().code(), codes::OK_NO_MORE_FRM);
    }
}
