//! Fixed-capacity chunks of track storage.
//!
//! A block holds interleaved 16-bit stereo PCM as raw native-endian bytes,
//! exactly as the importer wrote them, plus the downsampled traces of both
//! meters for that stretch of audio. Blocks are allocated lazily in index
//! order and only released when the store itself is dropped.

use tracing::info;

use crate::config::TrackSettings;

use super::types::{SAMPLE, StoreError};

/// Geometry of a track's block store.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Layout {
    pub block_samples: usize,
    pub max_blocks: usize,
    pub ppm_res: usize,
    pub overview_res: usize,
}

impl From<&TrackSettings> for Layout {
    fn from(s: &TrackSettings) -> Self {
        Self {
            block_samples: s.block_samples.max(1),
            max_blocks: s.max_blocks,
            ppm_res: s.ppm_res.max(1),
            overview_res: s.overview_res.max(1),
        }
    }
}

impl Layout {
    pub fn block_bytes(&self) -> usize {
        self.block_samples * SAMPLE
    }

    /// Block index and offset within that block of a sample.
    pub fn locate(&self, sample: usize) -> (usize, usize) {
        (sample / self.block_samples, sample % self.block_samples)
    }
}

pub(super) struct Block {
    pcm: Vec<u8>,
    pub(super) ppm: Vec<u8>,
    pub(super) overview: Vec<u8>,
}

impl Block {
    fn try_new(layout: &Layout) -> Result<Self, StoreError> {
        Ok(Self {
            pcm: zeroed(layout.block_bytes())?,
            ppm: zeroed(layout.block_samples.div_ceil(layout.ppm_res))?,
            overview: zeroed(layout.block_samples.div_ceil(layout.overview_res))?,
        })
    }

    /// Left and right channel of the sample at `fill`.
    pub(super) fn sample(&self, fill: usize) -> Option<[i16; 2]> {
        let at = fill * SAMPLE;
        let bytes = self.pcm.get(at..at + SAMPLE)?;
        Some([
            i16::from_ne_bytes([bytes[0], bytes[1]]),
            i16::from_ne_bytes([bytes[2], bytes[3]]),
        ])
    }
}

fn zeroed(len: usize) -> Result<Vec<u8>, StoreError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)?;
    v.resize(len, 0);
    Ok(v)
}

/// Owned, growable sequence of blocks addressed by byte or sample offset.
pub struct BlockStore {
    layout: Layout,
    blocks: Vec<Block>,
}

impl BlockStore {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            blocks: Vec::new(),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Number of blocks allocated so far.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whole samples the allocated blocks can hold.
    pub fn capacity_samples(&self) -> usize {
        self.blocks.len() * self.layout.block_samples
    }

    /// Writable bytes from `offset` to the end of the block containing it,
    /// allocating that block if it does not exist yet.
    ///
    /// On failure nothing already stored is touched.
    pub fn acquire_write_region(&mut self, offset: usize) -> Result<&mut [u8], StoreError> {
        let block_bytes = self.layout.block_bytes();
        let index = offset / block_bytes;
        while index >= self.blocks.len() {
            self.grow()?;
        }

        let fill = offset % block_bytes;
        Ok(&mut self.blocks[index].pcm[fill..])
    }

    fn grow(&mut self) -> Result<(), StoreError> {
        if self.blocks.len() >= self.layout.max_blocks {
            return Err(StoreError::LimitReached {
                max_blocks: self.layout.max_blocks,
            });
        }

        self.blocks.try_reserve(1)?;
        let block = Block::try_new(&self.layout)?;
        self.blocks.push(block);

        info!(
            blocks = self.blocks.len(),
            bytes = self.blocks.len() * self.layout.block_bytes(),
            "allocated new track block"
        );
        Ok(())
    }

    pub(super) fn block_mut(&mut self, index: usize) -> Option<&mut Block> {
        self.blocks.get_mut(index)
    }

    pub fn sample(&self, index: usize) -> Option<[i16; 2]> {
        let (block, fill) = self.layout.locate(index);
        self.blocks.get(block)?.sample(fill)
    }

    /// Fast meter trace entry covering sample `index`.
    pub fn ppm(&self, index: usize) -> Option<u8> {
        let (block, fill) = self.layout.locate(index);
        self.blocks.get(block)?.ppm.get(fill / self.layout.ppm_res).copied()
    }

    /// Slow meter trace entry covering sample `index`.
    pub fn overview(&self, index: usize) -> Option<u8> {
        let (block, fill) = self.layout.locate(index);
        self.blocks
            .get(block)?
            .overview
            .get(fill / self.layout.overview_res)
            .copied()
    }

    /// Memory held by PCM, PPM trace and overview trace, in KiB.
    pub fn memory_kib(&self) -> (usize, usize, usize) {
        let pcm = self.blocks.len() * self.layout.block_bytes() / 1024;
        (
            pcm,
            pcm / self.layout.ppm_res,
            pcm / self.layout.overview_res,
        )
    }
}
