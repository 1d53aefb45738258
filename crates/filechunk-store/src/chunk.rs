//! Chunk mapping for multi-file items
//!
//! Maps chunk indices of the logical item to byte ranges of its backing
//! files.
//!
//! ```text
//! chunk length 5, files [1, 2, 7] bytes
//!
//! logical   |0|1 2|3 4 5 6 7 8 9|
//! chunks    |0 1 2 3 4|5 6 7 8 9|
//!
//! chunk 0 → file 0 [0..1) @0, file 1 [1..3) @0, file 2 [3..5) @0
//! chunk 1 → file 2 [0..5) @2
//! ```

/// Chunk index within a store
pub type ChunkIndex = u64;

/// Position of one backing file in the logical item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileExtent {
    /// Offset in the logical item
    pub offset: u64,
    /// Length in bytes
    pub length: u64,
}

impl FileExtent {
    pub const fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// One past the last logical byte of the file
    pub const fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// The part of one chunk that lives in one backing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// Start of the range, relative to the chunk
    pub from: u64,
    /// End of the range (exclusive), relative to the chunk
    pub to: u64,
    /// Byte position of `from` within the file
    pub file_offset: u64,
    /// Declaration index of the file
    pub file: usize,
}

impl ChunkRange {
    /// Number of bytes covered
    pub const fn len(&self) -> u64 {
        self.to - self.from
    }

    /// Check if the range covers no bytes
    pub const fn is_empty(&self) -> bool {
        self.to == self.from
    }

    /// Restrict the range to the chunk window `[range_from, range_to)`
    ///
    /// Returns `None` when the range and the window do not overlap.
    pub fn clip(&self, range_from: u64, range_to: u64) -> Option<Self> {
        if self.to <= range_from || self.from >= range_to {
            return None;
        }

        let mut clipped = *self;
        clipped.to = clipped.to.min(range_to);
        if clipped.from < range_from {
            clipped.file_offset += range_from - clipped.from;
            clipped.from = range_from;
        }
        Some(clipped)
    }
}

/// Immutable chunk index → file ranges table
///
/// Ranges of one chunk are kept in file declaration order.
#[derive(Debug, Clone, Default)]
pub struct ChunkMap {
    chunks: Vec<Vec<ChunkRange>>,
}

impl ChunkMap {
    /// Ranges touched by a chunk, or `None` if the index is not mapped
    pub fn get(&self, index: ChunkIndex) -> Option<&[ChunkRange]> {
        let index = usize::try_from(index).ok()?;
        self.chunks
            .get(index)
            .map(Vec::as_slice)
            .filter(|ranges| !ranges.is_empty())
    }

    /// Check if a chunk index is mapped
    pub fn contains(&self, index: ChunkIndex) -> bool {
        self.get(index).is_some()
    }

    /// Number of chunk indices in the table
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Check if the table has no chunks
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Iterate over `(index, ranges)` in index order
    pub fn iter(&self) -> impl Iterator<Item = (ChunkIndex, &[ChunkRange])> {
        self.chunks
            .iter()
            .enumerate()
            .map(|(i, ranges)| (i as ChunkIndex, ranges.as_slice()))
    }
}

/// Builds chunk maps for a fixed chunk length
#[derive(Debug, Clone, Copy)]
pub struct ChunkMapper {
    chunk_length: u64,
}

impl ChunkMapper {
    /// Create a new chunk mapper
    ///
    /// # Panics
    ///
    /// Panics if `chunk_length` is zero; stores reject that before mapping.
    pub fn new(chunk_length: u64) -> Self {
        assert!(chunk_length > 0, "Chunk length must be positive");
        Self { chunk_length }
    }

    /// Get the chunk length
    pub const fn chunk_length(&self) -> u64 {
        self.chunk_length
    }

    /// Number of chunks needed for an item of `total_length` bytes
    pub const fn chunk_count(&self, total_length: u64) -> u64 {
        total_length.div_ceil(self.chunk_length)
    }

    /// Length of the final chunk of an item of `total_length` bytes
    pub const fn last_chunk_length(&self, total_length: u64) -> u64 {
        match total_length % self.chunk_length {
            0 => self.chunk_length,
            rem => rem,
        }
    }

    /// Build the chunk map for files laid out as `files`
    ///
    /// Ranges are emitted in the order the files are given. Zero-length
    /// files touch no chunk.
    pub fn build_map(&self, files: &[FileExtent]) -> ChunkMap {
        let end = files.iter().map(FileExtent::end).max().unwrap_or(0);
        let count = usize::try_from(self.chunk_count(end)).unwrap_or(usize::MAX);
        let mut chunks: Vec<Vec<ChunkRange>> = vec![Vec::new(); count];

        for (file, extent) in files.iter().enumerate() {
            if extent.length == 0 {
                continue;
            }

            let file_start = extent.offset;
            let file_end = extent.end();
            let first_chunk = file_start / self.chunk_length;
            let last_chunk = (file_end - 1) / self.chunk_length;

            for index in first_chunk..=last_chunk {
                let chunk_start = index * self.chunk_length;

                chunks[index as usize].push(ChunkRange {
                    from: file_start.saturating_sub(chunk_start),
                    to: self.chunk_length.min(file_end - chunk_start),
                    file_offset: chunk_start.saturating_sub(file_start),
                    file,
                });
            }
        }

        ChunkMap { chunks }
    }
}
