//! Chunked byte buffer backing the connection receive path.
//!
//! Bytes live in fixed-size blocks kept oldest first. Writers fill the tail
//! block in place through [`IoBuffer::write_region`] and [`IoBuffer::commit_write`];
//! readers drain from the head with [`IoBuffer::read`]. An end-of-stream
//! marker can be queued behind the data so a reader sees every byte before
//! learning the stream ended.

use std::collections::VecDeque;

/// Block capacity used by connections.
pub const DEFAULT_BLOCK_SIZE: usize = 256;

#[derive(Debug)]
enum Block {
    Data {
        bytes: Box<[u8]>,
        read: usize,
        write: usize,
    },
    Eof,
}

impl Block {
    fn with_capacity(capacity: usize) -> Self {
        Block::Data {
            bytes: vec![0; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }
}

/// Unbounded append/consume buffer made of fixed-size blocks.
#[derive(Debug)]
pub struct IoBuffer {
    blocks: VecDeque<Block>,
    block_size: usize,
}

impl Default for IoBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl IoBuffer {
    pub fn new(block_size: usize) -> Self {
        Self {
            blocks: VecDeque::new(),
            block_size: block_size.max(1),
        }
    }

    /// Copy up to `dst.len()` of the oldest bytes into `dst`.
    ///
    /// Stops at an end-of-stream marker. The marker itself is consumed only
    /// by a read that copied nothing, so a return of `0` means the buffer was
    /// empty or the stream just ended.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let mut copied = 0;

        while copied < dst.len() {
            let block_count = self.blocks.len();
            match self.blocks.front_mut() {
                None => break,
                Some(Block::Eof) => {
                    if copied == 0 {
                        self.blocks.pop_front();
                    }
                    break;
                }
                Some(Block::Data { bytes, read, write }) => {
                    if *read == *write {
                        // A drained block can go once nothing more will land in it.
                        if *write == bytes.len() || block_count > 1 {
                            self.blocks.pop_front();
                            continue;
                        }
                        break;
                    }

                    let n = (*write - *read).min(dst.len() - copied);
                    dst[copied..copied + n].copy_from_slice(&bytes[*read..*read + n]);
                    *read += n;
                    copied += n;
                }
            }
        }

        copied
    }

    /// Writable tail of the last block, allocating a block when needed.
    ///
    /// The slice is never empty. Call [`commit_write`](Self::commit_write)
    /// with the number of bytes actually stored.
    pub fn write_region(&mut self) -> &mut [u8] {
        let has_room = matches!(
            self.blocks.back(),
            Some(Block::Data { bytes, write, .. }) if *write < bytes.len()
        );
        if !has_room {
            self.blocks.push_back(Block::with_capacity(self.block_size));
        }

        match self.blocks.back_mut() {
            Some(Block::Data { bytes, write, .. }) => &mut bytes[*write..],
            _ => &mut [],
        }
    }

    /// Mark `n` bytes of the last write region as filled.
    pub fn commit_write(&mut self, n: usize) {
        if let Some(Block::Data { bytes, write, .. }) = self.blocks.back_mut() {
            *write = (*write + n).min(bytes.len());
        }
    }

    /// Append `data`, spilling across blocks as needed.
    pub fn append(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let region = self.write_region();
            let n = region.len().min(data.len());
            region[..n].copy_from_slice(&data[..n]);
            self.commit_write(n);
            data = &data[n..];
        }
    }

    /// Queue the end-of-stream marker behind all current data.
    pub fn write_eof(&mut self) {
        self.blocks.push_back(Block::Eof);
    }

    /// True when there is nothing left to read, marker included.
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|block| match block {
            Block::Data { read, write, .. } => read == write,
            Block::Eof => false,
        })
    }

    /// Number of readable data bytes.
    pub fn read_size(&self) -> usize {
        self.blocks
            .iter()
            .map(|block| match block {
                Block::Data { read, write, .. } => write - read,
                Block::Eof => 0,
            })
            .sum()
    }

    /// Drop everything, marker included.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_buffer() {
        let mut buffer = IoBuffer::default();
        let mut dst = [0u8; 8];
        assert!(buffer.is_empty());
        assert_eq!(buffer.read(&mut dst), 0);
        assert_eq!(buffer.read_size(), 0);
    }

    #[test]
    fn test_single_eof() {
        let mut buffer = IoBuffer::default();
        buffer.write_eof();
        assert!(!buffer.is_empty());

        let mut dst = [0u8; 4];
        assert_eq!(buffer.read(&mut dst), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_read_with_eof() {
        let mut buffer = IoBuffer::default();
        buffer.append(b"abc");
        buffer.write_eof();

        let mut dst = [0u8; 10];
        assert_eq!(buffer.read(&mut dst), 3);
        assert_eq!(&dst[..3], b"abc");
        assert!(!buffer.is_empty());

        assert_eq!(buffer.read(&mut dst), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_read_crosses_blocks() {
        let mut buffer = IoBuffer::new(4);
        buffer.append(b"0123456789");
        assert_eq!(buffer.read_size(), 10);

        let mut dst = [0u8; 6];
        assert_eq!(buffer.read(&mut dst), 6);
        assert_eq!(&dst, b"012345");

        let mut rest = [0u8; 16];
        assert_eq!(buffer.read(&mut rest), 4);
        assert_eq!(&rest[..4], b"6789");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_write_region_and_commit() {
        let mut buffer = IoBuffer::new(4);
        let region = buffer.write_region();
        assert_eq!(region.len(), 4);
        region[..2].copy_from_slice(b"hi");
        buffer.commit_write(2);

        assert_eq!(buffer.write_region().len(), 2);
        assert_eq!(buffer.read_size(), 2);
    }

    #[test]
    fn test_commit_write_on_empty_buffer_is_noop() {
        let mut buffer = IoBuffer::default();
        buffer.commit_write(5);
        assert!(buffer.is_empty());
        assert_eq!(buffer.read_size(), 0);
    }

    #[test]
    fn test_write_after_eof_lands_behind_marker() {
        let mut buffer = IoBuffer::new(8);
        buffer.append(b"ab");
        buffer.write_eof();
        buffer.append(b"cd");

        let mut dst = [0u8; 8];
        assert_eq!(buffer.read(&mut dst), 2);
        assert_eq!(buffer.read(&mut dst), 0);
        assert_eq!(buffer.read(&mut dst), 2);
        assert_eq!(&dst[..2], b"cd");
    }

    #[test]
    fn test_drained_partial_block_does_not_hide_eof() {
        let mut buffer = IoBuffer::new(8);
        buffer.append(b"xy");
        let mut dst = [0u8; 2];
        assert_eq!(buffer.read(&mut dst), 2);

        buffer.write_eof();
        assert!(!buffer.is_empty());
        assert_eq!(buffer.read(&mut dst), 0);
        assert!(buffer.is_empty());
    }

    proptest! {
        #[test]
        fn test_round_trip_any_chunking(
            data in proptest::collection::vec(any::<u8>(), 0..600),
            block_size in 1usize..64,
            read_size in 1usize..97,
        ) {
            let mut buffer = IoBuffer::new(block_size);
            let mut remaining = &data[..];
            while !remaining.is_empty() {
                let region = buffer.write_region();
                let n = region.len().min(remaining.len());
                region[..n].copy_from_slice(&remaining[..n]);
                buffer.commit_write(n);
                remaining = &remaining[n..];
            }
            prop_assert_eq!(buffer.read_size(), data.len());

            let mut out = Vec::new();
            let mut chunk = vec![0u8; read_size];
            loop {
                let n = buffer.read(&mut chunk);
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&chunk[..n]);
            }
            prop_assert_eq!(out, data);
            prop_assert!(buffer.is_empty());
        }
    }
}
