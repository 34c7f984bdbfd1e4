/*
 * This file is part of a small educational kernel core.
 *
 * This program is free software: you can redistribute it and/or modify it
 * under the terms of the GNU General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
 *
 * This program is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General
 * Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along
 * with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! The on-disk filesystem is an external collaborator: lazy loading and mmap reach it
//! only through [`FileHandle`], an already-open, already-reopened file.

/// A single open file, as handed to this core by the filesystem layer.
///
/// Implementations are expected to be cheaply cloneable handles onto a shared, reopened
/// inode, matching the original's `file_reopen` semantics: an mmap or a lazily-loaded
/// segment keeps its own handle independent of the fd table entry it was created from.
pub trait FileHandle: Send + Sync {
    /// Total length of the file in bytes.
    fn len(&self) -> u64;

    /// Whether the file is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, returning the number of bytes
    /// actually read (short on end-of-file or I/O error).
    fn read_at(&self, buf: &mut [u8], offset: u64) -> usize;

    /// Writes `buf` at `offset`, returning the number of bytes actually written.
    fn write_at(&self, buf: &[u8], offset: u64) -> usize;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use alloc::vec::Vec;
    use spin::Mutex;

    /// An in-memory file, for unit tests.
    pub struct MemoryFile {
        bytes: Mutex<Vec<u8>>,
    }

    impl MemoryFile {
        pub fn new(bytes: Vec<u8>) -> Self {
            Self {
                bytes: Mutex::new(bytes),
            }
        }
    }

    impl FileHandle for MemoryFile {
        fn len(&self) -> u64 {
            self.bytes.lock().len() as u64
        }

        fn read_at(&self, buf: &mut [u8], offset: u64) -> usize {
            let bytes = self.bytes.lock();
            let offset = offset as usize;
            if offset >= bytes.len() {
                return 0;
            }
            let n = buf.len().min(bytes.len() - offset);
            buf[..n].copy_from_slice(&bytes[offset..offset + n]);
            n
        }

        fn write_at(&self, buf: &[u8], offset: u64) -> usize {
            let mut bytes = self.bytes.lock();
            let offset = offset as usize;
            let end = offset + buf.len();
            if bytes.len() < end {
                bytes.resize(end, 0);
            }
            bytes[offset..end].copy_from_slice(buf);
            buf.len()
        }
    }

    #[test]
    fn read_at_short_reads_past_eof() {
        let file = MemoryFile::new(alloc::vec![1, 2, 3]);
        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(&mut buf, 0), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[test]
    fn write_at_extends_file() {
        let file = MemoryFile::new(Vec::new());
        assert_eq!(file.write_at(&[9, 9], 4), 2);
        assert_eq!(file.len(), 6);
    }
}
