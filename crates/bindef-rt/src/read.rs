//! Read binary data from seekable sources.

use std::fmt;
use std::io;

/// The anchor a seek offset is measured from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Whence {
    /// The beginning of the source.
    Start,
    /// The current position.
    Current,
    /// The end of the source.
    End,
}

/// An error produced while reading binary data.
#[derive(Debug)]
pub enum ReadError {
    /// The source ended before the requested bytes could be read.
    Eof,
    /// The underlying source failed.
    Io(io::Error),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Eof => write!(f, "attempted to read beyond the end of the source"),
            ReadError::Io(error) => error.fmt(f),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReadError::Eof => None,
            ReadError::Io(error) => Some(error),
        }
    }
}

impl From<io::Error> for ReadError {
    fn from(error: io::Error) -> ReadError {
        match error.kind() {
            io::ErrorKind::UnexpectedEof => ReadError::Eof,
            _ => ReadError::Io(error),
        }
    }
}

/// A seekable source of bytes.
pub trait SeekRead {
    /// Move the cursor and return the new absolute position.
    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, ReadError>;

    /// Read exactly `len` bytes, or fail with [`ReadError::Eof`].
    fn read(&mut self, len: usize) -> Result<Vec<u8>, ReadError>;

    /// The current absolute position.
    fn position(&mut self) -> Result<u64, ReadError> {
        self.seek(0, Whence::Current)
    }
}

impl<T: io::Read + io::Seek> SeekRead for T {
    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, ReadError> {
        let pos = match whence {
            Whence::Start => match u64::try_from(offset) {
                Ok(offset) => io::SeekFrom::Start(offset),
                Err(_) => {
                    return Err(ReadError::Io(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "cannot seek before the start of the source",
                    )));
                }
            },
            Whence::Current => io::SeekFrom::Current(offset),
            Whence::End => io::SeekFrom::End(offset),
        };

        io::Seek::seek(self, pos).map_err(ReadError::from)
    }

    fn read(&mut self, len: usize) -> Result<Vec<u8>, ReadError> {
        let mut buf = vec![0; len];
        io::Read::read_exact(self, &mut buf)?;
        Ok(buf)
    }
}

/// An in-memory byte source.
///
/// Seeking past the end is permitted, as it is for files; a later read from
/// such a position reports [`ReadError::Eof`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SliceReader<'data> {
    data: &'data [u8],
    pos: u64,
}

impl<'data> SliceReader<'data> {
    /// Construct a new reader over the given bytes.
    pub fn new(data: &'data [u8]) -> SliceReader<'data> {
        SliceReader { data, pos: 0 }
    }

    /// The buffer this reader is holding onto.
    pub fn data(&self) -> &'data [u8] {
        self.data
    }
}

impl io::Read for SliceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = usize::try_from(self.pos).unwrap_or(usize::MAX);
        if start >= self.data.len() {
            return Ok(0);
        }
        let count = (self.data.len() - start).min(buf.len());
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        self.pos += count as u64;
        Ok(count)
    }
}

impl io::Seek for SliceReader<'_> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (base, offset) = match pos {
            io::SeekFrom::Start(offset) => {
                self.pos = offset;
                return Ok(self.pos);
            }
            io::SeekFrom::Current(offset) => (self.pos as i64, offset),
            io::SeekFrom::End(offset) => (self.data.len() as i64, offset),
        };

        match base.checked_add(offset) {
            Some(target) if target >= 0 => {
                self.pos = target as u64;
                Ok(self.pos)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot seek before the start of the source",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_reader_reads_in_order() {
        let mut reader = SliceReader::new(&[1, 2, 3, 4]);
        assert_eq!(SeekRead::read(&mut reader, 2).unwrap(), vec![1, 2]);
        assert_eq!(reader.position().unwrap(), 2);
        assert_eq!(SeekRead::read(&mut reader, 2).unwrap(), vec![3, 4]);
        assert!(matches!(SeekRead::read(&mut reader, 1), Err(ReadError::Eof)));
    }

    #[test]
    fn slice_reader_seeks_from_all_anchors() {
        let mut reader = SliceReader::new(&[0, 1, 2, 3, 4, 5]);
        assert_eq!(SeekRead::seek(&mut reader, 4, Whence::Start).unwrap(), 4);
        assert_eq!(SeekRead::seek(&mut reader, -2, Whence::Current).unwrap(), 2);
        assert_eq!(SeekRead::seek(&mut reader, -1, Whence::End).unwrap(), 5);
        assert_eq!(SeekRead::read(&mut reader, 1).unwrap(), vec![5]);
        assert!(SeekRead::seek(&mut reader, -1, Whence::Start).is_err());
    }

    #[test]
    fn reading_past_the_end_reports_eof() {
        let mut reader = SliceReader::new(&[7]);
        assert_eq!(SeekRead::seek(&mut reader, 10, Whence::Start).unwrap(), 10);
        assert!(matches!(SeekRead::read(&mut reader, 1), Err(ReadError::Eof)));
    }

    #[test]
    fn cursor_gets_a_blanket_impl() {
        let mut reader = std::io::Cursor::new(vec![0xAB, 0xCD]);
        assert_eq!(SeekRead::read(&mut reader, 2).unwrap(), vec![0xAB, 0xCD]);
        assert!(matches!(SeekRead::read(&mut reader, 1), Err(ReadError::Eof)));
    }
}
