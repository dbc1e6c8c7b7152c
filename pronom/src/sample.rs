// buffered sampling of object content.
//
// the matcher never sees whole objects: it sees a fixed-size buffer from
// each end of one. a seekable source is sampled with two reads; a
// forward-only source (an archive entry, say) is drained past the middle
// instead.

use std::cmp;
use std::io::{self, Read, Seek, SeekFrom};

use failure::Fail;

/// Default buffer size: 128 KiB.
pub const DEFAULT_BUFSIZE: usize = 128 * 1024;

#[derive(Debug, Fail)]
pub enum SampleError {
    #[fail(display = "read error while sampling: {}", _0)]
    Io(#[fail(cause)] io::Error),
    #[fail(display = "source size is not known in advance")]
    UnknownSize,
}

impl From<io::Error> for SampleError {
    fn from(e: io::Error) -> SampleError {
        SampleError::Io(e)
    }
}

/// The (head, tail, size) triple sampled from one object.
///
/// When the object fits within one buffer the head and the tail are the
/// same bytes: the whole object.
///
/// ```
/// use pronom::Sample;
///
/// let s = Sample::from_bytes(b"0123456789", 4);
/// assert_eq!(s.head(), b"0123");
/// assert_eq!(s.tail(), b"6789");
/// assert_eq!(s.size(), 10);
///
/// let s = Sample::from_bytes(b"012", 4);
/// assert_eq!(s.head(), b"012");
/// assert_eq!(s.tail(), b"012");
/// ```
#[derive(Debug)]
pub struct Sample {
    head: Vec<u8>,
    /// `None` when the head covers the whole object.
    tail: Option<Vec<u8>>,
    size: u64,
}

impl Sample {
    /// Build a sample directly from in-memory content.
    pub fn from_bytes(buf: &[u8], bufsize: usize) -> Sample {
        assert!(bufsize >= 1, "bufsize must be at least 1");

        if buf.len() <= bufsize {
            Sample {
                head: buf.to_vec(),
                tail: None,
                size: buf.len() as u64,
            }
        } else {
            Sample {
                head: buf[..bufsize].to_vec(),
                tail: Some(buf[buf.len() - bufsize..].to_vec()),
                size: buf.len() as u64,
            }
        }
    }

    /// The first `min(size, bufsize)` bytes of the object.
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// The last `min(size, bufsize)` bytes of the object.
    pub fn tail(&self) -> &[u8] {
        match &self.tail {
            Some(tail) => tail,
            None => &self.head,
        }
    }

    /// Total size of the object, which may be far larger than either
    /// buffer.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Reads the head and tail buffers of an object.
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    bufsize: usize,
}

impl Sampler {
    /// Panics when `bufsize` is zero; one byte is the smallest legal
    /// buffer.
    pub fn new(bufsize: usize) -> Sampler {
        assert!(bufsize >= 1, "bufsize must be at least 1");
        Sampler { bufsize }
    }

    pub fn bufsize(&self) -> usize {
        self.bufsize
    }

    /// Sample a seekable source of known size: one read at offset zero,
    /// and when the object is larger than the buffer, one read at
    /// `size - bufsize`.
    pub fn sample_seekable<R: Read + Seek>(
        &self,
        src: &mut R,
        size: u64,
    ) -> Result<Sample, SampleError> {
        let bufsize = self.bufsize as u64;

        let mut head = vec![0u8; cmp::min(size, bufsize) as usize];
        src.seek(SeekFrom::Start(0))?;
        src.read_exact(&mut head)?;

        if size <= bufsize {
            return Ok(Sample {
                head,
                tail: None,
                size,
            });
        }

        let mut tail = vec![0u8; self.bufsize];
        src.seek(SeekFrom::Start(size - bufsize))?;
        src.read_exact(&mut tail)?;

        Ok(Sample {
            head,
            tail: Some(tail),
            size,
        })
    }

    /// Sample a forward-only source. The size must be known in advance;
    /// the bytes between the buffers are drained and discarded.
    pub fn sample_stream<R: Read>(
        &self,
        src: &mut R,
        size: Option<u64>,
    ) -> Result<Sample, SampleError> {
        let size = match size {
            Some(size) => size,
            None => return Err(SampleError::UnknownSize),
        };
        let bufsize = self.bufsize as u64;

        let mut head = vec![0u8; cmp::min(size, bufsize) as usize];
        src.read_exact(&mut head)?;

        if size <= bufsize {
            return Ok(Sample {
                head,
                tail: None,
                size,
            });
        }

        let tail = if size >= 2 * bufsize {
            // the tail lies entirely beyond the head: drain the middle.
            skip(src, size - 2 * bufsize)?;
            let mut tail = vec![0u8; self.bufsize];
            src.read_exact(&mut tail)?;
            tail
        } else {
            // bufsize < size < 2 * bufsize: the buffers overlap. the tail
            // starts at `size - bufsize`, inside the head; the rest of it
            // is whatever remains on the stream.
            let start = (size - bufsize) as usize;
            let mut rest = vec![0u8; (size - bufsize) as usize];
            src.read_exact(&mut rest)?;

            let mut tail = Vec::with_capacity(self.bufsize);
            tail.extend_from_slice(&head[start..]);
            tail.extend_from_slice(&rest);
            tail
        };

        Ok(Sample {
            head,
            tail: Some(tail),
            size,
        })
    }
}

/// Discard exactly `n` bytes from the stream.
fn skip<R: Read>(src: &mut R, n: u64) -> Result<(), io::Error> {
    let copied = io::copy(&mut src.by_ref().take(n), &mut io::sink())?;
    if copied != n {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "short read while skipping",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use matches::matches;

    use super::*;

    /// 0, 1, 2, ... wrapping; offsets are recognizable in assertions.
    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn check(size: usize, bufsize: usize) {
        let buf = content(size);
        let expect = Sample::from_bytes(&buf, bufsize);

        let sampler = Sampler::new(bufsize);

        let seekable = sampler
            .sample_seekable(&mut Cursor::new(&buf), size as u64)
            .unwrap();
        assert_eq!(seekable.head(), expect.head(), "seekable head {}/{}", size, bufsize);
        assert_eq!(seekable.tail(), expect.tail(), "seekable tail {}/{}", size, bufsize);
        assert_eq!(seekable.size(), size as u64);

        let streamed = sampler
            .sample_stream(&mut Cursor::new(&buf), Some(size as u64))
            .unwrap();
        assert_eq!(streamed.head(), expect.head(), "streamed head {}/{}", size, bufsize);
        assert_eq!(streamed.tail(), expect.tail(), "streamed tail {}/{}", size, bufsize);
        assert_eq!(streamed.size(), size as u64);
    }

    #[test]
    fn test_small_object_aliases_head_and_tail() {
        let sampler = Sampler::new(16);
        let sample = sampler
            .sample_seekable(&mut Cursor::new(b"hello\n".to_vec()), 6)
            .unwrap();

        assert_eq!(sample.head(), b"hello\n");
        assert_eq!(sample.tail(), b"hello\n");
        assert_eq!(sample.size(), 6);
    }

    #[test]
    fn test_large_object_head_and_tail() {
        let buf = content(100);
        let sampler = Sampler::new(16);
        let sample = sampler
            .sample_seekable(&mut Cursor::new(&buf), 100)
            .unwrap();

        assert_eq!(sample.head(), &buf[..16]);
        assert_eq!(sample.tail(), &buf[84..]);
    }

    #[test]
    fn test_all_size_relations_agree() {
        // exercise the overlap branch (b < s < 2b), exact multiples
        // (s = kb), and sizes not divisible by the buffer.
        for &(size, bufsize) in [
            (0usize, 16usize),
            (1, 16),
            (15, 16),
            (16, 16),
            (17, 16),
            (23, 16),
            (31, 16),
            (32, 16),
            (33, 16),
            (48, 16),
            (49, 16),
            (100, 16),
            (100, 7),
            (5, 1),
        ]
        .iter()
        {
            check(size, bufsize);
        }
    }

    #[test]
    fn test_bufsize_one_is_legal() {
        let sampler = Sampler::new(1);
        let sample = sampler
            .sample_stream(&mut Cursor::new(b"abc".to_vec()), Some(3))
            .unwrap();

        assert_eq!(sample.head(), b"a");
        assert_eq!(sample.tail(), b"c");
    }

    #[test]
    fn test_empty_object_is_legal() {
        let sampler = Sampler::new(16);
        let sample = sampler
            .sample_seekable(&mut Cursor::new(Vec::new()), 0)
            .unwrap();

        assert_eq!(sample.head(), b"");
        assert_eq!(sample.tail(), b"");
        assert_eq!(sample.size(), 0);
    }

    #[test]
    fn test_unknown_size_rejected() {
        let sampler = Sampler::new(16);
        let err = sampler
            .sample_stream(&mut Cursor::new(b"abc".to_vec()), None)
            .unwrap_err();

        assert!(matches!(err, SampleError::UnknownSize));
    }

    #[test]
    fn test_short_source_is_an_io_error() {
        // claimed size exceeds actual content.
        let sampler = Sampler::new(4);
        let err = sampler
            .sample_stream(&mut Cursor::new(b"ab".to_vec()), Some(100))
            .unwrap_err();

        assert!(matches!(err, SampleError::Io(_)));
    }

    #[test]
    #[should_panic]
    fn test_bufsize_zero_panics() {
        Sampler::new(0);
    }
}
