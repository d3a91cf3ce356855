//! Check-in filter: split the input into fixed-size chunks, cache each one
//! under its digest and emit the manifest.

use std::io::{self, Read, Write};

use gitbin_cas::{ChunkId, ChunkStore};
use gitbin_config::{log_clean_debug, log_clean_info};
use gitbin_manifest::Manifest;

use crate::Result;

/// What the clean filter wrote to its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanOutcome {
    /// Input was chunked; this manifest was emitted.
    Manifest(Manifest),
    /// Input already was a manifest and was copied through unchanged.
    PassThrough { bytes: u64 },
}

pub struct CleanFilter<'s> {
    store: &'s ChunkStore,
    chunk_size: usize,
}

impl<'s> CleanFilter<'s> {
    /// `chunk_size` is clamped to at least one byte.
    pub fn new(store: &'s ChunkStore, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Consume `input` to the end and write the manifest for it to `output`.
    ///
    /// Only the first chunk is probed for an existing manifest. Nothing is
    /// written to `output` if reading or caching fails.
    pub fn run<R: Read, W: Write>(
        &self,
        filename: &str,
        mut input: R,
        mut output: W,
    ) -> Result<CleanOutcome> {
        let mut buffer = vec![0u8; self.chunk_size];
        let mut manifest = Manifest::new(filename);
        let mut first = true;

        loop {
            let filled = fill_buffer(&mut input, &mut buffer)?;
            if filled == 0 {
                break;
            }
            let chunk = &buffer[..filled];

            if first {
                first = false;
                if Manifest::detect(chunk).is_some() {
                    output.write_all(chunk)?;
                    let rest = io::copy(&mut input, &mut output)?;
                    output.flush()?;
                    log_clean_info!("input is already a manifest, passing through", filename = filename);
                    return Ok(CleanOutcome::PassThrough {
                        bytes: filled as u64 + rest,
                    });
                }
            }

            let id = ChunkId::compute(chunk);
            let written = self.store.write(&id, chunk)?;
            log_clean_debug!("chunk cached", id = id.as_str(), bytes = filled, written = written);
            manifest.record_chunk(id);

            // Short fill means end of input
            if filled < buffer.len() {
                break;
            }
        }

        let document = manifest.to_document()?;
        output.write_all(document.as_bytes())?;
        output.flush()?;

        log_clean_info!("file cleaned", filename = filename, chunks = manifest.len());
        Ok(CleanOutcome::Manifest(manifest))
    }
}

/// Read until `buf` is full or input ends. Returns the number of bytes read.
fn fill_buffer<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Hands out at most `step` bytes per read and interrupts every other call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
        interrupt: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "signal"));
            }
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }
    }

    #[test]
    fn test_scenario_nine_bytes_in_fours() {
        let temp = TempDir::new().unwrap();
        let store = ChunkStore::new(temp.path()).unwrap();
        let mut output = Vec::new();

        let outcome = CleanFilter::new(&store, 4)
            .run("letters.bin", &b"ABCDEFGHI"[..], &mut output)
            .unwrap();

        let CleanOutcome::Manifest(manifest) = outcome else {
            panic!("expected a manifest");
        };
        assert_eq!(
            manifest.chunk_hashes(),
            &[
                ChunkId::compute(b"ABCD"),
                ChunkId::compute(b"EFGH"),
                ChunkId::compute(b"I"),
            ]
        );
        assert_eq!(store.read(&ChunkId::compute(b"I")).unwrap(), b"I");
        assert_eq!(
            Manifest::from_document(std::str::from_utf8(&output).unwrap()).unwrap(),
            manifest
        );
    }

    #[test]
    fn test_short_reads_still_fill_chunks() {
        let temp = TempDir::new().unwrap();
        let store = ChunkStore::new(temp.path()).unwrap();
        let data: Vec<u8> = (0..100u8).collect();
        let input = Trickle {
            data: data.clone(),
            pos: 0,
            step: 3,
            interrupt: false,
        };

        let outcome = CleanFilter::new(&store, 32)
            .run("trickle.bin", input, io::sink())
            .unwrap();

        let CleanOutcome::Manifest(manifest) = outcome else {
            panic!("expected a manifest");
        };
        assert_eq!(manifest.len(), 4);
        assert_eq!(manifest.chunk_hashes()[0], ChunkId::compute(&data[..32]));
        assert_eq!(manifest.chunk_hashes()[3], ChunkId::compute(&data[96..]));
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail_chunk() {
        let temp = TempDir::new().unwrap();
        let store = ChunkStore::new(temp.path()).unwrap();

        let outcome = CleanFilter::new(&store, 4)
            .run("eight.bin", &b"ABCDEFGH"[..], io::sink())
            .unwrap();

        let CleanOutcome::Manifest(manifest) = outcome else {
            panic!("expected a manifest");
        };
        assert_eq!(manifest.len(), 2);
    }

    #[test]
    fn test_empty_input_gives_empty_manifest() {
        let temp = TempDir::new().unwrap();
        let store = ChunkStore::new(temp.path()).unwrap();
        let mut output = Vec::new();

        let outcome = CleanFilter::new(&store, 4)
            .run("empty.bin", io::empty(), &mut output)
            .unwrap();

        assert!(matches!(outcome, CleanOutcome::Manifest(ref m) if m.is_empty()));
        assert!(Manifest::detect(&output).unwrap().is_empty());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_existing_manifest_passes_through_verbatim() {
        let temp = TempDir::new().unwrap();
        let store = ChunkStore::new(temp.path()).unwrap();
        let mut manifest = Manifest::new("already.bin");
        manifest.record_chunk(ChunkId::compute(b"x"));
        let document = manifest.to_document().unwrap();
        let mut output = Vec::new();

        let outcome = CleanFilter::new(&store, 1024 * 1024)
            .run("already.bin", document.as_bytes(), &mut output)
            .unwrap();

        assert_eq!(
            outcome,
            CleanOutcome::PassThrough {
                bytes: document.len() as u64
            }
        );
        assert_eq!(output, document.as_bytes());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_read_error_emits_nothing() {
        let temp = TempDir::new().unwrap();
        let store = ChunkStore::new(temp.path()).unwrap();
        let mut output = Vec::new();

        let result = CleanFilter::new(&store, 4).run("broken.bin", Broken, &mut output);

        assert!(matches!(result, Err(crate::FilterError::Io(_))));
        assert!(output.is_empty());
    }

    #[test]
    fn test_zero_chunk_size_is_clamped() {
        let temp = TempDir::new().unwrap();
        let store = ChunkStore::new(temp.path()).unwrap();
        assert_eq!(CleanFilter::new(&store, 0).chunk_size(), 1);
    }
}
