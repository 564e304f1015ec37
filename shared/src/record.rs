//! Run-length compressed input records.
//!
//! A record is a stream of 16-bit words. A word holding a 12-bit
//! [`TickLine`] is applied for exactly one tick. [`RUN_SENTINEL`] introduces a
//! `(sentinel, count, line)` triple that applies `line` for `count` ticks.
//! Words are stored in fixed-size chunks so long sessions grow without
//! reallocating the whole buffer.

use crate::input::TickLine;
use crate::wire::{Reader, WireError, Writer};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const RUN_SENTINEL: u16 = 0xFFFF;
pub const CHUNK_WORDS: usize = 1024;

const FILE_MAGIC: &[u8; 4] = b"PRPL";
const FILE_VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("run at word {0} is missing its count or line")]
    TruncatedRun(usize),

    #[error("word {value:#06x} at {index} is not a tick line")]
    InvalidLine { index: usize, value: u16 },

    #[error("not a record file")]
    BadMagic,

    #[error("unsupported record version {0}")]
    UnsupportedVersion(u16),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunked word storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recording {
    chunks: Vec<Vec<u16>>,
    len: usize,
}

impl Recording {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_word(&mut self, word: u16) {
        match self.chunks.last_mut() {
            Some(chunk) if chunk.len() < CHUNK_WORDS => chunk.push(word),
            _ => {
                let mut chunk = Vec::with_capacity(CHUNK_WORDS);
                chunk.push(word);
                self.chunks.push(chunk);
            }
        }
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn words(&self) -> impl Iterator<Item = u16> + '_ {
        self.chunks.iter().flatten().copied()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        for byte in FILE_MAGIC {
            w.write_u8(*byte);
        }
        w.write_u16(FILE_VERSION);
        w.write_u32(self.len as u32);
        for word in self.words() {
            w.write_u16(word);
        }
        w.into_bytes().to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        let mut r = Reader::new(bytes);
        let mut magic = [0u8; 4];
        for byte in magic.iter_mut() {
            *byte = r.read_u8()?;
        }
        if &magic != FILE_MAGIC {
            return Err(RecordError::BadMagic);
        }
        let version = r.read_u16()?;
        if version != FILE_VERSION {
            return Err(RecordError::UnsupportedVersion(version));
        }

        let count = r.read_u32()? as usize;
        let mut recording = Recording::new();
        for _ in 0..count {
            recording.push_word(r.read_u16()?);
        }
        Ok(recording)
    }

    pub fn save(&self, path: &Path) -> Result<(), RecordError> {
        fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, RecordError> {
        Self::from_bytes(&fs::read(path)?)
    }
}

/// Appends tick lines to a [`Recording`], folding repeats into runs.
#[derive(Debug, Default)]
pub struct RecordEncoder {
    recording: Recording,
    pending: Option<(TickLine, u16)>,
}

impl RecordEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: TickLine) {
        match self.pending {
            Some((pending, count)) if pending == line && count < u16::MAX => {
                self.pending = Some((pending, count + 1));
            }
            Some(_) => {
                self.flush_pending();
                self.pending = Some((line, 1));
            }
            None => self.pending = Some((line, 1)),
        }
    }

    fn flush_pending(&mut self) {
        match self.pending.take() {
            Some((line, 1)) => self.recording.push_word(line.raw()),
            Some((line, count)) => {
                self.recording.push_word(RUN_SENTINEL);
                self.recording.push_word(count);
                self.recording.push_word(line.raw());
            }
            None => {}
        }
    }

    /// Flushes the pending run and returns the finished recording.
    pub fn finish(mut self) -> Recording {
        self.flush_pending();
        self.recording
    }
}

/// Expands a word stream back into one tick line per tick.
#[derive(Debug)]
pub struct Replayer {
    words: Vec<u16>,
    pos: usize,
    run: Option<(TickLine, u16)>,
}

impl Replayer {
    pub fn new(recording: &Recording) -> Self {
        Self {
            words: recording.words().collect(),
            pos: 0,
            run: None,
        }
    }

    fn word(&self, index: usize) -> Result<u16, RecordError> {
        self.words
            .get(index)
            .copied()
            .ok_or(RecordError::TruncatedRun(self.pos))
    }

    fn line(index: usize, value: u16) -> Result<TickLine, RecordError> {
        TickLine::from_raw(value).ok_or(RecordError::InvalidLine { index, value })
    }

    pub fn next_line(&mut self) -> Result<Option<TickLine>, RecordError> {
        loop {
            if let Some((line, left)) = self.run {
                if left > 0 {
                    self.run = Some((line, left - 1));
                    return Ok(Some(line));
                }
                self.run = None;
            }

            let Some(&word) = self.words.get(self.pos) else {
                return Ok(None);
            };

            if word == RUN_SENTINEL {
                let count = self.word(self.pos + 1)?;
                let value = self.word(self.pos + 2)?;
                let line = Self::line(self.pos + 2, value)?;
                self.pos += 3;
                self.run = Some((line, count));
            } else {
                let line = Self::line(self.pos, word)?;
                self.pos += 1;
                return Ok(Some(line));
            }
        }
    }
}

impl Iterator for Replayer {
    type Item = Result<TickLine, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn line(raw: u16) -> TickLine {
        TickLine::from_raw(raw).unwrap()
    }

    fn encode(lines: &[TickLine]) -> Recording {
        let mut encoder = RecordEncoder::new();
        for l in lines {
            encoder.push(*l);
        }
        encoder.finish()
    }

    fn decode(recording: &Recording) -> Vec<TickLine> {
        Replayer::new(recording).map(|l| l.unwrap()).collect()
    }

    #[test]
    fn test_empty_stream() {
        let recording = encode(&[]);
        assert!(recording.is_empty());
        assert!(decode(&recording).is_empty());
    }

    #[test]
    fn test_single_repeat_is_literal() {
        let lines = [line(1), line(2), line(1)];
        let recording = encode(&lines);
        assert_eq!(recording.words().collect::<Vec<_>>(), vec![1, 2, 1]);
        assert_eq!(decode(&recording), lines);
    }

    #[test]
    fn test_runs_are_compressed() {
        let mut lines = vec![line(0); 500];
        lines.push(line(3));
        lines.extend([line(7); 2]);
        let recording = encode(&lines);
        assert_eq!(
            recording.words().collect::<Vec<_>>(),
            vec![RUN_SENTINEL, 500, 0, 3, RUN_SENTINEL, 2, 7]
        );
        assert_eq!(decode(&recording), lines);
    }

    #[test]
    fn test_zero_count_run_yields_nothing() {
        let mut recording = Recording::new();
        for word in [RUN_SENTINEL, 0, 5, 6] {
            recording.push_word(word);
        }
        assert_eq!(decode(&recording), vec![line(6)]);
    }

    #[test]
    fn test_long_run_splits_at_counter_limit() {
        let lines = vec![line(9); u16::MAX as usize + 2];
        let recording = encode(&lines);
        assert_eq!(
            recording.words().collect::<Vec<_>>(),
            vec![RUN_SENTINEL, u16::MAX, 9, RUN_SENTINEL, 2, 9]
        );
        assert_eq!(decode(&recording).len(), lines.len());
    }

    #[test]
    fn test_truncated_run_is_an_error() {
        let mut recording = Recording::new();
        recording.push_word(RUN_SENTINEL);
        recording.push_word(4);
        let mut replayer = Replayer::new(&recording);
        assert!(matches!(
            replayer.next_line(),
            Err(RecordError::TruncatedRun(0))
        ));
    }

    #[test]
    fn test_words_grow_in_chunks() {
        let mut recording = Recording::new();
        for i in 0..(CHUNK_WORDS + 1) {
            recording.push_word((i % 16) as u16);
        }
        assert_eq!(recording.chunk_count(), 2);
        assert_eq!(recording.len(), CHUNK_WORDS + 1);
    }

    #[test]
    fn test_file_bytes_round_trip() {
        let lines: Vec<TickLine> = (0..40).map(|i| line((i / 7) as u16)).collect();
        let recording = encode(&lines);
        let restored = Recording::from_bytes(&recording.to_bytes()).unwrap();
        assert_eq!(restored, recording);
        assert_eq!(decode(&restored), lines);
    }

    #[test]
    fn test_random_streams_replay_exactly() {
        let mut rng = StdRng::seed_from_u64(0x9e37);
        for _ in 0..30 {
            let mut lines = Vec::new();
            for _ in 0..rng.gen_range(0..80) {
                let raw = rng.gen_range(0..=TickLine::MASK);
                let run = match rng.gen_range(0..30) {
                    0 => rng.gen_range(60_000..70_000),
                    1..=9 => rng.gen_range(1..4),
                    _ => rng.gen_range(1..300),
                };
                lines.extend(std::iter::repeat(line(raw)).take(run));
            }

            let recording = encode(&lines);
            assert_eq!(decode(&recording), lines);

            let restored = Recording::from_bytes(&recording.to_bytes()).unwrap();
            assert_eq!(decode(&restored), lines);
        }
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = encode(&[line(1)]).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            Recording::from_bytes(&bytes),
            Err(RecordError::BadMagic)
        ));
    }
}
