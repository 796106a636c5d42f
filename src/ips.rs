//! Classic IPS patch parsing and application.
//!
//! A patch is the literal `PATCH`, a run of records and the literal `EOF`,
//! optionally followed by a 24-bit big-endian size the output is resized to.
//! Each record is a 24-bit offset and a 16-bit length followed either by
//! `length` bytes of payload, or, when the length is zero, by a 16-bit repeat
//! count and a fill byte.

use crate::error::{
    MissingHeader, MissingTerminator, PatchFailed, ResourceLimitExceeded, Result,
    TruncatedRecord,
};
use log::{debug, trace, warn};
use snafu::{ensure, ResultExt};

pub const HEADER: &[u8; 5] = b"PATCH";
pub const TERMINATOR: &[u8; 3] = b"EOF";

/// How a stream that runs out of bytes between two records is treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Terminator {
    /// `EOF` must be present.
    Required,
    /// A stream ending cleanly after a record is accepted as terminated.
    Optional,
}

impl Default for Terminator {
    fn default() -> Self {
        Terminator::Required
    }
}

/// One instruction of a patch stream. Literal payloads borrow from the patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Record<'a> {
    Literal { offset: u32, data: &'a [u8] },
    Rle { offset: u32, count: u16, value: u8 },
}

impl<'a> Record<'a> {
    pub fn offset(&self) -> u32 {
        match *self {
            Record::Literal { offset, .. } | Record::Rle { offset, .. } => offset,
        }
    }

    /// Number of target bytes the record writes.
    pub fn len(&self) -> usize {
        match *self {
            Record::Literal { data, .. } => data.len(),
            Record::Rle { count, .. } => usize::from(count),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Target length required before the record can be written.
    pub fn end(&self) -> usize {
        self.offset() as usize + self.len()
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn peek(&self, n: usize) -> Option<&'a [u8]> {
        self.data.get(self.pos..self.pos + n)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.remaining();
        ensure!(
            available >= n,
            TruncatedRecord {
                offset: self.pos,
                needed: n,
                available,
            }
        );
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from(b[0]) << 8 | u16::from(b[1]))
    }

    fn read_u24(&mut self) -> Result<u32> {
        let b = self.take(3)?;
        Ok(u32::from(b[0]) << 16 | u32::from(b[1]) << 8 | u32::from(b[2]))
    }
}

/// Iterator over the records of a patch stream.
///
/// Iteration stops at the terminator, or at the first error, which is yielded
/// once. After the terminator has been reached, [`Records::final_size`]
/// reports the trailing resize value if the stream carried one.
pub struct Records<'a> {
    cursor: Cursor<'a>,
    terminator: Terminator,
    finished: bool,
    final_size: Option<u32>,
}

impl<'a> Records<'a> {
    /// Checks the header and positions the iterator on the first record.
    pub fn new(patch: &'a [u8], terminator: Terminator) -> Result<Self> {
        ensure!(patch.starts_with(HEADER), MissingHeader);
        Ok(Records {
            cursor: Cursor {
                data: patch,
                pos: HEADER.len(),
            },
            terminator,
            finished: false,
            final_size: None,
        })
    }

    pub fn final_size(&self) -> Option<u32> {
        self.final_size
    }

    fn read_record(&mut self) -> Result<Option<Record<'a>>> {
        if self.cursor.remaining() == 0 {
            let offset = self.cursor.pos;
            return match self.terminator {
                Terminator::Required => MissingTerminator { offset }.fail(),
                Terminator::Optional => {
                    warn!("patch ends at offset {:#x} without \"EOF\"", offset);
                    Ok(None)
                }
            };
        }

        if self.cursor.peek(TERMINATOR.len()) == Some(&TERMINATOR[..]) {
            self.cursor.pos += TERMINATOR.len();
            self.read_trailer()?;
            return Ok(None);
        }

        let offset = self.cursor.read_u24()?;
        let length = self.cursor.read_u16()?;
        let record = if length == 0 {
            let count = self.cursor.read_u16()?;
            let value = self.cursor.read_u8()?;
            Record::Rle {
                offset,
                count,
                value,
            }
        } else {
            Record::Literal {
                offset,
                data: self.cursor.take(usize::from(length))?,
            }
        };
        Ok(Some(record))
    }

    fn read_trailer(&mut self) -> Result<()> {
        match self.cursor.remaining() {
            0 => {}
            3 => {
                let size = self.cursor.read_u24()?;
                debug!("patch sets final size to {:#x}", size);
                self.final_size = Some(size);
            }
            n => {
                warn!(
                    "ignoring {} trailing bytes after \"EOF\" at offset {:#x}",
                    n, self.cursor.pos
                );
                self.cursor.pos = self.cursor.data.len();
            }
        }
        Ok(())
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Applies IPS patches. The default configuration requires the terminator
/// and places no limit on the size of the target.
#[derive(Clone, Copy, Debug, Default)]
pub struct Patcher {
    terminator: Terminator,
    max_target_size: Option<usize>,
}

impl Patcher {
    pub fn new() -> Self {
        Patcher::default()
    }

    pub fn terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    /// Rejects any patch that would grow or resize the target past `limit`.
    pub fn max_target_size(mut self, limit: usize) -> Self {
        self.max_target_size = Some(limit);
        self
    }

    fn check_size(&self, requested: usize) -> Result<()> {
        if let Some(limit) = self.max_target_size {
            ensure!(
                requested <= limit,
                ResourceLimitExceeded { requested, limit }
            );
        }
        Ok(())
    }

    /// Applies `patch` to a copy of `original`.
    ///
    /// Nothing is returned unless every record applied; `original` is never
    /// modified.
    pub fn apply(&self, original: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
        let mut records = Records::new(patch, self.terminator)?;
        let mut target = original.to_vec();
        let mut applied = 0usize;

        for record in records.by_ref() {
            let record = record?;
            trace!(
                "record {} at {:#08x}, {} bytes",
                applied,
                record.offset(),
                record.len()
            );

            let start = record.offset() as usize;
            let end = record.end();
            if end > target.len() {
                self.check_size(end)?;
                target.resize(end, 0);
            }
            match record {
                Record::Literal { data, .. } => target[start..end].copy_from_slice(data),
                Record::Rle { value, .. } => {
                    for byte in &mut target[start..end] {
                        *byte = value;
                    }
                }
            }
            applied += 1;
        }

        if let Some(size) = records.final_size() {
            let size = size as usize;
            self.check_size(size)?;
            target.resize(size, 0);
        }

        debug!(
            "applied {} records, {} -> {} bytes",
            applied,
            original.len(),
            target.len()
        );
        Ok(target)
    }

    /// Applies each patch in turn to the output of the previous one.
    pub fn apply_all<'p, I>(&self, original: &[u8], patches: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = &'p [u8]>,
    {
        let mut current = original.to_vec();
        for (index, patch) in patches.into_iter().enumerate() {
            current = self.apply(&current, patch).context(PatchFailed { index })?;
        }
        Ok(current)
    }
}

/// Applies `patch` to a copy of `original` with the strict defaults.
pub fn apply(original: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    Patcher::default().apply(original, patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn patch(body: &[u8]) -> Vec<u8> {
        let mut p = HEADER.to_vec();
        p.extend_from_slice(body);
        p
    }

    #[test]
    fn reads_fields_big_endian() {
        let p = patch(&[0x12, 0x34, 0x56, 0x00, 0x02, 0xAA, 0xBB, b'E', b'O', b'F']);
        let records: Vec<_> = Records::new(&p, Terminator::Required)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            records,
            vec![Record::Literal {
                offset: 0x123456,
                data: &[0xAA, 0xBB]
            }]
        );
    }

    #[test]
    fn high_bytes_do_not_sign_extend() {
        let p = patch(&[0xFF, 0xFF, 0xFF, 0x00, 0x00, 0xFF, 0xFF, 0x80, b'E', b'O', b'F']);
        let mut records = Records::new(&p, Terminator::Required).unwrap();
        let record = records.next().unwrap().unwrap();
        assert_eq!(
            record,
            Record::Rle {
                offset: 0xFF_FFFF,
                count: 0xFFFF,
                value: 0x80
            }
        );
        assert_eq!(record.end(), 0xFF_FFFF + 0xFFFF);
        assert!(records.next().is_none());
    }

    #[test]
    fn empty_patch_returns_copy() {
        let original = [1, 2, 3];
        assert_eq!(apply(&original, &patch(b"EOF")).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn short_header_is_rejected() {
        assert!(matches!(apply(&[], b"PAT"), Err(Error::MissingHeader)));
        assert!(matches!(apply(&[], b"patchEOF"), Err(Error::MissingHeader)));
    }

    #[test]
    fn zero_count_rle_still_grows_target() {
        let p = patch(&[0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x55, b'E', b'O', b'F']);
        assert_eq!(apply(&[9, 9], &p).unwrap(), vec![9, 9, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn missing_terminator_is_strict_by_default() {
        let p = patch(&[0x00, 0x00, 0x00, 0x00, 0x01, 0x42]);
        match apply(&[0; 2], &p) {
            Err(Error::MissingTerminator { offset }) => assert_eq!(offset, p.len()),
            other => panic!("unexpected result: {:?}", other),
        }

        let lenient = Patcher::new().terminator(Terminator::Optional);
        assert_eq!(lenient.apply(&[0; 2], &p).unwrap(), vec![0x42, 0]);
    }

    #[test]
    fn lenient_mode_still_rejects_truncated_records() {
        let p = patch(&[0x00, 0x00, 0x00, 0x00]);
        let lenient = Patcher::new().terminator(Terminator::Optional);
        match lenient.apply(&[], &p) {
            Err(Error::TruncatedRecord {
                offset,
                needed,
                available,
            }) => {
                assert_eq!(offset, 8);
                assert_eq!(needed, 2);
                assert_eq!(available, 1);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn final_size_truncates_and_extends() {
        let shrink = patch(&[b'E', b'O', b'F', 0x00, 0x00, 0x02]);
        assert_eq!(apply(&[1, 2, 3, 4], &shrink).unwrap(), vec![1, 2]);

        let grow = patch(&[b'E', b'O', b'F', 0x00, 0x00, 0x06]);
        assert_eq!(apply(&[1, 2, 3, 4], &grow).unwrap(), vec![1, 2, 3, 4, 0, 0]);
    }

    #[test]
    fn unexpected_trailing_bytes_are_ignored() {
        let p = patch(&[b'E', b'O', b'F', 0x00, 0x01]);
        assert_eq!(apply(&[1, 2, 3], &p).unwrap(), vec![1, 2, 3]);

        let p = patch(&[b'E', b'O', b'F', 0x00, 0x00, 0x01, 0xFF]);
        assert_eq!(apply(&[1, 2, 3], &p).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn size_limit_covers_growth_and_resize() {
        let limited = Patcher::new().max_target_size(4);
        let grow = patch(&[0x00, 0x00, 0x04, 0x00, 0x01, 0x01, b'E', b'O', b'F']);
        match limited.apply(&[], &grow) {
            Err(Error::ResourceLimitExceeded { requested, limit }) => {
                assert_eq!((requested, limit), (5, 4));
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let resize = patch(&[b'E', b'O', b'F', 0x00, 0x01, 0x00]);
        assert!(matches!(
            limited.apply(&[], &resize),
            Err(Error::ResourceLimitExceeded { .. })
        ));

        let within = patch(&[0x00, 0x00, 0x03, 0x00, 0x01, 0x01, b'E', b'O', b'F']);
        assert_eq!(limited.apply(&[], &within).unwrap(), vec![0, 0, 0, 1]);
    }

    #[test]
    fn apply_all_chains_and_reports_index() {
        let first = patch(&[0x00, 0x00, 0x00, 0x00, 0x01, 0x0A, b'E', b'O', b'F']);
        let second = patch(&[0x00, 0x00, 0x01, 0x00, 0x01, 0x0B, b'E', b'O', b'F']);
        let patcher = Patcher::new();

        let out = patcher
            .apply_all(&[0, 0], vec![&first[..], &second[..]])
            .unwrap();
        assert_eq!(out, vec![0x0A, 0x0B]);

        let broken = b"NOPE".to_vec();
        match patcher.apply_all(&[0, 0], vec![&first[..], &broken[..]]) {
            Err(Error::PatchFailed { index, source }) => {
                assert_eq!(index, 1);
                assert!(matches!(*source, Error::MissingHeader));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn record_at_eof_offset_reads_as_terminator() {
        let p = patch(&[0x45, 0x4F, 0x46, 0x00, 0x01, 0x42, b'E', b'O', b'F']);
        assert_eq!(apply(&[1, 2, 3], &p).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn partial_terminator_is_truncated_in_both_modes() {
        let p = patch(&[0x00, 0x00, 0x00, 0x00, 0x01, 0x42, b'E', b'O']);
        for mode in [Terminator::Required, Terminator::Optional].iter() {
            match Patcher::new().terminator(*mode).apply(&[0; 2], &p) {
                Err(Error::TruncatedRecord {
                    offset,
                    needed,
                    available,
                }) => assert_eq!((offset, needed, available), (11, 3, 2)),
                other => panic!("unexpected result for {:?}: {:?}", mode, other),
            }
        }
    }

    #[test]
    fn header_only_patch() {
        match apply(&[7, 8], HEADER) {
            Err(Error::MissingTerminator { offset }) => assert_eq!(offset, 5),
            other => panic!("unexpected result: {:?}", other),
        }
        let lenient = Patcher::new().terminator(Terminator::Optional);
        assert_eq!(lenient.apply(&[7, 8], HEADER).unwrap(), vec![7, 8]);
    }

    #[test]
    fn largest_record_grows_without_overflow() {
        let p = patch(&[0xFF, 0xFF, 0xFF, 0x00, 0x00, 0xFF, 0xFF, 0x01, b'E', b'O', b'F']);
        let out = apply(&[], &p).unwrap();
        assert_eq!(out.len(), 0xFF_FFFF + 0xFFFF);
        assert_eq!(out[0xFF_FFFE], 0);
        assert_eq!(out[0xFF_FFFF], 1);
        assert_eq!(out[out.len() - 1], 1);
    }
}
