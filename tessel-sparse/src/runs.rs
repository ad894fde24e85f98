//! Run-level encoding and decoding of the sparse image payload.
//!
//! The payload is a sequence of records `(inactive: u32, active: u32)`
//! followed by `active` pixel fragments. Records cover the declared pixel
//! count exactly.

use crate::sparse::{patch_payload_len, write_header};
use crate::{FormatError, PixelLayout, Result, SparseImage};

/// Incrementally encodes a sparse image, merging adjacent pushes of the same
/// kind into single runs.
pub(crate) struct SparseBuilder {
    buf: Vec<u8>,
    frag: usize,
    declared: usize,
    covered: usize,
    pending_inactive: usize,
    // Byte offset of the active count of the still-open record.
    open_active_at: Option<usize>,
}

impl SparseBuilder {
    /// Starts an image of the given dimensions, reusing the capacity of `buf`.
    pub(crate) fn new(mut buf: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> Self {
        buf.clear();
        write_header(&mut buf, width, height, layout);
        Self {
            buf,
            frag: layout.fragment_bytes(),
            declared: (width as usize) * (height as usize),
            covered: 0,
            pending_inactive: 0,
            open_active_at: None,
        }
    }

    pub(crate) fn push_inactive(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.open_active_at = None;
        self.pending_inactive += count;
        self.covered += count;
    }

    /// Appends `count` active pixels with their fragment bytes.
    pub(crate) fn push_active(&mut self, count: usize, fragments: &[u8]) {
        debug_assert_eq!(fragments.len(), count * self.frag);
        if count == 0 {
            return;
        }

        match self.open_active_at {
            Some(at) => {
                let prev = u32::from_le_bytes(self.buf[at..at + 4].try_into().unwrap());
                self.buf[at..at + 4].copy_from_slice(&(prev + count as u32).to_le_bytes());
            }
            None => {
                self.buf
                    .extend_from_slice(&(self.pending_inactive as u32).to_le_bytes());
                self.pending_inactive = 0;
                self.open_active_at = Some(self.buf.len());
                self.buf.extend_from_slice(&(count as u32).to_le_bytes());
            }
        }

        self.buf.extend_from_slice(fragments);
        self.covered += count;
    }

    pub(crate) fn finish(mut self) -> SparseImage {
        if self.pending_inactive > 0 {
            self.buf
                .extend_from_slice(&(self.pending_inactive as u32).to_le_bytes());
            self.buf.extend_from_slice(&0_u32.to_le_bytes());
        }
        assert_eq!(
            self.covered, self.declared,
            "run records must cover the image exactly"
        );
        patch_payload_len(&mut self.buf);
        SparseImage::from_validated(self.buf)
    }
}

/// Checks that a payload is structurally sound: records complete, fragment
/// data present, pixel counts adding up to the declared total.
pub(crate) fn validate_payload(data: &[u8], frag: usize, declared: u64) -> Result<()> {
    let mut covered: u64 = 0;
    let mut pos = 0;

    while pos < data.len() {
        if data.len() - pos < 8 {
            return Err(FormatError::Truncated);
        }
        let inactive = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
        let active = u32::from_le_bytes(data[pos + 4..pos + 8].try_into().unwrap());
        pos += 8;

        let fragment_bytes = active as usize * frag;
        if data.len() - pos < fragment_bytes {
            return Err(FormatError::Truncated);
        }
        pos += fragment_bytes;

        covered += inactive as u64 + active as u64;
    }

    if covered != declared {
        return Err(FormatError::PixelCountMismatch { declared, covered });
    }
    Ok(())
}

/// One run record of a validated payload.
pub(crate) struct Run<'a> {
    pub(crate) inactive: usize,
    pub(crate) active: usize,
    pub(crate) fragments: &'a [u8],
}

/// Iterates the run records of a validated payload.
pub(crate) struct RunIter<'a> {
    data: &'a [u8],
    pos: usize,
    frag: usize,
}

impl<'a> RunIter<'a> {
    pub(crate) fn new(data: &'a [u8], frag: usize) -> Self {
        Self { data, pos: 0, frag }
    }
}

impl<'a> Iterator for RunIter<'a> {
    type Item = Run<'a>;

    fn next(&mut self) -> Option<Run<'a>> {
        if self.pos >= self.data.len() {
            return None;
        }

        let inactive = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        let active = u32::from_le_bytes(self.data[self.pos + 4..self.pos + 8].try_into().unwrap());
        self.pos += 8;

        let fragment_bytes = active as usize * self.frag;
        let fragments = &self.data[self.pos..self.pos + fragment_bytes];
        self.pos += fragment_bytes;

        Some(Run {
            inactive: inactive as usize,
            active: active as usize,
            fragments,
        })
    }
}

/// Walks a payload pixel by pixel, in segments of uniform activity.
pub(crate) struct PixelCursor<'a> {
    runs: RunIter<'a>,
    frag: usize,
    active: bool,
    remaining: usize,
    fragments: &'a [u8],
    queued_active: Option<(usize, &'a [u8])>,
}

impl<'a> PixelCursor<'a> {
    pub(crate) fn new(payload: &'a [u8], frag: usize) -> Self {
        Self {
            runs: RunIter::new(payload, frag),
            frag,
            active: false,
            remaining: 0,
            fragments: &[],
            queued_active: None,
        }
    }

    fn refill(&mut self) {
        while self.remaining == 0 {
            if let Some((active, fragments)) = self.queued_active.take() {
                self.active = true;
                self.remaining = active;
                self.fragments = fragments;
                continue;
            }
            let Some(run) = self.runs.next() else {
                return;
            };
            if run.active > 0 {
                self.queued_active = Some((run.active, run.fragments));
            }
            self.active = false;
            self.remaining = run.inactive;
        }
    }

    /// Remaining pixels in the current segment; 0 once the image is spent.
    pub(crate) fn segment_len(&mut self) -> usize {
        self.refill();
        self.remaining
    }

    pub(crate) fn segment_active(&mut self) -> bool {
        self.refill();
        self.active
    }

    /// Consumes up to `max` pixels without crossing a segment boundary.
    /// Returns the activity, the number of pixels consumed, and their
    /// fragment bytes (empty for inactive segments).
    pub(crate) fn take(&mut self, max: usize) -> (bool, usize, &'a [u8]) {
        self.refill();
        let n = max.min(self.remaining);
        self.remaining -= n;
        if self.active {
            let (head, tail) = self.fragments.split_at(n * self.frag);
            self.fragments = tail;
            (true, n, head)
        } else {
            (false, n, &[])
        }
    }

    pub(crate) fn skip(&mut self, mut n: usize) {
        while n > 0 {
            let (_, took, _) = self.take(n);
            debug_assert!(took > 0, "skipped past the end of the image");
            if took == 0 {
                return;
            }
            n -= took;
        }
    }
}
