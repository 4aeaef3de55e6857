// Single-channel cursors over a locked ring snapshot
//
// A ring holds retained scans in two contiguous runs: from the head to the
// end of storage (the right-hand side) and then from index zero. Walkers
// step one scan at a time across that seam.

/// Borrowed snapshot of a stream's ring, valid while the stream lock is held.
#[derive(Clone, Copy)]
pub struct RingView<'a> {
    buf: &'a [i16],
    bufmax: usize,
    head: usize,
    len: usize,
    n_chans: usize,
    end_ct: u64,
}

impl<'a> RingView<'a> {
    pub(crate) fn new(
        buf: &'a [i16],
        bufmax: usize,
        head: usize,
        len: usize,
        n_chans: usize,
        end_ct: u64,
    ) -> Self {
        Self {
            buf,
            bufmax,
            head,
            len,
            n_chans,
            end_ct,
        }
    }

    pub fn end_ct(&self) -> u64 {
        self.end_ct
    }

    pub fn head_ct(&self) -> u64 {
        self.end_ct - self.len as u64
    }

    pub fn n_chans(&self) -> usize {
        self.n_chans
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Window of the ring from a start count to the end, split at the seam.
#[derive(Clone, Copy, Default)]
struct Span {
    /// Ring index of the first scan
    head: usize,
    /// Scans from the start to the end count
    len: usize,
    /// Scans before the seam
    nrhs: usize,
    start_ct: u64,
}

impl Span {
    fn locate(view: &RingView<'_>, from_ct: u64) -> Option<Self> {
        if from_ct >= view.end_ct {
            return None;
        }

        let from_ct = from_ct.max(view.head_ct());
        let offset = (from_ct - view.head_ct()) as usize;
        let head = (view.head + offset) % view.bufmax;
        let len = view.len - offset;

        Some(Self {
            head,
            len,
            nrhs: len.min(view.bufmax - head),
            start_ct: from_ct,
        })
    }

    /// Ring index of the `i`th scan of the span.
    fn ring_index(&self, i: usize) -> usize {
        if i < self.nrhs {
            self.head + i
        } else {
            i - self.nrhs
        }
    }
}

/// A forward cursor over the samples of one channel.
pub trait SampleCursor {
    /// Sample at the current position.
    fn current(&self) -> i16;

    /// Step one scan; false once past the end count.
    fn advance(&mut self) -> bool;

    /// Count of the current scan.
    fn cur_ct(&self) -> u64;
}

pub struct StreamWalker<'a> {
    view: RingView<'a>,
    chan: usize,
    span: Span,
    icur: usize,
    pos: usize,
}

impl<'a> StreamWalker<'a> {
    pub fn new(view: RingView<'a>, chan: usize) -> Self {
        Self {
            view,
            chan,
            span: Span::default(),
            icur: 0,
            pos: chan,
        }
    }

    /// Position on `from_ct`, clamped up to the oldest retained count.
    ///
    /// False when `from_ct` is at or past the end count.
    pub fn set_start(&mut self, from_ct: u64) -> bool {
        if self.chan >= self.view.n_chans {
            return false;
        }

        match Span::locate(&self.view, from_ct) {
            Some(span) => {
                self.span = span;
                self.icur = 0;
                self.pos = span.head * self.view.n_chans + self.chan;
                true
            }
            None => false,
        }
    }

    pub fn next(&mut self) -> bool {
        self.icur += 1;
        if self.icur >= self.span.len {
            return false;
        }

        if self.icur != self.span.nrhs {
            self.pos += self.view.n_chans;
        } else {
            self.pos = self.chan;
        }
        true
    }

    pub fn cur(&self) -> i16 {
        self.view.buf[self.pos]
    }

    pub fn cur_ct(&self) -> u64 {
        self.span.start_ct + self.icur as u64
    }
}

impl SampleCursor for StreamWalker<'_> {
    fn current(&self) -> i16 {
        self.cur()
    }

    fn advance(&mut self) -> bool {
        self.next()
    }

    fn cur_ct(&self) -> u64 {
        StreamWalker::cur_ct(self)
    }
}

/// In-place filter applied to chunks of one channel.
///
/// The scratch buffer length bounds the chunk size.
pub trait ChunkFilter {
    fn channel(&self) -> usize;

    fn scratch(&self) -> &[i16];

    fn scratch_mut(&mut self) -> &mut [i16];

    /// Filter the first `n` scratch samples in place.
    fn apply(&mut self, n: usize);
}

/// Walker yielding filtered samples of the filter's channel.
///
/// Raw samples are pulled into the filter's scratch a chunk at a time. A
/// chunk never crosses the ring seam.
pub struct FilteredStreamWalker<'a, 'f, F: ChunkFilter> {
    view: RingView<'a>,
    filter: &'f mut F,
    span: Span,
    icur: usize,
    iflt: usize,
    nflt: usize,
}

impl<'a, 'f, F: ChunkFilter> FilteredStreamWalker<'a, 'f, F> {
    pub fn new(view: RingView<'a>, filter: &'f mut F) -> Self {
        Self {
            view,
            filter,
            span: Span::default(),
            icur: 0,
            iflt: 0,
            nflt: 0,
        }
    }

    /// As `StreamWalker::set_start`; also false when the filter's scratch
    /// is empty or its channel is out of range.
    pub fn set_start(&mut self, from_ct: u64) -> bool {
        if self.filter.scratch().is_empty() || self.filter.channel() >= self.view.n_chans {
            return false;
        }

        match Span::locate(&self.view, from_ct) {
            Some(span) => {
                self.span = span;
                self.icur = 0;
                self.fill_chunk();
                true
            }
            None => false,
        }
    }

    fn fill_chunk(&mut self) {
        let seg_end = if self.icur < self.span.nrhs {
            self.span.nrhs
        } else {
            self.span.len
        };
        let n = self.filter.scratch().len().min(seg_end - self.icur);

        let nc = self.view.n_chans;
        let chan = self.filter.channel();
        let first = self.span.ring_index(self.icur) * nc + chan;

        let buf = self.view.buf;
        let raw = buf[first..].iter().step_by(nc);
        for (dst, &src) in self.filter.scratch_mut()[..n].iter_mut().zip(raw) {
            *dst = src;
        }

        self.filter.apply(n);
        self.iflt = 0;
        self.nflt = n;
    }

    pub fn next(&mut self) -> bool {
        self.icur += 1;
        if self.icur >= self.span.len {
            return false;
        }

        self.iflt += 1;
        if self.iflt >= self.nflt {
            self.fill_chunk();
        }
        true
    }

    pub fn cur(&self) -> i16 {
        self.filter.scratch()[self.iflt]
    }

    pub fn cur_ct(&self) -> u64 {
        self.span.start_ct + self.icur as u64
    }
}

impl<F: ChunkFilter> SampleCursor for FilteredStreamWalker<'_, '_, F> {
    fn current(&self) -> i16 {
        self.cur()
    }

    fn advance(&mut self) -> bool {
        self.next()
    }

    fn cur_ct(&self) -> u64 {
        FilteredStreamWalker::cur_ct(self)
    }
}
