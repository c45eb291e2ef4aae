//! Bump allocation over a fixed-capacity byte region.
//!
//! Every string the shell builds while handling a line lives in a scratch
//! [`Arena`] that is rewound between lines; long-lived tables own a
//! persistent one. Nothing is freed individually.
//!
//! Allocations are handed out as offset handles ([`Span`], [`Str`]) rather
//! than references, so the argument list and the tables can hold them while
//! the arena itself keeps growing. A handle is valid until the owner calls
//! [`Arena::reset`].

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaError {
    #[error("arena exhausted: requested {requested} bytes with {available} available")]
    Exhausted { requested: usize, available: usize },
}

/// A raw byte range inside an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    offset: usize,
    len: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A UTF-8 string stored in an arena.
///
/// The length never includes a terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Str(Span);

impl Str {
    pub const EMPTY: Str = Str(Span { offset: 0, len: 0 });

    pub fn len(&self) -> usize {
        self.0.len
    }

    pub fn is_empty(&self) -> bool {
        self.0.len == 0
    }
}

/// Fixed-capacity bump allocator.
#[derive(Debug)]
pub struct Arena {
    buf: Vec<u8>,
    cursor: usize,
}

impl Arena {
    /// Create an arena able to hold `capacity` bytes. The region never grows.
    pub fn new(capacity: usize) -> Self {
        Arena {
            buf: vec![0; capacity],
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn used(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.cursor
    }

    /// Reserve `count * elem_size` zeroed bytes aligned to `align`.
    pub fn allocate(&mut self, count: usize, elem_size: usize, align: usize) -> Result<Span, ArenaError> {
        let align = align.max(1);
        let padding = (align - self.cursor % align) % align;
        let available = self.remaining().saturating_sub(padding);
        let requested = count.saturating_mul(elem_size);
        if available == 0 || requested > available {
            tracing::warn!(requested, available, "arena exhausted");
            return Err(ArenaError::Exhausted { requested, available });
        }

        let offset = self.cursor + padding;
        self.buf[offset..offset + requested].fill(0);
        self.cursor = offset + requested;
        Ok(Span { offset, len: requested })
    }

    /// Allocate a new block and copy the old payload into it.
    ///
    /// The old block stays where it is as unreachable garbage.
    pub fn reallocate(
        &mut self,
        new_count: usize,
        elem_size: usize,
        align: usize,
        old: Span,
    ) -> Result<Span, ArenaError> {
        let new = self.allocate(new_count, elem_size, align)?;
        let keep = old.len.min(new.len);
        self.buf.copy_within(old.offset..old.offset + keep, new.offset);
        Ok(new)
    }

    /// Copy `s` into the arena.
    pub fn alloc_str(&mut self, s: &str) -> Result<Str, ArenaError> {
        if s.is_empty() {
            return Ok(Str::EMPTY);
        }
        let span = self.allocate(s.len(), 1, 1)?;
        self.buf[span.offset..span.offset + span.len].copy_from_slice(s.as_bytes());
        Ok(Str(span))
    }

    /// Copy the concatenation of `parts` into the arena as one string.
    pub fn concat(&mut self, parts: &[&str]) -> Result<Str, ArenaError> {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        if total == 0 {
            return Ok(Str::EMPTY);
        }
        let span = self.allocate(total, 1, 1)?;
        let mut at = span.offset;
        for part in parts {
            self.buf[at..at + part.len()].copy_from_slice(part.as_bytes());
            at += part.len();
        }
        Ok(Str(span))
    }

    /// Write `s` over the `room` bytes starting at `old` if it fits there.
    pub fn overwrite(&mut self, old: Str, room: usize, s: &str) -> Option<Str> {
        if s.len() > room {
            return None;
        }
        let offset = old.0.offset;
        self.buf
            .get_mut(offset..offset + s.len())?
            .copy_from_slice(s.as_bytes());
        Some(Str(Span { offset, len: s.len() }))
    }

    pub fn get(&self, s: Str) -> &str {
        self.buf
            .get(s.0.offset..s.0.offset + s.0.len)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .unwrap_or("")
    }

    pub fn bytes(&self, span: Span) -> &[u8] {
        self.buf.get(span.offset..span.offset + span.len).unwrap_or(&[])
    }

    pub fn bytes_mut(&mut self, span: Span) -> &mut [u8] {
        self.buf
            .get_mut(span.offset..span.offset + span.len)
            .unwrap_or(&mut [])
    }

    /// Rewind to the start of the region. Every outstanding handle is invalidated.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// A string under construction that grows by copy-and-abandon inside an arena.
#[derive(Debug, Default)]
pub struct StrBuf {
    span: Span,
    len: usize,
}

impl StrBuf {
    const INITIAL_CAPACITY: usize = 16;

    pub fn new() -> Self {
        StrBuf::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, arena: &mut Arena, c: char) -> Result<(), ArenaError> {
        let mut utf8 = [0u8; 4];
        self.push_str(arena, c.encode_utf8(&mut utf8))
    }

    pub fn push_str(&mut self, arena: &mut Arena, s: &str) -> Result<(), ArenaError> {
        if s.is_empty() {
            return Ok(());
        }
        let needed = self.len + s.len();
        if needed > self.span.len {
            let mut capacity = self.span.len.max(Self::INITIAL_CAPACITY);
            while capacity < needed {
                capacity *= 2;
            }
            self.span = if self.span.len == 0 {
                arena.allocate(capacity, 1, 1)?
            } else {
                arena.reallocate(capacity, 1, 1, self.span)?
            };
        }
        let start = self.span.offset + self.len;
        arena.buf[start..start + s.len()].copy_from_slice(s.as_bytes());
        self.len = needed;
        Ok(())
    }

    pub fn as_str<'a>(&self, arena: &'a Arena) -> &'a str {
        arena.get(self.as_handle())
    }

    /// Hand out the finished string. The buffer is left empty.
    pub fn finish(&mut self) -> Str {
        let s = self.as_handle();
        *self = StrBuf::default();
        s
    }

    fn as_handle(&self) -> Str {
        if self.len == 0 {
            return Str::EMPTY;
        }
        Str(Span {
            offset: self.span.offset,
            len: self.len,
        })
    }
}
