//! # Pack
//!
//! The tag-length-value byte format every frame is written in.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Containers**: `[Tag: 1b][Len: 4b][Body: Len]`
//!
//! All integers are little-endian. Container lengths are patched when the
//! scope closes, so the encoder never needs to know sizes up front.

/// Pack encoding and decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a known `Tag`.
    InvalidTag(u8),
    /// Expected one tag, found another.
    UnexpectedTag { expected: Tag, found: Tag },
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Closing a scope that is not the innermost open scope.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// Attempted to close a scope when only the root remains.
    ScopeUnderflow,
    /// Attempted to finish the buffer with open scopes.
    ScopeStillOpen,
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Blob or container length exceeds `u32::MAX`.
    TooLarge(usize),
    /// A single-item scope (option, result, variant) received a second item.
    TooManyItems(Scope),
    /// A single-item scope was closed without its item.
    EmptyScope(Scope),
    /// Only variants may be written directly into a map.
    InvalidMapEntry,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTag(b) => write!(f, "invalid tag byte {:#04x}", b),
            Self::UnexpectedTag { expected, found } => {
                write!(f, "expected tag {:?}, found {:?}", expected, found)
            }
            Self::ScopeMismatch { expected, actual } => {
                write!(f, "scope mismatch: expected {:?}, found {:?}", expected, actual)
            }
            Self::TooManyItems(s) => write!(f, "scope {:?} takes exactly one item", s),
            Self::EmptyScope(s) => write!(f, "scope {:?} closed without an item", s),
            Self::TooLarge(n) => write!(f, "blob of {} bytes exceeds u32 length", n),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the kind of an encoded item.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    BoolTrue = 0x01,
    BoolFalse = 0x02,
    U32 = 0x05,
    U64 = 0x06,
    S32 = 0x09,
    S64 = 0x0A,
    F64 = 0x0C,
    Char = 0x0D,
    Unit = 0x0E,
    OptionNone = 0x0F,

    String = 0x10,
    Bytes = 0x11,

    List = 0x20,
    Map = 0x21,

    OptionSome = 0x30,
    ResultOk = 0x31,
    ResultErr = 0x32,
    Variant = 0x33,
}

impl Tag {
    pub fn from_u8(b: u8) -> Option<Self> {
        let tag = match b {
            0x01 => Tag::BoolTrue,
            0x02 => Tag::BoolFalse,
            0x05 => Tag::U32,
            0x06 => Tag::U64,
            0x09 => Tag::S32,
            0x0A => Tag::S64,
            0x0C => Tag::F64,
            0x0D => Tag::Char,
            0x0E => Tag::Unit,
            0x0F => Tag::OptionNone,
            0x10 => Tag::String,
            0x11 => Tag::Bytes,
            0x20 => Tag::List,
            0x21 => Tag::Map,
            0x30 => Tag::OptionSome,
            0x31 => Tag::ResultOk,
            0x32 => Tag::ResultErr,
            0x33 => Tag::Variant,
            _ => return None,
        };
        Some(tag)
    }

    /// Fixed payload width of a scalar tag, `None` for length-prefixed tags.
    fn fixed_width(self) -> Option<usize> {
        match self {
            Tag::BoolTrue | Tag::BoolFalse | Tag::Unit | Tag::OptionNone => Some(0),
            Tag::U32 | Tag::S32 | Tag::Char => Some(4),
            Tag::U64 | Tag::S64 | Tag::F64 => Some(8),
            _ => None,
        }
    }
}

/// Open container kinds tracked by the `Encoder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Root,
    List,
    Map,
    Option,
    Result,
    Variant,
}

impl Scope {
    fn single_item(self) -> bool {
        matches!(self, Scope::Option | Scope::Result | Scope::Variant)
    }
}

#[derive(Debug)]
struct Frame {
    scope: Scope,
    /// Offset of the first body byte; the length lives in the 4 bytes before it.
    start: usize,
    count: usize,
}

/// Stateful writer with an explicit scope stack.
#[derive(Debug)]
pub struct Encoder {
    buf: Vec<u8>,
    stack: Vec<Frame>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(128),
            stack: vec![Frame { scope: Scope::Root, start: 0, count: 0 }],
        }
    }

    /// Finishes encoding. Fails if any container is still open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if self.stack.len() != 1 {
            return Err(Error::ScopeStillOpen);
        }
        Ok(self.buf)
    }

    fn top(&mut self) -> &mut Frame {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn write_tag(&mut self, tag: Tag) -> Result<()> {
        let frame = self.top();
        if frame.scope == Scope::Map && tag != Tag::Variant {
            return Err(Error::InvalidMapEntry);
        }
        if frame.scope.single_item() && frame.count >= 1 {
            return Err(Error::TooManyItems(frame.scope));
        }
        self.buf.push(tag as u8);
        Ok(())
    }

    fn item_written(&mut self) {
        self.top().count += 1;
    }

    fn scalar(&mut self, tag: Tag, body: &[u8]) -> Result<()> {
        self.write_tag(tag)?;
        self.buf.extend_from_slice(body);
        self.item_written();
        Ok(())
    }

    fn blob(&mut self, tag: Tag, body: &[u8]) -> Result<()> {
        let len = u32::try_from(body.len()).map_err(|_| Error::TooLarge(body.len()))?;
        self.write_tag(tag)?;
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(body);
        self.item_written();
        Ok(())
    }

    fn begin(&mut self, tag: Tag, scope: Scope) -> Result<()> {
        self.write_tag(tag)?;
        self.buf.extend_from_slice(&[0u8; 4]);
        let start = self.buf.len();
        self.stack.push(Frame { scope, start, count: 0 });
        Ok(())
    }

    fn end(&mut self, scope: Scope) -> Result<()> {
        if self.stack.len() == 1 {
            return Err(Error::ScopeUnderflow);
        }
        let frame = self.top();
        if frame.scope != scope {
            return Err(Error::ScopeMismatch { expected: frame.scope, actual: scope });
        }
        if frame.scope.single_item() && frame.count == 0 {
            return Err(Error::EmptyScope(frame.scope));
        }

        let Some(frame) = self.stack.pop() else {
            return Err(Error::ScopeUnderflow);
        };
        let body_len = self.buf.len() - frame.start;
        let len = u32::try_from(body_len).map_err(|_| Error::TooLarge(body_len))?;
        self.buf[frame.start - 4..frame.start].copy_from_slice(&len.to_le_bytes());
        self.item_written();
        Ok(())
    }

    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.scalar(if v { Tag::BoolTrue } else { Tag::BoolFalse }, &[])
    }

    pub fn u32(&mut self, v: u32) -> Result<()> { self.scalar(Tag::U32, &v.to_le_bytes()) }
    pub fn u64(&mut self, v: u64) -> Result<()> { self.scalar(Tag::U64, &v.to_le_bytes()) }
    pub fn s32(&mut self, v: i32) -> Result<()> { self.scalar(Tag::S32, &v.to_le_bytes()) }
    pub fn s64(&mut self, v: i64) -> Result<()> { self.scalar(Tag::S64, &v.to_le_bytes()) }
    pub fn f64(&mut self, v: f64) -> Result<()> { self.scalar(Tag::F64, &v.to_le_bytes()) }
    pub fn char(&mut self, v: char) -> Result<()> { self.scalar(Tag::Char, &(v as u32).to_le_bytes()) }
    pub fn unit(&mut self) -> Result<()> { self.scalar(Tag::Unit, &[]) }
    pub fn option_none(&mut self) -> Result<()> { self.scalar(Tag::OptionNone, &[]) }

    pub fn str(&mut self, v: &str) -> Result<()> { self.blob(Tag::String, v.as_bytes()) }
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> { self.blob(Tag::Bytes, v) }

    pub fn list_begin(&mut self) -> Result<()> { self.begin(Tag::List, Scope::List) }
    pub fn list_end(&mut self) -> Result<()> { self.end(Scope::List) }

    /// Begins a map. Only `variant_begin` entries are accepted inside.
    pub fn map_begin(&mut self) -> Result<()> { self.begin(Tag::Map, Scope::Map) }
    pub fn map_end(&mut self) -> Result<()> { self.end(Scope::Map) }

    pub fn option_some_begin(&mut self) -> Result<()> { self.begin(Tag::OptionSome, Scope::Option) }
    pub fn option_some_end(&mut self) -> Result<()> { self.end(Scope::Option) }

    pub fn result_ok_begin(&mut self) -> Result<()> { self.begin(Tag::ResultOk, Scope::Result) }
    pub fn result_err_begin(&mut self) -> Result<()> { self.begin(Tag::ResultErr, Scope::Result) }
    pub fn result_end(&mut self) -> Result<()> { self.end(Scope::Result) }

    /// Begins a named variant. Exactly one payload item must follow.
    pub fn variant_begin(&mut self, name: &str) -> Result<()> {
        self.begin(Tag::Variant, Scope::Variant)?;
        self.str(name)?;
        // the name is metadata, not the payload
        self.top().count = 0;
        Ok(())
    }
    pub fn variant_end(&mut self) -> Result<()> { self.end(Scope::Variant) }
}

/// Zero-copy, bounds-checked cursor over a byte slice.
///
/// Container reads hand back a new `Decoder` restricted to the body.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn peek_tag(&self) -> Result<Tag> {
        let b = *self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn take_len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.take_array()?) as usize)
    }

    fn expect(&mut self, expected: Tag) -> Result<()> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Error::UnexpectedTag { expected, found });
        }
        self.take(1)?;
        Ok(())
    }

    /// Skips the next item including any nested children.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.take(1)?;
        match tag.fixed_width() {
            Some(n) => { self.take(n)?; }
            None => {
                let len = self.take_len()?;
                self.take(len)?;
            }
        }
        Ok(())
    }

    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::BoolTrue => { self.take(1)?; Ok(true) }
            Tag::BoolFalse => { self.take(1)?; Ok(false) }
            found => Err(Error::UnexpectedTag { expected: Tag::BoolTrue, found }),
        }
    }

    pub fn u32(&mut self) -> Result<u32> { self.expect(Tag::U32)?; Ok(u32::from_le_bytes(self.take_array()?)) }
    pub fn u64(&mut self) -> Result<u64> { self.expect(Tag::U64)?; Ok(u64::from_le_bytes(self.take_array()?)) }
    pub fn s32(&mut self) -> Result<i32> { self.expect(Tag::S32)?; Ok(i32::from_le_bytes(self.take_array()?)) }
    pub fn s64(&mut self) -> Result<i64> { self.expect(Tag::S64)?; Ok(i64::from_le_bytes(self.take_array()?)) }
    pub fn f64(&mut self) -> Result<f64> { self.expect(Tag::F64)?; Ok(f64::from_le_bytes(self.take_array()?)) }

    pub fn char(&mut self) -> Result<char> {
        self.expect(Tag::Char)?;
        let raw = u32::from_le_bytes(self.take_array()?);
        char::from_u32(raw).ok_or(Error::InvalidUtf8)
    }

    pub fn unit(&mut self) -> Result<()> { self.expect(Tag::Unit) }

    pub fn str(&mut self) -> Result<&'a str> {
        self.expect(Tag::String)?;
        let len = self.take_len()?;
        std::str::from_utf8(self.take(len)?).map_err(|_| Error::InvalidUtf8)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.expect(Tag::Bytes)?;
        let len = self.take_len()?;
        self.take(len)
    }

    fn enter(&mut self, tag: Tag) -> Result<Decoder<'a>> {
        self.expect(tag)?;
        let len = self.take_len()?;
        Ok(Decoder::new(self.take(len)?))
    }

    pub fn list(&mut self) -> Result<ListIter<'a>> {
        Ok(ListIter { dec: self.enter(Tag::List)? })
    }

    pub fn map(&mut self) -> Result<MapIter<'a>> {
        Ok(MapIter { dec: self.enter(Tag::Map)? })
    }

    /// Returns the payload decoder for `Some`, or `None`.
    pub fn option(&mut self) -> Result<Option<Decoder<'a>>> {
        match self.peek_tag()? {
            Tag::OptionNone => { self.take(1)?; Ok(None) }
            Tag::OptionSome => Ok(Some(self.enter(Tag::OptionSome)?)),
            found => Err(Error::UnexpectedTag { expected: Tag::OptionSome, found }),
        }
    }

    /// Returns the payload decoder on the matching side.
    pub fn result(&mut self) -> Result<std::result::Result<Decoder<'a>, Decoder<'a>>> {
        match self.peek_tag()? {
            Tag::ResultOk => Ok(Ok(self.enter(Tag::ResultOk)?)),
            Tag::ResultErr => Ok(Err(self.enter(Tag::ResultErr)?)),
            found => Err(Error::UnexpectedTag { expected: Tag::ResultOk, found }),
        }
    }

    /// Returns `(name, payload decoder)`.
    pub fn variant(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut inner = self.enter(Tag::Variant)?;
        let name = inner.str()?;
        Ok((name, inner))
    }
}

/// Iterator over the items of a list.
#[derive(Debug)]
pub struct ListIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> ListIter<'a> {
    /// Returns a decoder for the next item, `Ok(None)` at the end.
    pub fn next(&mut self) -> Result<Option<Decoder<'a>>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        let mut probe = self.dec.clone();
        probe.skip()?;
        let len = self.dec.remaining() - probe.remaining();
        Ok(Some(Decoder::new(self.dec.take(len)?)))
    }
}

/// Iterator over the `(key, value)` entries of a map.
#[derive(Debug)]
pub struct MapIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> MapIter<'a> {
    pub fn next(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        self.dec.variant().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_roundtrip() -> Result<()> {
        let mut enc = Encoder::new();
        enc.bool(true)?;
        enc.u64(u64::MAX)?;
        enc.s32(-7)?;
        enc.f64(1.5)?;
        enc.char('🦀')?;
        enc.str("hello")?;

        let bytes = enc.into_bytes()?;
        let mut dec = Decoder::new(&bytes);
        assert!(dec.bool()?);
        assert_eq!(dec.u64()?, u64::MAX);
        assert_eq!(dec.s32()?, -7);
        assert_eq!(dec.f64()?, 1.5);
        assert_eq!(dec.char()?, '🦀');
        assert_eq!(dec.str()?, "hello");
        assert_eq!(dec.remaining(), 0);
        Ok(())
    }

    #[test]
    fn test_nested_containers_patch_lengths() -> Result<()> {
        let mut enc = Encoder::new();
        enc.map_begin()?;
        enc.variant_begin("items")?;
        enc.list_begin()?;
        enc.u32(1)?;
        enc.u32(2)?;
        enc.list_end()?;
        enc.variant_end()?;
        enc.map_end()?;
        let bytes = enc.into_bytes()?;

        let mut dec = Decoder::new(&bytes);
        let mut map = dec.map()?;
        let (key, mut val) = map.next()?.expect("one entry");
        assert_eq!(key, "items");
        let mut list = val.list()?;
        let mut seen = Vec::new();
        while let Some(mut item) = list.next()? {
            seen.push(item.u32()?);
        }
        assert_eq!(seen, vec![1, 2]);
        assert!(map.next()?.is_none());
        Ok(())
    }

    #[test]
    fn test_map_rejects_bare_scalars() {
        let mut enc = Encoder::new();
        enc.map_begin().unwrap();
        assert_eq!(enc.u32(1), Err(Error::InvalidMapEntry));
    }

    #[test]
    fn test_variant_requires_exactly_one_item() {
        let mut enc = Encoder::new();
        enc.variant_begin("v").unwrap();
        assert_eq!(enc.variant_end(), Err(Error::EmptyScope(Scope::Variant)));

        let mut enc = Encoder::new();
        enc.variant_begin("v").unwrap();
        enc.unit().unwrap();
        assert_eq!(enc.unit(), Err(Error::TooManyItems(Scope::Variant)));
    }

    #[test]
    fn test_open_scope_cannot_finish() {
        let mut enc = Encoder::new();
        enc.list_begin().unwrap();
        assert_eq!(enc.into_bytes().unwrap_err(), Error::ScopeStillOpen);
    }

    #[test]
    fn test_truncated_input_is_an_error() -> Result<()> {
        let mut enc = Encoder::new();
        enc.str("truncated")?;
        let bytes = enc.into_bytes()?;
        let mut dec = Decoder::new(&bytes[..bytes.len() - 2]);
        assert_eq!(dec.str(), Err(Error::UnexpectedEnd));
        Ok(())
    }

    #[test]
    fn test_skip_walks_over_containers() -> Result<()> {
        let mut enc = Encoder::new();
        enc.list_begin()?;
        enc.str("a")?;
        enc.list_end()?;
        enc.u64(9)?;
        let bytes = enc.into_bytes()?;

        let mut dec = Decoder::new(&bytes);
        dec.skip()?;
        assert_eq!(dec.u64()?, 9);
        Ok(())
    }
}
