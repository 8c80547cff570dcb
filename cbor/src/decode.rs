use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("more input required to complete the current item")]
    NeedMoreData,

    #[error("incorrect type, expected {0}, found {1}")]
    IncorrectType(String, String),

    #[error("invalid minor-type value {0}")]
    InvalidMinorValue(u8),

    #[error("invalid simple type {0}")]
    InvalidSimpleType(u8),

    #[error("floating point values not supported")]
    FloatingPoint,

    #[error("indefinite-length string contains an invalid chunk")]
    InvalidChunk,

    #[error("invalid UTF-8 text string")]
    InvalidUtf8(#[from] core::str::Utf8Error),

    #[error("array or map has fewer items than expected")]
    NotEnoughItems,

    #[error("break stop code outside an indefinite-length item")]
    UnexpectedBreak,

    #[error("integer value out of range")]
    OutOfRange,
}

pub enum Value<'a, 'b: 'a> {
    UnsignedInteger(u64),
    /// The magnitude of a negative integer, i.e. the value is -1 - n.
    NegativeInteger(u64),
    Bytes(&'b [u8]),
    ByteStream(Vec<&'b [u8]>),
    Text(&'b str),
    TextStream(Vec<&'b str>),
    Array(&'a mut Array<'b>),
    Map(&'a mut Map<'b>),
    False,
    True,
    Null,
    Undefined,
    Simple(u8),
}

impl<'a, 'b: 'a> Value<'a, 'b> {
    pub fn type_name(&self) -> String {
        match self {
            Value::UnsignedInteger(_) => "UnsignedInteger".to_string(),
            Value::NegativeInteger(_) => "NegativeInteger".to_string(),
            Value::Bytes(_) => "ByteString".to_string(),
            Value::ByteStream(_) => "ByteStream".to_string(),
            Value::Text(_) => "TextString".to_string(),
            Value::TextStream(_) => "TextStream".to_string(),
            Value::Array(_) => "Array".to_string(),
            Value::Map(_) => "Map".to_string(),
            Value::False => "False".to_string(),
            Value::True => "True".to_string(),
            Value::Null => "Null".to_string(),
            Value::Undefined => "Undefined".to_string(),
            Value::Simple(v) => format!("Simple({v})"),
        }
    }

    /// Consume this value, recursing into any unparsed container items.
    pub fn skip(self) -> Result<(), Error> {
        match self {
            Value::Array(a) => a.skip_all(),
            Value::Map(m) => m.skip_all(),
            _ => Ok(()),
        }
    }
}

pub trait FromCbor: Sized {
    type Error: From<Error>;

    fn from_cbor(data: &[u8]) -> Result<(Self, usize), Self::Error>;
}

fn parse_uint_minor(minor: u8, data: &[u8]) -> Result<(u64, usize), Error> {
    match minor {
        0..=23 => Ok((minor as u64, 0)),
        24 => {
            if data.is_empty() {
                Err(Error::NeedMoreData)
            } else {
                Ok((data[0] as u64, 1))
            }
        }
        25 => {
            if data.len() < 2 {
                Err(Error::NeedMoreData)
            } else {
                Ok((u16::from_be_bytes([data[0], data[1]]) as u64, 2))
            }
        }
        26 => {
            if data.len() < 4 {
                Err(Error::NeedMoreData)
            } else {
                Ok((
                    u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64,
                    4,
                ))
            }
        }
        27 => {
            if data.len() < 8 {
                Err(Error::NeedMoreData)
            } else {
                Ok((
                    u64::from_be_bytes([
                        data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
                    ]),
                    8,
                ))
            }
        }
        minor => Err(Error::InvalidMinorValue(minor)),
    }
}

fn parse_data_minor<'a>(minor: u8, data: &'a [u8]) -> Result<(&'a [u8], usize), Error> {
    let (len, o) = parse_uint_minor(minor, data)?;
    let len = usize::try_from(len).map_err(|_| Error::OutOfRange)?;
    if data.len() < o + len {
        Err(Error::NeedMoreData)
    } else {
        Ok((&data[o..o + len], o + len))
    }
}

/// Gather the chunks of an indefinite-length string. Chunks must be
/// definite-length strings of the same major type.
fn parse_data_chunked<'a>(major: u8, data: &'a [u8]) -> Result<(Vec<&'a [u8]>, usize), Error> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    loop {
        if data.len() <= offset {
            return Err(Error::NeedMoreData);
        }
        let v = data[offset];
        offset += 1;

        if v == 0xFF {
            return Ok((chunks, offset));
        }
        if v >> 5 != major || v & 0x1F == 31 {
            return Err(Error::InvalidChunk);
        }
        let (chunk, len) = parse_data_minor(v & 0x1F, &data[offset..])?;
        chunks.push(chunk);
        offset += len;
    }
}

fn parse_tags(data: &[u8]) -> Result<(Vec<u64>, usize), Error> {
    let mut tags = Vec::new();
    let mut offset = 0;
    while let Some(&v) = data.get(offset) {
        if v >> 5 != 6 {
            return Ok((tags, offset));
        }
        let (tag, len) = parse_uint_minor(v & 0x1F, &data[offset + 1..])?;
        tags.push(tag);
        offset += 1 + len;
    }
    // Tags with no following item
    Err(Error::NeedMoreData)
}

/// Parse a single CBOR item, handing a borrowed [`Value`] plus any preceding
/// tags to `f`. Returns `f`'s result and the total number of bytes consumed.
/// Truncated input fails with [`Error::NeedMoreData`] so callers can buffer
/// and retry.
pub fn parse_value<'a, T, F, E>(data: &'a [u8], f: F) -> Result<(T, usize), E>
where
    F: FnOnce(Value<'_, 'a>, &[u64]) -> Result<T, E>,
    E: From<Error>,
{
    let (tags, mut offset) = parse_tags(data)?;
    let Some(&v) = data.get(offset) else {
        return Err(Error::NeedMoreData.into());
    };
    offset += 1;

    match (v >> 5, v & 0x1F) {
        (0, minor) => {
            let (n, len) = parse_uint_minor(minor, &data[offset..])?;
            f(Value::UnsignedInteger(n), &tags).map(|t| (t, offset + len))
        }
        (1, minor) => {
            let (n, len) = parse_uint_minor(minor, &data[offset..])?;
            f(Value::NegativeInteger(n), &tags).map(|t| (t, offset + len))
        }
        (2, 31) => {
            let (chunks, len) = parse_data_chunked(2, &data[offset..])?;
            f(Value::ByteStream(chunks), &tags).map(|t| (t, offset + len))
        }
        (2, minor) => {
            let (bytes, len) = parse_data_minor(minor, &data[offset..])?;
            f(Value::Bytes(bytes), &tags).map(|t| (t, offset + len))
        }
        (3, 31) => {
            let (chunks, len) = parse_data_chunked(3, &data[offset..])?;
            let chunks = chunks
                .into_iter()
                .map(core::str::from_utf8)
                .collect::<Result<Vec<&str>, _>>()
                .map_err(Error::InvalidUtf8)?;
            f(Value::TextStream(chunks), &tags).map(|t| (t, offset + len))
        }
        (3, minor) => {
            let (bytes, len) = parse_data_minor(minor, &data[offset..])?;
            let text = core::str::from_utf8(bytes).map_err(Error::InvalidUtf8)?;
            f(Value::Text(text), &tags).map(|t| (t, offset + len))
        }
        (4, 31) => {
            let mut a = Array::new(data, offset, None);
            let t = f(Value::Array(&mut a), &tags)?;
            a.complete().map(|end| (t, end)).map_err(Into::into)
        }
        (4, minor) => {
            let (count, len) = parse_uint_minor(minor, &data[offset..])?;
            let count = usize::try_from(count).map_err(|_| Error::OutOfRange)?;
            let mut a = Array::new(data, offset + len, Some(count));
            let t = f(Value::Array(&mut a), &tags)?;
            a.complete().map(|end| (t, end)).map_err(Into::into)
        }
        (5, 31) => {
            let mut m = Map::new(data, offset, None);
            let t = f(Value::Map(&mut m), &tags)?;
            m.complete().map(|end| (t, end)).map_err(Into::into)
        }
        (5, minor) => {
            let (count, len) = parse_uint_minor(minor, &data[offset..])?;
            let count = usize::try_from(count)
                .ok()
                .and_then(|c| c.checked_mul(2))
                .ok_or(Error::OutOfRange)?;
            let mut m = Map::new(data, offset + len, Some(count));
            let t = f(Value::Map(&mut m), &tags)?;
            m.complete().map(|end| (t, end)).map_err(Into::into)
        }
        (6, _) => unreachable!(),
        (7, 20) => f(Value::False, &tags).map(|t| (t, offset)),
        (7, 21) => f(Value::True, &tags).map(|t| (t, offset)),
        (7, 22) => f(Value::Null, &tags).map(|t| (t, offset)),
        (7, 23) => f(Value::Undefined, &tags).map(|t| (t, offset)),
        (7, minor @ 0..=19) => f(Value::Simple(minor), &tags).map(|t| (t, offset)),
        (7, 24) => {
            let Some(&v2) = data.get(offset) else {
                return Err(Error::NeedMoreData.into());
            };
            if v2 < 32 {
                Err(Error::InvalidSimpleType(v2).into())
            } else {
                f(Value::Simple(v2), &tags).map(|t| (t, offset + 1))
            }
        }
        (7, 25..=27) => Err(Error::FloatingPoint.into()),
        (7, 31) => Err(Error::UnexpectedBreak.into()),
        (_, minor) => Err(Error::InvalidMinorValue(minor).into()),
    }
}

pub fn parse<T: FromCbor>(data: &[u8]) -> Result<(T, usize), T::Error> {
    T::from_cbor(data)
}

/// Cursor over the items of an array or map. `D` is the number of
/// sub-items per logical entry (1 for arrays, 2 for maps).
pub struct Series<'a, const D: usize> {
    data: &'a [u8],
    offset: usize,
    count: Option<usize>,
    idx: usize,
}

pub type Array<'a> = Series<'a, 1>;
pub type Map<'a> = Series<'a, 2>;

impl<'a, const D: usize> Series<'a, D> {
    fn new(data: &'a [u8], offset: usize, count: Option<usize>) -> Self {
        Self {
            data,
            offset,
            count,
            idx: 0,
        }
    }

    /// Number of entries declared by the header, or `None` for
    /// indefinite-length sequences.
    pub fn count(&self) -> Option<usize> {
        self.count.map(|c| c / D)
    }

    pub fn is_definite(&self) -> bool {
        self.count.is_some()
    }

    /// Current parse position, relative to the buffer the outermost
    /// [`parse_value`] was given.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn check_for_end(&mut self) -> Result<bool, Error> {
        if let Some(count) = self.count {
            Ok(self.idx >= count)
        } else {
            match self.data.get(self.offset) {
                None => Err(Error::NeedMoreData),
                Some(&v) => Ok(v == 0xFF),
            }
        }
    }

    /// If all entries have been parsed, consume any break marker and return
    /// the end offset. Returns `None` if entries remain.
    pub fn end(&mut self) -> Result<Option<usize>, Error> {
        if !self.check_for_end()? {
            Ok(None)
        } else {
            if self.count.is_none() {
                self.offset += 1;
                self.count = Some(self.idx);
            }
            Ok(Some(self.offset))
        }
    }

    pub fn at_end(&mut self) -> Result<bool, Error> {
        self.check_for_end()
    }

    /// Skip one item, returning false if the sequence has ended.
    pub fn skip_value(&mut self) -> Result<bool, Error> {
        self.try_parse_value(|value, _| value.skip())
            .map(|o| o.is_some())
    }

    fn skip_all(&mut self) -> Result<(), Error> {
        while self.skip_value()? {}
        Ok(())
    }

    fn complete(mut self) -> Result<usize, Error> {
        self.skip_all()?;
        if self.count.is_none() {
            // skip_all stopped at the break marker
            self.offset += 1;
        }
        Ok(self.offset)
    }

    pub fn try_parse_value<T, F, E>(&mut self, f: F) -> Result<Option<T>, E>
    where
        F: FnOnce(Value<'_, 'a>, &[u64]) -> Result<T, E>,
        E: From<Error>,
    {
        if self.check_for_end()? {
            return Ok(None);
        }
        self.idx += 1;
        let data: &'a [u8] = self.data;
        let (t, len) = parse_value(&data[self.offset..], f)?;
        self.offset += len;
        Ok(Some(t))
    }

    pub fn parse_value<T, F, E>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(Value<'_, 'a>, &[u64]) -> Result<T, E>,
        E: From<Error>,
    {
        match self.try_parse_value(f)? {
            Some(t) => Ok(t),
            None => Err(Error::NotEnoughItems.into()),
        }
    }

    pub fn try_parse<T: FromCbor>(&mut self) -> Result<Option<T>, T::Error> {
        if self.check_for_end()? {
            return Ok(None);
        }
        self.idx += 1;
        let (t, len) = T::from_cbor(&self.data[self.offset..])?;
        self.offset += len;
        Ok(Some(t))
    }

    pub fn parse<T: FromCbor>(&mut self) -> Result<T, T::Error> {
        // An explicit match: `?` cannot resolve its From conversion against
        // the unnormalized associated error type
        match self.try_parse() {
            Ok(Some(t)) => Ok(t),
            Ok(None) => Err(Error::NotEnoughItems.into()),
            Err(e) => Err(e),
        }
    }

    pub fn parse_array<T, F, E>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Array<'a>, &[u64]) -> Result<T, E>,
        E: From<Error>,
    {
        self.parse_value(|value, tags| match value {
            Value::Array(a) => f(a, tags),
            value => {
                Err(Error::IncorrectType("Array".to_string(), value.type_name()).into())
            }
        })
    }

    pub fn parse_map<T, F, E>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Map<'a>, &[u64]) -> Result<T, E>,
        E: From<Error>,
    {
        self.parse_value(|value, tags| match value {
            Value::Map(m) => f(m, tags),
            value => Err(Error::IncorrectType("Map".to_string(), value.type_name()).into()),
        })
    }

    /// Parse the next item as a byte string, definite or chunked, feeding
    /// each chunk to `f` without copying. Returns the total byte count.
    pub fn parse_byte_chunks<F, E>(&mut self, mut f: F) -> Result<usize, E>
    where
        F: FnMut(&'a [u8]) -> Result<(), E>,
        E: From<Error>,
    {
        self.parse_value(|value, _| match value {
            Value::Bytes(b) => {
                f(b)?;
                Ok(b.len())
            }
            Value::ByteStream(chunks) => {
                let mut total = 0;
                for chunk in chunks {
                    f(chunk)?;
                    total += chunk.len();
                }
                Ok(total)
            }
            value => {
                Err(Error::IncorrectType("ByteString".to_string(), value.type_name()).into())
            }
        })
    }
}

macro_rules! impl_int_from_cbor {
    ($($ty:ty),*) => {
        $(
            impl FromCbor for $ty {
                type Error = Error;

                fn from_cbor(data: &[u8]) -> Result<(Self, usize), Self::Error> {
                    parse_value(data, |value, _| match value {
                        Value::UnsignedInteger(n) => {
                            <$ty>::try_from(n).map_err(|_| Error::OutOfRange)
                        }
                        value => Err(Error::IncorrectType(
                            "UnsignedInteger".to_string(),
                            value.type_name(),
                        )),
                    })
                }
            }
        )*
    };
}

impl_int_from_cbor!(u8, u16, u32, u64, usize);

impl FromCbor for bool {
    type Error = Error;

    fn from_cbor(data: &[u8]) -> Result<(Self, usize), Self::Error> {
        parse_value(data, |value, _| match value {
            Value::False => Ok(false),
            Value::True => Ok(true),
            value => Err(Error::IncorrectType(
                "Boolean".to_string(),
                value.type_name(),
            )),
        })
    }
}

impl FromCbor for String {
    type Error = Error;

    fn from_cbor(data: &[u8]) -> Result<(Self, usize), Self::Error> {
        parse_value(data, |value, _| match value {
            Value::Text(t) => Ok(t.to_string()),
            Value::TextStream(chunks) => Ok(chunks.concat()),
            value => Err(Error::IncorrectType(
                "TextString".to_string(),
                value.type_name(),
            )),
        })
    }
}

impl FromCbor for Vec<u8> {
    type Error = Error;

    fn from_cbor(data: &[u8]) -> Result<(Self, usize), Self::Error> {
        parse_value(data, |value, _| match value {
            Value::Bytes(b) => Ok(b.to_vec()),
            Value::ByteStream(chunks) => Ok(chunks.concat()),
            value => Err(Error::IncorrectType(
                "ByteString".to_string(),
                value.type_name(),
            )),
        })
    }
}

impl FromCbor for Box<[u8]> {
    type Error = Error;

    fn from_cbor(data: &[u8]) -> Result<(Self, usize), Self::Error> {
        Vec::<u8>::from_cbor(data).map(|(v, len)| (v.into(), len))
    }
}

impl<T: FromCbor> FromCbor for Option<T> {
    type Error = T::Error;

    fn from_cbor(data: &[u8]) -> Result<(Self, usize), Self::Error> {
        let (_, offset) = parse_tags(data).map_err(Into::into)?;
        match data.get(offset) {
            None => Err(Error::NeedMoreData.into()),
            Some(&0xF6) | Some(&0xF7) => Ok((None, offset + 1)),
            Some(_) => T::from_cbor(data).map(|(t, len)| (Some(t), len)),
        }
    }
}
