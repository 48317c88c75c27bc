//! Wire tags.

/// The first byte of every encoded item.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// The empty value. No payload.
    Invalid = 0x00,
    BoolTrue = 0x01,
    BoolFalse = 0x02,
    U16 = 0x04,
    U32 = 0x05,
    S32 = 0x09,
    F64 = 0x0C,
    /// `[year: i32][month: u8][day: u8]`
    Date = 0x0E,
    String = 0x10,
    Bytes = 0x11,
    List = 0x20,
    Map = 0x21,
    StringList = 0x22,
    /// One key/value pair of a map: a string key followed by one value.
    Entry = 0x33,
}

/// Payload shape that follows a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Body {
    Fixed(usize),
    /// `[Len: u32][Body: Len]`
    Sized,
}

const ALL: [Tag; 14] = [
    Tag::Invalid,
    Tag::BoolTrue,
    Tag::BoolFalse,
    Tag::U16,
    Tag::U32,
    Tag::S32,
    Tag::F64,
    Tag::Date,
    Tag::String,
    Tag::Bytes,
    Tag::List,
    Tag::Map,
    Tag::StringList,
    Tag::Entry,
];

impl Tag {
    pub fn from_u8(b: u8) -> Option<Self> {
        ALL.into_iter().find(|tag| *tag as u8 == b)
    }

    pub(crate) fn body(self) -> Body {
        match self {
            Tag::Invalid | Tag::BoolTrue | Tag::BoolFalse => Body::Fixed(0),
            Tag::U16 => Body::Fixed(2),
            Tag::U32 | Tag::S32 => Body::Fixed(4),
            Tag::Date => Body::Fixed(6),
            Tag::F64 => Body::Fixed(8),
            Tag::String
            | Tag::Bytes
            | Tag::List
            | Tag::Map
            | Tag::StringList
            | Tag::Entry => Body::Sized,
        }
    }
}

impl TryFrom<u8> for Tag {
    type Error = crate::Error;

    fn try_from(b: u8) -> crate::Result<Self> {
        Tag::from_u8(b).ok_or(crate::Error::InvalidTag(b))
    }
}
