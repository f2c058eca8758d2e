//! Types for interpreting DICOM data elements:
//! the attribute tag, the value representation catalog,
//! element lengths, and element headers.

use snafu::Snafu;
use std::cmp::Ordering;
use std::fmt;
use std::str::{from_utf8, FromStr};

/// Idiomatic alias for a tag's group number.
pub type GroupNumber = u16;
/// Idiomatic alias for a tag's element number.
pub type ElementNumber = u16;

/// The data type for DICOM data element tags.
///
/// Tags order by group first, then element,
/// which matches the ascending order required on the wire.
/// Both `(u16, u16)` and `[u16; 2]` convert into this type.
#[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy)]
pub struct Tag(pub GroupNumber, pub ElementNumber);

/// Item tag (`FFFE,E000`).
pub const TAG_ITEM: Tag = Tag(0xFFFE, 0xE000);
/// Item delimitation tag (`FFFE,E00D`).
pub const TAG_ITEM_DELIMITER: Tag = Tag(0xFFFE, 0xE00D);
/// Sequence delimitation tag (`FFFE,E0DD`).
pub const TAG_SEQUENCE_DELIMITER: Tag = Tag(0xFFFE, 0xE0DD);

impl Tag {
    /// Getter for the tag's group value.
    #[inline]
    pub fn group(self) -> GroupNumber {
        self.0
    }

    /// Getter for the tag's element value.
    #[inline]
    pub fn element(self) -> ElementNumber {
        self.1
    }

    /// Whether this tag belongs to a private group (odd group number).
    #[inline]
    pub fn is_private(self) -> bool {
        self.0 & 1 == 1
    }

    /// Whether this is a group length tag (element number zero).
    #[inline]
    pub fn is_group_length(self) -> bool {
        self.1 == 0x0000
    }

    /// Whether this is the item tag (`FFFE,E000`).
    #[inline]
    pub fn is_item(self) -> bool {
        self == TAG_ITEM
    }

    /// Whether this is the item delimitation tag (`FFFE,E00D`).
    #[inline]
    pub fn is_item_delimiter(self) -> bool {
        self == TAG_ITEM_DELIMITER
    }

    /// Whether this is the sequence delimitation tag (`FFFE,E0DD`).
    #[inline]
    pub fn is_sequence_delimiter(self) -> bool {
        self == TAG_SEQUENCE_DELIMITER
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Tag({:#06X?}, {:#06X?})", self.0, self.1)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.0, self.1)
    }
}

impl From<(u16, u16)> for Tag {
    #[inline]
    fn from(value: (u16, u16)) -> Tag {
        Tag(value.0, value.1)
    }
}

impl From<[u16; 2]> for Tag {
    #[inline]
    fn from(value: [u16; 2]) -> Tag {
        Tag(value[0], value[1])
    }
}

impl PartialEq<(u16, u16)> for Tag {
    fn eq(&self, other: &(u16, u16)) -> bool {
        self.0 == other.0 && self.1 == other.1
    }
}

/// An enum type for a DICOM value representation.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone, Ord, PartialOrd)]
pub enum VR {
    /// Application Entity
    AE,
    /// Age String
    AS,
    /// Attribute Tag
    AT,
    /// Code String
    CS,
    /// Date
    DA,
    /// Decimal String
    DS,
    /// Date Time
    DT,
    /// Floating Point Single
    FL,
    /// Floating Point Double
    FD,
    /// Integer String
    IS,
    /// Long String
    LO,
    /// Long Text
    LT,
    /// Other Byte
    OB,
    /// Other Double
    OD,
    /// Other Float
    OF,
    /// Other Long
    OL,
    /// Other Very Long
    OV,
    /// Other Word
    OW,
    /// Person Name
    PN,
    /// Short String
    SH,
    /// Signed Long
    SL,
    /// Sequence of Items
    SQ,
    /// Signed Short
    SS,
    /// Short Text
    ST,
    /// Signed Very Long
    SV,
    /// Time
    TM,
    /// Unlimited Characters
    UC,
    /// Unique Identifier (UID)
    UI,
    /// Unsigned Long
    UL,
    /// Unknown
    UN,
    /// Universal Resource Identifier or Locator
    UR,
    /// Unsigned Short
    US,
    /// Unlimited Text
    UT,
    /// Unsigned Very Long
    UV,
}

/// The width of the length field of a data element
/// in the explicit VR encodings.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum LengthWidth {
    /// a 16-bit length immediately after the VR bytes
    U16,
    /// 2 reserved bytes, then a 32-bit length
    U32,
}

impl VR {
    /// Obtain the value representation corresponding to the given two bytes.
    /// Each byte should represent an alphabetic character in upper case.
    pub fn from_binary(chars: [u8; 2]) -> Option<Self> {
        from_utf8(chars.as_ref())
            .ok()
            .and_then(|s| VR::from_str(s).ok())
    }

    /// Retrieve a string representation of this VR.
    pub fn to_string(self) -> &'static str {
        use VR::*;
        match self {
            AE => "AE",
            AS => "AS",
            AT => "AT",
            CS => "CS",
            DA => "DA",
            DS => "DS",
            DT => "DT",
            FL => "FL",
            FD => "FD",
            IS => "IS",
            LO => "LO",
            LT => "LT",
            OB => "OB",
            OD => "OD",
            OF => "OF",
            OL => "OL",
            OV => "OV",
            OW => "OW",
            PN => "PN",
            SH => "SH",
            SL => "SL",
            SQ => "SQ",
            SS => "SS",
            ST => "ST",
            SV => "SV",
            TM => "TM",
            UC => "UC",
            UI => "UI",
            UL => "UL",
            UN => "UN",
            UR => "UR",
            US => "US",
            UT => "UT",
            UV => "UV",
        }
    }

    /// Retrieve a copy of this VR's byte representation.
    /// The function returns two alphabetic characters in upper case.
    pub fn to_bytes(self) -> [u8; 2] {
        let bytes = self.to_string().as_bytes();
        [bytes[0], bytes[1]]
    }

    /// The width of the length field for this VR in explicit encodings.
    ///
    /// Extended VRs carry 2 reserved bytes followed by a 32-bit length;
    /// all other VRs carry a plain 16-bit length.
    pub fn length_width(self) -> LengthWidth {
        use VR::*;
        match self {
            OB | OD | OF | OL | OV | OW | SQ | SV | UC | UN | UR | UT | UV => LengthWidth::U32,
            _ => LengthWidth::U16,
        }
    }

    /// Whether values of this VR are character strings.
    pub fn is_string(self) -> bool {
        use VR::*;
        matches!(
            self,
            AE | AS | CS | DA | DS | DT | IS | LO | LT | PN | SH | ST | TM | UI | UT | UC | UR
        )
    }

    /// Whether values of this VR are fixed-width binary numbers.
    pub fn is_numeric(self) -> bool {
        use VR::*;
        matches!(self, FL | FD | SL | SS | UL | US | SV | UV)
    }

    /// Whether values of this VR are opaque byte data.
    pub fn is_binary(self) -> bool {
        use VR::*;
        matches!(self, OB | OD | OF | OL | OV | OW | UN)
    }

    /// Whether this VR denotes a sequence of items.
    #[inline]
    pub fn is_sequence(self) -> bool {
        self == VR::SQ
    }

    /// The byte used to pad values of this VR to even length.
    ///
    /// String values pad with a space, except UI which pads with NUL.
    /// Binary values pad with NUL.
    pub fn pad_byte(self) -> u8 {
        if self.is_string() && self != VR::UI {
            0x20
        } else {
            0x00
        }
    }

    /// The exact width in bytes of one element of a numeric VR,
    /// or `None` if the VR is not numeric.
    pub fn numeric_width(self) -> Option<usize> {
        use VR::*;
        match self {
            SS | US => Some(2),
            FL | SL | UL => Some(4),
            FD | SV | UV => Some(8),
            _ => None,
        }
    }
}

/// Obtain the value representation corresponding to the given string.
/// The string should hold exactly two UTF-8 encoded alphabetic characters
/// in upper case, otherwise no match is made.
impl FromStr for VR {
    type Err = &'static str;

    fn from_str(string: &str) -> std::result::Result<Self, Self::Err> {
        use VR::*;
        match string {
            "AE" => Ok(AE),
            "AS" => Ok(AS),
            "AT" => Ok(AT),
            "CS" => Ok(CS),
            "DA" => Ok(DA),
            "DS" => Ok(DS),
            "DT" => Ok(DT),
            "FL" => Ok(FL),
            "FD" => Ok(FD),
            "IS" => Ok(IS),
            "LO" => Ok(LO),
            "LT" => Ok(LT),
            "OB" => Ok(OB),
            "OD" => Ok(OD),
            "OF" => Ok(OF),
            "OL" => Ok(OL),
            "OV" => Ok(OV),
            "OW" => Ok(OW),
            "PN" => Ok(PN),
            "SH" => Ok(SH),
            "SL" => Ok(SL),
            "SQ" => Ok(SQ),
            "SS" => Ok(SS),
            "ST" => Ok(ST),
            "SV" => Ok(SV),
            "TM" => Ok(TM),
            "UC" => Ok(UC),
            "UI" => Ok(UI),
            "UL" => Ok(UL),
            "UN" => Ok(UN),
            "UR" => Ok(UR),
            "US" => Ok(US),
            "UT" => Ok(UT),
            "UV" => Ok(UV),
            _ => Err("no such value representation"),
        }
    }
}

impl fmt::Display for VR {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(VR::to_string(*self))
    }
}

/// A type for representing data set content length, in bytes.
/// An internal value of `0xFFFF_FFFF` represents an undefined
/// (unspecified) length, which has to be determined by traversing
/// the content until a delimitation item.
///
/// Two undefined lengths are never equal,
/// and comparisons involving an undefined length are always `false`.
#[derive(Clone, Copy)]
pub struct Length(pub u32);

const UNDEFINED_LEN: u32 = 0xFFFF_FFFF;

impl Length {
    /// A length that is undefined.
    pub const UNDEFINED: Self = Length(UNDEFINED_LEN);

    /// Create a new length value from its internal representation.
    pub fn new(len: u32) -> Self {
        Length(len)
    }

    /// Create a new length value with the given number of bytes.
    ///
    /// # Panic
    ///
    /// This function will panic if `len` represents an undefined length.
    pub fn defined(len: u32) -> Self {
        assert_ne!(len, UNDEFINED_LEN);
        Length(len)
    }

    /// Check whether this length is undefined.
    #[inline]
    pub fn is_undefined(self) -> bool {
        self.0 == UNDEFINED_LEN
    }

    /// Check whether this length is well defined (not undefined).
    #[inline]
    pub fn is_defined(self) -> bool {
        !self.is_undefined()
    }

    /// Fetch the concrete length value, if available.
    /// Returns `None` if it represents an undefined length.
    #[inline]
    pub fn get(self) -> Option<u32> {
        match self.0 {
            UNDEFINED_LEN => None,
            v => Some(v),
        }
    }
}

impl From<u32> for Length {
    fn from(o: u32) -> Self {
        Length(o)
    }
}

impl PartialEq<Length> for Length {
    fn eq(&self, rhs: &Length) -> bool {
        match (self.0, rhs.0) {
            (UNDEFINED_LEN, _) | (_, UNDEFINED_LEN) => false,
            (l1, l2) => l1 == l2,
        }
    }
}

impl PartialOrd<Length> for Length {
    fn partial_cmp(&self, rhs: &Length) -> Option<Ordering> {
        match (self.0, rhs.0) {
            (UNDEFINED_LEN, _) | (_, UNDEFINED_LEN) => None,
            (l1, l2) => Some(l1.cmp(&l2)),
        }
    }
}

impl fmt::Debug for Length {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            UNDEFINED_LEN => f.write_str("Length(Undefined)"),
            l => f.debug_tuple("Length").field(&l).finish(),
        }
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            UNDEFINED_LEN => f.write_str("U/L"),
            l => write!(f, "{}", &l),
        }
    }
}

/// A data structure for a data element header, containing
/// a tag, value representation and specified length.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct DataElementHeader {
    /// DICOM tag
    pub tag: Tag,
    /// Value Representation
    pub vr: VR,
    /// Element length
    pub len: Length,
}

impl DataElementHeader {
    /// Create a new data element header with the given properties.
    pub fn new<T: Into<Tag>>(tag: T, vr: VR, len: Length) -> DataElementHeader {
        DataElementHeader {
            tag: tag.into(),
            vr,
            len,
        }
    }
}

/// Error raised when a tag does not describe a sequence item,
/// an item delimiter, or a sequence delimiter.
#[derive(Debug, Snafu)]
#[snafu(display("unexpected tag {} in item position", tag))]
pub struct NotSequenceItemError {
    /// the offending tag
    pub tag: Tag,
}

/// Data type for describing a sequence item data element.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum SequenceItemHeader {
    /// The cursor contains an item with the given length
    /// (which can be undefined).
    Item {
        /// the length of the item in bytes
        len: Length,
    },
    /// The cursor read an item delimiter.
    ItemDelimiter,
    /// The cursor read a sequence delimiter.
    SequenceDelimiter,
}

impl SequenceItemHeader {
    /// Create a sequence item header using the element's raw properties.
    /// An error is raised if the given tag does not relate to a sequence
    /// item, item delimiter or sequence delimiter.
    pub fn new<T: Into<Tag>>(
        tag: T,
        len: Length,
    ) -> Result<SequenceItemHeader, NotSequenceItemError> {
        let tag = tag.into();
        match tag {
            TAG_ITEM => Ok(SequenceItemHeader::Item { len }),
            TAG_ITEM_DELIMITER => Ok(SequenceItemHeader::ItemDelimiter),
            TAG_SEQUENCE_DELIMITER => Ok(SequenceItemHeader::SequenceDelimiter),
            _ => NotSequenceItemSnafu { tag }.fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_from_u16_pair() {
        let t = Tag::from((0x0010u16, 0x0020u16));
        assert_eq!(0x0010u16, t.group());
        assert_eq!(0x0020u16, t.element());
        assert!(!t.is_private());
        assert!(Tag(0x0009, 0x0010).is_private());
    }

    #[test]
    fn vr_classification() {
        assert!(VR::PN.is_string());
        assert!(VR::UI.is_string());
        assert!(!VR::US.is_string());
        assert!(VR::US.is_numeric());
        assert!(VR::OB.is_binary());
        assert!(VR::SQ.is_sequence());
        assert_eq!(VR::PN.pad_byte(), 0x20);
        assert_eq!(VR::UI.pad_byte(), 0x00);
        assert_eq!(VR::OW.pad_byte(), 0x00);
    }

    #[test]
    fn vr_length_width() {
        assert_eq!(VR::US.length_width(), LengthWidth::U16);
        assert_eq!(VR::UI.length_width(), LengthWidth::U16);
        for vr in [
            VR::OB,
            VR::OD,
            VR::OF,
            VR::OL,
            VR::OV,
            VR::OW,
            VR::SQ,
            VR::SV,
            VR::UC,
            VR::UN,
            VR::UR,
            VR::UT,
            VR::UV,
        ] {
            assert_eq!(vr.length_width(), LengthWidth::U32, "{}", vr);
        }
    }

    #[test]
    fn vr_numeric_width() {
        assert_eq!(VR::US.numeric_width(), Some(2));
        assert_eq!(VR::UL.numeric_width(), Some(4));
        assert_eq!(VR::FD.numeric_width(), Some(8));
        assert_eq!(VR::PN.numeric_width(), None);
    }

    #[test]
    fn undefined_length_comparisons() {
        assert_ne!(Length::UNDEFINED, Length::UNDEFINED);
        assert!(Length::defined(16) < Length::defined(64));
        assert!(!(Length::UNDEFINED < Length::defined(64)));
        assert!(!(Length::UNDEFINED > Length::defined(64)));
    }

    #[test]
    fn sequence_item_header_from_tags() {
        assert_eq!(
            SequenceItemHeader::new(TAG_ITEM, Length(8)).unwrap(),
            SequenceItemHeader::Item { len: Length(8) }
        );
        assert_eq!(
            SequenceItemHeader::new(TAG_ITEM_DELIMITER, Length(0)).unwrap(),
            SequenceItemHeader::ItemDelimiter
        );
        assert!(SequenceItemHeader::new(Tag(0x0008, 0x0018), Length(0)).is_err());
    }
}
