//! ISO 7816 flavoured BER-TLV (Tag-Length-Value) implementation.
//!
//! BER is an ASN.1 encoding, originally documented in ISO 8825. The subset
//! used by ISO 7816-6 and EMV is a slightly odd dialect: tags are referred
//! to by their hex values (0x6F rather than Application 15), indefinite
//! lengths are forbidden, and templates nest by recursion into the value
//! bytes. Aside from ISO 7816-6, the dialect is documented in EMV Book 3,
//! Annex B, which is freely available from EMVCo's website.
//!
//! Tags are carried as `u32` holding the raw tag bytes (so the two-byte tag
//! 9F12 is the integer 0x9F12), which keeps match arms and constants
//! readable. Recursion into constructed values is the caller's decision:
//! build a fresh [`iter`] over [`Tlv::value`].

use byteorder::{BigEndian, ByteOrder};
use nom::bytes::complete::take;
use nom::number::complete::be_u8;

pub type IResult<'a, T> = nom::IResult<&'a [u8], T>;

/// A malformed TLV stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("truncated tag field")]
    TruncatedTag,
    #[error("tag field is longer than four bytes")]
    TagTooLong,
    #[error("truncated length field")]
    TruncatedLength,
    /// Indefinite form (0x80), or more than four length bytes. Both are
    /// valid BER, neither is valid in ISO 7816 or EMV.
    #[error("unsupported length form")]
    UnsupportedLength,
    #[error("value field exceeds its buffer")]
    TruncatedValue,
}

/// One decoded tag-length-value tuple, borrowing the value bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tag: u32,
    pub value: &'a [u8],
    /// Total encoded size, including the tag and length fields.
    pub size: usize,
}

/// Does this tag represent a constructed value?
///
/// A constructed value contains further TLV tuples. The opposite is a
/// primitive value, which is a value in itself (a string, number, etc.
/// depending on context). Encoded as bit 6 of the leading tag byte.
pub fn is_constructed(tag: u32) -> bool {
    leading_octet(tag) & (1 << 5) != 0
}

fn leading_octet(tag: u32) -> u8 {
    let mut tag = tag;
    while tag > 0xFF {
        tag >>= 8;
    }
    tag as u8
}

/// Parses a tag into its integer form.
///
/// If bits 1-5 of the first byte are all set, this is a multi-byte tag,
/// continuing until and including the first subsequent byte without bit 8
/// set. EMV caps tags at four bytes; in practice two is the longest seen.
///
/// See EMV Book 3, Annex B1: "Coding of the Tag Field of BER-TLV Data Objects".
fn take_tag(data: &[u8]) -> IResult<u32> {
    let (mut rest, first) = be_u8(data)?;
    if first & 0b0001_1111 != 0b0001_1111 {
        return Ok((rest, first as u32));
    }
    let mut tag = first as u32;
    for _ in 0..3 {
        let (r, b) = be_u8(rest)?;
        rest = r;
        tag = (tag << 8) | b as u32;
        if b & (1 << 7) == 0 {
            return Ok((rest, tag));
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        data,
        nom::error::ErrorKind::TooLarge,
    )))
}

/// Parses a length field.
fn take_len(data_: &[u8]) -> IResult<usize> {
    let (data, lenlen) = be_u8(data_)?;
    if lenlen <= 127 {
        return Ok((data, lenlen as usize));
    }
    let lensize = (lenlen & 0b0111_1111) as usize;
    // Zero subsequent bytes (0b1000_0000) means an indeterminate length,
    // which is valid BER according to ISO 8825 but not allowed in ISO 7816
    // or EMV; EMV also caps definite lengths at four bytes.
    if lensize < 1 || lensize > 4 {
        return Err(nom::Err::Error(nom::error::Error::new(
            data_, // Return the full input!
            nom::error::ErrorKind::TooLarge,
        )));
    }
    let (data, len_bytes) = take(lensize)(data)?;
    Ok((data, BigEndian::read_uint(len_bytes, lensize) as usize))
}

fn classify(err: nom::Err<nom::error::Error<&[u8]>>, truncated: Error, unsupported: Error) -> Error {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) if e.code == nom::error::ErrorKind::TooLarge => {
            unsupported
        }
        _ => truncated,
    }
}

/// Parses the next TLV tuple from a blob, returning it and the remainder.
pub fn parse_next(data: &[u8]) -> Result<(Tlv<'_>, &[u8]), Error> {
    let (after_tag, tag) = take_tag(data).map_err(|e| classify(e, Error::TruncatedTag, Error::TagTooLong))?;
    let (after_len, len) =
        take_len(after_tag).map_err(|e| classify(e, Error::TruncatedLength, Error::UnsupportedLength))?;
    let (rest, value) = take(len)(after_len).map_err(|_: nom::Err<nom::error::Error<&[u8]>>| Error::TruncatedValue)?;
    Ok((
        Tlv {
            tag,
            value,
            size: data.len() - rest.len(),
        },
        rest,
    ))
}

/// Lazily iterates the TLV tuples of a blob, left to right.
///
/// The iterator is restartable (it is `Copy` over an immutable slice) and
/// stops after yielding the first error.
pub fn iter(data: &[u8]) -> Iter<'_> {
    Iter { data }
}

#[derive(Debug, Clone, Copy)]
pub struct Iter<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for Iter<'a> {
    type Item = Result<Tlv<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        match parse_next(self.data) {
            Ok((tlv, rest)) => {
                self.data = rest;
                Some(Ok(tlv))
            }
            Err(err) => {
                self.data = &[];
                Some(Err(err))
            }
        }
    }
}

/// Scans one nesting level for the first tuple with the given tag.
///
/// Returns None if the tag is absent or the stream turns out malformed
/// before it is found.
pub fn find(data: &[u8], tag: u32) -> Option<Tlv<'_>> {
    iter(data).flatten().find(|tlv| tlv.tag == tag)
}

/// Appends the encoding of one TLV tuple to `out`.
///
/// The inverse of [`parse_next`] for tags up to four bytes and lengths up
/// to `u32::MAX`; mainly useful for building test vectors and templates.
pub fn write(tag: u32, value: &[u8], out: &mut Vec<u8>) {
    let mut shift = 24;
    while shift > 0 && (tag >> shift) & 0xFF == 0 {
        shift -= 8;
    }
    loop {
        out.push((tag >> shift) as u8);
        if shift == 0 {
            break;
        }
        shift -= 8;
    }

    let len = value.len();
    if len <= 127 {
        out.push(len as u8);
    } else {
        let mut lensize = 4;
        while lensize > 1 && (len >> ((lensize - 1) * 8)) == 0 {
            lensize -= 1;
        }
        out.push(0x80 | lensize as u8);
        for i in (0..lensize).rev() {
            out.push((len >> (i * 8)) as u8);
        }
    }

    out.extend_from_slice(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_constructed_0x6f() {
        assert_eq!(is_constructed(0x6F), true); // ISO 7816: FCI Template.
    }
    #[test]
    fn test_is_constructed_0xbf0c() {
        assert_eq!(is_constructed(0xBF0C), true); // EMV: FCI Issuer Discretionary Data.
    }
    #[test]
    fn test_is_constructed_0x84() {
        assert_eq!(is_constructed(0x84), false); // ISO 7816: FCI Template > DF Name.
    }
    #[test]
    fn test_is_constructed_0x5f2d() {
        assert_eq!(is_constructed(0x5F2D), false); // EMV: Language Preference.
    }

    #[test]
    fn test_take_tag_0x6f() {
        assert_eq!(take_tag(&[0x6F, 0xFF]).expect("couldn't take tag"), (&[0xFF][..], 0x6F));
    }
    #[test]
    fn test_take_tag_0xbf0c() {
        assert_eq!(
            take_tag(&[0xBF, 0x0C, 0x00]).expect("couldn't take tag"),
            (&[0x00][..], 0xBF0C)
        );
    }
    #[test]
    fn test_take_tag_0x5f2d() {
        let (rest, tag) = take_tag(&[0x5F, 0x2D, 0x02, 0x65, 0x6E]).expect("couldn't take tag");
        assert_eq!(tag, 0x5F2D);
        assert_eq!(rest, &[0x02, 0x65, 0x6E]);
    }
    #[test]
    fn test_take_tag_truncated() {
        assert_eq!(
            parse_next(&[0x9F]).expect_err("truncated tag didn't fail"),
            Error::TruncatedTag
        );
    }
    #[test]
    fn test_take_tag_five_bytes() {
        assert_eq!(
            parse_next(&[0x9F, 0x81, 0x82, 0x83, 0x84, 0x05]).expect_err("five byte tag didn't fail"),
            Error::TagTooLong
        );
    }

    #[test]
    fn test_take_length_short() {
        assert_eq!(take_len(&[0b0000_0000, 0xED]).expect("couldn't take length"), (&[0xED][..], 0));
        assert_eq!(take_len(&[0b0000_0001, 0xED]).expect("couldn't take length"), (&[0xED][..], 1));
        assert_eq!(
            take_len(&[0b0111_1111, 0xED]).expect("couldn't take length"),
            (&[0xED][..], 127)
        );
    }
    #[test]
    fn test_take_length_u8() {
        assert_eq!(
            take_len(&[0b1000_0001, 0xFF, 0xED]).expect("couldn't take length"),
            (&[0xED][..], 0xFF)
        );
    }
    #[test]
    fn test_take_length_u16() {
        assert_eq!(
            take_len(&[0b1000_0010, 0x12, 0x34, 0xED]).expect("couldn't take length"),
            (&[0xED][..], 0x1234)
        );
    }
    #[test]
    fn test_take_length_u32() {
        assert_eq!(
            take_len(&[0b1000_0100, 0x12, 0x34, 0x56, 0x78, 0xED]).expect("couldn't take length"),
            (&[0xED][..], 0x12345678)
        );
    }
    #[test]
    fn test_take_length_u40() {
        // Five length bytes would fit a usize, but not the EMV dialect.
        assert_eq!(
            parse_next(&[0x6F, 0b1000_0101, 0x12, 0x34, 0x56, 0x78, 0x90]).expect_err("u40 length didn't fail"),
            Error::UnsupportedLength
        );
    }
    #[test]
    fn test_take_length_indeterminate() {
        assert_eq!(
            parse_next(&[0x6F, 0b1000_0000, 0xED]).expect_err("indeterminate length didn't fail"),
            Error::UnsupportedLength
        );
    }
    #[test]
    fn test_value_truncated() {
        assert_eq!(
            parse_next(&[0x6F, 0x04, 0x01, 0x02]).expect_err("truncated value didn't fail"),
            Error::TruncatedValue
        );
    }

    #[test]
    fn test_parse_tlv_emv_dir() {
        // Response to `SELECT '1PAY.SYS.DDF01'` to a (Nitecrest) Monzo card.
        let (tlv, rest) = parse_next(&[
            0x6F, 0x1E, 0x84, 0x0E, 0x31, 0x50, 0x41, 0x59, 0x2E, 0x53, 0x59, 0x53, 0x2E, 0x44,
            0x44, 0x46, 0x30, 0x31, 0xA5, 0x0C, 0x88, 0x01, 0x01, 0x5F, 0x2D, 0x02, 0x65, 0x6E,
            0x9F, 0x11, 0x01, 0x01,
        ])
        .expect("couldn't parse TLV");
        assert_eq!(tlv.tag, 0x6F);
        assert_eq!(is_constructed(tlv.tag), true);
        assert_eq!(tlv.size, 32);
        assert_eq!(rest, &[]);

        // Parse 0x6F - the FCI Template.
        let (df_name, rest) = parse_next(tlv.value).expect("couldn't parse 0x6F[0]");
        assert_eq!(df_name.tag, 0x84);
        assert_eq!(is_constructed(df_name.tag), false);
        assert_eq!(df_name.value, "1PAY.SYS.DDF01".as_bytes());

        let (pt, rest) = parse_next(rest).expect("couldn't parse 0x6F[1]");
        assert_eq!(pt.tag, 0xA5);
        assert_eq!(is_constructed(pt.tag), true);
        assert_eq!(rest, &[]);

        // Parse 0xA5 - the FCI Proprietary Template.
        let fields: Vec<_> = iter(pt.value).collect::<Result<_, _>>().expect("couldn't parse 0xA5");
        assert_eq!(fields.len(), 3);
        assert_eq!((fields[0].tag, fields[0].value), (0x88, &[0x01][..]));
        assert_eq!((fields[1].tag, fields[1].value), (0x5F2D, "en".as_bytes()));
        assert_eq!((fields[2].tag, fields[2].value), (0x9F11, &[0x01][..]));
    }

    #[test]
    fn test_find() {
        let data = &[0x88, 0x01, 0x01, 0x5F, 0x2D, 0x02, 0x65, 0x6E, 0x9F, 0x11, 0x01, 0x01];
        assert_eq!(find(data, 0x5F2D).expect("couldn't find 0x5F2D").value, b"en");
        assert_eq!(find(data, 0x50), None);
    }

    fn roundtrip(tag: u32, value: &[u8]) {
        let mut buf = Vec::new();
        write(tag, value, &mut buf);
        let (tlv, rest) = parse_next(&buf).expect("couldn't parse encoded TLV");
        assert_eq!(tlv.tag, tag);
        assert_eq!(tlv.value, value);
        assert_eq!(tlv.size, buf.len());
        assert_eq!(rest, &[]);
    }

    #[test]
    fn test_write_roundtrip() {
        roundtrip(0x50, b"VISA CREDIT");
        roundtrip(0x9F12, b"");
        roundtrip(0xBF0C, &[0xAB; 127]);
        roundtrip(0x5F2D, &[0xCD; 128]);
        roundtrip(0x9F818203, &[0xEF; 0x1234]);
        roundtrip(0x6F, &vec![0x42; 0x10000]);
    }

    #[test]
    fn test_write_roundtrip_nested() {
        // 6F { 84 "1PAY.SYS.DDF01", A5 { 88 01 } } survives an encode/decode cycle.
        let mut a5 = Vec::new();
        write(0x88, &[0x01], &mut a5);
        let mut fci = Vec::new();
        write(0x84, b"1PAY.SYS.DDF01", &mut fci);
        write(0xA5, &a5, &mut fci);
        let mut buf = Vec::new();
        write(0x6F, &fci, &mut buf);

        let (tlv, _) = parse_next(&buf).expect("couldn't parse");
        assert_eq!(tlv.tag, 0x6F);
        let inner: Vec<_> = iter(tlv.value).collect::<Result<_, _>>().expect("couldn't parse 0x6F");
        assert_eq!(inner[0].tag, 0x84);
        assert_eq!(inner[1].tag, 0xA5);
        assert_eq!(find(inner[1].value, 0x88).expect("couldn't find 0x88").value, &[0x01]);
    }
}
