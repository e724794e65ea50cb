//! Translation between human-readable names/attributes/timestamps and their
//! on-disk 8.3 short-name encoding.
//!
//! This module always uses truncation number 1 by default and never checks
//! for collisions itself; that gap is closed one layer up, in the directory
//! cache's `create` — this module stays a pure, stateless codec.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{FsError, Result};

pub const NAME_LEN: usize = 8;
pub const EXT_LEN: usize = 3;
pub const SFN_NAME_LEN: usize = NAME_LEN + EXT_LEN;

bitflags::bitflags! {
    /// DOS/FAT directory-entry attribute byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;
    }
}

fn is_allowed_punct(c: char) -> bool {
    matches!(c, '!' | '#' | '$' | '%' | '&' | '\'' | '(' | ')' | '-' | '@' | '^' | '_' | '`' | '{' | '}' | '~')
}

fn filter_char(c: char) -> Option<char> {
    let upper = c.to_ascii_uppercase();
    if upper.is_ascii_alphanumeric() {
        Some(upper)
    } else if upper == '+' {
        Some('_')
    } else if is_allowed_punct(upper) {
        Some(upper)
    } else {
        None
    }
}

fn filtered(s: &str) -> String {
    s.chars().filter_map(filter_char).collect()
}

/// Builds the 11-byte space-padded on-disk short name for `input`, using
/// `truncation` (1-9) as the numeric suffix when the filtered stem is longer
/// than 8 characters. Callers that want collision-free names retry with
/// increasing `truncation` values themselves.
pub fn construct_short_name(input: &str, truncation: u8) -> Result<[u8; SFN_NAME_LEN]> {
    if !(1..=9).contains(&truncation) {
        return Err(FsError::InvalidArg {
            reason: format!("truncation number {} out of range 1-9", truncation),
        });
    }

    let (stem, ext) = match input.rfind('.') {
        Some(i) => (&input[..i], &input[i + 1..]),
        None => (input, ""),
    };

    let stem_filtered = filtered(stem);
    let ext_filtered = filtered(ext);

    let mut name_bytes = [b' '; NAME_LEN];
    if stem_filtered.chars().count() > NAME_LEN {
        let truncated: String = stem_filtered.chars().take(6).collect();
        let with_suffix = format!("{}~{}", truncated, truncation);
        for (i, c) in with_suffix.bytes().take(NAME_LEN).enumerate() {
            name_bytes[i] = c;
        }
    } else {
        for (i, c) in stem_filtered.bytes().take(NAME_LEN).enumerate() {
            name_bytes[i] = c;
        }
    }

    let mut ext_bytes = [b' '; EXT_LEN];
    for (i, c) in ext_filtered.bytes().take(EXT_LEN).enumerate() {
        ext_bytes[i] = c;
    }

    let mut out = [b' '; SFN_NAME_LEN];
    out[..NAME_LEN].copy_from_slice(&name_bytes);
    out[NAME_LEN..].copy_from_slice(&ext_bytes);
    Ok(out)
}

/// Reverse-expands an 11-byte on-disk short name into the conventional
/// "NAME.EXT" spelling (no dot if the extension region is blank).
pub fn expand_short_name(sfn: &[u8; SFN_NAME_LEN]) -> String {
    let name_end = sfn[..NAME_LEN].iter().position(|&b| b == b' ').unwrap_or(NAME_LEN);
    let name = String::from_utf8_lossy(&sfn[..name_end]).into_owned();

    let ext = &sfn[NAME_LEN..];
    if ext[0] == b' ' {
        name
    } else {
        let ext_end = ext.iter().position(|&b| b == b' ').unwrap_or(EXT_LEN);
        format!("{}.{}", name, String::from_utf8_lossy(&ext[..ext_end]))
    }
}

pub fn attributes_from_byte(b: u8) -> Attributes {
    Attributes::from_bits_truncate(b)
}

pub fn attributes_to_byte(a: Attributes) -> u8 {
    a.bits()
}

/// FAT date: `((year-1980)<<9) | (month<<5) | day`.
pub fn encode_fat_date(dt: &NaiveDateTime) -> u16 {
    let year = (dt.year() - 1980).max(0) as u16;
    ((year & 0x7F) << 9) | ((dt.month() as u16 & 0x0F) << 5) | (dt.day() as u16 & 0x1F)
}

/// FAT time: `(hour<<11) | (minute<<5) | (seconds/2)`.
pub fn encode_fat_time(dt: &NaiveDateTime) -> u16 {
    ((dt.hour() as u16 & 0x1F) << 11) | ((dt.minute() as u16 & 0x3F) << 5) | ((dt.second() as u16 / 2) & 0x1F)
}

const REFERENCE_EPOCH: (i32, u32, u32) = (1980, 1, 1);

/// Decodes a FAT (date, time) pair back into a wall-clock timestamp. Dates
/// that don't parse (e.g. day 0) fall back to the 1980-01-01T00:00:00 epoch
/// rather than failing the whole directory load.
pub fn decode_fat_datetime(date: u16, time: u16) -> NaiveDateTime {
    let year = 1980 + ((date >> 9) & 0x7F) as i32;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;

    let hour = (time >> 11) & 0x1F;
    let minute = (time >> 5) & 0x3F;
    let second = (time & 0x1F) * 2;

    NaiveDate::from_ymd_opt(year, month.max(1), day.max(1))
        .and_then(|d| d.and_hms_opt(hour as u32, minute as u32, second as u32))
        .unwrap_or_else(|| {
            NaiveDate::from_ymd_opt(REFERENCE_EPOCH.0, REFERENCE_EPOCH.1, REFERENCE_EPOCH.2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_within_eight_chars_are_space_padded() {
        let sfn = construct_short_name("readme.txt", 1).unwrap();
        assert_eq!(&sfn, b"README  TXT");
    }

    #[test]
    fn long_names_truncate_with_numeric_suffix() {
        let sfn = construct_short_name("configuration.cfg", 1).unwrap();
        assert_eq!(&sfn[..NAME_LEN], b"CONFIG~1");
        assert_eq!(&sfn[NAME_LEN..], b"CFG");
    }

    #[test]
    fn disallowed_characters_are_skipped_not_substituted() {
        let sfn = construct_short_name("my file!.txt", 1).unwrap();
        // space is skipped, '!' is in the whitelist and kept
        assert_eq!(&sfn[..NAME_LEN], b"MYFILE! ");
    }

    #[test]
    fn expand_reverses_construct_for_short_names() {
        let sfn = construct_short_name("readme.txt", 1).unwrap();
        assert_eq!(expand_short_name(&sfn), "README.TXT");
    }

    #[test]
    fn expand_omits_dot_when_extension_is_blank() {
        let sfn = construct_short_name("noext", 1).unwrap();
        assert_eq!(expand_short_name(&sfn), "NOEXT");
    }

    #[test]
    fn truncation_out_of_range_is_rejected() {
        assert!(construct_short_name("x", 0).is_err());
        assert!(construct_short_name("x", 10).is_err());
    }

    #[test]
    fn date_time_round_trip() {
        let dt = NaiveDate::from_ymd_opt(2004, 3, 17)
            .unwrap()
            .and_hms_opt(13, 45, 30)
            .unwrap();
        let date = encode_fat_date(&dt);
        let time = encode_fat_time(&dt);
        let decoded = decode_fat_datetime(date, time);
        assert_eq!(decoded.date(), dt.date());
        assert_eq!(decoded.hour(), 13);
        assert_eq!(decoded.minute(), 45);
        assert_eq!(decoded.second(), 30);
    }

    #[test]
    fn attribute_round_trip() {
        let a = Attributes::DIRECTORY | Attributes::HIDDEN;
        assert_eq!(attributes_from_byte(attributes_to_byte(a)), a);
    }
}
