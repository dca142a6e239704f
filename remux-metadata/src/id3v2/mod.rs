// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An ID3v2.3/2.4 tag reader and an ID3v2.4 writer.

mod frames;
mod unsync;
mod writer;

pub use writer::write_id3v2_4;

use log::debug;

use remux_core::errors::{invalid_format_error, Result};

use crate::MetadataTags;

use frames::read_frame;
use unsync::{decode_unsynchronisation, read_syncsafe_u32};

/// The fixed size of the tag header.
pub const ID3V2_HEADER_LEN: usize = 10;

#[derive(Debug)]
struct Header {
    major_version: u8,
    size: u32,
    unsynchronisation: bool,
    has_extended_header: bool,
    has_footer: bool,
}

/// Peek an ID3v2 header and return the total size of the tag in bytes (header, body, and footer),
/// or `None` when `data` does not begin with a tag. Used to skip the tag without parsing frames.
pub fn tag_total_size(data: &[u8]) -> Option<u64> {
    if data.len() < ID3V2_HEADER_LEN || &data[..3] != b"ID3" {
        return None;
    }

    // Version bytes must never be 0xff.
    if data[3] == 0xff || data[4] == 0xff {
        return None;
    }

    // The tag size is a 28-bit synchsafe integer over bytes 6 through 9.
    if data[6..10].iter().any(|&b| b & 0x80 != 0) {
        return None;
    }

    let size = read_syncsafe_u32(&data[6..10]);
    let footer = if data[5] & 0x10 != 0 { 10 } else { 0 };

    Some(u64::from(size) + ID3V2_HEADER_LEN as u64 + footer)
}

fn read_header(data: &[u8]) -> Result<Header> {
    if data.len() < ID3V2_HEADER_LEN || &data[..3] != b"ID3" {
        return invalid_format_error("id3v2: not an ID3v2 tag");
    }

    let major_version = data[3];
    if major_version == 0xff || data[4] == 0xff {
        return invalid_format_error("id3v2: invalid version number");
    }
    if major_version < 3 || major_version > 4 {
        return invalid_format_error("id3v2: unsupported major version");
    }

    let flags = data[5];
    let size = read_syncsafe_u32(&data[6..10]);

    Ok(Header {
        major_version,
        size,
        unsynchronisation: flags & 0x80 != 0,
        has_extended_header: flags & 0x40 != 0,
        has_footer: flags & 0x10 != 0,
    })
}

/// Parse an ID3v2 tag sitting at the start of `data`.
///
/// Returns the decoded tags and the total tag size in bytes.
pub fn parse(data: &[u8]) -> Result<(MetadataTags, u64)> {
    let header = read_header(data)?;

    let total = u64::from(header.size)
        + ID3V2_HEADER_LEN as u64
        + if header.has_footer { 10 } else { 0 };

    let body_end = (ID3V2_HEADER_LEN + header.size as usize).min(data.len());
    let mut body = data[ID3V2_HEADER_LEN..body_end].to_vec();

    // In ID3v2.3 unsynchronisation applies to the whole tag body. In 2.4 it is applied per
    // frame, signalled by a frame flag.
    if header.unsynchronisation && header.major_version <= 3 {
        let len = decode_unsynchronisation(&mut body);
        body.truncate(len);
    }

    let mut pos = 0usize;

    if header.has_extended_header {
        // Both 2.3 and 2.4 lead with a 4-byte size; 2.4's is synchsafe and includes itself.
        if body.len() < 4 {
            return invalid_format_error("id3v2: truncated extended header");
        }
        let ext_size = if header.major_version == 4 {
            read_syncsafe_u32(&body[0..4]) as usize
        }
        else {
            u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize + 4
        };
        pos = ext_size.min(body.len());
    }

    let mut tags = MetadataTags::default();

    while pos + 10 <= body.len() {
        // A zero byte in place of a frame id means the padding has been reached.
        if body[pos] == 0 {
            break;
        }

        match read_frame(&body[pos..], header.major_version, &mut tags) {
            Ok(frame_len) => pos += frame_len,
            Err(err) => {
                debug!("stopping id3v2 frame parse: {}", err);
                break;
            }
        }
    }

    Ok((tags, total))
}

#[cfg(test)]
mod tests {
    use super::{parse, tag_total_size, write_id3v2_4};
    use crate::MetadataTags;

    #[test]
    fn verify_tag_total_size() {
        // Header declaring a 257-byte body via a synchsafe size of 0x00 0x00 0x02 0x01.
        let header = [b'I', b'D', b'3', 4, 0, 0, 0x00, 0x00, 0x02, 0x01];
        assert_eq!(tag_total_size(&header), Some(257 + 10));

        assert_eq!(tag_total_size(b"OggS\x00\x00\x00\x00\x00\x00"), None);
    }

    #[test]
    fn verify_write_then_parse_round_trip() {
        let mut tags = MetadataTags::default();
        tags.title = Some("Night Drive".to_string());
        tags.artist = Some("The Examples".to_string());
        tags.album = Some("Retrieval".to_string());
        tags.track_number = Some(3);
        tags.tracks_total = Some(11);
        tags.genre = Some("Electronic".to_string());
        tags.date = Some("2024".to_string());
        tags.comment = Some("demo".to_string());

        let bytes = write_id3v2_4(&tags);
        assert_eq!(tag_total_size(&bytes), Some(bytes.len() as u64));

        let (parsed, total) = parse(&bytes).unwrap();
        assert_eq!(total, bytes.len() as u64);
        assert_eq!(parsed.title, tags.title);
        assert_eq!(parsed.artist, tags.artist);
        assert_eq!(parsed.album, tags.album);
        assert_eq!(parsed.track_number, Some(3));
        assert_eq!(parsed.tracks_total, Some(11));
        assert_eq!(parsed.genre, tags.genre);
        assert_eq!(parsed.date, tags.date);
        assert_eq!(parsed.comment, tags.comment);
    }
}
