// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An ID3v2.4 tag writer.

use crate::MetadataTags;

use super::unsync::write_syncsafe_u32;

const ENCODING_UTF8: u8 = 3;

/// Serialize `tags` as a complete ID3v2.4 tag, header included. Returns an empty buffer when
/// there is nothing to write.
pub fn write_id3v2_4(tags: &MetadataTags) -> Vec<u8> {
    if tags.is_empty() {
        return Vec::new();
    }

    let mut body = Vec::new();

    write_text_frame(&mut body, b"TIT2", tags.title.as_deref());
    write_text_frame(&mut body, b"TPE1", tags.artist.as_deref());
    write_text_frame(&mut body, b"TALB", tags.album.as_deref());
    write_text_frame(&mut body, b"TPE2", tags.album_artist.as_deref());
    write_text_frame(&mut body, b"TCON", tags.genre.as_deref());
    write_text_frame(&mut body, b"TDRC", tags.date.as_deref());

    write_text_frame(
        &mut body,
        b"TRCK",
        format_pair(tags.track_number, tags.tracks_total).as_deref(),
    );
    write_text_frame(
        &mut body,
        b"TPOS",
        format_pair(tags.disc_number, tags.discs_total).as_deref(),
    );

    if let Some(comment) = &tags.comment {
        write_language_frame(&mut body, b"COMM", comment);
    }
    if let Some(lyrics) = &tags.lyrics {
        write_language_frame(&mut body, b"USLT", lyrics);
    }

    for image in &tags.images {
        let mut payload = vec![ENCODING_UTF8];
        payload.extend_from_slice(image.media_type.as_bytes());
        payload.push(0);
        payload.push(image.picture_type);
        payload.extend_from_slice(image.description.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&image.data);
        write_raw_frame(&mut body, b"APIC", &payload);
    }

    let mut out = Vec::with_capacity(body.len() + 10);
    out.extend_from_slice(b"ID3");
    out.push(4);
    out.push(0);
    out.push(0);
    out.extend_from_slice(&write_syncsafe_u32(body.len() as u32));
    out.extend_from_slice(&body);
    out
}

fn format_pair(number: Option<u32>, out_of: Option<u32>) -> Option<String> {
    match (number, out_of) {
        (Some(number), Some(out_of)) => Some(format!("{}/{}", number, out_of)),
        (Some(number), None) => Some(number.to_string()),
        _ => None,
    }
}

fn write_text_frame(out: &mut Vec<u8>, id: &[u8; 4], text: Option<&str>) {
    if let Some(text) = text {
        let mut payload = vec![ENCODING_UTF8];
        payload.extend_from_slice(text.as_bytes());
        write_raw_frame(out, id, &payload);
    }
}

fn write_language_frame(out: &mut Vec<u8>, id: &[u8; 4], text: &str) {
    let mut payload = vec![ENCODING_UTF8];
    // Undetermined language and an empty content descriptor.
    payload.extend_from_slice(b"und\0");
    payload.extend_from_slice(text.as_bytes());
    write_raw_frame(out, id, &payload);
}

fn write_raw_frame(out: &mut Vec<u8>, id: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(id);
    out.extend_from_slice(&write_syncsafe_u32(payload.len() as u32));
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(payload);
}
