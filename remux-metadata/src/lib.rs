// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Project Remux ID3v2 metadata reader and writer.

pub mod id3v2;

use smallvec::SmallVec;

/// A picture attached to a tag.
#[derive(Clone, Debug, PartialEq)]
pub struct AttachedImage {
    /// The media type of the image data, e.g. `image/png`.
    pub media_type: String,
    /// The ID3v2 picture type code. 3 is the front cover.
    pub picture_type: u8,
    pub description: String,
    pub data: Box<[u8]>,
}

/// Container-independent tag values, the intersection of what the supported containers can carry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetadataTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub track_number: Option<u32>,
    pub tracks_total: Option<u32>,
    pub disc_number: Option<u32>,
    pub discs_total: Option<u32>,
    pub genre: Option<String>,
    /// A release date or year, kept as written.
    pub date: Option<String>,
    pub lyrics: Option<String>,
    pub comment: Option<String>,
    pub images: SmallVec<[AttachedImage; 1]>,
}

impl MetadataTags {
    /// Returns true if no field carries a value.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.album.is_none()
            && self.album_artist.is_none()
            && self.track_number.is_none()
            && self.tracks_total.is_none()
            && self.disc_number.is_none()
            && self.discs_total.is_none()
            && self.genre.is_none()
            && self.date.is_none()
            && self.lyrics.is_none()
            && self.comment.is_none()
            && self.images.is_empty()
    }
}
