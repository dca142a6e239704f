// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Codec bitstream inspection utilities shared by the Remux format crates.
//!
//! Each module takes raw elementary-stream bytes (NAL units, OBUs, or whole packets) and
//! extracts the codec parameters a container needs: decoder configuration records, canonical
//! codec parameter strings, and key-frame classification. Nothing here decodes media samples.

pub mod av1;
pub mod mpeg;
pub mod vpx;
pub mod xiph;
