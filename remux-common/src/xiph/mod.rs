// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod opus;
pub mod vorbis;

/// Concatenate packets with a Xiph lacing preamble: a packet count byte, then each packet's
/// length (except the last) as 255-valued bytes plus a remainder, then the packet bytes.
///
/// This is the layout of a Vorbis decoder description in Matroska `CodecPrivate` and in the
/// decoder-configuration blob the track model exposes.
pub fn lace_packets(packets: &[&[u8]]) -> Vec<u8> {
    assert!(!packets.is_empty());

    let mut out = Vec::new();
    out.push((packets.len() - 1) as u8);

    for packet in &packets[..packets.len() - 1] {
        let mut len = packet.len();
        while len >= 255 {
            out.push(255);
            len -= 255;
        }
        out.push(len as u8);
    }

    for packet in packets {
        out.extend_from_slice(packet);
    }

    out
}

/// Split a Xiph-laced blob back into its packets.
pub fn unlace_packets(data: &[u8]) -> Option<Vec<&[u8]>> {
    let (&count, mut rest) = data.split_first()?;
    let count = count as usize + 1;

    let mut lens = Vec::with_capacity(count);
    for _ in 0..count - 1 {
        let mut len = 0usize;
        loop {
            let (&byte, tail) = rest.split_first()?;
            rest = tail;
            len += byte as usize;
            if byte < 255 {
                break;
            }
        }
        lens.push(len);
    }

    let mut packets = Vec::with_capacity(count);
    for len in lens {
        if len > rest.len() {
            return None;
        }
        let (packet, tail) = rest.split_at(len);
        packets.push(packet);
        rest = tail;
    }
    packets.push(rest);

    Some(packets)
}

#[cfg(test)]
mod tests {
    use super::{lace_packets, unlace_packets};

    #[test]
    fn verify_lacing_round_trip() {
        let a = vec![1u8; 300];
        let b = vec![2u8; 255];
        let c = vec![3u8; 10];

        let laced = lace_packets(&[&a, &b, &c]);
        // 300 = 255 + 45, 255 = 255 + 0.
        assert_eq!(laced[0], 2);
        assert_eq!(&laced[1..5], &[255, 45, 255, 0]);

        let packets = unlace_packets(&laced).unwrap();
        assert_eq!(packets, vec![&a[..], &b[..], &c[..]]);
    }
}
