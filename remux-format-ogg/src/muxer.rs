// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use remux_common::xiph::opus::OPUS_SAMPLE_RATE;
use remux_common::xiph::unlace_packets;
use remux_core::demux::FormatInfo;
use remux_core::errors::{encoding_error, Result};
use remux_core::io::Writer;
use remux_core::mux::{Interleaver, Muxer, OutputTrackOptions};
use remux_core::packet::EncodedPacket;
use remux_core::probe::MuxerRegistration;
use remux_core::sync::AsyncMutex;
use remux_core::track::{AudioCodec, TrackInfo};

use crate::page::{write_page, FLAG_BOS, FLAG_CONTINUATION, FLAG_EOS};
use crate::OGG_FORMAT_INFO;

/// Pages are flushed once their body reaches this size, headers aside.
const TARGET_PAGE_SIZE: usize = 8 * 1024;

enum HeaderPackets {
    /// Identification, comment, and setup headers.
    Vorbis([Vec<u8>; 3]),
    /// Identification header; a minimal OpusTags packet is generated.
    Opus(Vec<u8>),
}

struct StreamState {
    serial: u32,
    sample_rate: u32,
    /// Granule value corresponding to presentation time zero (Opus pre-skip).
    granule_offset: i64,
    headers: HeaderPackets,
    sequence: u32,
    /// Lacing values of the open page.
    page_lacing: Vec<u8>,
    page_body: Vec<u8>,
    /// Granule of the last packet completing on the open page, when any does.
    page_granule: Option<u64>,
    /// The next flushed page continues a packet from the previous one.
    continuation: bool,
    last_granule: u64,
    any_page_written: bool,
}

struct MuxState {
    writer: Writer,
    streams: Vec<StreamState>,
    interleaver: Interleaver,
    headers_written: bool,
    finalized: bool,
}

/// Ogg multiplexer.
///
/// One header page set is written per logical bitstream (a Vorbis triple-header, or Opus id plus
/// tags). Data pages target ~8 KiB; each page is serialized with a placeholder checksum and the
/// CRC of the full page back-patched in.
pub struct OggMuxer {
    state: AsyncMutex<MuxState>,
}

impl OggMuxer {
    pub fn new(writer: Writer) -> Arc<OggMuxer> {
        Arc::new(OggMuxer {
            state: AsyncMutex::new(MuxState {
                writer,
                streams: Vec::new(),
                interleaver: Interleaver::new(),
                headers_written: false,
                finalized: false,
            }),
        })
    }
}

fn minimal_opus_tags() -> Vec<u8> {
    let vendor = b"remux";
    let mut out = b"OpusTags".to_vec();
    out.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    out.extend_from_slice(vendor);
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

async fn write_headers(state: &mut MuxState) -> Result<()> {
    // All beginning-of-stream pages come first, in stream order.
    for i in 0..state.streams.len() {
        let (serial, id_packet) = {
            let stream = &state.streams[i];
            let id = match &stream.headers {
                HeaderPackets::Vorbis(headers) => headers[0].clone(),
                HeaderPackets::Opus(id) => id.clone(),
            };
            (stream.serial, id)
        };

        let lacing = crate::page::lacing_for_packet(id_packet.len());
        let page = write_page(serial, 0, 0, FLAG_BOS, &lacing, &id_packet);
        state.writer.write(&page).await?;
        state.streams[i].sequence = 1;
    }

    // Secondary header pages per stream.
    for i in 0..state.streams.len() {
        let (serial, sequence, packets) = {
            let stream = &state.streams[i];
            let packets: Vec<Vec<u8>> = match &stream.headers {
                HeaderPackets::Vorbis(headers) => vec![headers[1].clone(), headers[2].clone()],
                HeaderPackets::Opus(_) => vec![minimal_opus_tags()],
            };
            (stream.serial, stream.sequence, packets)
        };

        let mut lacing = Vec::new();
        let mut body = Vec::new();
        for packet in &packets {
            lacing.extend_from_slice(&crate::page::lacing_for_packet(packet.len()));
            body.extend_from_slice(packet);
        }

        // Header packets must not share a page with audio data, so this page is flushed
        // unconditionally.
        let page = write_page(serial, sequence, 0, 0, &lacing, &body);
        state.writer.write(&page).await?;
        state.streams[i].sequence = sequence + 1;
    }

    state.headers_written = true;
    Ok(())
}

async fn flush_stream_page(writer: &mut Writer, stream: &mut StreamState, eos: bool) -> Result<()> {
    if stream.page_lacing.is_empty() && !eos {
        return Ok(());
    }

    let mut flags = 0u8;
    if stream.continuation {
        flags |= FLAG_CONTINUATION;
    }
    if eos {
        flags |= FLAG_EOS;
    }

    // A page on which no packet completes carries a granule of -1.
    let granule = stream.page_granule.unwrap_or(u64::MAX);
    let granule = if eos && stream.page_lacing.is_empty() { stream.last_granule } else { granule };

    let page =
        write_page(stream.serial, stream.sequence, granule, flags, &stream.page_lacing, &stream.page_body);
    writer.write(&page).await?;

    stream.sequence += 1;
    stream.page_lacing.clear();
    stream.page_body.clear();
    stream.page_granule = None;
    stream.continuation = false;
    stream.any_page_written = true;

    Ok(())
}

/// Append one packet to a stream's open page, flushing as pages fill.
async fn add_packet_to_stream(
    writer: &mut Writer,
    stream: &mut StreamState,
    data: &[u8],
    end_granule: u64,
    force_flush: bool,
) -> Result<()> {
    let mut remaining = data;
    let mut mid_packet = false;

    loop {
        if stream.page_lacing.len() >= 255 {
            // The segment table is full; continue the packet on the next page.
            flush_stream_page(writer, stream, false).await?;
            stream.continuation = mid_packet;
        }

        if remaining.len() >= 255 {
            stream.page_lacing.push(255);
            stream.page_body.extend_from_slice(&remaining[..255]);
            remaining = &remaining[255..];
            mid_packet = true;
        }
        else {
            // The terminating short segment, possibly zero-length.
            stream.page_lacing.push(remaining.len() as u8);
            stream.page_body.extend_from_slice(remaining);
            stream.page_granule = Some(end_granule);
            stream.last_granule = end_granule;
            break;
        }
    }

    if force_flush || stream.page_body.len() >= TARGET_PAGE_SIZE {
        flush_stream_page(writer, stream, false).await?;
    }

    Ok(())
}

#[async_trait]
impl Muxer for OggMuxer {
    fn format_info(&self) -> &'static FormatInfo {
        &OGG_FORMAT_INFO
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn add_track(&self, options: OutputTrackOptions) -> Result<u32> {
        let mut state = self.state.lock().await;

        if state.headers_written {
            return encoding_error("ogg: tracks must be added before the first packet");
        }

        let info = match &options.info {
            TrackInfo::Audio(info) => info,
            _ => return encoding_error("ogg: only audio tracks can be written"),
        };

        let (headers, sample_rate, granule_offset) = match info.codec {
            AudioCodec::Vorbis => {
                // The decoder description is the three header packets, Xiph-laced.
                let config = match &info.decoder_config {
                    Some(config) => config,
                    None => {
                        return encoding_error("ogg: vorbis requires a decoder configuration")
                    }
                };

                let packets = match unlace_packets(config) {
                    Some(packets) if packets.len() == 3 => packets,
                    _ => return encoding_error("ogg: malformed vorbis decoder configuration"),
                };

                let headers = HeaderPackets::Vorbis([
                    packets[0].to_vec(),
                    packets[1].to_vec(),
                    packets[2].to_vec(),
                ]);
                (headers, info.sample_rate, 0i64)
            }
            AudioCodec::Opus => {
                // Use the carried identification header, or synthesize one.
                let id_packet = match &info.decoder_config {
                    Some(config) => config.to_vec(),
                    None => remux_common::xiph::opus::OpusIdHeader::new(
                        info.channel_count as u8,
                        0,
                        info.sample_rate,
                    )
                    .serialize(),
                };

                let pre_skip =
                    remux_common::xiph::opus::OpusIdHeader::parse(&id_packet)?.pre_skip;

                (HeaderPackets::Opus(id_packet), OPUS_SAMPLE_RATE, i64::from(pre_skip))
            }
            _ => return encoding_error("ogg: unsupported codec for ogg output"),
        };

        // Serial numbers only need to be distinct within the file.
        let serial = 0x5265_0000 | state.streams.len() as u32;

        state.streams.push(StreamState {
            serial,
            sample_rate,
            granule_offset,
            headers,
            sequence: 0,
            page_lacing: Vec::new(),
            page_body: Vec::new(),
            page_granule: None,
            continuation: false,
            last_granule: 0,
            any_page_written: false,
        });
        state.interleaver.add_track(serial);

        Ok(serial)
    }

    async fn write_packet(&self, track_id: u32, packet: &EncodedPacket) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.finalized {
            return encoding_error("ogg: output already finalized");
        }
        if packet.is_metadata_only() {
            return encoding_error("ogg: cannot write a metadata-only packet");
        }

        if !state.headers_written {
            write_headers(&mut state).await?;
        }

        state.interleaver.push(track_id, packet.clone())?;

        while state.interleaver.ready() {
            let (serial, packet) = match state.interleaver.pop() {
                Some(popped) => popped,
                None => break,
            };

            let MuxState { writer, streams, .. } = &mut *state;
            let stream = streams
                .iter_mut()
                .find(|s| s.serial == serial)
                .expect("packet for unknown stream");

            let rate = f64::from(stream.sample_rate);
            let end_granule = ((packet.end_timestamp() * rate).round() as i64
                + stream.granule_offset)
                .max(0) as u64;

            add_packet_to_stream(writer, stream, packet.data(), end_granule, false).await?;
        }

        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.finalized {
            return Ok(());
        }

        if !state.headers_written {
            write_headers(&mut state).await?;
        }

        state.interleaver.close_all();

        while let Some((serial, packet)) = state.interleaver.pop() {
            let MuxState { writer, streams, .. } = &mut *state;
            let stream = streams
                .iter_mut()
                .find(|s| s.serial == serial)
                .expect("packet for unknown stream");

            let rate = f64::from(stream.sample_rate);
            let end_granule = ((packet.end_timestamp() * rate).round() as i64
                + stream.granule_offset)
                .max(0) as u64;

            add_packet_to_stream(writer, stream, packet.data(), end_granule, false).await?;
        }

        // Close every stream with an end-of-stream page.
        let MuxState { writer, streams, .. } = &mut *state;
        for stream in streams.iter_mut() {
            debug!("closing stream {:#010x} at granule {}", stream.serial, stream.last_granule);
            flush_stream_page(writer, stream, true).await?;
        }

        state.finalized = true;
        state.writer.flush().await
    }
}

/// The registry entry for the Ogg output format.
pub fn registration() -> MuxerRegistration {
    MuxerRegistration { info: &OGG_FORMAT_INFO, new_muxer: |writer| Ok(OggMuxer::new(writer) as _) }
}
