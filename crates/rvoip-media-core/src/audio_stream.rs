//! Audio stream: owns capture→encode→packetize and receive→decode→mix for
//! one media leg (spec §3 "Audio stream", §4.2).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rvoip_codec_core::registry::CodecFactory;
use rvoip_rtp_core::session::RtpSession;

use crate::dtmf::{DtmfEngine, DtmfMode};
use crate::error::Result;
use crate::mixer::{ChannelKey, Mixer};
use crate::receive_stream::ReceiveStream;
use crate::resample::ResamplerBank;
use crate::wav::{WavReader, WavWriter};
use crate::window::SlidingPcmWindow;

/// Per-direction override state (spec §4.2 send-path steps 1-2).
#[derive(Default)]
struct Overrides {
    wav_read: Option<Mutex<WavReader>>,
    wav_write: Option<Mutex<WavWriter>>,
    mirror_enabled: AtomicBool,
}

/// One media leg: capture window, codec, DTMF engine, RTP session, and the
/// per-SSRC decode/jitter map feeding a shared session [`Mixer`].
pub struct AudioStream {
    context: u64,
    capture: SlidingPcmWindow,
    mirror_buffer: SlidingPcmWindow,
    resamplers: Mutex<ResamplerBank>,
    overrides: Overrides,

    codec: Arc<dyn CodecFactory>,
    encoder: Mutex<Box<dyn rvoip_codec_core::registry::Encoder>>,
    packet_time_ms: u32,
    device_rate: u32,
    pcm_accumulator: Mutex<Vec<i16>>,

    dtmf: Mutex<DtmfEngine>,
    rtp: Arc<RtpSession>,
    receive_streams: Mutex<HashMap<u32, ReceiveStream>>,
    decoder_factory: Arc<dyn CodecFactory>,
    mixer: Arc<Mixer>,
}

impl AudioStream {
    pub fn new(
        context: u64,
        codec: Arc<dyn CodecFactory>,
        decoder_factory: Arc<dyn CodecFactory>,
        rtp: Arc<RtpSession>,
        mixer: Arc<Mixer>,
        device_rate: u32,
        dtmf_mode: DtmfMode,
    ) -> Self {
        let descriptor = codec.descriptor();
        let encoder = codec.new_encoder();
        Self {
            context,
            capture: SlidingPcmWindow::new(device_rate as usize),
            mirror_buffer: SlidingPcmWindow::new(device_rate as usize),
            resamplers: Mutex::new(ResamplerBank::new(device_rate)),
            overrides: Overrides::default(),
            codec,
            encoder: Mutex::new(encoder),
            packet_time_ms: descriptor.frame_time_ms,
            device_rate,
            pcm_accumulator: Mutex::new(Vec::new()),
            dtmf: Mutex::new(DtmfEngine::new(dtmf_mode, descriptor.frame_time_ms, 160, device_rate)),
            rtp,
            receive_streams: Mutex::new(HashMap::new()),
            decoder_factory,
            mixer,
        }
    }

    pub fn set_wav_read(&mut self, reader: WavReader) {
        self.overrides.wav_read = Some(Mutex::new(reader));
    }

    pub fn set_wav_write(&mut self, writer: WavWriter) {
        self.overrides.wav_write = Some(Mutex::new(writer));
    }

    pub fn set_mirror_enabled(&self, enabled: bool) {
        self.overrides.mirror_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn queue_dtmf(&self, digit: crate::dtmf::DtmfDigit) {
        self.dtmf.lock().queue_digit(digit);
    }

    /// Send-path entry point: one device-rate PCM frame from the microphone
    /// callback. Implements spec §4.2 steps 1-7.
    pub fn on_capture_frame(&self, device_pcm: &[i16]) -> Result<()> {
        self.capture.push(device_pcm);
        let mut frame = self.capture.pop(device_pcm.len());

        // Step 1: wav-read-outgoing override.
        if let Some(reader) = &self.overrides.wav_read {
            let mut reader = reader.lock();
            let mut replacement = vec![0i16; frame.len()];
            if reader.read_samples(&mut replacement).is_ok() {
                frame = replacement;
            }
        }

        // Step 2: mirror override (loopback self-test).
        if self.overrides.mirror_enabled.load(Ordering::Relaxed) && self.mirror_buffer.available() >= frame.len() {
            frame = self.mirror_buffer.pop(frame.len());
        }

        // Step 3: resample to codec rate.
        let descriptor = self.codec.descriptor();
        let mut resamplers = self.resamplers.lock();
        let mut codec_rate_frame = resamplers.from_device(descriptor.clock_rate, &frame);
        drop(resamplers);

        // Step 4: channel conversion — codecs here are mono only, no-op.

        // Step 5: inband DTMF splice.
        if let Some(tone) = self.dtmf.lock().pull_inband_frame(codec_rate_frame.len()) {
            let len = tone.len().min(codec_rate_frame.len());
            codec_rate_frame[..len].copy_from_slice(&tone[..len]);
        }

        if let Some(writer) = &self.overrides.wav_write {
            writer.lock().write_samples(&codec_rate_frame).ok();
        }

        // Step 6: encode and accumulate until one packet-time's worth is ready.
        let encoded = self.encoder.lock().encode(&codec_rate_frame);
        let mut acc = self.pcm_accumulator.lock();
        acc.extend(codec_rate_frame.iter());
        let samples_per_packet = descriptor.clock_rate as usize * self.packet_time_ms as usize / 1000;
        let ready = acc.len() >= samples_per_packet;
        drop(acc);

        if ready {
            self.rtp.send_frame(&encoded, samples_per_packet as u32)?;
            self.pcm_accumulator.lock().clear();

            // RFC 2833: one packet per tick while a digit is active and
            // inband mode isn't selected (the DTMF engine enforces which).
            if let Some(packet) = self.dtmf.lock().pull_rfc2833_packet() {
                let bytes = packet.serialize();
                self.rtp.send_frame(&bytes, samples_per_packet as u32)?;
            }
        }
        Ok(())
    }

    /// Receive-path entry point: one datagram classified as RTP by the
    /// socket heap / demuxer (spec §4.2 receive path step 2-3).
    pub fn on_incoming_datagram(&self, src: std::net::SocketAddr, data: &[u8]) {
        let Some(seq) = rvoip_rtp_core::packet::sequence_number_of(data) else { return };
        let Some(ssrc) = rvoip_rtp_core::packet::ssrc_of(data) else { return };
        let Some(payload) = self.rtp.on_datagram(src, data) else { return };

        let mut streams = self.receive_streams.lock();
        let descriptor = self.decoder_factory.descriptor();
        streams
            .entry(ssrc)
            .or_insert_with(|| ReceiveStream::new(ssrc, self.decoder_factory.new_decoder(), descriptor.payload_size))
            .push_packet(seq, payload);
    }

    /// Speaker-callback entry point: pulls decoded/jittered PCM from every
    /// active receive stream into the shared mixer, then drains `len`
    /// mixed samples at device rate (spec §4.2 "speaker callback").
    pub fn pull_speaker_frame(&self, len: usize) -> Vec<i16> {
        let descriptor = self.decoder_factory.descriptor();
        let mut streams = self.receive_streams.lock();
        for (&ssrc, stream) in streams.iter_mut() {
            let pcm = stream.pull_pcm();
            self.mixer
                .add_pcm(ChannelKey { context: self.context, ssrc }, &pcm, descriptor.clock_rate, true)
                .ok();
        }
        drop(streams);

        let mixed = self.mixer.mix_and_get_pcm(len);
        if self.overrides.mirror_enabled.load(Ordering::Relaxed) {
            self.mirror_buffer.push(&mixed);
        }
        mixed
    }

    pub fn unregister_from_mixer(&self) {
        self.mixer.unregister_channel(self.context);
    }

    pub fn rtp_session(&self) -> &Arc<RtpSession> {
        &self.rtp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::Mixer;
    use rvoip_codec_core::g711::G711Factory;
    use rvoip_rtp_core::socket_heap::{Family, Multiplex, SocketHeap, SocketSink};

    struct NullSink;
    impl SocketSink for NullSink {
        fn on_received_data(&self, _h: rvoip_rtp_core::socket_heap::SocketHandle, _s: std::net::SocketAddr, _d: &[u8]) {}
    }

    fn make_stream() -> AudioStream {
        let heap = Arc::new(SocketHeap::new(32000, 32200).unwrap());
        let (rtp, rtcp) = heap.alloc_socket_pair(Family::V4, Arc::new(NullSink), Multiplex::Do).unwrap();
        let session = Arc::new(RtpSession::new(heap, rtp.0, rtcp.0, 0, 8000, None));
        session.set_remote_address("127.0.0.1:9".parse().unwrap());
        let codec: Arc<dyn CodecFactory> = Arc::new(G711Factory::pcmu());
        let mixer = Arc::new(Mixer::new(4, 8000));
        AudioStream::new(1, codec.clone(), codec, session, mixer, 8000, DtmfMode::Rfc2833)
    }

    #[test]
    fn capture_frame_sends_rtp_once_packet_time_is_reached() {
        let stream = make_stream();
        stream.on_capture_frame(&[100i16; 160]).unwrap();
        assert_eq!(stream.rtp_session().stats().bytes_sent(), 160);
    }

    #[test]
    fn speaker_pull_with_no_sources_is_silence() {
        let stream = make_stream();
        let out = stream.pull_speaker_frame(160);
        assert_eq!(out, vec![0i16; 160]);
    }
}
