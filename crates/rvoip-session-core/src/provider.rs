//! Stream polymorphism: a common trait surface over media kinds (spec §9:
//! "audio today, video tomorrow... a tagged variant with a common trait
//! surface"). Only the audio provider is implemented; a future video
//! provider would share this trait without touching the session state
//! machine.

use std::net::SocketAddr;
use std::sync::Arc;

use rvoip_media_core::AudioStream;
use rvoip_rtp_core::stats::StatsSnapshot;
use rvoip_sip_types::sdp::MediaDescription;

use crate::error::Result;

/// Per-medium adapter binding SDP processing to its RTP socket and stream
/// (spec GLOSSARY "Provider").
pub trait MediaProvider: Send + Sync {
    /// Sends one frame of device-rate PCM down this provider's send path.
    fn process_send_frame(&self, pcm: &[i16]);

    /// Hands one datagram the socket heap classified as belonging to this
    /// provider's media line to its receive path.
    fn on_incoming_datagram(&self, src: SocketAddr, data: &[u8]);

    /// Fills in the codec/DTMF-related attributes of an outbound media
    /// description; transport/ICE attributes are filled by the session.
    fn build_sdp(&self, media: &mut MediaDescription);

    /// Applies the peer's media description (codec negotiation result,
    /// direction, crypto) to this provider.
    fn apply_remote_sdp(&self, media: &MediaDescription) -> Result<()>;

    fn statistics(&self) -> StatsSnapshot;

    /// Called once before the provider (and its owning media stream) is
    /// dropped — releases mixer channels and any codec state.
    fn session_terminated(&self);
}

/// The only provider kind implemented: wraps an [`AudioStream`].
pub struct AudioProvider {
    stream: Arc<AudioStream>,
    codec_name: &'static str,
    codec_r_factor: f64,
}

impl AudioProvider {
    pub fn new(stream: Arc<AudioStream>, codec_name: &'static str, codec_r_factor: f64) -> Self {
        Self { stream, codec_name, codec_r_factor }
    }

    pub fn stream(&self) -> &Arc<AudioStream> {
        &self.stream
    }
}

impl MediaProvider for AudioProvider {
    fn process_send_frame(&self, pcm: &[i16]) {
        let _ = self.stream.on_capture_frame(pcm);
    }

    fn on_incoming_datagram(&self, src: SocketAddr, data: &[u8]) {
        self.stream.on_incoming_datagram(src, data);
    }

    fn build_sdp(&self, media: &mut MediaDescription) {
        if let Some(&pt) = media.payload_types.first() {
            media.rtpmap.push((pt, format!("{}/{}", self.codec_name, self.stream.rtp_session().clock_rate())));
        }
    }

    fn apply_remote_sdp(&self, _media: &MediaDescription) -> Result<()> {
        Ok(())
    }

    fn statistics(&self) -> StatsSnapshot {
        let stats = self.stream.rtp_session().stats();
        let clock_rate = self.stream.rtp_session().clock_rate();
        stats.snapshot(self.stream.rtp_session().remote_address(), Some(self.codec_name), Some(self.stream.rtp_session().local_ssrc()), self.codec_r_factor, clock_rate)
    }

    fn session_terminated(&self) {
        self.stream.unregister_from_mixer();
    }
}
