#[cfg(test)]
mod codec_test;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;

use crate::rtp::{Handler, MediaStreamIn, MediaStreamOut, Stream};
use crate::writer::{dump_writer, FrameWriter, Pcm16Writer};

/// Immutable descriptor of one codec, as used during SDP negotiation and
/// RTP payload mapping.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodecInfo {
    /// Exact SDP name, e.g. "PCMU/8000".
    pub sdp_name: String,
    pub sample_rate: u32,
    /// RTP clock rate; equals the sample rate for audio, 90000 for video.
    /// A zero value defaults to the sample rate at construction.
    pub rtp_clock_rate: u32,
    /// Static RTP payload type; meaningful only when `rtp_is_static`.
    pub rtp_def_type: u8,
    pub rtp_is_static: bool,
    /// Used during codec negotiation; larger is better.
    pub priority: i32,
    pub file_ext: String,
    pub disabled: bool,
}

/// Base capability set shared by all codecs.
pub trait Codec: Send + Sync {
    fn info(&self) -> CodecInfo;
}

/// An audio codec: compressed frames on one side, PCM16 on the other.
/// The DSP itself stays behind the encode/decode factories.
pub trait AudioCodec: Codec {
    /// Returns a compressed-frame writer that decodes into `w`.
    fn decode(&self, w: Pcm16Writer) -> FrameWriter;
    /// Returns a PCM writer that encodes into `w`.
    fn encode(&self, w: FrameWriter) -> Pcm16Writer;
    /// Returns a PCM writer whose encoded output is packetized onto the
    /// given RTP stream.
    fn encode_rtp(&self, stream: Arc<Stream>) -> Pcm16Writer;
    /// Returns an RTP handler that decodes incoming payloads into `w`.
    fn decode_rtp(&self, w: Pcm16Writer, payload_type: u8) -> Box<dyn Handler + Send>;
}

/// A video codec: compressed frames only; no PCM side.
pub trait VideoCodec: Codec {
    fn encode_rtp(&self, stream: Arc<Stream>) -> FrameWriter;
    fn decode_rtp(&self, w: FrameWriter, payload_type: u8) -> Box<dyn Handler + Send>;
}

/// A registered codec with its typed capability set.
#[derive(Clone)]
pub enum CodecRef {
    Audio(Arc<dyn AudioCodec>),
    Video(Arc<dyn VideoCodec>),
}

impl CodecRef {
    pub fn info(&self) -> CodecInfo {
        match self {
            CodecRef::Audio(c) => c.info(),
            CodecRef::Video(c) => c.info(),
        }
    }

    pub fn as_audio(&self) -> Option<Arc<dyn AudioCodec>> {
        match self {
            CodecRef::Audio(c) => Some(Arc::clone(c)),
            CodecRef::Video(_) => None,
        }
    }

    pub fn as_video(&self) -> Option<Arc<dyn VideoCodec>> {
        match self {
            CodecRef::Video(c) => Some(Arc::clone(c)),
            CodecRef::Audio(_) => None,
        }
    }
}

type Listener = Arc<dyn Fn(&CodecRef) + Send + Sync>;

struct Registry {
    by_name: HashMap<String, CodecRef>,
    by_type: Vec<Option<CodecRef>>,
    listeners: Vec<Listener>,
}

lazy_static! {
    static ref REGISTRY: Mutex<Registry> = Mutex::new(Registry {
        by_name: HashMap::new(),
        by_type: vec![None; 128],
        listeners: Vec::new(),
    });
    static ref MEDIA_DUMP_TO_FILE: bool =
        std::env::var("LK_DUMP_MEDIA").map(|v| v == "true").unwrap_or(false);
}

static MEDIA_ID: AtomicU32 = AtomicU32::new(0);

fn next_media_id() -> u32 {
    MEDIA_ID.fetch_add(1, Ordering::SeqCst) + 1
}

/// Installs a codec into the process-wide registry, firing all registered
/// listeners. A codec with the same SDP name overwrites the previous one.
pub fn register_codec(c: CodecRef) {
    let listeners = {
        let mut reg = REGISTRY.lock().unwrap();
        let info = c.info();
        reg.by_name.insert(info.sdp_name.clone(), c.clone());
        if info.rtp_is_static {
            let idx = info.rtp_def_type as usize;
            if idx < reg.by_type.len() {
                reg.by_type[idx] = Some(c.clone());
            }
        }
        reg.listeners.clone()
    };
    // Listeners run outside the lock so they may consult the registry.
    for l in &listeners {
        l(&c);
    }
}

/// Subscribes to codec registrations. The listener is immediately replayed
/// for every codec already present, so late subscription and late
/// registration both work.
pub fn on_register<F>(f: F)
where
    F: Fn(&CodecRef) + Send + Sync + 'static,
{
    let f: Listener = Arc::new(f);
    let existing = {
        let mut reg = REGISTRY.lock().unwrap();
        reg.listeners.push(f.clone());
        reg.by_name.values().cloned().collect::<Vec<_>>()
    };
    for c in &existing {
        f(c);
    }
}

/// All registered codecs, ordered by SDP name.
pub fn codecs() -> Vec<CodecRef> {
    let reg = REGISTRY.lock().unwrap();
    let mut list: Vec<CodecRef> = reg.by_name.values().cloned().collect();
    list.sort_by(|a, b| a.info().sdp_name.cmp(&b.info().sdp_name));
    list
}

/// Registered codecs that are not disabled.
pub fn enabled_codecs() -> Vec<CodecRef> {
    codecs().into_iter().filter(|c| !c.info().disabled).collect()
}

/// Exact SDP name match.
pub fn codec_by_name(name: &str) -> Option<CodecRef> {
    REGISTRY.lock().unwrap().by_name.get(name).cloned()
}

/// Lookup by static RTP payload type. Codecs with dynamic payload types
/// are not retrievable this way.
pub fn codec_by_payload_type(typ: u8) -> Option<CodecRef> {
    let reg = REGISTRY.lock().unwrap();
    reg.by_type.get(typ as usize).cloned().flatten()
}

struct FnAudioCodec {
    info: CodecInfo,
    decode: Box<dyn Fn(Pcm16Writer) -> FrameWriter + Send + Sync>,
    encode: Box<dyn Fn(FrameWriter) -> Pcm16Writer + Send + Sync>,
}

/// Builds an [`AudioCodec`] from its descriptor and the two DSP factory
/// functions. Panics on a zero sample rate; a zero RTP clock rate defaults
/// to the sample rate.
pub fn new_audio_codec<D, E>(mut info: CodecInfo, decode: D, encode: E) -> Arc<dyn AudioCodec>
where
    D: Fn(Pcm16Writer) -> FrameWriter + Send + Sync + 'static,
    E: Fn(FrameWriter) -> Pcm16Writer + Send + Sync + 'static,
{
    if info.sample_rate == 0 {
        panic!("invalid sample rate");
    }
    if info.rtp_clock_rate == 0 {
        info.rtp_clock_rate = info.sample_rate;
    }
    Arc::new(FnAudioCodec {
        info,
        decode: Box::new(decode),
        encode: Box::new(encode),
    })
}

fn dump_ext(info: &CodecInfo) -> &str {
    if info.file_ext.is_empty() {
        "raw"
    } else {
        &info.file_ext
    }
}

fn maybe_dump(w: FrameWriter, info: &CodecInfo, dir: &str) -> FrameWriter {
    if !*MEDIA_DUMP_TO_FILE {
        return w;
    }
    let id = next_media_id();
    dump_writer(dump_ext(info), &format!("sip_rtp_{dir}_{id}"), w)
}

impl Codec for FnAudioCodec {
    fn info(&self) -> CodecInfo {
        self.info.clone()
    }
}

impl AudioCodec for FnAudioCodec {
    fn decode(&self, w: Pcm16Writer) -> FrameWriter {
        (self.decode)(w)
    }

    fn encode(&self, w: FrameWriter) -> Pcm16Writer {
        (self.encode)(w)
    }

    fn encode_rtp(&self, stream: Arc<Stream>) -> Pcm16Writer {
        let s: FrameWriter = Box::new(MediaStreamOut::new(stream, self.info.sample_rate));
        let s = maybe_dump(s, &self.info, "out");
        (self.encode)(s)
    }

    fn decode_rtp(&self, w: Pcm16Writer, _payload_type: u8) -> Box<dyn Handler + Send> {
        let s = (self.decode)(w);
        let s = maybe_dump(s, &self.info, "in");
        Box::new(MediaStreamIn::new(s))
    }
}

/// Builds a [`VideoCodec`] from its descriptor and the RTP payloader
/// factory.
pub fn new_video_codec<E>(info: CodecInfo, encode: E) -> Arc<dyn VideoCodec>
where
    E: Fn(FrameWriter) -> FrameWriter + Send + Sync + 'static,
{
    Arc::new(FnVideoCodec {
        info,
        encode: Box::new(encode),
    })
}

struct FnVideoCodec {
    info: CodecInfo,
    encode: Box<dyn Fn(FrameWriter) -> FrameWriter + Send + Sync>,
}

impl Codec for FnVideoCodec {
    fn info(&self) -> CodecInfo {
        self.info.clone()
    }
}

impl VideoCodec for FnVideoCodec {
    fn encode_rtp(&self, stream: Arc<Stream>) -> FrameWriter {
        let s: FrameWriter = Box::new(MediaStreamOut::new(stream, self.info.sample_rate));
        let s = maybe_dump(s, &self.info, "out");
        (self.encode)(s)
    }

    fn decode_rtp(&self, w: FrameWriter, _payload_type: u8) -> Box<dyn Handler + Send> {
        let s = maybe_dump(w, &self.info, "in");
        Box::new(MediaStreamIn::new(s))
    }
}
