//! Remote media rendering
//!
//! Each call owns one [`AudioSink`], created lazily through an
//! [`AudioSinkFactory`] the first time the call needs it and reused for the
//! rest of the call. When the media engine reports a remote track, the call
//! collects every inbound track on the peer connection into one
//! [`MediaStream`] and hands it to the sink with [`attach_remote_media`].
//!
//! Sinks differ in how they accept a source. The mechanisms are tried in
//! [`AttachMechanism::PREFERENCE`] order:
//!
//! 1. `SrcObject` - assign the stream object directly
//! 2. `MozSrcObject` - the legacy vendor-prefixed stream property
//! 3. `ObjectUrl` - assign a playable URL built from the stream
//!
//! A sink that supports none of them is not fatal: the attachment is
//! reported as [`MediaAttachment::Unavailable`] and the call carries on.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StackResult;
use crate::stack::PeerConnection;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// A single remote media track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

impl MediaTrack {
    pub fn audio(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Audio,
        }
    }
}

/// A combined stream built from the tracks of all inbound receivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    id: Uuid,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        self.tracks.push(track);
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Playable URL referring to this stream
    pub fn object_url(&self) -> String {
        format!("blob:rvoip/{}", self.id)
    }
}

impl Default for MediaStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Ways a sink can accept a remote stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachMechanism {
    /// Modern stream-assignment property
    SrcObject,
    /// Legacy vendor-prefixed stream property
    MozSrcObject,
    /// Playable URL constructed from the stream
    ObjectUrl,
}

impl AttachMechanism {
    /// Order in which mechanisms are tried
    pub const PREFERENCE: [AttachMechanism; 3] = [
        AttachMechanism::SrcObject,
        AttachMechanism::MozSrcObject,
        AttachMechanism::ObjectUrl,
    ];
}

impl fmt::Display for AttachMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachMechanism::SrcObject => write!(f, "srcObject"),
            AttachMechanism::MozSrcObject => write!(f, "mozSrcObject"),
            AttachMechanism::ObjectUrl => write!(f, "src"),
        }
    }
}

/// Source assignment handed to a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    SrcObject(MediaStream),
    MozSrcObject(MediaStream),
    Src(String),
}

impl Attachment {
    fn for_mechanism(mechanism: AttachMechanism, stream: &MediaStream) -> Self {
        match mechanism {
            AttachMechanism::SrcObject => Attachment::SrcObject(stream.clone()),
            AttachMechanism::MozSrcObject => Attachment::MozSrcObject(stream.clone()),
            AttachMechanism::ObjectUrl => Attachment::Src(stream.object_url()),
        }
    }

    pub fn mechanism(&self) -> AttachMechanism {
        match self {
            Attachment::SrcObject(_) => AttachMechanism::SrcObject,
            Attachment::MozSrcObject(_) => AttachMechanism::MozSrcObject,
            Attachment::Src(_) => AttachMechanism::ObjectUrl,
        }
    }
}

/// Platform audio output handle
pub trait AudioSink: Send + Sync + fmt::Debug {
    /// Whether the sink exposes this attachment mechanism
    fn supports(&self, mechanism: AttachMechanism) -> bool;

    /// Assign a source
    fn attach(&self, attachment: Attachment) -> StackResult<()>;

    /// Begin playback of the assigned source
    fn play(&self) -> StackResult<()>;
}

/// Creates audio sinks on demand
pub trait AudioSinkFactory: Send + Sync {
    fn create(&self) -> Arc<dyn AudioSink>;
}

impl<F> AudioSinkFactory for F
where
    F: Fn() -> Arc<dyn AudioSink> + Send + Sync,
{
    fn create(&self) -> Arc<dyn AudioSink> {
        self()
    }
}

/// Sink for environments without an audio output
///
/// Supports no attachment mechanism, so attachments always come back
/// [`MediaAttachment::Unavailable`].
#[derive(Debug, Default)]
pub struct HeadlessAudioSink;

impl AudioSink for HeadlessAudioSink {
    fn supports(&self, _mechanism: AttachMechanism) -> bool {
        false
    }

    fn attach(&self, attachment: Attachment) -> StackResult<()> {
        Err(crate::error::StackError::Unsupported(format!(
            "headless sink cannot attach via {}",
            attachment.mechanism()
        )))
    }

    fn play(&self) -> StackResult<()> {
        Ok(())
    }
}

/// Factory producing [`HeadlessAudioSink`]s
#[derive(Debug, Default)]
pub struct HeadlessSinkFactory;

impl AudioSinkFactory for HeadlessSinkFactory {
    fn create(&self) -> Arc<dyn AudioSink> {
        Arc::new(HeadlessAudioSink)
    }
}

/// Result of binding remote media to a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaAttachment {
    /// Stream attached via `mechanism` and playback requested
    Attached {
        mechanism: AttachMechanism,
        track_count: usize,
    },
    /// No usable attachment mechanism
    Unavailable,
}

/// Combine all inbound tracks of `peer` into one stream and play it on `sink`
pub fn attach_remote_media(peer: &dyn PeerConnection, sink: &dyn AudioSink) -> MediaAttachment {
    let mut stream = MediaStream::new();
    for receiver in peer.receivers() {
        if let Some(track) = receiver.track {
            stream.add_track(track);
        }
    }
    let track_count = stream.tracks().len();

    for mechanism in AttachMechanism::PREFERENCE {
        if !sink.supports(mechanism) {
            continue;
        }
        match sink.attach(Attachment::for_mechanism(mechanism, &stream)) {
            Ok(()) => {
                if let Err(e) = sink.play() {
                    warn!("Remote stream attached via {} but playback failed: {}", mechanism, e);
                }
                debug!("Attached remote stream {} ({} tracks) via {}", stream.id(), track_count, mechanism);
                return MediaAttachment::Attached {
                    mechanism,
                    track_count,
                };
            }
            Err(e) => {
                warn!("Attaching remote stream via {} failed: {}", mechanism, e);
            }
        }
    }

    warn!("Error attaching stream to audio sink: no supported attachment mechanism");
    MediaAttachment::Unavailable
}
