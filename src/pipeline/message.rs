// pipeline/message.rs — typed edge values.
//
// A port accepts only messages of its declared kind; the kind check
// happens when an edge is created, never during a run.

use std::sync::Arc;

use crate::gpu::encoder::EncodedKeypoints;
use crate::gpu::texture::GpuTexture;

/// The kind of value a port carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A GPU texture handle.
    Texture,
    /// A plain scalar.
    Scalar,
    /// A packed keypoint texture plus its decode metadata.
    Keypoints,
}

/// A declared input or output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpec {
    pub name: &'static str,
    pub kind: MessageKind,
}

impl PortSpec {
    pub const fn texture(name: &'static str) -> Self {
        PortSpec { name, kind: MessageKind::Texture }
    }

    pub const fn scalar(name: &'static str) -> Self {
        PortSpec { name, kind: MessageKind::Scalar }
    }

    pub const fn keypoints(name: &'static str) -> Self {
        PortSpec { name, kind: MessageKind::Keypoints }
    }
}

/// A value travelling along an edge. Cheap to clone — textures are
/// shared by `Arc`, so fan-out to several consumers costs a refcount.
#[derive(Debug, Clone)]
pub enum Message {
    Texture(Arc<GpuTexture>),
    Scalar(f64),
    Keypoints(EncodedKeypoints),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Texture(_) => MessageKind::Texture,
            Message::Scalar(_) => MessageKind::Scalar,
            Message::Keypoints(_) => MessageKind::Keypoints,
        }
    }

    /// The texture handle, if this is a texture message.
    pub fn as_texture(&self) -> Option<&Arc<GpuTexture>> {
        match self {
            Message::Texture(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Message::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_keypoints(&self) -> Option<&EncodedKeypoints> {
        match self {
            Message::Keypoints(k) => Some(k),
            _ => None,
        }
    }
}
