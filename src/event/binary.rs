//! Binary event records: recording and replaying graph mutations.
//!
//! Record layout: 1-byte kind tag, then a kind-specific payload. Ids are
//! length-prefixed UTF-8 (u32 little-endian length); transforms are 12
//! doubles (row-major 3x3 rotation, then translation) followed by a
//! presence byte and, when present, 36 doubles of covariance. `ItemAdded`
//! records embed the item's manifest record as a length-prefixed YAML
//! string.
//!
//! Stream layout: magic `KSHE`, version byte, then a length-prefixed
//! sequence of records.

use std::io::{Read, Write};

use crate::core::{Covariance, Transform, TransformWithUncertainty};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::event::{Event, EventHandler, PortRole};
use crate::io::registry::{item_from_record, item_to_record, ItemRecord};
use crate::item::{Item, ItemId};

/// Magic bytes of a serialized event stream.
const STREAM_MAGIC: &[u8; 4] = b"KSHE";

/// Current stream format version.
const STREAM_VERSION: u8 = 1;

const TAG_ITEM_ADDED: u8 = 1;
const TAG_ITEM_REMOVED: u8 = 2;
const TAG_ITEM_MODIFIED: u8 = 3;
const TAG_FRAME_EDGE_ADDED: u8 = 4;
const TAG_FRAME_EDGE_REMOVED: u8 = 5;
const TAG_LAYER_EDGE_ADDED: u8 = 6;
const TAG_LAYER_EDGE_REMOVED: u8 = 7;
const TAG_OP_EDGE_ADDED: u8 = 8;
const TAG_OP_EDGE_REMOVED: u8 = 9;
const TAG_ATTACHMENT_CHANGED: u8 = 10;
const TAG_TRANSFORM_CHANGED: u8 = 11;

/// One encoded event record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryEvent {
    bytes: Vec<u8>,
}

impl BinaryEvent {
    /// Wrap raw record bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The raw record bytes, starting with the kind tag.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The kind tag, or `None` for an empty record.
    pub fn kind(&self) -> Option<u8> {
        self.bytes.first().copied()
    }
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn put_transform(buf: &mut Vec<u8>, t: &TransformWithUncertainty) {
    for v in t.transform.to_wire() {
        put_f64(buf, v);
    }
    match &t.covariance {
        Some(cov) => {
            buf.push(1);
            for v in cov.as_array() {
                put_f64(buf, *v);
            }
        }
        None => buf.push(0),
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::Format("truncated event record".to_string()));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32> {
        let s = self.take(4)?;
        Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    fn take_f64(&mut self) -> Result<f64> {
        let s = self.take(8)?;
        let mut b = [0u8; 8];
        b.copy_from_slice(s);
        Ok(f64::from_le_bytes(b))
    }

    fn take_str(&mut self) -> Result<String> {
        let len = self.take_u32()? as usize;
        let s = self.take(len)?;
        String::from_utf8(s.to_vec())
            .map_err(|_| Error::Format("event record id is not UTF-8".to_string()))
    }

    fn take_id(&mut self) -> Result<ItemId> {
        Ok(ItemId::new(self.take_str()?))
    }

    fn take_transform(&mut self) -> Result<TransformWithUncertainty> {
        let mut wire = [0.0; 12];
        for v in wire.iter_mut() {
            *v = self.take_f64()?;
        }
        let transform = Transform::from_wire(&wire);
        let covariance = match self.take_u8()? {
            0 => None,
            _ => {
                let mut data = [0.0; 36];
                for v in data.iter_mut() {
                    *v = self.take_f64()?;
                }
                Some(Covariance::from_array(data))
            }
        };
        Ok(TransformWithUncertainty {
            transform,
            covariance,
        })
    }
}

fn role_byte(role: PortRole) -> u8 {
    match role {
        PortRole::Input => 0,
        PortRole::Output => 1,
    }
}

fn role_from_byte(b: u8) -> Result<PortRole> {
    match b {
        0 => Ok(PortRole::Input),
        1 => Ok(PortRole::Output),
        other => Err(Error::Format(format!("unknown port role {}", other))),
    }
}

/// Encode one event into its binary record.
pub fn encode_event(event: &Event) -> Result<BinaryEvent> {
    let mut buf = Vec::new();
    match event {
        Event::ItemAdded { item } => {
            buf.push(TAG_ITEM_ADDED);
            let record = item_to_record(item);
            put_str(&mut buf, &serde_yaml::to_string(&record)?);
        }
        Event::ItemRemoved { id, class_name } => {
            buf.push(TAG_ITEM_REMOVED);
            put_str(&mut buf, id.as_str());
            put_str(&mut buf, class_name);
        }
        Event::ItemModified { id } => {
            buf.push(TAG_ITEM_MODIFIED);
            put_str(&mut buf, id.as_str());
        }
        Event::FrameTreeEdgeAdded { parent, child } => {
            buf.push(TAG_FRAME_EDGE_ADDED);
            put_str(&mut buf, parent.as_str());
            put_str(&mut buf, child.as_str());
        }
        Event::FrameTreeEdgeRemoved { parent, child } => {
            buf.push(TAG_FRAME_EDGE_REMOVED);
            put_str(&mut buf, parent.as_str());
            put_str(&mut buf, child.as_str());
        }
        Event::LayerEdgeAdded { parent, child } => {
            buf.push(TAG_LAYER_EDGE_ADDED);
            put_str(&mut buf, parent.as_str());
            put_str(&mut buf, child.as_str());
        }
        Event::LayerEdgeRemoved { parent, child } => {
            buf.push(TAG_LAYER_EDGE_REMOVED);
            put_str(&mut buf, parent.as_str());
            put_str(&mut buf, child.as_str());
        }
        Event::OperatorEdgeAdded { op, layer, role } => {
            buf.push(TAG_OP_EDGE_ADDED);
            buf.push(role_byte(*role));
            put_str(&mut buf, op.as_str());
            put_str(&mut buf, layer.as_str());
        }
        Event::OperatorEdgeRemoved { op, layer, role } => {
            buf.push(TAG_OP_EDGE_REMOVED);
            buf.push(role_byte(*role));
            put_str(&mut buf, op.as_str());
            put_str(&mut buf, layer.as_str());
        }
        Event::FrameAttachmentChanged { map, frame } => {
            buf.push(TAG_ATTACHMENT_CHANGED);
            put_str(&mut buf, map.as_str());
            match frame {
                Some(frame) => {
                    buf.push(1);
                    put_str(&mut buf, frame.as_str());
                }
                None => buf.push(0),
            }
        }
        Event::TransformChanged { frame, transform } => {
            buf.push(TAG_TRANSFORM_CHANGED);
            put_str(&mut buf, frame.as_str());
            put_transform(&mut buf, transform);
        }
    }
    Ok(BinaryEvent { bytes: buf })
}

/// Handler encoding every received event into a [`BinaryEvent`].
///
/// Subscribe it to capture the full environment (via the replay on
/// subscribe) plus all subsequent mutations; feed the records to
/// [`Environment::apply_events`] to reconstruct the state elsewhere.
/// Clones share the same store, so a clone kept by the caller can read the
/// records while the environment owns the subscribed clone.
#[derive(Clone, Default)]
pub struct BinaryEventRecorder {
    events: std::rc::Rc<std::cell::RefCell<Vec<BinaryEvent>>>,
}

impl BinaryEventRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records captured so far.
    pub fn events(&self) -> Vec<BinaryEvent> {
        self.events.borrow().clone()
    }

    /// Number of records captured so far.
    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    /// True when nothing has been captured yet.
    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }
}

impl EventHandler for BinaryEventRecorder {
    fn on_event(&mut self, event: &Event) {
        match encode_event(event) {
            Ok(record) => self.events.borrow_mut().push(record),
            Err(err) => log::warn!("dropping unencodable event: {}", err),
        }
    }
}

/// Write records as a stream: magic, version, then length-prefixed records.
pub fn write_event_stream(w: &mut dyn Write, events: &[BinaryEvent]) -> Result<()> {
    w.write_all(STREAM_MAGIC)?;
    w.write_all(&[STREAM_VERSION])?;
    w.write_all(&(events.len() as u32).to_le_bytes())?;
    for event in events {
        w.write_all(&(event.bytes.len() as u32).to_le_bytes())?;
        w.write_all(&event.bytes)?;
    }
    Ok(())
}

/// Read a stream written by [`write_event_stream`].
pub fn read_event_stream(r: &mut dyn Read) -> Result<Vec<BinaryEvent>> {
    let mut header = [0u8; 5];
    r.read_exact(&mut header)?;
    if &header[..4] != STREAM_MAGIC {
        return Err(Error::Format("bad event stream magic".to_string()));
    }
    if header[4] != STREAM_VERSION {
        return Err(Error::Format(format!(
            "unsupported event stream version {}",
            header[4]
        )));
    }
    let mut count = [0u8; 4];
    r.read_exact(&mut count)?;
    let count = u32::from_le_bytes(count) as usize;
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        let mut len = [0u8; 4];
        r.read_exact(&mut len)?;
        let len = u32::from_le_bytes(len) as usize;
        let mut bytes = vec![0u8; len];
        r.read_exact(&mut bytes)?;
        events.push(BinaryEvent { bytes });
    }
    Ok(events)
}

impl Environment {
    /// Replay a recorded event sequence into this environment.
    ///
    /// Ids are honored verbatim. Any record that does not apply cleanly
    /// (an id collision, a dangling reference, a graph rule violation)
    /// fails with `ReplayConflict`; records before it have already been
    /// applied.
    pub fn apply_events(&mut self, events: &[BinaryEvent]) -> Result<()> {
        for (index, event) in events.iter().enumerate() {
            self.apply_binary_event(event).map_err(|err| match err {
                already @ Error::ReplayConflict { .. } => already,
                other => Error::ReplayConflict {
                    detail: format!("record {}: {}", index, other),
                },
            })?;
        }
        Ok(())
    }

    fn apply_binary_event(&mut self, event: &BinaryEvent) -> Result<()> {
        let mut r = Reader::new(&event.bytes);
        match r.take_u8()? {
            TAG_ITEM_ADDED => {
                let yaml = r.take_str()?;
                let record: ItemRecord = serde_yaml::from_str(&yaml)?;
                let item = item_from_record(&record, None)?;
                if record.id == self.root_frame().as_str() {
                    // the stream's root maps onto this environment's root
                    if let Item::Frame(frame) = item {
                        let transform = *frame.transform();
                        let label = frame.meta().label().to_string();
                        let root = self.root_frame().clone();
                        let node = self.frame_mut(&root)?;
                        node.set_transform_raw(transform);
                        node.meta.label = label;
                    }
                    return Ok(());
                }
                self.attach_recorded(item)?;
            }
            TAG_ITEM_REMOVED => {
                let id = r.take_id()?;
                let _class = r.take_str()?;
                self.detach(&id)?;
            }
            TAG_ITEM_MODIFIED => {
                let id = r.take_id()?;
                self.item_modified(&id)?;
            }
            TAG_FRAME_EDGE_ADDED => {
                let parent = r.take_id()?;
                let child = r.take_id()?;
                self.add_frame_child(&parent, &child)?;
            }
            TAG_FRAME_EDGE_REMOVED => {
                let parent = r.take_id()?;
                let child = r.take_id()?;
                self.remove_frame_child(&parent, &child)?;
            }
            TAG_LAYER_EDGE_ADDED => {
                let parent = r.take_id()?;
                let child = r.take_id()?;
                self.add_layer_child(&parent, &child)?;
            }
            TAG_LAYER_EDGE_REMOVED => {
                let parent = r.take_id()?;
                let child = r.take_id()?;
                self.remove_layer_child(&parent, &child)?;
            }
            TAG_OP_EDGE_ADDED => {
                let role = role_from_byte(r.take_u8()?)?;
                let op = r.take_id()?;
                let layer = r.take_id()?;
                match role {
                    PortRole::Input => self.add_input(&op, &layer)?,
                    PortRole::Output => self.add_output(&op, &layer)?,
                }
            }
            TAG_OP_EDGE_REMOVED => {
                let role = role_from_byte(r.take_u8()?)?;
                let op = r.take_id()?;
                let layer = r.take_id()?;
                match role {
                    PortRole::Input => self.remove_input(&op, &layer)?,
                    PortRole::Output => self.remove_output(&op, &layer)?,
                }
            }
            TAG_ATTACHMENT_CHANGED => {
                let map = r.take_id()?;
                match r.take_u8()? {
                    0 => self.clear_frame_attachment(&map)?,
                    _ => {
                        let frame = r.take_id()?;
                        self.set_frame_node(&map, &frame)?;
                    }
                }
            }
            TAG_TRANSFORM_CHANGED => {
                let frame = r.take_id()?;
                let transform = r.take_transform()?;
                self.set_transform(&frame, transform)?;
            }
            other => {
                return Err(Error::Format(format!("unknown event tag {}", other)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transform;
    use crate::frame::FrameNode;

    #[test]
    fn test_transform_record_roundtrip() {
        let t = TransformWithUncertainty::with_covariance(
            Transform::from_translation([1.0, -2.0, 0.5]),
            Covariance::diagonal([0.1; 3], [0.2; 3]),
        );
        let event = Event::TransformChanged {
            frame: ItemId::new("/f"),
            transform: t,
        };
        let record = encode_event(&event).unwrap();
        assert_eq!(record.kind(), Some(TAG_TRANSFORM_CHANGED));

        let mut r = Reader::new(record.as_bytes());
        r.take_u8().unwrap();
        assert_eq!(r.take_str().unwrap(), "/f");
        let decoded = r.take_transform().unwrap();
        assert!(decoded.has_uncertainty());
        assert!((decoded.transform.translation[1] + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_stream_roundtrip() {
        let a = encode_event(&Event::ItemModified {
            id: ItemId::new("/a"),
        })
        .unwrap();
        let b = encode_event(&Event::FrameTreeEdgeAdded {
            parent: ItemId::new("/root"),
            child: ItemId::new("/a"),
        })
        .unwrap();
        let mut buf = Vec::new();
        write_event_stream(&mut buf, &[a.clone(), b.clone()]).unwrap();
        let events = read_event_stream(&mut buf.as_slice()).unwrap();
        assert_eq!(events, vec![a, b]);
    }

    #[test]
    fn test_truncated_record_rejected() {
        let record = BinaryEvent::from_bytes(vec![TAG_ITEM_MODIFIED, 10, 0, 0, 0, b'x']);
        let mut env = Environment::new();
        assert!(env.apply_events(&[record]).is_err());
    }

    #[test]
    fn test_replay_collision_conflicts() {
        let mut env = Environment::new();
        env.attach(FrameNode::new("f").into()).unwrap();

        let added = encode_event(&Event::ItemAdded {
            item: FrameNode::new("/f").into(),
        })
        .unwrap();
        let err = env.apply_events(&[added]).unwrap_err();
        assert!(matches!(err, Error::ReplayConflict { .. }));
    }
}
