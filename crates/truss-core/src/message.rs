//! Reference-counted message buffers.
//!
//! Every piece of data that crosses a unit boundary travels as a message.
//! Messages live in a [`MessagePool`] owned by the registry and guarded by
//! the registry lock; callers hold [`MessageId`] handles and move references
//! around with `acquire`/`release`.
//!
//! Handles are generation-checked: when the last reference is released the
//! slot's generation is bumped, so a stale handle is rejected instead of
//! silently aliasing whatever message reuses the slot.

use std::fmt;

/// Type tag carried by every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum MessageType {
    #[default]
    Unknown = 0,
    CString = 1,
    Blob = 2,
}

impl MessageType {
    /// Decode a wire tag. Unrecognized tags decode as `Unknown`.
    pub fn from_tag(tag: u32) -> Self {
        match tag {
            1 => MessageType::CString,
            2 => MessageType::Blob,
            _ => MessageType::Unknown,
        }
    }

    /// The wire tag for this type.
    pub fn tag(self) -> u32 {
        self as u32
    }
}

/// Handle to a message in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId {
    index: u32,
    generation: u32,
}

impl MessageId {
    /// Slot index inside the pool.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Wire shape of a message as seen across the capability/host boundary.
///
/// Field order and sizes are part of the ABI. `data` is only valid while
/// the holder owns a reference to the message and the registry is alive.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MessageHeader {
    pub type_tag: u32,
    pub length: usize,
    pub data: *const u8,
    pub refcount: u32,
}

/// A live message.
#[derive(Debug)]
pub struct Message {
    message_type: MessageType,
    data: Box<[u8]>,
    refcount: u32,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn refcount(&self) -> u32 {
        self.refcount
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    message: Option<Message>,
}

/// Arena of messages addressed by generation-checked handles.
///
/// The pool itself is not synchronized; the registry keeps it behind its
/// single lock so refcount changes and frees are atomic with respect to
/// senders and receivers on other units.
#[derive(Debug, Default)]
pub struct MessagePool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl MessagePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zero-filled message of `length` bytes with one reference.
    pub fn allocate(&mut self, length: usize) -> MessageId {
        self.insert(MessageType::Unknown, vec![0u8; length].into_boxed_slice())
    }

    /// Allocate a message holding a copy of `bytes`.
    pub fn allocate_from(&mut self, message_type: MessageType, bytes: &[u8]) -> MessageId {
        self.insert(message_type, bytes.to_vec().into_boxed_slice())
    }

    fn insert(&mut self, message_type: MessageType, data: Box<[u8]>) -> MessageId {
        let message = Message {
            message_type,
            data,
            refcount: 1,
        };
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.message = Some(message);
            MessageId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                message: Some(message),
            });
            MessageId {
                index,
                generation: 0,
            }
        }
    }

    /// Look up a live message.
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.message.as_ref())
    }

    fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.message.as_mut())
    }

    /// Whether `id` still refers to a live message.
    pub fn is_live(&self, id: MessageId) -> bool {
        self.get(id).is_some()
    }

    /// Add a reference. Returns the new count, or `None` for a stale handle.
    pub fn acquire(&mut self, id: MessageId) -> Option<u32> {
        let message = self.get_mut(id)?;
        message.refcount += 1;
        Some(message.refcount)
    }

    /// Drop a reference, freeing the buffer when the count reaches zero.
    ///
    /// Returns the remaining count, or `None` for a stale handle.
    pub fn release(&mut self, id: MessageId) -> Option<u32> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let message = slot.message.as_mut()?;
        message.refcount -= 1;
        let remaining = message.refcount;
        if remaining == 0 {
            slot.message = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
            self.live -= 1;
        }
        Some(remaining)
    }

    /// Allocate an independent copy with the same type and bytes.
    pub fn copy(&mut self, id: MessageId) -> Option<MessageId> {
        let (message_type, data) = {
            let src = self.get(id)?;
            (src.message_type, src.data.clone())
        };
        Some(self.insert(message_type, data))
    }

    /// Contents of a live message.
    pub fn bytes(&self, id: MessageId) -> Option<&[u8]> {
        self.get(id).map(Message::data)
    }

    /// Current reference count of a live message.
    pub fn refcount(&self, id: MessageId) -> Option<u32> {
        self.get(id).map(Message::refcount)
    }

    /// Overwrite bytes starting at `offset`. Returns `None` for a stale
    /// handle, `Some(false)` if the write would overflow the buffer.
    pub fn write(&mut self, id: MessageId, offset: usize, bytes: &[u8]) -> Option<bool> {
        let message = self.get_mut(id)?;
        let end = match offset.checked_add(bytes.len()) {
            Some(end) if end <= message.data.len() => end,
            _ => return Some(false),
        };
        message.data[offset..end].copy_from_slice(bytes);
        Some(true)
    }

    /// Change the type tag of a live message.
    pub fn set_type(&mut self, id: MessageId, message_type: MessageType) -> Option<()> {
        self.get_mut(id)?.message_type = message_type;
        Some(())
    }

    /// The wire view of a live message.
    pub fn header(&self, id: MessageId) -> Option<MessageHeader> {
        self.get(id).map(|m| MessageHeader {
            type_tag: m.message_type.tag(),
            length: m.data.len(),
            data: m.data.as_ptr(),
            refcount: m.refcount,
        })
    }

    /// Number of live messages.
    pub fn live_count(&self) -> usize {
        self.live
    }
}
