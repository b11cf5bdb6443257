use std::fmt;

use crate::content::Content;
use crate::errors::StreamError;

/// Wire identifier of a previously parsed object.
///
/// Handles are assigned in parse order starting at [Handle::BASE] and
/// incrementing by one; a `REFERENCE` record names the object to reuse by
/// its handle.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Handle(pub u32);

impl Handle {
    /// First handle value of every epoch.
    pub const BASE: Handle = Handle(0x7E_0000);
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle(0x{:x})", self.0)
    }
}

/// Ordered table of the objects parsed in the current epoch.
///
/// An epoch runs from the start of the stream, or the latest `RESET` or
/// `EXCEPTION` boundary, to the next such boundary. Registration happens
/// the moment a handle is allocated, before the object's children are
/// parsed, which is what makes self-references legal. Earlier epochs are
/// kept in an archive, in reset order, but are never consulted for lookup.
pub struct HandleTable {
    slots: Vec<Option<Content>>,
    archive: Vec<Vec<Content>>,
    next: u32,
}

impl HandleTable {
    pub fn new() -> HandleTable {
        HandleTable {
            slots: Vec::new(),
            archive: Vec::new(),
            next: Handle::BASE.0,
        }
    }

    /// Claims the next handle of the current epoch.
    pub fn allocate(&mut self) -> Handle {
        let handle = Handle(self.next);
        self.next += 1;
        self.slots.push(None);
        handle
    }

    /// Binds an allocated handle to its content, exactly once.
    pub fn register(&mut self, handle: Handle, content: Content) -> Result<(), StreamError> {
        let index = handle
            .0
            .checked_sub(Handle::BASE.0)
            .map(|index| index as usize)
            .filter(|&index| index < self.slots.len());

        match index {
            Some(index) if self.slots[index].is_none() => {
                self.slots[index] = Some(content);
                Ok(())
            }
            // occupied slot, or a handle that survived past a reset
            _ => Err(StreamError::HandleCollision { handle: handle.0 }),
        }
    }

    /// Resolves a reference read from the stream against the current epoch.
    pub fn lookup(&self, handle: u32, offset: usize) -> Result<Content, StreamError> {
        handle
            .checked_sub(Handle::BASE.0)
            .and_then(|index| self.slots.get(index as usize))
            .and_then(|slot| slot.clone())
            .ok_or(StreamError::InvalidHandle { handle, offset })
    }

    /// Registered contents of the current epoch, in handle order.
    pub fn contents(&self) -> impl Iterator<Item = &Content> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }

    /// Archives the current epoch and starts a fresh one at [Handle::BASE].
    pub fn reset(&mut self) {
        self.archive_current();
        self.slots.clear();
        self.next = Handle::BASE.0;
    }

    /// Moves the current epoch into the archive without starting a new one.
    /// Empty epochs are not recorded.
    pub fn archive_current(&mut self) {
        if self.slots.iter().any(|slot| slot.is_some()) {
            let epoch = self.slots.iter().filter_map(|slot| slot.clone()).collect();
            self.archive.push(epoch);
        }
    }

    /// Archived epochs, keyed by reset ordinal.
    pub fn epochs(&self) -> &[Vec<Content>] {
        &self.archive
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        HandleTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::content::JavaString;

    fn string_content(handle: Handle, value: &str) -> Content {
        Content::String(Rc::new(JavaString {
            handle,
            value: value.to_owned(),
            length: value.chars().count(),
        }))
    }

    #[test]
    fn handles_are_allocated_in_stream_order() {
        let mut table = HandleTable::new();
        assert_eq!(table.allocate(), Handle(0x7E0000));
        assert_eq!(table.allocate(), Handle(0x7E0001));
    }

    #[test]
    fn lookup_resolves_to_the_registered_node() {
        let mut table = HandleTable::new();
        let handle = table.allocate();
        let content = string_content(handle, "abc");
        table.register(handle, content.clone()).unwrap();

        let found = table.lookup(handle.0, 0).unwrap();
        match (&found, &content) {
            (Content::String(a), Content::String(b)) => assert!(Rc::ptr_eq(a, b)),
            _ => panic!("wrong content kind"),
        }
    }

    #[test]
    fn double_registration_collides() {
        let mut table = HandleTable::new();
        let handle = table.allocate();
        table
            .register(handle, string_content(handle, "a"))
            .unwrap();
        assert!(matches!(
            table.register(handle, string_content(handle, "b")),
            Err(StreamError::HandleCollision { handle: 0x7E0000 })
        ));
    }

    #[test]
    fn unknown_and_unregistered_handles_fail() {
        let mut table = HandleTable::new();
        assert!(table.lookup(0x7E0000, 9).is_err());
        let handle = table.allocate();
        // allocated but never bound
        assert!(matches!(
            table.lookup(handle.0, 9),
            Err(StreamError::InvalidHandle {
                handle: 0x7E0000,
                offset: 9
            })
        ));
        assert!(table.lookup(0x100, 9).is_err());
    }

    #[test]
    fn reset_starts_a_new_epoch_and_archives_the_old_one() {
        let mut table = HandleTable::new();
        let handle = table.allocate();
        table
            .register(handle, string_content(handle, "first"))
            .unwrap();

        table.reset();
        assert!(table.lookup(handle.0, 0).is_err());
        assert_eq!(table.allocate(), Handle::BASE);
        assert_eq!(table.epochs().len(), 1);
        assert_eq!(table.epochs()[0].len(), 1);

        // nothing registered since the reset: no empty epoch is archived
        table.reset();
        assert_eq!(table.epochs().len(), 1);
    }
}
