use coalesce_shared::{checked_assert, Handle, IndexingContainer};

use crate::command_buffer::CommandBuffer;

/// Stable identity of a [`CommandBuffer`] while it is held by a [`CommandBufferQueue`].
///
/// After the command buffer has been removed, the id no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandBufferId(Handle<Node>);

pub(crate) struct Node {
    command_buffer: CommandBuffer,
    prev: Option<Handle<Node>>,
    next: Option<Handle<Node>>,
}

/// Insertion ordered queue of [`CommandBuffer`]s with O(1) append at the tail and O(1) removal at the head.
///
/// The nodes are owned by an arena and linked by generational handles instead of pointers.
/// The queue does no locking on its own.
#[derive(Default)]
pub struct CommandBufferQueue {
    nodes: IndexingContainer<Node>,
    head: Option<Handle<Node>>,
    tail: Option<Handle<Node>>,
}

impl CommandBufferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the [`CommandBuffer`] to the tail of the queue and takes ownership of it
    pub fn push_tail(&mut self, command_buffer: CommandBuffer) -> CommandBufferId {
        let old_tail = self.tail;
        let handle = self.nodes.insert(Node {
            command_buffer,
            prev: old_tail,
            next: None,
        });
        match old_tail.and_then(|old_tail| self.nodes.get_mut(&old_tail)) {
            Some(old_tail_node) => old_tail_node.next = Some(handle),
            None => self.head = Some(handle),
        }
        self.tail = Some(handle);
        CommandBufferId(handle)
    }

    /// Detaches the head of the queue and hands its ownership to the caller
    pub fn remove_front_one(&mut self) -> Option<CommandBuffer> {
        let head = self.head?;
        let node = self.nodes.remove(&head)?;
        self.head = node.next;
        match node.next.and_then(|next| self.nodes.get_mut(&next)) {
            Some(next_node) => next_node.prev = None,
            None => self.tail = None,
        }
        checked_assert!(self.head.is_some() == self.tail.is_some());
        Some(node.command_buffer)
    }

    pub fn peek_head(&self) -> Option<&CommandBuffer> {
        self.head.and_then(|head| self.get(CommandBufferId(head)))
    }

    pub fn peek_tail(&self) -> Option<&CommandBuffer> {
        self.tail.and_then(|tail| self.get(CommandBufferId(tail)))
    }

    pub fn peek_head_id(&self) -> Option<CommandBufferId> {
        self.head.map(CommandBufferId)
    }

    pub fn peek_tail_id(&self) -> Option<CommandBufferId> {
        self.tail.map(CommandBufferId)
    }

    /// Returns the [`CommandBuffer`] with the given id if it is still in the queue
    pub fn get(&self, id: CommandBufferId) -> Option<&CommandBuffer> {
        self.nodes.get(&id.0).map(|node| &node.command_buffer)
    }

    /// Returns the [`CommandBuffer`] with the given id if it is still in the queue
    pub fn get_mut(&mut self, id: CommandBufferId) -> Option<&mut CommandBuffer> {
        self.nodes.get_mut(&id.0).map(|node| &mut node.command_buffer)
    }

    /// Id of the command buffer that was recorded right after the given one
    pub fn next(&self, id: CommandBufferId) -> Option<CommandBufferId> {
        self.nodes.get(&id.0).and_then(|node| node.next).map(CommandBufferId)
    }

    /// Id of the command buffer that was recorded right before the given one
    pub fn prev(&self, id: CommandBufferId) -> Option<CommandBufferId> {
        self.nodes.get(&id.0).and_then(|node| node.prev).map(CommandBufferId)
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Iterates over the command buffers from head to tail
    pub fn iter(&self) -> impl Iterator<Item = &CommandBuffer> + '_ {
        std::iter::successors(self.peek_head_id(), |id| self.next(*id)).filter_map(|id| self.get(id))
    }
}
