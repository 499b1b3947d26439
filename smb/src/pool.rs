//! Leased byte-buffer pool with an over-size escape hatch (spec §3, §4.1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;

use crate::error::{Error, Result};

/// A set of small boolean facts about a packet that the framer and
/// dispatcher consult; kept as a bitflag-free struct since there are
/// only a handful and they're read far more often than written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags {
    pub queued_async: bool,
    pub non_pooled: bool,
    pub encryption_required: bool,
}

/// An owned, possibly pool-leased, byte buffer plus its framing metadata.
///
/// Invariants (spec §3): if `non_pooled` is false and the lease deadline
/// is set, the buffer belongs to the pool; releasing a packet releases
/// its associated packet recursively; the lease deadline, once set, only
/// moves forward in time (it is set exactly once, at allocation).
#[derive(Debug)]
pub struct Packet {
    pub id: u64,
    pub buf: Vec<u8>,
    pub received_len: usize,
    pub size_class: usize,
    pub lease_deadline: Option<Instant>,
    pub flags: PacketFlags,
    pub associated: Option<Box<Packet>>,
    pub deferred_count: u32,
    /// Bytes actually written into `buf` starting at offset 4, for
    /// packets this process encoded itself (a dispatch reply, or an
    /// async-queue push) -- as opposed to `buf.len()`, which is the
    /// buffer's pooled capacity and usually larger.
    pub written_len: usize,
}

impl Packet {
    fn new(id: u64, size_class: usize, len: usize, non_pooled: bool) -> Self {
        Packet {
            id,
            buf: vec![0u8; len],
            received_len: 0,
            size_class,
            lease_deadline: None,
            flags: PacketFlags {
                non_pooled,
                ..Default::default()
            },
            associated: None,
            deferred_count: 0,
            written_len: 0,
        }
    }

    pub fn is_pooled(&self) -> bool {
        !self.flags.non_pooled && self.lease_deadline.is_some()
    }

    /// Attaches `response` as this request's pre-allocated reply, so a
    /// single [`PacketPool::release`] call tears down both.
    pub fn set_associated(&mut self, response: Packet) {
        self.associated = Some(Box::new(response));
    }
}

/// Size-classed free-list pool plus a registry of all currently leased
/// buffers, used for leak detection (spec §4.1's lease-expiry watcher).
pub struct PacketPool {
    size_classes: Vec<usize>,
    free_lists: Mutex<HashMap<usize, Vec<Vec<u8>>>>,
    leased: Mutex<HashMap<u64, (usize, Instant)>>,
    next_id: AtomicU64,
    notify: Notify,
    over_size_ceiling: usize,
    lease: Duration,
    allocate_wait: Duration,
}

/// Default buffer size classes, matching the classic SMB1 small/large
/// transmit buffer split (4 KiB control messages, up to the negotiated
/// maximum buffer size for data-bearing ones).
const DEFAULT_SIZE_CLASSES: &[usize] = &[4 * 1024, 16 * 1024, 64 * 1024];

impl PacketPool {
    pub fn new(max_pooled_size: usize, over_size_ceiling: usize, lease: Duration, allocate_wait: Duration) -> Self {
        let mut size_classes: Vec<usize> = DEFAULT_SIZE_CLASSES
            .iter()
            .copied()
            .filter(|&s| s <= max_pooled_size)
            .collect();
        if size_classes.last().copied() != Some(max_pooled_size) {
            size_classes.push(max_pooled_size);
        }
        size_classes.sort_unstable();

        let free_lists = size_classes.iter().map(|&s| (s, Vec::new())).collect();

        PacketPool {
            size_classes,
            free_lists: Mutex::new(free_lists),
            leased: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            notify: Notify::new(),
            over_size_ceiling,
            lease,
            allocate_wait,
        }
    }

    fn size_class_for(&self, size: usize) -> Option<usize> {
        self.size_classes.iter().copied().find(|&s| size <= s)
    }

    /// Allocates a packet of at least `size` bytes.
    ///
    /// Pooled sizes wait up to `allocate_wait_ms` for a free buffer of
    /// the matching size class before giving up; over-size requests get
    /// a fresh, non-pooled allocation instead of blocking at all.
    pub async fn allocate(&self, size: usize) -> Result<Packet> {
        if let Some(class) = self.size_class_for(size) {
            let buf = timeout(self.allocate_wait, self.wait_for_free(class))
                .await
                .unwrap_or(None);

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let mut packet = match buf {
                Some(mut buf) => {
                    buf.resize(class, 0);
                    Packet {
                        id,
                        buf,
                        received_len: 0,
                        size_class: class,
                        lease_deadline: None,
                        flags: PacketFlags::default(),
                        associated: None,
                        deferred_count: 0,
                        written_len: 0,
                    }
                }
                None => Packet::new(id, class, class, false),
            };

            let deadline = Instant::now() + self.lease;
            packet.lease_deadline = Some(deadline);
            self.leased.lock().await.insert(id, (class, deadline));
            return Ok(packet);
        }

        if size <= self.over_size_ceiling {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            return Ok(Packet::new(id, size, size, true));
        }

        Err(Error::OutOfPoolMemory(size))
    }

    async fn wait_for_free(&self, class: usize) -> Option<Vec<u8>> {
        loop {
            if let Some(buf) = self.free_lists.lock().await.get_mut(&class).and_then(Vec::pop) {
                return Some(buf);
            }
            self.notify.notified().await;
        }
    }

    /// Allocates a response packet and copies `copy_bytes` (default the
    /// SMB1 header length, 32 bytes) from `request`'s buffer at offset 4
    /// (past the framing header), then links it as `request`'s
    /// associated packet.
    pub async fn allocate_with_header(
        &self,
        size: usize,
        request: &mut Packet,
        copy_bytes: usize,
    ) -> Result<()> {
        let mut response = self.allocate(size).await?;
        let n = copy_bytes.min(request.buf.len().saturating_sub(4)).min(response.buf.len().saturating_sub(4));
        response.buf[4..4 + n].copy_from_slice(&request.buf[4..4 + n]);
        request.set_associated(response);
        Ok(())
    }

    /// Releases `packet`: pooled buffers return to their size-class
    /// free-list, non-pooled buffers are dropped, and any associated
    /// packet is released recursively.
    pub async fn release(&self, mut packet: Packet) {
        if let Some(associated) = packet.associated.take() {
            Box::pin(self.release(*associated)).await;
        }

        if packet.is_pooled() {
            self.leased.lock().await.remove(&packet.id);
            let class = packet.size_class;
            self.free_lists
                .lock()
                .await
                .entry(class)
                .or_default()
                .push(packet.buf);
            self.notify.notify_one();
        }
        // Non-pooled buffers simply drop here.
    }

    /// Walks the leased-packet table and logs packets past their lease
    /// deadline. This is a leak alarm only: reclamation stays the
    /// owner's responsibility (spec §4.1).
    pub async fn log_expired_leases(&self) {
        let now = Instant::now();
        for (id, (class, deadline)) in self.leased.lock().await.iter() {
            if now > *deadline {
                log::warn!(
                    "packet {id} (size class {class}) has an expired lease ({:?} past deadline) -- possible leak",
                    now.duration_since(*deadline)
                );
            }
        }
    }

    /// Spawns the periodic lease-expiry watcher as a background task.
    pub fn spawn_lease_watcher(self: std::sync::Arc<Self>) {
        let interval = self.lease.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.log_expired_leases().await;
            }
        });
    }

    pub async fn leased_count(&self) -> usize {
        self.leased.lock().await.len()
    }
}
