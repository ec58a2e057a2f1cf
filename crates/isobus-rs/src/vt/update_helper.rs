//! A thin convenience layer over `VtClient` that skips no-op updates and
//! supports batching several changes into one flush (ISO 11783-6 §4).

use alloc::string::String;
use alloc::vec::Vec;

use crate::hal::{Error, Link};
use crate::network::NetworkManager;

use super::client::VtClient;
use super::pool::{ObjectId, ObjectPool, ObjectType};
use super::tracker::VtStateTracker;

enum PendingUpdate {
    Numeric { id: ObjectId, value: u32 },
    Str { id: ObjectId, value: String },
    Visibility { id: ObjectId, visible: bool },
    Enable { id: ObjectId, enabled: bool },
    ActiveMask { working_set_id: ObjectId, mask_id: ObjectId },
}

/// Wraps a `VtClient` + `VtStateTracker` pair: every setter here first
/// checks the tracker and skips the send entirely when the VT is already in
/// the requested state, and `begin_batch`/`end_batch` queue several updates
/// to flush together.
pub struct VtUpdateHelper<'a> {
    pool: Option<&'a ObjectPool>,
    batching: bool,
    pending: Vec<PendingUpdate>,
}

impl<'a> VtUpdateHelper<'a> {
    pub fn new() -> Self {
        VtUpdateHelper { pool: None, batching: false, pending: Vec::new() }
    }

    pub fn with_pool(mut self, pool: &'a ObjectPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn begin_batch(&mut self) {
        self.batching = true;
        self.pending.clear();
    }

    pub fn cancel_batch(&mut self) {
        self.batching = false;
        self.pending.clear();
    }

    pub fn is_batching(&self) -> bool {
        self.batching
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn set_numeric_value<L: Link>(&mut self, client: &mut VtClient, tracker: &mut VtStateTracker, net: &mut NetworkManager<L>, id: ObjectId, value: u32) -> Result<(), Error> {
        if tracker.numeric_value(id) == Some(value) {
            return Ok(());
        }
        if self.batching {
            self.pending.push(PendingUpdate::Numeric { id, value });
            return Ok(());
        }
        client.change_numeric_value(net, id, value)?;
        tracker.set_numeric_value(id, value);
        Ok(())
    }

    pub fn set_numeric_scaled<L: Link>(&mut self, client: &mut VtClient, tracker: &mut VtStateTracker, net: &mut NetworkManager<L>, id: ObjectId, value: f64, scale: f64, offset: f64) -> Result<(), Error> {
        let raw = ((value + offset) * scale) as u32;
        self.set_numeric_value(client, tracker, net, id, raw)
    }

    pub fn set_numeric_clamped<L: Link>(&mut self, client: &mut VtClient, tracker: &mut VtStateTracker, net: &mut NetworkManager<L>, id: ObjectId, value: u32, min_val: u32, max_val: u32) -> Result<(), Error> {
        let clamped = value.clamp(min_val, max_val);
        self.set_numeric_value(client, tracker, net, id, clamped)
    }

    pub fn set_string_value<L: Link>(&mut self, client: &mut VtClient, tracker: &mut VtStateTracker, net: &mut NetworkManager<L>, id: ObjectId, value: &str) -> Result<(), Error> {
        if tracker.string_value(id) == Some(value) {
            return Ok(());
        }
        if self.batching {
            self.pending.push(PendingUpdate::Str { id, value: String::from(value) });
            return Ok(());
        }
        client.change_string_value(net, id, value)?;
        tracker.set_string_value(id, String::from(value));
        Ok(())
    }

    pub fn show<L: Link>(&mut self, client: &mut VtClient, tracker: &mut VtStateTracker, net: &mut NetworkManager<L>, id: ObjectId) -> Result<(), Error> {
        self.set_visibility(client, tracker, net, id, true)
    }

    pub fn hide<L: Link>(&mut self, client: &mut VtClient, tracker: &mut VtStateTracker, net: &mut NetworkManager<L>, id: ObjectId) -> Result<(), Error> {
        self.set_visibility(client, tracker, net, id, false)
    }

    pub fn set_visibility<L: Link>(&mut self, client: &mut VtClient, tracker: &mut VtStateTracker, net: &mut NetworkManager<L>, id: ObjectId, visible: bool) -> Result<(), Error> {
        if tracker.is_visible(id) == Some(visible) {
            return Ok(());
        }
        if self.batching {
            self.pending.push(PendingUpdate::Visibility { id, visible });
            return Ok(());
        }
        client.hide_show(net, id, visible)?;
        tracker.set_visibility(id, visible);
        Ok(())
    }

    pub fn enable<L: Link>(&mut self, client: &mut VtClient, tracker: &mut VtStateTracker, net: &mut NetworkManager<L>, id: ObjectId) -> Result<(), Error> {
        self.set_enable(client, tracker, net, id, true)
    }

    pub fn disable<L: Link>(&mut self, client: &mut VtClient, tracker: &mut VtStateTracker, net: &mut NetworkManager<L>, id: ObjectId) -> Result<(), Error> {
        self.set_enable(client, tracker, net, id, false)
    }

    pub fn set_enable<L: Link>(&mut self, client: &mut VtClient, tracker: &mut VtStateTracker, net: &mut NetworkManager<L>, id: ObjectId, enabled: bool) -> Result<(), Error> {
        if tracker.is_enabled(id) == Some(enabled) {
            return Ok(());
        }
        if self.batching {
            self.pending.push(PendingUpdate::Enable { id, enabled });
            return Ok(());
        }
        client.enable_disable(net, id, enabled)?;
        tracker.set_enable_state(id, enabled);
        Ok(())
    }

    pub fn change_active_mask<L: Link>(&mut self, client: &mut VtClient, tracker: &VtStateTracker, net: &mut NetworkManager<L>, working_set_id: ObjectId, mask_id: ObjectId) -> Result<(), Error> {
        if tracker.active_data_mask() == mask_id {
            return Ok(());
        }
        if let Some(pool) = self.pool {
            let obj = pool.find(mask_id).ok_or(Error::InvalidState)?;
            if obj.object_type != ObjectType::DataMask && obj.object_type != ObjectType::AlarmMask {
                return Err(Error::InvalidState);
            }
        }
        if self.batching {
            self.pending.push(PendingUpdate::ActiveMask { working_set_id, mask_id });
            return Ok(());
        }
        client.change_active_mask(net, working_set_id, mask_id)
    }

    /// Flushes every queued update in insertion order, mutating the tracker
    /// after each successful send. Returns the first error encountered, if
    /// any, after attempting every pending update.
    pub fn end_batch<L: Link>(&mut self, client: &mut VtClient, tracker: &mut VtStateTracker, net: &mut NetworkManager<L>) -> Result<(), Error> {
        self.batching = false;
        let pending = core::mem::take(&mut self.pending);
        let mut first_error = None;

        for update in pending {
            let result = match update {
                PendingUpdate::Numeric { id, value } => {
                    let r = client.change_numeric_value(net, id, value);
                    if r.is_ok() {
                        tracker.set_numeric_value(id, value);
                    }
                    r
                }
                PendingUpdate::Str { id, value } => {
                    let r = client.change_string_value(net, id, &value);
                    if r.is_ok() {
                        tracker.set_string_value(id, value);
                    }
                    r
                }
                PendingUpdate::Visibility { id, visible } => {
                    let r = client.hide_show(net, id, visible);
                    if r.is_ok() {
                        tracker.set_visibility(id, visible);
                    }
                    r
                }
                PendingUpdate::Enable { id, enabled } => {
                    let r = client.enable_disable(net, id, enabled);
                    if r.is_ok() {
                        tracker.set_enable_state(id, enabled);
                    }
                    r
                }
                PendingUpdate::ActiveMask { working_set_id, mask_id } => client.change_active_mask(net, working_set_id, mask_id),
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<'a> Default for VtUpdateHelper<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkConfig;
    use crate::types::BROADCAST_ADDRESS;
    use crate::vt::client::VtClientConfig;
    use crate::vt::pool::VtObject;
    use crate::Name;
    use alloc::collections::VecDeque;

    struct MockLink {
        outbox: VecDeque<crate::frame::Frame>,
    }

    impl Link for MockLink {
        fn send(&mut self, frame: &crate::frame::Frame) -> Result<(), Error> {
            self.outbox.push_back(*frame);
            Ok(())
        }
        fn recv(&mut self) -> Result<crate::frame::Frame, Error> {
            Err(Error::Timeout)
        }
        fn can_send(&self) -> bool {
            true
        }
        fn can_recv(&self) -> bool {
            false
        }
        fn name(&self) -> &str {
            "can0"
        }
    }

    fn connected_client() -> (NetworkManager<MockLink>, VtClient) {
        let mut net: NetworkManager<MockLink> = NetworkManager::new(NetworkConfig::new());
        net.add_port(0, MockLink { outbox: VecDeque::new() });
        let handle = net.create_internal(Name::from_raw(1), 0, 0x80);
        net.start_address_claiming().unwrap();
        net.update(260);

        let mut client = VtClient::new(handle, VtClientConfig::new());
        let mut pool = ObjectPool::new();
        pool.add(VtObject::new(1, ObjectType::WorkingSet).add_child(2)).unwrap();
        pool.add(VtObject::new(2, ObjectType::DataMask)).unwrap();
        client.set_object_pool(pool);
        client.connect().unwrap();

        let vt_status = crate::frame::Message::new(crate::pgn::PGN_VT_TO_ECU, alloc::vec![0xFE, 0xFF, 0, 0, 0, 0, 4, 0], 0x26, BROADCAST_ADDRESS, crate::types::Priority::DEFAULT);
        client.process_message(&mut net, &vt_status);
        client.update(&mut net, 10);
        client.update(&mut net, 10);
        let memory_ok = crate::frame::Message::new(crate::pgn::PGN_VT_TO_ECU, alloc::vec![0xC0, 0], 0x26, BROADCAST_ADDRESS, crate::types::Priority::DEFAULT);
        client.process_message(&mut net, &memory_ok);
        let activate_ok = crate::frame::Message::new(crate::pgn::PGN_VT_TO_ECU, alloc::vec![0xC3, 0], 0x26, BROADCAST_ADDRESS, crate::types::Priority::DEFAULT);
        client.process_message(&mut net, &activate_ok);
        assert_eq!(client.state(), crate::vt::client::VtState::Connected);

        (net, client)
    }

    #[test]
    fn skips_send_when_value_unchanged() {
        let (mut net, mut client) = connected_client();
        let mut tracker = VtStateTracker::new();
        tracker.set_numeric_value(5, 42);
        let mut helper = VtUpdateHelper::new();
        helper.set_numeric_value(&mut client, &mut tracker, &mut net, 5, 42).unwrap();
        assert_eq!(net.internal_cf(0).unwrap().address(), 0x80);
    }

    #[test]
    fn batched_updates_flush_on_end_batch() {
        let (mut net, mut client) = connected_client();
        let mut tracker = VtStateTracker::new();
        let mut helper = VtUpdateHelper::new();
        helper.begin_batch();
        helper.set_numeric_value(&mut client, &mut tracker, &mut net, 5, 1).unwrap();
        helper.show(&mut client, &mut tracker, &mut net, 6).unwrap();
        assert_eq!(helper.pending_count(), 2);
        helper.end_batch(&mut client, &mut tracker, &mut net).unwrap();
        assert_eq!(tracker.numeric_value(5), Some(1));
        assert_eq!(tracker.is_visible(6), Some(true));
    }
}
