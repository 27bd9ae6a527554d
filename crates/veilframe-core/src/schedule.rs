//! Key state of one (contact, transport) pair.
//!
//! A key set holds the period secrets covering its rotation window, one
//! incoming tag key and replay window per held period, and the outgoing
//! connection state machine:
//!
//! ```text
//!            activate           prepare            take
//! ┌──────┐ ─────────▶ ┌──────────┐ ──────▶ ┌───────┐ ──────▶ ┌──────────┐
//! │ Idle │            │ Deriving │         │ Ready │         │ Consumed │
//! └──────┘            └──────────┘ ◀────── └───────┘         └──────────┘
//!                        ▲   ▲      abandon                       │
//!                        │   └────────────────────────────────────┘
//!                        │              next prepare
//!                     rotate (new period, counter reset)
//! ```
//!
//! `Ready` holds the tag and frame key of exactly one connection number.
//! Leaving `Ready` other than by `take` erases them, and the number is never
//! handed out again.
//!
//! A key set is not thread-safe on its own; the key manager wraps each one in
//! its own mutex.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use veilframe_crypto::{
    Direction, FrameKey, PeriodSecret, Role, SharedSecret, Tag, TagKey, derive_frame_key,
    derive_initial_period_secret, derive_period_secret, derive_tag_key, encode_tag,
};

use crate::{
    context::ConnectionContext,
    error::TransportError,
    event::KeyEvent,
    ids::{ContactId, TransportId},
    replay::{MAX_WINDOW_SIZE, ReorderingWindow},
    store::{PeriodRecord, StoreError, TransportKeyRecord},
    window::{MAX_WINDOW_RADIUS, MIN_PERIOD_LENGTH, RotationConfig, RotationWindow, TransportParams},
};

/// Outgoing connection numbers available per period.
pub const MAX_CONNECTIONS_PER_PERIOD: u64 = 1 << 32;

/// Everything needed to register a contact on one transport, apart from
/// the shared secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRegistration {
    /// Contact the keys belong to
    pub contact: ContactId,
    /// Transport the keys are for
    pub transport: TransportId,
    /// Role assigned to the local side at pairing
    pub role: Role,
    /// Start of period 0, agreed with the peer
    pub epoch_ms: u64,
    /// Maximum latency of the transport
    pub latency: Duration,
    /// Whether outgoing keys may be used immediately. Pass `false` until the
    /// peer is known to hold the shared secret.
    pub active: bool,
}

/// Connection number reserved by [`TransportKeySet::prepare_outgoing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedOutgoing {
    /// Period the connection number belongs to
    pub period: u64,
    /// Reserved connection number
    pub connection_number: u64,
}

/// Observable phase of the outgoing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingPhase {
    /// Outgoing keys are not active
    Idle,
    /// Keys for the next connection of `period` will be derived on demand
    Deriving {
        /// Period keys will be derived for
        period: u64,
    },
    /// Keys for one connection are derived and waiting to be taken
    Ready {
        /// Period of the reserved connection
        period: u64,
        /// Reserved connection number
        connection_number: u64,
    },
    /// The last reserved connection was handed out
    Consumed {
        /// Period of the handed-out connection
        period: u64,
        /// Handed-out connection number
        connection_number: u64,
    },
}

#[derive(Debug)]
enum OutgoingState {
    Idle,
    Deriving { period: u64 },
    Ready { period: u64, connection_number: u64, tag: Tag, frame_key: FrameKey },
    Consumed { period: u64, connection_number: u64 },
}

/// Incoming keys of one held period.
#[derive(Debug)]
struct IncomingKeys {
    secret: PeriodSecret,
    tag_key: Arc<TagKey>,
    window: ReorderingWindow,
}

impl IncomingKeys {
    fn new(secret: PeriodSecret, role: Role, window: ReorderingWindow) -> Self {
        let tag_key = Arc::new(derive_tag_key(&secret, role, Direction::Incoming));
        Self { secret, tag_key, window }
    }
}

fn replay_window(config: &RotationConfig) -> ReorderingWindow {
    ReorderingWindow::new(config.reordering_window_size.clamp(1, MAX_WINDOW_SIZE))
}

/// Key state of one (contact, transport) pair.
///
/// # Invariants
///
/// - At least one period is held, and held periods are contiguous
/// - `outgoing_period` is always held
/// - `next_connection_number` never decreases within `outgoing_period`
#[derive(Debug)]
pub struct TransportKeySet {
    contact: ContactId,
    transport: TransportId,
    role: Role,
    params: TransportParams,
    incoming: BTreeMap<u64, IncomingKeys>,
    outgoing: OutgoingState,
    outgoing_period: u64,
    next_connection_number: u64,
    edge_matches: u32,
}

impl TransportKeySet {
    /// Seed a key set from a freshly agreed shared secret.
    ///
    /// Period 0 is derived from the shared secret and walked forward to the
    /// start of the current window; earlier secrets are never held.
    pub fn new(
        registration: &ContactRegistration,
        shared: &SharedSecret,
        config: &RotationConfig,
        now: u64,
    ) -> Self {
        let params = TransportParams::new(
            registration.epoch_ms,
            config.period_length_for(registration.latency),
            registration.latency,
        );
        let window = RotationWindow::current(&params, config, now);

        let root = derive_initial_period_secret(shared, registration.transport.as_bytes());
        let base = root.advance_to(window.first());

        let mut set = Self {
            contact: registration.contact,
            transport: registration.transport.clone(),
            role: registration.role,
            params,
            incoming: BTreeMap::new(),
            outgoing: OutgoingState::Idle,
            outgoing_period: window.local(),
            next_connection_number: 0,
            edge_matches: 0,
        };
        set.insert_period(base, replay_window(config));
        set.extend_to(window.last(), config);

        if registration.active {
            set.outgoing = OutgoingState::Deriving { period: window.local() };
        }
        set
    }

    /// Restore a key set from its persisted form.
    ///
    /// # Errors
    ///
    /// - `StoreError::Corrupt` if the record violates the key set invariants
    pub fn from_record(record: &TransportKeyRecord) -> Result<Self, StoreError> {
        let corrupt = |reason| StoreError::Corrupt {
            contact: record.contact,
            transport: record.transport.clone(),
            reason,
        };

        let Some(first) = record.periods.first() else {
            return Err(corrupt("no periods"));
        };
        if first.period != record.base_period {
            return Err(corrupt("first period is not the base period"));
        }
        if record.periods.len() as u64 > 2 * MAX_WINDOW_RADIUS + 1 {
            return Err(corrupt("more periods than any window holds"));
        }
        if record.params.period_length_ms() < MIN_PERIOD_LENGTH.as_millis() as u64 {
            return Err(corrupt("period length below minimum"));
        }
        let contiguous =
            record.periods.windows(2).all(|pair| pair[0].period.checked_add(1) == Some(pair[1].period));
        if !contiguous {
            return Err(corrupt("periods are not contiguous"));
        }
        if record.periods.iter().any(|p| !p.window.is_valid()) {
            return Err(corrupt("invalid replay window"));
        }
        if !record.periods.iter().any(|p| p.period == record.outgoing_period) {
            return Err(corrupt("outgoing period not held"));
        }
        if record.next_connection_number > MAX_CONNECTIONS_PER_PERIOD {
            return Err(corrupt("connection counter out of range"));
        }

        let role = record.role();
        let base = PeriodSecret::from_bytes(record.base_period, record.base_secret);
        let incoming = record
            .periods
            .iter()
            .map(|p| (p.period, IncomingKeys::new(base.advance_to(p.period), role, p.window)))
            .collect();

        let outgoing = if record.active {
            OutgoingState::Deriving { period: record.outgoing_period }
        } else {
            OutgoingState::Idle
        };

        Ok(Self {
            contact: record.contact,
            transport: record.transport.clone(),
            role,
            params: record.params,
            incoming,
            outgoing,
            outgoing_period: record.outgoing_period,
            next_connection_number: record.next_connection_number,
            edge_matches: 0,
        })
    }

    /// Persisted form of the key set.
    pub fn to_record(&self) -> TransportKeyRecord {
        let Some((&base_period, base)) = self.incoming.first_key_value() else {
            unreachable!("a key set always holds at least one period");
        };

        TransportKeyRecord {
            contact: self.contact,
            transport: self.transport.clone(),
            initiator: self.role == Role::Initiator,
            active: self.is_active(),
            params: self.params,
            base_period,
            base_secret: *base.secret.key().as_bytes(),
            periods: self
                .incoming
                .iter()
                .map(|(&period, keys)| PeriodRecord { period, window: keys.window })
                .collect(),
            outgoing_period: self.outgoing_period,
            next_connection_number: self.next_connection_number,
        }
    }

    /// Contact the keys belong to.
    pub fn contact(&self) -> ContactId {
        self.contact
    }

    /// Transport the keys are for.
    pub fn transport(&self) -> &TransportId {
        &self.transport
    }

    /// Local role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Timing state, including the clock-difference estimate.
    pub fn params(&self) -> &TransportParams {
        &self.params
    }

    /// Held periods, ascending.
    pub fn held_periods(&self) -> impl Iterator<Item = u64> + '_ {
        self.incoming.keys().copied()
    }

    /// Period outgoing connections are currently drawn from.
    pub fn outgoing_period(&self) -> u64 {
        self.outgoing_period
    }

    /// Next outgoing connection number.
    pub fn next_connection_number(&self) -> u64 {
        self.next_connection_number
    }

    /// Phase of the outgoing state machine.
    pub fn phase(&self) -> OutgoingPhase {
        match self.outgoing {
            OutgoingState::Idle => OutgoingPhase::Idle,
            OutgoingState::Deriving { period } => OutgoingPhase::Deriving { period },
            OutgoingState::Ready { period, connection_number, .. } => {
                OutgoingPhase::Ready { period, connection_number }
            },
            OutgoingState::Consumed { period, connection_number } => {
                OutgoingPhase::Consumed { period, connection_number }
            },
        }
    }

    /// Whether outgoing keys are active.
    pub fn is_active(&self) -> bool {
        !matches!(self.outgoing, OutgoingState::Idle)
    }

    /// Whether an outgoing connection can be opened now.
    pub fn can_send(&self) -> bool {
        match self.outgoing {
            OutgoingState::Idle => false,
            OutgoingState::Ready { .. } => true,
            OutgoingState::Deriving { .. } | OutgoingState::Consumed { .. } => {
                self.next_connection_number < MAX_CONNECTIONS_PER_PERIOD
            },
        }
    }

    /// Rotation window at local time `now`.
    pub fn window(&self, config: &RotationConfig, now: u64) -> RotationWindow {
        RotationWindow::current(&self.params, config, now)
    }

    /// Bring held periods and outgoing state up to the window at `now`.
    ///
    /// Secrets of periods before the window are erased; periods up to the end
    /// of the window are derived. When the local period advances, prepared
    /// outgoing keys are erased and the connection counter restarts. A clock
    /// that moved backwards never rolls the outgoing period back.
    ///
    /// Returns true if anything changed.
    pub fn rotate(&mut self, config: &RotationConfig, now: u64) -> bool {
        let window = self.window(config, now);

        let mut changed = self.retain_from(window.first(), config);
        changed |= self.extend_to(window.last(), config);

        if window.local() > self.outgoing_period {
            self.outgoing_period = window.local();
            self.next_connection_number = 0;
            if self.is_active() {
                self.outgoing = OutgoingState::Deriving { period: window.local() };
            }
            changed = true;
        }

        if changed {
            tracing::debug!(
                contact = %self.contact,
                transport = %self.transport,
                first = window.first(),
                last = window.last(),
                outgoing_period = self.outgoing_period,
                "Rotated transport keys"
            );
        }
        changed
    }

    /// Make outgoing keys usable. Returns true if they were inactive.
    pub fn activate(&mut self) -> bool {
        if self.is_active() {
            return false;
        }
        self.outgoing = OutgoingState::Deriving { period: self.outgoing_period };
        true
    }

    /// Incoming tag keys of every held period inside `window`, ascending.
    pub fn candidate_tag_keys(&self, window: &RotationWindow) -> Vec<(u64, Arc<TagKey>)> {
        self.incoming
            .range(window.periods())
            .map(|(&period, keys)| (period, Arc::clone(&keys.tag_key)))
            .collect()
    }

    /// Whether an incoming connection `connection_number` of `period` would
    /// be accepted at `now`.
    pub fn is_acceptable(
        &self,
        config: &RotationConfig,
        now: u64,
        period: u64,
        connection_number: u64,
    ) -> bool {
        self.window(config, now).contains(period)
            && self
                .incoming
                .get(&period)
                .is_some_and(|keys| keys.window.is_acceptable(connection_number))
    }

    /// Consume incoming connection `connection_number` of `period`.
    ///
    /// Re-validates the window and replay state, marks the number as used,
    /// derives the frame key and folds the observation into the clock
    /// estimate. Returns `None` if the connection is not acceptable.
    pub fn accept_incoming(
        &mut self,
        config: &RotationConfig,
        now: u64,
        period: u64,
        connection_number: u64,
    ) -> Option<(ConnectionContext, Vec<KeyEvent>)> {
        let window = self.window(config, now);
        if !window.contains(period) {
            return None;
        }

        let keys = self.incoming.get_mut(&period)?;
        if !keys.window.mark_seen(connection_number) {
            return None;
        }

        let frame_key =
            derive_frame_key(&keys.secret, self.role, Direction::Incoming, connection_number);
        let context = ConnectionContext::incoming(
            self.contact,
            self.transport.clone(),
            period,
            connection_number,
            frame_key,
        );

        let events = self.observe(config, now, period, window.local());
        Some((context, events))
    }

    /// Reserve the next outgoing connection number and derive its keys.
    ///
    /// If keys are already `Ready` they are kept and their number returned.
    ///
    /// # Errors
    ///
    /// - `Inactive` if outgoing keys are not active
    /// - `ConnectionsExhausted` if the period's numbers are used up
    pub fn prepare_outgoing(&mut self) -> Result<PreparedOutgoing, TransportError> {
        match self.outgoing {
            OutgoingState::Idle => {
                return Err(TransportError::Inactive {
                    contact: self.contact,
                    transport: self.transport.clone(),
                });
            },
            OutgoingState::Ready { period, connection_number, .. } => {
                return Ok(PreparedOutgoing { period, connection_number });
            },
            OutgoingState::Deriving { .. } | OutgoingState::Consumed { .. } => {},
        }

        let period = self.outgoing_period;
        if self.next_connection_number >= MAX_CONNECTIONS_PER_PERIOD {
            return Err(TransportError::ConnectionsExhausted {
                contact: self.contact,
                transport: self.transport.clone(),
                period,
            });
        }

        self.outgoing = OutgoingState::Deriving { period };
        let Some(keys) = self.incoming.get(&period) else {
            unreachable!("the outgoing period is always held");
        };

        let connection_number = self.next_connection_number;
        let tag_key = derive_tag_key(&keys.secret, self.role, Direction::Outgoing);
        let tag = encode_tag(&tag_key, connection_number);
        let frame_key =
            derive_frame_key(&keys.secret, self.role, Direction::Outgoing, connection_number);

        self.next_connection_number += 1;
        self.outgoing = OutgoingState::Ready { period, connection_number, tag, frame_key };
        Ok(PreparedOutgoing { period, connection_number })
    }

    /// Hand out the prepared connection. `None` unless keys are `Ready`.
    pub fn take_outgoing(&mut self) -> Option<ConnectionContext> {
        match std::mem::replace(&mut self.outgoing, OutgoingState::Idle) {
            OutgoingState::Ready { period, connection_number, tag, frame_key } => {
                self.outgoing = OutgoingState::Consumed { period, connection_number };
                Some(ConnectionContext::outgoing(
                    self.contact,
                    self.transport.clone(),
                    period,
                    connection_number,
                    tag,
                    frame_key,
                ))
            },
            other => {
                self.outgoing = other;
                None
            },
        }
    }

    /// Erase prepared keys without using them. The reserved number is not
    /// reused. Returns true if keys were erased.
    pub fn abandon_outgoing(&mut self) -> bool {
        match self.outgoing {
            OutgoingState::Ready { period, .. } => {
                self.outgoing = OutgoingState::Deriving { period };
                true
            },
            _ => false,
        }
    }

    fn observe(
        &mut self,
        config: &RotationConfig,
        now: u64,
        period: u64,
        local: u64,
    ) -> Vec<KeyEvent> {
        let mut events = Vec::new();

        if let Some((old_ms, new_ms)) = self.params.observe_period(period, now, config) {
            tracing::debug!(
                contact = %self.contact,
                transport = %self.transport,
                old_ms,
                new_ms,
                "Adjusted clock difference estimate"
            );
            events.push(KeyEvent::ClockDiffAdjusted {
                contact: self.contact,
                transport: self.transport.clone(),
                old_ms,
                new_ms,
            });
        }

        if period == local {
            self.edge_matches = 0;
            return events;
        }

        self.edge_matches = self.edge_matches.saturating_add(1);
        if self.edge_matches == config.skew_alert_threshold {
            tracing::warn!(
                contact = %self.contact,
                transport = %self.transport,
                clock_diff_ms = self.params.clock_diff_ms(),
                consecutive = self.edge_matches,
                "Peer clock diverging from rotation window"
            );
            events.push(KeyEvent::ClockSkewDivergence {
                contact: self.contact,
                transport: self.transport.clone(),
                estimated_clock_diff_ms: self.params.clock_diff_ms(),
                consecutive_edge_matches: self.edge_matches,
            });
        }
        events
    }

    fn insert_period(&mut self, secret: PeriodSecret, window: ReorderingWindow) {
        let period = secret.period();
        self.incoming.insert(period, IncomingKeys::new(secret, self.role, window));
    }

    /// Erase periods before `first`. Jumps forward if `first` is past every
    /// held period.
    fn retain_from(&mut self, first: u64, config: &RotationConfig) -> bool {
        let Some((&lowest, _)) = self.incoming.first_key_value() else {
            unreachable!("a key set always holds at least one period");
        };
        if first <= lowest {
            return false;
        }

        let Some((&highest, top)) = self.incoming.last_key_value() else {
            unreachable!("a key set always holds at least one period");
        };
        if first > highest {
            let seed = top.secret.advance_to(first);
            self.incoming.clear();
            self.insert_period(seed, replay_window(config));
        } else {
            self.incoming = self.incoming.split_off(&first);
        }
        true
    }

    /// Derive periods up to and including `last`.
    fn extend_to(&mut self, last: u64, config: &RotationConfig) -> bool {
        let mut changed = false;
        loop {
            let Some((&top, keys)) = self.incoming.last_key_value() else {
                unreachable!("a key set always holds at least one period");
            };
            if top >= last {
                return changed;
            }

            let next = derive_period_secret(&keys.secret, top + 1);
            self.insert_period(next, replay_window(config));
            changed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use veilframe_crypto::{KEY_SIZE, decode_tag};

    use super::*;

    const HOUR: u64 = 3_600_000;

    fn config() -> RotationConfig {
        RotationConfig {
            period_length: Some(Duration::from_millis(HOUR)),
            max_clock_skew: Duration::from_millis(HOUR),
            ..RotationConfig::default()
        }
    }

    fn registration(role: Role, active: bool) -> ContactRegistration {
        ContactRegistration {
            contact: ContactId(1),
            transport: TransportId::new("tcp"),
            role,
            epoch_ms: 0,
            latency: Duration::from_secs(60),
            active,
        }
    }

    fn shared() -> SharedSecret {
        SharedSecret::from_bytes([9u8; KEY_SIZE])
    }

    /// Middle of period `p`.
    fn mid(p: u64) -> u64 {
        p * HOUR + HOUR / 2
    }

    fn key_set(role: Role, active: bool, now: u64) -> TransportKeySet {
        TransportKeySet::new(&registration(role, active), &shared(), &config(), now)
    }

    #[test]
    fn new_key_set_holds_window() {
        let set = key_set(Role::Initiator, true, mid(5));
        assert_eq!(set.held_periods().collect::<Vec<_>>(), vec![4, 5, 6]);
        assert_eq!(set.outgoing_period(), 5);
        assert_eq!(set.phase(), OutgoingPhase::Deriving { period: 5 });
    }

    #[test]
    fn inactive_key_set_cannot_send() {
        let mut set = key_set(Role::Initiator, false, mid(5));
        assert!(!set.can_send());
        assert!(matches!(set.prepare_outgoing(), Err(TransportError::Inactive { .. })));

        assert!(set.activate());
        assert!(!set.activate());
        assert!(set.can_send());
    }

    #[test]
    fn outgoing_state_machine() {
        let mut set = key_set(Role::Initiator, true, mid(5));

        let prepared = set.prepare_outgoing().unwrap();
        assert_eq!(prepared, PreparedOutgoing { period: 5, connection_number: 0 });
        assert_eq!(set.phase(), OutgoingPhase::Ready { period: 5, connection_number: 0 });

        // Preparing again keeps the same keys
        assert_eq!(set.prepare_outgoing().unwrap(), prepared);

        let context = set.take_outgoing().unwrap();
        assert_eq!(context.connection_number(), 0);
        assert_eq!(context.direction(), Direction::Outgoing);
        assert_eq!(set.phase(), OutgoingPhase::Consumed { period: 5, connection_number: 0 });
        assert!(set.take_outgoing().is_none());

        let next = set.prepare_outgoing().unwrap();
        assert_eq!(next.connection_number, 1);
    }

    #[test]
    fn abandoned_number_is_not_reused() {
        let mut set = key_set(Role::Initiator, true, mid(5));

        set.prepare_outgoing().unwrap();
        assert!(set.abandon_outgoing());
        assert_eq!(set.phase(), OutgoingPhase::Deriving { period: 5 });
        assert!(!set.abandon_outgoing());

        assert_eq!(set.prepare_outgoing().unwrap().connection_number, 1);
    }

    #[test]
    fn outgoing_tag_is_recognized_by_peer() {
        let mut alice = key_set(Role::Initiator, true, mid(5));
        let bob = key_set(Role::Responder, true, mid(5));

        alice.prepare_outgoing().unwrap();
        let context = alice.take_outgoing().unwrap();
        let tag = *context.tag().unwrap();

        let window = bob.window(&config(), mid(5));
        let candidates = bob.candidate_tag_keys(&window);
        let found = veilframe_crypto::recognize(
            candidates.iter().map(|(period, key)| (*period, key.as_ref())),
            &tag,
        );
        assert_eq!(found, Some((5, 0)));
    }

    #[test]
    fn own_outgoing_tag_is_not_an_incoming_candidate() {
        let mut alice = key_set(Role::Initiator, true, mid(5));
        alice.prepare_outgoing().unwrap();
        let tag = *alice.take_outgoing().unwrap().tag().unwrap();

        let window = alice.window(&config(), mid(5));
        for (_, key) in alice.candidate_tag_keys(&window) {
            assert_eq!(decode_tag(&key, &tag), None);
        }
    }

    #[test]
    fn accepted_number_is_consumed() {
        let mut set = key_set(Role::Responder, true, mid(5));

        assert!(set.is_acceptable(&config(), mid(5), 5, 3));
        let (context, _) = set.accept_incoming(&config(), mid(5), 5, 3).unwrap();
        assert_eq!(context.direction(), Direction::Incoming);
        assert_eq!(context.period(), 5);

        assert!(!set.is_acceptable(&config(), mid(5), 5, 3));
        assert!(set.accept_incoming(&config(), mid(5), 5, 3).is_none());
    }

    #[test]
    fn periods_outside_window_are_refused() {
        let mut set = key_set(Role::Responder, true, mid(5));
        assert!(set.accept_incoming(&config(), mid(5), 3, 0).is_none());
        assert!(set.accept_incoming(&config(), mid(5), 7, 0).is_none());
    }

    #[test]
    fn rotation_erases_old_periods_and_resets_counter() {
        let mut set = key_set(Role::Initiator, true, mid(5));
        set.prepare_outgoing().unwrap();
        set.take_outgoing().unwrap();
        set.prepare_outgoing().unwrap();

        assert!(set.rotate(&config(), mid(6)));
        assert_eq!(set.held_periods().collect::<Vec<_>>(), vec![5, 6, 7]);
        assert_eq!(set.outgoing_period(), 6);
        assert_eq!(set.next_connection_number(), 0);
        // Prepared keys of the old period were erased
        assert_eq!(set.phase(), OutgoingPhase::Deriving { period: 6 });

        assert!(!set.rotate(&config(), mid(6)));
    }

    #[test]
    fn rotation_jumps_over_long_downtime() {
        let mut set = key_set(Role::Initiator, true, mid(5));
        assert!(set.rotate(&config(), mid(40)));
        assert_eq!(set.held_periods().collect::<Vec<_>>(), vec![39, 40, 41]);

        let fresh = key_set(Role::Initiator, true, mid(40));
        let rotated = set.to_record();
        let direct = fresh.to_record();
        assert_eq!(rotated.base_secret, direct.base_secret);
    }

    #[test]
    fn clock_moving_back_keeps_outgoing_period() {
        let mut set = key_set(Role::Initiator, true, mid(5));
        set.rotate(&config(), mid(3));
        assert_eq!(set.outgoing_period(), 5);
        assert!(set.held_periods().any(|p| p == 5));
    }

    #[test]
    fn edge_matches_raise_divergence_event() {
        let mut set = key_set(Role::Responder, true, mid(5));
        let mut divergences = 0;

        for n in 0..4 {
            let (_, events) = set.accept_incoming(&config(), mid(5), 6, n).unwrap();
            divergences += events
                .iter()
                .filter(|e| matches!(e, KeyEvent::ClockSkewDivergence { .. }))
                .count();
        }
        assert_eq!(divergences, 1, "event fires once when the threshold is reached");

        // A match in the local period resets the count
        set.accept_incoming(&config(), mid(5), 5, 0).unwrap();
        for n in 4..7 {
            set.accept_incoming(&config(), mid(5), 6, n).unwrap();
        }
        assert_eq!(set.edge_matches, 3);
    }

    #[test]
    fn edge_match_adjusts_clock_estimate() {
        let mut set = key_set(Role::Responder, true, mid(5));

        let (_, events) = set.accept_incoming(&config(), mid(5), 6, 0).unwrap();
        assert!(events.iter().any(|e| matches!(e, KeyEvent::ClockDiffAdjusted { .. })));
        assert!(set.params().clock_diff_ms() > 0);
    }

    #[test]
    fn record_roundtrip_restores_state() {
        let mut set = key_set(Role::Responder, true, mid(5));
        set.accept_incoming(&config(), mid(5), 5, 2).unwrap();
        set.prepare_outgoing().unwrap();
        set.take_outgoing().unwrap();

        let record = set.to_record();
        let restored = TransportKeySet::from_record(&record).unwrap();

        assert_eq!(restored.to_record(), record);
        assert!(!restored.is_acceptable(&config(), mid(5), 5, 2));
        assert_eq!(restored.next_connection_number(), 1);
        assert_eq!(restored.role(), Role::Responder);
    }

    #[test]
    fn corrupt_records_are_rejected() {
        let set = key_set(Role::Initiator, true, mid(5));

        let mut record = set.to_record();
        record.periods.clear();
        assert!(matches!(
            TransportKeySet::from_record(&record),
            Err(StoreError::Corrupt { reason: "no periods", .. })
        ));

        let mut record = set.to_record();
        record.outgoing_period = 99;
        assert!(matches!(
            TransportKeySet::from_record(&record),
            Err(StoreError::Corrupt { .. })
        ));

        let mut record = set.to_record();
        record.periods.remove(1);
        assert!(matches!(
            TransportKeySet::from_record(&record),
            Err(StoreError::Corrupt { reason: "periods are not contiguous", .. })
        ));
    }

    #[test]
    fn unbounded_records_are_rejected() {
        let set = key_set(Role::Initiator, true, mid(5));

        let mut record = set.to_record();
        record.periods.extend(
            (7..100_000).map(|period| PeriodRecord { period, window: ReorderingWindow::new(32) }),
        );
        assert!(matches!(
            TransportKeySet::from_record(&record),
            Err(StoreError::Corrupt { reason: "more periods than any window holds", .. })
        ));

        let mut record = set.to_record();
        record.params = TransportParams::new(0, Duration::from_millis(1), Duration::ZERO);
        assert!(matches!(
            TransportKeySet::from_record(&record),
            Err(StoreError::Corrupt { reason: "period length below minimum", .. })
        ));

        let mut record = set.to_record();
        let widest = 2 * MAX_WINDOW_RADIUS + 1;
        record.periods.extend(
            (7..4 + widest).map(|period| PeriodRecord { period, window: ReorderingWindow::new(32) }),
        );
        assert!(TransportKeySet::from_record(&record).is_ok());
    }

    #[test]
    fn exhausted_counter_requires_rotation() {
        let mut set = key_set(Role::Initiator, true, mid(5));
        set.next_connection_number = MAX_CONNECTIONS_PER_PERIOD;

        assert!(!set.can_send());
        let err = set.prepare_outgoing().unwrap_err();
        assert!(err.is_transient());

        set.rotate(&config(), mid(6));
        assert!(set.can_send());
    }
}
