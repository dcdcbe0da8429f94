//! The DHCP client FSM: acquires and renews the lease for an interface's own IP.

use core::net::Ipv4Addr;

use embassy_time::Duration;
use rand_core::RngCore;

use edge_router_dhcp::{client::Client, MessageType, Settings};

/// The IP configuration a successful DHCP exchange installs on the interface's domain.
#[derive(Clone, Debug)]
pub struct LeasedConfig {
    pub ip: Ipv4Addr,
    pub server_ip: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub subnet: Option<Ipv4Addr>,
    pub dns1: Option<Ipv4Addr>,
    pub dns2: Option<Ipv4Addr>,
    pub lease: Duration,
}

impl LeasedConfig {
    fn from_settings(settings: Settings) -> Option<Self> {
        Some(Self {
            ip: settings.ip,
            server_ip: settings.server_ip?,
            gateway: settings.gateway,
            subnet: settings.subnet,
            dns1: settings.dns1,
            dns2: settings.dns2,
            lease: Duration::from_secs(settings.lease_time_secs.unwrap_or(3600) as _),
        })
    }
}

/// DHCP client state machine states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Init,
    Select,
    Request,
    Bound,
    Renew,
    Rebind,
}

/// Number of unanswered timeouts the client tolerates in SELECT/REQUEST and in RENEW/REBIND
/// before giving up and returning to INIT - the shared retry budget for every wait state.
const MAX_RETRIES: u32 = 3;

/// Fired timer a caller should arm after a transition, keyed by what it means when it fires.
#[derive(Clone, Copy, Debug)]
pub enum Deadline {
    /// Re-send or give up on the current DISCOVER/REQUEST.
    Retry,
    /// T1: begin RENEW.
    Renew,
    /// T2: begin REBIND.
    Rebind,
    /// Lease expiry: drop configuration, return to INIT.
    Expire,
}

/// The per-interface DHCP client FSM.
pub struct ClientFsm<T> {
    client: Client<T>,
    state: State,
    xid: u32,
    retries: u32,
    config: Option<LeasedConfig>,
    /// `(server_ip, ip)` offered in SELECT, kept around so a retry timeout in REQUEST can
    /// re-encode the same DHCPREQUEST without a stored config to fall back on (one isn't installed
    /// until the matching DHCPACK arrives).
    pending_request: Option<(Ipv4Addr, Ipv4Addr)>,
}

/// What the caller driving the FSM should do as a result of a step.
pub enum Action<'o> {
    /// Nothing to send; state didn't change in a way requiring wire traffic.
    None,
    /// Broadcast this already-encoded frame and arm the given deadline.
    Send(&'o [u8], Deadline, Duration),
    /// The IP configuration changed (newly bound, renewed, or lost). `None` means the lease was
    /// lost/expired and every link on the old IP must be dissolved before the new config becomes
    /// visible.
    ConfigChanged(Option<LeasedConfig>),
}

impl<T> ClientFsm<T>
where
    T: RngCore,
{
    pub fn new(rng: T, mac: [u8; 6]) -> Self {
        Self {
            client: Client {
                rng,
                mac,
                rp_udp_client_port: Some(68),
                rp_udp_server_port: Some(67),
            },
            state: State::Init,
            xid: 0,
            retries: 0,
            config: None,
            pending_request: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> Option<&LeasedConfig> {
        self.config.as_ref()
    }

    /// INIT: broadcast DHCPDISCOVER. Call once at startup and again whenever the retry budget
    /// for SELECT/REQUEST is exhausted.
    pub fn start<'o>(&mut self, buf: &'o mut [u8], secs: u16) -> Action<'o> {
        self.state = State::Select;
        self.retries = 0;

        let (frame, xid) = match self.client.encode_discover(buf, secs, None) {
            Ok(r) => r,
            Err(_) => return Action::None,
        };

        self.xid = xid;

        Action::Send(frame, Deadline::Retry, Duration::from_secs(4))
    }

    /// Handles an inbound (already filtered-to-our-MAC) DHCP reply while in SELECT: on a
    /// matching DHCPOFFER, send DHCPREQUEST.
    pub fn on_offer<'o>(
        &mut self,
        data: &[u8],
        buf: &'o mut [u8],
        secs: u16,
    ) -> Action<'o> {
        if self.state != State::Select {
            return Action::None;
        }

        let Ok(Some(reply)) =
            self.client
                .decode_bootp_reply(data, self.xid, Some(&[MessageType::Offer]))
        else {
            return Action::None;
        };

        let Some(settings) = LeasedConfig::from_settings(Settings::from(&reply)) else {
            return Action::None;
        };

        self.state = State::Request;
        self.retries = 0;
        self.pending_request = Some((settings.server_ip, settings.ip));

        let (frame, xid) = match self
            .client
            .encode_request(buf, secs, settings.server_ip, settings.ip)
        {
            Ok(r) => r,
            Err(_) => return Action::None,
        };

        self.xid = xid;

        Action::Send(frame, Deadline::Retry, Duration::from_secs(4))
    }

    /// Handles an inbound reply while in REQUEST/RENEW/REBIND: DHCPACK installs the
    /// configuration and arms the T1/T2/expiry timers; DHCPNAK (from any state) drops
    /// configuration and restarts.
    pub fn on_ack_or_nak(&mut self, data: &[u8]) -> Action<'static> {
        if !matches!(self.state, State::Request | State::Renew | State::Rebind) {
            return Action::None;
        }

        let Ok(Some(reply)) = self.client.decode_bootp_reply(
            data,
            self.xid,
            Some(&[MessageType::Ack, MessageType::Nak]),
        ) else {
            return Action::None;
        };

        match reply.message_type() {
            Some(MessageType::Ack) => {
                let Some(settings) = LeasedConfig::from_settings(Settings::from(&reply)) else {
                    return Action::None;
                };

                self.state = State::Bound;
                self.retries = 0;
                self.pending_request = None;
                self.config = Some(settings.clone());

                Action::ConfigChanged(Some(settings))
            }
            Some(MessageType::Nak) => self.fall_back_to_init(),
            _ => Action::None,
        }
    }

    /// T1 fired while BOUND: unicast DHCPREQUEST to the server.
    pub fn on_renew_timer<'o>(&mut self, buf: &'o mut [u8], secs: u16) -> Action<'o> {
        if self.state != State::Bound {
            return Action::None;
        }

        self.state = State::Renew;
        self.renew_request(buf, secs)
    }

    /// T2 fired while RENEW: broadcast DHCPREQUEST.
    pub fn on_rebind_timer<'o>(&mut self, buf: &'o mut [u8], secs: u16) -> Action<'o> {
        if self.state != State::Renew {
            return Action::None;
        }

        self.state = State::Rebind;
        self.renew_request(buf, secs)
    }

    /// Lease expiry fired, or the retry budget for the current wait state ran out without a
    /// reply: drop configuration and restart.
    pub fn on_expire_or_retries_exhausted(&mut self) -> Action<'static> {
        self.fall_back_to_init()
    }

    /// Records a retry timeout; returns `true` once the caller should give up the current wait
    /// state, per the shared retry budget above.
    pub fn note_retry_timeout(&mut self) -> bool {
        self.retries += 1;
        self.retries >= MAX_RETRIES
    }

    /// Re-sends the message outstanding in the current wait state, without resetting the retry
    /// count or minting a new xid for a state that already has one in flight. The caller arms
    /// this only after `note_retry_timeout` returned `false` for the same timeout.
    pub fn retry<'o>(&mut self, buf: &'o mut [u8], secs: u16) -> Action<'o> {
        match self.state {
            State::Select => {
                let (frame, xid) = match self.client.encode_discover(buf, secs, None) {
                    Ok(r) => r,
                    Err(_) => return Action::None,
                };

                self.xid = xid;

                Action::Send(frame, Deadline::Retry, Duration::from_secs(4))
            }
            State::Request => {
                let Some((server_ip, ip)) = self.pending_request else {
                    return self.fall_back_to_init();
                };

                let (frame, xid) = match self.client.encode_request(buf, secs, server_ip, ip) {
                    Ok(r) => r,
                    Err(_) => return Action::None,
                };

                self.xid = xid;

                Action::Send(frame, Deadline::Retry, Duration::from_secs(4))
            }
            State::Renew | State::Rebind => self.renew_request(buf, secs),
            State::Init | State::Bound => Action::None,
        }
    }

    fn renew_request<'o>(&mut self, buf: &'o mut [u8], secs: u16) -> Action<'o> {
        let Some(config) = self.config.clone() else {
            return self.fall_back_to_init();
        };

        self.retries = 0;

        let (frame, xid) = match self
            .client
            .encode_request(buf, secs, config.server_ip, config.ip)
        {
            Ok(r) => r,
            Err(_) => return Action::None,
        };

        self.xid = xid;

        let deadline = Duration::from_secs(4);

        Action::Send(frame, Deadline::Retry, deadline)
    }

    fn fall_back_to_init(&mut self) -> Action<'static> {
        self.state = State::Init;
        self.retries = 0;
        self.pending_request = None;

        let had_config = self.config.take().is_some();

        if had_config {
            Action::ConfigChanged(None)
        } else {
            Action::None
        }
    }

    pub fn xid(&self) -> u32 {
        self.xid
    }
}
