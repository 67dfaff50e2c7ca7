//! Open vSwitch integration: a JSON-RPC client for ovs-vswitchd's control
//! socket, plus parsers for the `dpif/show` and `fdb/show` text tables.
//!
//! The table formats are treated as a stable contract with this version of
//! OVS; any line the parsers do not recognize is fatal.

use std::fs::File;
use std::os::unix::io::AsRawFd;

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use winnow::ascii::{dec_uint, space0, space1};
use winnow::combinator::separated;
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::{rest, take_while};

use crate::bond::BridgeKind;
use crate::error::{Error, Result};
use crate::fdb::{Dst, FdbSet};
use crate::netlink::Connection;

/// Result type for winnow line parsers.
type PResult<T> = std::result::Result<T, winnow::error::ErrMode<ContextError>>;

/// ovs-vswitchd's PID file. The daemon holds a write lock on it; the lock
/// owner, not the file contents, identifies the live process.
const PID_FILE: &str = "/run/openvswitch/ovs-vswitchd.pid";

/// Receive buffer for one JSON-RPC response. A response that fills the
/// buffer completely is treated as an overflow.
const RESPONSE_BUF_SIZE: usize = 32768;

/// Read the PID of the running ovs-vswitchd from the lock on its PID file.
fn vswitchd_pid() -> Result<libc::pid_t> {
    let file = File::open(PID_FILE)
        .map_err(|e| Error::OvsUnavailable(format!("failed to open PID file: {PID_FILE}: {e}")))?;

    // SAFETY: zero is a valid bit pattern for struct flock.
    let mut lock: libc::flock = unsafe { std::mem::zeroed() };
    lock.l_type = libc::F_WRLCK as libc::c_short;
    lock.l_whence = libc::SEEK_SET as libc::c_short;

    // SAFETY: the fd is open for the duration of the call; F_GETLK only
    // writes back into `lock`.
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_GETLK, &mut lock) };
    if rc < 0 {
        return Err(Error::OvsUnavailable(format!(
            "failed to query PID file lock: {PID_FILE}: {}",
            std::io::Error::last_os_error()
        )));
    }

    if lock.l_type == libc::F_UNLCK as libc::c_short {
        return Err(Error::OvsUnavailable(format!(
            "PID file not locked: {PID_FILE}"
        )));
    }

    Ok(lock.l_pid)
}

/// JSON-RPC client for ovs-vswitchd's control socket.
///
/// The connection is established lazily on the first request and reused for
/// the daemon's lifetime.
#[derive(Default)]
pub struct OvsClient {
    stream: Option<UnixStream>,
    next_id: u64,
}

impl OvsClient {
    pub fn new() -> Self {
        Self::default()
    }

    async fn connect() -> Result<UnixStream> {
        let pid = vswitchd_pid()?;
        let path = format!("/run/openvswitch/ovs-vswitchd.{pid}.ctl");
        UnixStream::connect(&path)
            .await
            .map_err(|e| Error::OvsUnavailable(format!("failed to connect UNIX socket: {path}: {e}")))
    }

    /// Issue one JSON-RPC request and return the `result` string.
    ///
    /// An `error` string in the response, an id mismatch, or a response
    /// that fills the receive buffer are all fatal.
    async fn call(&mut self, method: &str, param: Option<&str>) -> Result<String> {
        if self.stream.is_none() {
            self.stream = Some(Self::connect().await?);
        }
        let Some(stream) = self.stream.as_mut() else {
            unreachable!("OVS stream just connected");
        };

        self.next_id += 1;
        let id = self.next_id;
        let params = match param {
            Some(p) => json!([p]),
            None => json!([]),
        };
        let request = json!({ "id": id, "method": method, "params": params });

        stream.write_all(request.to_string().as_bytes()).await?;

        let mut buf = vec![0u8; RESPONSE_BUF_SIZE];
        let n = stream.read(&mut buf).await?;
        if n == buf.len() {
            return Err(Error::OvsOverflow(n));
        }

        let resp: Value = serde_json::from_slice(&buf[..n])?;

        let resp_id = resp
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::InvalidMessage("JSON-RPC response has no numeric id".into()))?;
        if resp_id != id {
            return Err(Error::OvsIdMismatch {
                request: id,
                response: resp_id,
            });
        }

        let error = resp
            .get("error")
            .ok_or_else(|| Error::InvalidMessage("JSON-RPC response has no error member".into()))?;
        if let Some(message) = error.as_str() {
            return Err(Error::OvsError(message.trim_end().to_string()));
        }
        if !error.is_null() {
            return Err(Error::InvalidMessage(
                "JSON-RPC error member is neither string nor null".into(),
            ));
        }

        let result = resp
            .get("result")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidMessage("JSON-RPC result is not a string".into()))?;
        let result = result.strip_suffix('\n').unwrap_or(result);
        if result.is_empty() {
            return Err(Error::InvalidMessage(
                "JSON-RPC response has zero-length result".into(),
            ));
        }

        Ok(result.to_string())
    }

    /// Resolve the logical bridge a bond belongs to.
    ///
    /// The bond's kernel-visible master is the OVS datapath device;
    /// `dpif/show` maps the bond to its bridge and OpenFlow port, and a
    /// follow-up link lookup fetches that bridge's interface index.
    pub async fn bridge_info(
        &mut self,
        conn: &Connection,
        ifname: &str,
    ) -> Result<(String, BridgeKind, i32)> {
        let listing = self.call("dpif/show", None).await?;
        let (brname, ofport) = find_bridge_port(&listing, ifname)?;

        let link = conn.link_by_name(&brname).await.map_err(|e| {
            Error::InvalidMessage(format!("failed to get OVS bridge info: {brname}: {e}"))
        })?;
        let brindex = link.ifindex();
        if brindex == 0 {
            return Err(Error::InvalidMessage(format!(
                "failed to get OVS bridge index: {brname}"
            )));
        }

        Ok((brname, BridgeKind::Ovs { ofport }, brindex))
    }

    /// Fetch the bridge's FDB and collect every destination not learned on
    /// the bond's own port.
    pub async fn read_fdb(&mut self, brname: &str, own_port: u32) -> Result<FdbSet> {
        let listing = self.call("fdb/show", Some(brname)).await?;
        let mut set = FdbSet::new();
        collect_fdb(&listing, own_port, brname, &mut set)?;
        Ok(set)
    }
}

/// A name token in appctl output: anything up to a colon or whitespace.
fn name_token<'s>(input: &mut &'s str) -> PResult<&'s str> {
    take_while(1.., |c: char| c != ':' && !c.is_ascii_whitespace()).parse_next(input)
}

/// A `dpif/show` port line: an indented name followed by the OF port
/// number (the rest of the line is ignored).
fn port_line<'s>(input: &mut &'s str) -> PResult<(&'s str, u32)> {
    let _ = space0.parse_next(input)?;
    let name = name_token.parse_next(input)?;
    let _ = space1.parse_next(input)?;
    let ofport = dec_uint.parse_next(input)?;
    rest.void().parse_next(input)?;
    Ok((name, ofport))
}

/// A `dpif/show` bridge header: a bare name (the datapath header line also
/// matches, but is always overwritten by the first real bridge).
fn bridge_line<'s>(input: &mut &'s str) -> PResult<&'s str> {
    let _ = space0.parse_next(input)?;
    let name = name_token.parse_next(input)?;
    rest.void().parse_next(input)?;
    Ok(name)
}

/// One `fdb/show` row: OF port, VLAN, MAC (trailing age ignored).
fn fdb_row(input: &mut &str) -> PResult<(u32, u16, [u8; 6])> {
    let _ = space0.parse_next(input)?;
    let port = dec_uint.parse_next(input)?;
    let _ = space1.parse_next(input)?;
    let vlan = dec_uint.parse_next(input)?;
    let _ = space1.parse_next(input)?;
    let mac = mac_addr.parse_next(input)?;
    rest.void().parse_next(input)?;
    Ok((port, vlan, mac))
}

fn mac_addr(input: &mut &str) -> PResult<[u8; 6]> {
    let octets: Vec<u8> = separated(6, mac_octet, ':').parse_next(input)?;
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&octets);
    Ok(mac)
}

fn mac_octet(input: &mut &str) -> PResult<u8> {
    take_while(1..=2, |c: char| c.is_ascii_hexdigit())
        .try_map(|s| u8::from_str_radix(s, 16))
        .parse_next(input)
}

/// Walk a `dpif/show` listing and return the bridge name and OF port of
/// the port named `ifname`.
pub fn find_bridge_port(listing: &str, ifname: &str) -> Result<(String, u32)> {
    let mut bridge: Option<&str> = None;

    let mut lines = listing.lines();
    lines.next(); // datapath header

    for line in lines {
        if let Ok((name, ofport)) = port_line.parse(line) {
            if name == ifname {
                let bridge = bridge.ok_or_else(|| {
                    Error::OvsParse(format!("port listed before any bridge: {line:?}"))
                })?;
                return Ok((bridge.to_string(), ofport));
            }
        } else if let Ok(name) = bridge_line.parse(line) {
            bridge = Some(name);
        } else {
            return Err(Error::OvsParse(format!(
                "unrecognized dpif/show line: {line:?}"
            )));
        }
    }

    Err(Error::OvsParse(format!(
        "failed to identify OVS bridge and port: {ifname}"
    )))
}

/// Parse a `fdb/show` listing into `set`, omitting `LOCAL` rows and rows
/// learned on `own_port`.
pub fn collect_fdb(listing: &str, own_port: u32, brname: &str, set: &mut FdbSet) -> Result<()> {
    let mut lines = listing.lines();
    lines.next(); // column header

    for line in lines {
        if line.starts_with("LOCAL") {
            continue;
        }
        let (port, vlan, mac) = fdb_row
            .parse(line)
            .map_err(|_| Error::OvsParse(format!("unrecognized fdb/show line: {line:?}")))?;
        if port != own_port {
            set.add(Dst::new(vlan, mac), brname);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DPIF_SHOW: &str = "\
system@ovs-system: hit:1098 missed:237
  br-ex:
    br-ex 65534/2: (internal)
    eth2 1/3: (system)
  br-int:
    bond0 5/4: (system)
    br-int 65534/5: (internal)";

    #[test]
    fn dpif_show_locates_bridge_and_port() {
        // The logical bridge, not the datapath device, and the OF port
        // from the matching port line.
        let (brname, ofport) = find_bridge_port(DPIF_SHOW, "bond0").unwrap();
        assert_eq!(brname, "br-int");
        assert_eq!(ofport, 5);

        let (brname, ofport) = find_bridge_port(DPIF_SHOW, "eth2").unwrap();
        assert_eq!(brname, "br-ex");
        assert_eq!(ofport, 1);
    }

    #[test]
    fn dpif_show_missing_port_is_fatal() {
        assert!(matches!(
            find_bridge_port(DPIF_SHOW, "bond9"),
            Err(Error::OvsParse(_))
        ));
    }

    #[test]
    fn dpif_show_garbage_is_fatal() {
        let listing = "header\n  : not a name\n";
        assert!(matches!(
            find_bridge_port(listing, "bond0"),
            Err(Error::OvsParse(_))
        ));
    }

    #[test]
    fn fdb_show_skips_local_and_own_port() {
        // LOCAL skipped, own port skipped, the rest collected.
        let listing = "\
 port  VLAN  MAC                Age
LOCAL     0  02:11:22:33:44:aa    1
    5     0  02:11:22:33:44:bb    2
    9    20  02:11:22:33:44:cc    3";

        let mut set = FdbSet::new();
        collect_fdb(listing, 5, "br-int", &mut set).unwrap();

        let dsts: Vec<Dst> = set.iter().copied().collect();
        assert_eq!(dsts, vec![Dst::new(20, [0x02, 0x11, 0x22, 0x33, 0x44, 0xcc])]);
    }

    #[test]
    fn fdb_show_garbage_is_fatal() {
        let listing = " port  VLAN  MAC  Age\n 1  x  02:11:22:33:44:aa  1";
        let mut set = FdbSet::new();
        assert!(matches!(
            collect_fdb(listing, 5, "br0", &mut set),
            Err(Error::OvsParse(_))
        ));
    }

    #[test]
    fn fdb_rows_tolerate_missing_age() {
        let listing = " port  VLAN  MAC\n 9 0 02:11:22:33:44:aa";
        let mut set = FdbSet::new();
        collect_fdb(listing, 5, "br0", &mut set).unwrap();
        assert_eq!(set.len(), 1);
    }
}
