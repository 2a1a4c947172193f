//! Network interface discovery and change monitoring.

use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use nix::ifaddrs::getifaddrs;
use nix::net::if_::{if_nametoindex, InterfaceFlags};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;

/// Network interface information.
///
/// The interface index is the stable identity: two snapshots describe the
/// same NIC iff the indices match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// OS interface index.
    pub index: u32,
    /// Interface name (e.g., "eth0", "wlan0").
    pub name: String,
    /// Operationally up.
    pub up: bool,
    /// Supports multicast.
    pub multicast: bool,
    /// Loopback interface.
    pub loopback: bool,
    /// Unicast addresses assigned to the interface.
    pub addrs: Vec<IpAddr>,
}

impl InterfaceInfo {
    /// Whether the interface can participate in mDNS: operationally up,
    /// multicast-capable, and not receive-only.
    ///
    /// Receive-only is a Windows adapter attribute with no counterpart in
    /// the flags `getifaddrs` reports on this platform, so only the first
    /// two criteria are checked here.
    pub fn is_usable(&self) -> bool {
        self.up && self.multicast
    }

    /// The interface's IPv4 addresses.
    pub fn ipv4_addrs(&self) -> impl Iterator<Item = std::net::Ipv4Addr> + '_ {
        self.addrs.iter().filter_map(|addr| match addr {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })
    }

    /// Whether the interface has at least one IPv6 address.
    pub fn has_ipv6(&self) -> bool {
        self.addrs.iter().any(|addr| addr.is_ipv6())
    }
}

impl std::fmt::Display for InterfaceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let addrs: Vec<String> = self.addrs.iter().map(|a| a.to_string()).collect();
        write!(
            f,
            "dev {} index {} addrs [{}]",
            self.name,
            self.index,
            addrs.join(", ")
        )
    }
}

/// Consumer-supplied predicate narrowing the discovered interface set.
pub type InterfaceFilter = Arc<dyn Fn(&InterfaceInfo) -> bool + Send + Sync>;

/// List all network interfaces with their addresses and flags.
pub fn list_all() -> Result<Vec<InterfaceInfo>> {
    let addrs = getifaddrs().map_err(std::io::Error::other)?;

    // getifaddrs yields one entry per address; group them per interface.
    let mut interfaces: BTreeMap<String, InterfaceInfo> = BTreeMap::new();

    for ifaddr in addrs {
        let entry = interfaces
            .entry(ifaddr.interface_name.clone())
            .or_insert_with(|| {
                let index = if_nametoindex(ifaddr.interface_name.as_str()).unwrap_or(0);
                InterfaceInfo {
                    index,
                    name: ifaddr.interface_name.clone(),
                    up: ifaddr.flags.contains(InterfaceFlags::IFF_UP),
                    multicast: ifaddr.flags.contains(InterfaceFlags::IFF_MULTICAST),
                    loopback: ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK),
                    addrs: Vec::new(),
                }
            });

        let Some(addr) = ifaddr.address else {
            continue;
        };
        if let Some(addr_in) = addr.as_sockaddr_in() {
            entry.addrs.push(IpAddr::V4(addr_in.ip()));
        } else if let Some(addr_in6) = addr.as_sockaddr_in6() {
            entry.addrs.push(IpAddr::V6(addr_in6.ip()));
        }
    }

    Ok(interfaces.into_values().collect())
}

/// Select the usable interfaces from a full listing.
///
/// Usable means up, multicast-capable, and holding at least one address.
/// Loopback interfaces are included only when `include_loopback` is set, or
/// as a fallback when no other usable interface exists.
pub fn select_usable(all: Vec<InterfaceInfo>, include_loopback: bool) -> Vec<InterfaceInfo> {
    let usable: Vec<InterfaceInfo> = all
        .into_iter()
        .filter(|nic| nic.is_usable() && !nic.addrs.is_empty())
        .collect();

    if include_loopback || usable.iter().all(|nic| nic.loopback) {
        usable
    } else {
        usable.into_iter().filter(|nic| !nic.loopback).collect()
    }
}

/// Snapshot the currently usable interfaces.
pub fn usable_interfaces(include_loopback: bool) -> Result<Vec<InterfaceInfo>> {
    Ok(select_usable(list_all()?, include_loopback))
}

/// A snapshot of the usable interfaces, with the changes since the
/// previous one.
#[derive(Debug, Clone, Default)]
pub struct InterfaceSnapshot {
    /// All currently usable interfaces, in unspecified order.
    pub interfaces: Vec<InterfaceInfo>,
    /// Interfaces that appeared since the last snapshot.
    pub added: Vec<InterfaceInfo>,
    /// Indices of interfaces that disappeared since the last snapshot.
    pub removed: Vec<u32>,
}

impl InterfaceSnapshot {
    /// Whether the interface set changed since the last snapshot.
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Diff `current` against the known index set, updating it in place.
fn diff_known(known: &mut HashSet<u32>, current: Vec<InterfaceInfo>) -> InterfaceSnapshot {
    let current_ids: HashSet<u32> = current.iter().map(|nic| nic.index).collect();
    let added = current
        .iter()
        .filter(|nic| !known.contains(&nic.index))
        .cloned()
        .collect();
    let removed = known.difference(&current_ids).copied().collect();
    *known = current_ids;
    InterfaceSnapshot {
        interfaces: current,
        added,
        removed,
    }
}

type ChangeCallback = Arc<dyn Fn(InterfaceSnapshot) + Send + Sync>;

/// Watches the set of usable interfaces.
///
/// Pull mode: [`NetworkMonitor::refresh`] takes a snapshot and reports the
/// changes since the last one. Push mode: [`NetworkMonitor::subscribe`]
/// invokes a callback whenever the set changes. This platform has no
/// address-change notification the stack reaches, so push mode polls.
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    include_loopback: bool,
    filter: Option<InterfaceFilter>,
    poll_interval: Duration,
    known: Mutex<HashSet<u32>>,
    callback: Mutex<Option<ChangeCallback>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkMonitor {
    /// Create a monitor. Nothing is watched until `refresh` or `subscribe`
    /// is called.
    pub fn new(
        include_loopback: bool,
        filter: Option<InterfaceFilter>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                include_loopback,
                filter,
                poll_interval,
                known: Mutex::new(HashSet::new()),
                callback: Mutex::new(None),
                task: Mutex::new(None),
            }),
        }
    }

    /// Forget all known interfaces; the next refresh reports everything as
    /// added.
    pub fn reset(&self) {
        self.inner.known.lock().unwrap().clear();
    }

    /// Take a snapshot and report the changes since the previous one.
    pub fn refresh(&self) -> Result<InterfaceSnapshot> {
        self.inner.refresh()
    }

    /// Register `callback` and start watching for changes.
    ///
    /// Subscribing again replaces the callback without spawning a second
    /// watcher.
    pub fn subscribe(&self, callback: impl Fn(InterfaceSnapshot) + Send + Sync + 'static) {
        *self.inner.callback.lock().unwrap() = Some(Arc::new(callback));

        let mut task = self.inner.task.lock().unwrap();
        if task.is_some() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.poll_interval;
        *task = Some(tokio::spawn(poll_loop(weak, interval)));
    }

    /// Stop watching and drop the registered callback.
    pub fn unsubscribe(&self) {
        if let Some(task) = self.inner.task.lock().unwrap().take() {
            task.abort();
        }
        *self.inner.callback.lock().unwrap() = None;
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl MonitorInner {
    fn refresh(&self) -> Result<InterfaceSnapshot> {
        let mut current = usable_interfaces(self.include_loopback)?;
        if let Some(filter) = &self.filter {
            current.retain(|nic| filter(nic));
        }
        let mut known = self.known.lock().unwrap();
        Ok(diff_known(&mut known, current))
    }
}

async fn poll_loop(monitor: Weak<MonitorInner>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        let Some(monitor) = monitor.upgrade() else {
            return;
        };
        match monitor.refresh() {
            Ok(snapshot) if snapshot.changed() => {
                debug!(
                    added = snapshot.added.len(),
                    removed = snapshot.removed.len(),
                    "network interfaces changed"
                );
                let callback = monitor.callback.lock().unwrap().clone();
                if let Some(callback) = callback {
                    callback(snapshot);
                }
            }
            Ok(_) => {}
            Err(err) => warn!("interface snapshot failed: {}", err),
        }
    }
}
