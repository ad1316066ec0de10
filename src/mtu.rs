//! Local interface MTU probe for block-size validation.
//!
//! A negotiated block must fit one unfragmented datagram on every interface
//! the reply could arrive on, so the proposal is capped at the smallest MTU
//! of the peer's address family minus the per-packet overhead.

use tracing::{debug, warn};

use crate::MIN_BLOCK_SIZE;

/// UDP(8) + TFTP(4) + maximum IP header(60).
pub const PACKET_OVERHEAD: usize = 72;

/// Largest DATA payload that fits an interface of the given MTU.
fn residual(mtu: usize) -> usize {
    mtu.saturating_sub(PACKET_OVERHEAD).max(MIN_BLOCK_SIZE)
}

/// Caps a proposed block size at what the local interfaces can carry.
/// Returns the proposal unchanged when interface enumeration is unavailable.
pub fn clamp_block_size(proposed: usize, ipv4: bool) -> usize {
    let Some(min_mtu) = min_interface_mtu(ipv4) else {
        debug!("interface MTU enumeration unavailable, keeping blksize {}", proposed);
        return proposed;
    };

    let limit = residual(min_mtu);
    if proposed > limit {
        warn!(
            "blksize {} exceeds what the smallest local interface (MTU {}) can carry, using {}",
            proposed, min_mtu, limit
        );
        limit
    } else {
        proposed
    }
}

/// Minimum MTU across up interfaces carrying an address of the wanted family.
#[cfg(target_os = "linux")]
fn min_interface_mtu(ipv4: bool) -> Option<usize> {
    use nix::ifaddrs::getifaddrs;
    use nix::net::if_::InterfaceFlags;

    let addrs = match getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!("getifaddrs failed: {}", e);
            return None;
        }
    };

    let mut min_mtu: Option<usize> = None;
    for ifaddr in addrs {
        if !ifaddr.flags.contains(InterfaceFlags::IFF_UP) {
            continue;
        }
        let family_matches = ifaddr.address.is_some_and(|ss| {
            if ipv4 {
                ss.as_sockaddr_in().is_some()
            } else {
                ss.as_sockaddr_in6().is_some()
            }
        });
        if !family_matches {
            continue;
        }
        if let Some(mtu) = interface_mtu(&ifaddr.interface_name) {
            debug!("interface {} mtu {}", ifaddr.interface_name, mtu);
            min_mtu = Some(min_mtu.map_or(mtu, |m| m.min(mtu)));
        }
    }
    min_mtu
}

#[cfg(not(target_os = "linux"))]
fn min_interface_mtu(_ipv4: bool) -> Option<usize> {
    // SIOCGIFMTU handling varies across the BSDs; the check is advisory, so
    // it is skipped where it has not been wired up.
    None
}

/// SIOCGIFMTU on a scratch datagram socket.
#[cfg(target_os = "linux")]
fn interface_mtu(name: &str) -> Option<usize> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return None;
    }

    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    let name_bytes = name.as_bytes();
    if name_bytes.len() >= ifr.ifr_name.len() {
        unsafe { libc::close(fd) };
        return None;
    }
    for (dst, src) in ifr.ifr_name.iter_mut().zip(name_bytes) {
        *dst = *src as libc::c_char;
    }

    let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFMTU as _, &mut ifr) };
    unsafe { libc::close(fd) };

    if ret == 0 {
        Some(unsafe { ifr.ifr_ifru.ifru_mtu } as usize)
    } else {
        None
    }
}
