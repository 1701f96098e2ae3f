// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Raw IPv6 PIM socket
//!
//! One socket per process, bound to IP protocol 103. Membership in ff02::d is
//! toggled per link. Received datagrams carry their destination address and
//! arrival interface via `IPV6_PKTINFO`; outbound datagrams use the same
//! ancillary data to pick the source address and the outgoing link.
//!
//! The kernel fills in the PIM checksum (`IPV6_CHECKSUM`, offset 2), so
//! payloads go out with a zero checksum field.

use std::io;
use std::mem;
use std::net::Ipv6Addr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};

use crate::protocols::{ALL_PIM_ROUTERS, IPPROTO_PIM};

/// Receive buffer size; larger datagrams are dropped
pub const RECV_BUFFER_LEN: usize = 1500;

// Not exported by libc for every target
const IPV6_CHECKSUM: libc::c_int = 7;
const PIM_CHECKSUM_OFFSET: libc::c_int = 2;

/// One received PIM datagram with its addressing metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub source: Ipv6Addr,
    pub destination: Ipv6Addr,
    pub ifindex: u32,
    pub payload: Vec<u8>,
}

/// Outbound side of the PIM socket, as seen by the engine
///
/// Implemented by `RawPimSocket` and by recording mocks in tests.
pub trait PimTransport {
    /// Join ALL-PIM-ROUTERS on a link
    fn join_group(&self, ifindex: u32) -> Result<()>;

    /// Leave ALL-PIM-ROUTERS on a link
    fn leave_group(&self, ifindex: u32) -> Result<()>;

    /// Send `payload` out of `ifindex`. `source` is a hint the kernel may override.
    fn send(
        &self,
        source: Option<Ipv6Addr>,
        destination: Ipv6Addr,
        ifindex: u32,
        payload: &[u8],
    ) -> Result<usize>;
}

impl<T: PimTransport + ?Sized> PimTransport for Arc<T> {
    fn join_group(&self, ifindex: u32) -> Result<()> {
        (**self).join_group(ifindex)
    }

    fn leave_group(&self, ifindex: u32) -> Result<()> {
        (**self).leave_group(ifindex)
    }

    fn send(
        &self,
        source: Option<Ipv6Addr>,
        destination: Ipv6Addr,
        ifindex: u32,
        payload: &[u8],
    ) -> Result<usize> {
        (**self).send(source, destination, ifindex, payload)
    }
}

/// Raw PIM socket (non-blocking, for use with `tokio::io::unix::AsyncFd`)
pub struct RawPimSocket {
    socket: Socket,
}

fn setsockopt_int(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let result = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn in6_addr(addr: &Ipv6Addr) -> libc::in6_addr {
    libc::in6_addr {
        s6_addr: addr.octets(),
    }
}

impl RawPimSocket {
    /// Create and configure the PIM socket
    ///
    /// Needs CAP_NET_RAW. The daemon cannot run without it.
    pub fn open() -> Result<Self> {
        let socket = Socket::new(
            Domain::IPV6,
            Type::RAW,
            Some(Protocol::from(i32::from(IPPROTO_PIM))),
        )
        .context("Failed to create PIM raw socket")?;

        socket
            .set_nonblocking(true)
            .context("Failed to set PIM socket non-blocking")?;
        socket
            .set_reuse_address(true)
            .context("Failed to set SO_REUSEADDR on PIM socket")?;
        socket
            .set_multicast_loop_v6(false)
            .context("Failed to disable multicast loopback on PIM socket")?;
        // PIM control messages never leave the link
        socket
            .set_multicast_hops_v6(1)
            .context("Failed to set multicast hop limit on PIM socket")?;

        let fd = socket.as_raw_fd();
        setsockopt_int(fd, libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO, 1)
            .context("Failed to set IPV6_RECVPKTINFO on PIM socket")?;
        setsockopt_int(fd, libc::IPPROTO_IPV6, IPV6_CHECKSUM, PIM_CHECKSUM_OFFSET)
            .context("Failed to set IPV6_CHECKSUM on PIM socket")?;

        Ok(Self { socket })
    }

    /// Read one datagram without blocking
    ///
    /// Returns `Ok(None)` when the datagram did not fit in `buf` and was
    /// discarded. `WouldBlock` is passed through for the readiness loop.
    pub fn try_recv(&self, buf: &mut [u8]) -> io::Result<Option<Datagram>> {
        let mut cmsg_buf = [0u64; 16];
        let mut from: libc::sockaddr_in6 = unsafe { mem::zeroed() };

        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = &mut from as *mut _ as *mut libc::c_void;
        msg.msg_namelen = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = mem::size_of_val(&cmsg_buf) as _;

        let n = unsafe { libc::recvmsg(self.socket.as_raw_fd(), &mut msg, 0) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        if msg.msg_flags & libc::MSG_TRUNC != 0 {
            return Ok(None);
        }

        let mut destination = Ipv6Addr::UNSPECIFIED;
        let mut ifindex = 0;

        // Walk control messages for IPV6_PKTINFO
        let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
        while !cmsg.is_null() {
            let cmsg_ref = unsafe { &*cmsg };
            if cmsg_ref.cmsg_level == libc::IPPROTO_IPV6 && cmsg_ref.cmsg_type == libc::IPV6_PKTINFO {
                let data = unsafe { libc::CMSG_DATA(cmsg) };
                let info: libc::in6_pktinfo =
                    unsafe { std::ptr::read_unaligned(data as *const libc::in6_pktinfo) };
                destination = Ipv6Addr::from(info.ipi6_addr.s6_addr);
                ifindex = info.ipi6_ifindex as u32;
                break;
            }
            cmsg = unsafe { libc::CMSG_NXTHDR(&msg, cmsg) };
        }

        Ok(Some(Datagram {
            source: Ipv6Addr::from(from.sin6_addr.s6_addr),
            destination,
            ifindex,
            payload: buf[..n as usize].to_vec(),
        }))
    }
}

impl PimTransport for RawPimSocket {
    fn join_group(&self, ifindex: u32) -> Result<()> {
        self.socket
            .join_multicast_v6(&ALL_PIM_ROUTERS, ifindex)
            .with_context(|| format!("Failed to join {} on ifindex {}", ALL_PIM_ROUTERS, ifindex))
    }

    fn leave_group(&self, ifindex: u32) -> Result<()> {
        self.socket
            .leave_multicast_v6(&ALL_PIM_ROUTERS, ifindex)
            .with_context(|| format!("Failed to leave {} on ifindex {}", ALL_PIM_ROUTERS, ifindex))
    }

    fn send(
        &self,
        source: Option<Ipv6Addr>,
        destination: Ipv6Addr,
        ifindex: u32,
        payload: &[u8],
    ) -> Result<usize> {
        let mut to: libc::sockaddr_in6 = unsafe { mem::zeroed() };
        to.sin6_family = libc::AF_INET6 as libc::sa_family_t;
        to.sin6_addr = in6_addr(&destination);
        to.sin6_scope_id = ifindex;

        let mut iov = libc::iovec {
            iov_base: payload.as_ptr() as *mut libc::c_void,
            iov_len: payload.len(),
        };

        let pktinfo = libc::in6_pktinfo {
            ipi6_addr: in6_addr(&source.unwrap_or(Ipv6Addr::UNSPECIFIED)),
            ipi6_ifindex: ifindex as _,
        };
        let space = unsafe { libc::CMSG_SPACE(mem::size_of::<libc::in6_pktinfo>() as u32) } as usize;
        let mut cmsg_buf = [0u64; 8];
        if space > mem::size_of_val(&cmsg_buf) {
            anyhow::bail!("IPV6_PKTINFO control message does not fit ({} bytes)", space);
        }

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = &mut to as *mut _ as *mut libc::c_void;
        msg.msg_namelen = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = space as _;

        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            if cmsg.is_null() {
                anyhow::bail!("No room for IPV6_PKTINFO control message");
            }
            (*cmsg).cmsg_level = libc::IPPROTO_IPV6;
            (*cmsg).cmsg_type = libc::IPV6_PKTINFO;
            (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<libc::in6_pktinfo>() as u32) as _;
            std::ptr::write_unaligned(libc::CMSG_DATA(cmsg) as *mut libc::in6_pktinfo, pktinfo);
        }

        let n = unsafe { libc::sendmsg(self.socket.as_raw_fd(), &msg, 0) };
        if n < 0 {
            return Err(anyhow::anyhow!(
                "Failed to send PIM message on ifindex {}: {}",
                ifindex,
                io::Error::last_os_error()
            ));
        }
        Ok(n as usize)
    }
}

impl AsRawFd for RawPimSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}
