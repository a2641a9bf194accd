//! SocketCAN transport.
//!
//! Raw PF_CAN socket plus a poll-bounded receive. The control loop owns
//! no timer of its own; bounding the receive wait is what lets it
//! observe the shutdown flag while the bus is quiet, so shutdown
//! latency is capped by the poll window instead of an arbitrary
//! blocking read.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use thiserror::Error;
use tracing::debug;

/// Maximum payload length of a classic CAN frame.
pub const CAN_MAX_DLEN: usize = 8;

/// Error types for transport operations.
#[derive(Debug, Error)]
pub enum CanError {
    /// The interface name does not resolve to a CAN interface.
    #[error("CAN interface {0:?} not found")]
    InterfaceNotFound(String),

    /// Socket creation or bind failed.
    #[error("failed to open CAN socket: {0}")]
    Open(#[source] io::Error),

    /// Readiness poll failed.
    #[error("poll on CAN socket failed: {0}")]
    Poll(#[source] io::Error),

    /// Frame read failed.
    #[error("CAN receive failed: {0}")]
    Receive(#[source] io::Error),

    /// Frame write failed.
    #[error("CAN send failed: {0}")]
    Send(#[source] io::Error),
}

/// One frame as delivered by the bus, before any filtering.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame {
    /// Numeric identifier with the flag bits stripped.
    pub id: u32,
    /// Extended (29-bit) addressing.
    pub extended: bool,
    /// Number of valid payload bytes.
    pub len: usize,
    /// Payload, zero-padded past `len`.
    pub data: [u8; CAN_MAX_DLEN],
}

/// Bus access seam consumed by the control loop.
///
/// `receive` blocks for at most `timeout`; `Ok(None)` means the window
/// elapsed (or the read was interrupted) with no frame — the caller
/// re-checks its shutdown flag and tries again.
pub trait CanTransport {
    /// Wait for the next frame, bounded by `timeout`.
    fn receive(&mut self, timeout: Duration) -> Result<Option<RawFrame>, CanError>;

    /// Send one frame with the given identifier.
    fn send(&mut self, id: u32, payload: &[u8]) -> Result<(), CanError>;
}

/// Raw SocketCAN implementation of [`CanTransport`].
pub struct SocketCan {
    fd: OwnedFd,
    interface: String,
}

impl SocketCan {
    /// Open and bind a PF_CAN raw socket on the named interface.
    ///
    /// # Errors
    ///
    /// [`CanError::InterfaceNotFound`] if the name does not resolve,
    /// [`CanError::Open`] for socket/bind failures.
    pub fn open(interface: &str) -> Result<Self, CanError> {
        let name = CString::new(interface)
            .map_err(|_| CanError::InterfaceNotFound(interface.to_string()))?;
        let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if ifindex == 0 {
            return Err(CanError::InterfaceNotFound(interface.to_string()));
        }

        let raw = unsafe { libc::socket(libc::PF_CAN, libc::SOCK_RAW, libc::CAN_RAW) };
        if raw < 0 {
            return Err(CanError::Open(io::Error::last_os_error()));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut addr: libc::sockaddr_can = unsafe { mem::zeroed() };
        addr.can_family = libc::AF_CAN as libc::sa_family_t;
        addr.can_ifindex = ifindex as libc::c_int;

        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
                mem::size_of::<libc::sockaddr_can>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(CanError::Open(io::Error::last_os_error()));
        }

        debug!("bound CAN raw socket on {interface} (ifindex {ifindex})");
        Ok(Self {
            fd,
            interface: interface.to_string(),
        })
    }

    /// Interface this socket is bound to.
    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl CanTransport for SocketCan {
    fn receive(&mut self, timeout: Duration) -> Result<Option<RawFrame>, CanError> {
        let timeout = u16::try_from(timeout.as_millis())
            .map(PollTimeout::from)
            .unwrap_or(PollTimeout::MAX);

        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        let ready = poll(&mut fds, timeout)
            .map_err(|e| CanError::Poll(io::Error::from_raw_os_error(e as i32)))?;
        if ready == 0 {
            return Ok(None);
        }

        let mut frame: libc::can_frame = unsafe { mem::zeroed() };
        let n = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                std::ptr::addr_of_mut!(frame).cast::<libc::c_void>(),
                mem::size_of::<libc::can_frame>(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(CanError::Receive(err));
        }
        if (n as usize) < mem::size_of::<libc::can_frame>() {
            // Partial read; skip the frame.
            return Ok(None);
        }

        let extended = frame.can_id & libc::CAN_EFF_FLAG != 0;
        let mask = if extended {
            libc::CAN_EFF_MASK
        } else {
            libc::CAN_SFF_MASK
        };
        Ok(Some(RawFrame {
            id: frame.can_id & mask,
            extended,
            len: usize::from(frame.can_dlc).min(CAN_MAX_DLEN),
            data: frame.data,
        }))
    }

    fn send(&mut self, id: u32, payload: &[u8]) -> Result<(), CanError> {
        let len = payload.len().min(CAN_MAX_DLEN);
        let mut frame: libc::can_frame = unsafe { mem::zeroed() };
        frame.can_id = id;
        frame.can_dlc = len as u8;
        frame.data[..len].copy_from_slice(&payload[..len]);

        let n = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                std::ptr::addr_of!(frame).cast::<libc::c_void>(),
                mem::size_of::<libc::can_frame>(),
            )
        };
        if n != mem::size_of::<libc::can_frame>() as isize {
            return Err(CanError::Send(io::Error::last_os_error()));
        }
        Ok(())
    }
}
