// Copyright (C) 2019-2020  Pierre Krieger
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Transmission Control Protocol.
//!
//! Each connection is a record of a fixed-size pool, with one circular buffer per direction.
//! Received segments are processed immediately by the [`input`] module. Outgoing segments are
//! produced either as a direct response to a received segment, or when the main loop
//! [polls](output::poll) the connection.
//!
//! There is no congestion control: the amount of data in flight is bounded only by the window
//! advertised by the peer. Retransmissions use a fixed timeout. Urgent data isn't supported.

pub(crate) mod buffer;
pub(crate) mod connection;
pub(crate) mod input;
pub(crate) mod output;
pub(crate) mod pool;
pub(crate) mod segment;

pub(crate) use self::pool::TcpConnections;

/// State of a TCP connection, as defined in RFC 793.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpState {
    /// No connection. Also reported for handles whose connection has been freed.
    Closed,
    /// Waiting for a connection request.
    Listen,
    /// Connection request sent, waiting for the answer.
    SynSent,
    /// Connection request received and answered, waiting for the acknowledgement.
    SynReceived,
    /// Data can flow in both directions.
    Established,
    /// Closed locally, our FIN not acknowledged yet.
    FinWait1,
    /// Closed locally and acknowledged, the peer can still send data.
    FinWait2,
    /// Closed by the peer, we can still send data.
    CloseWait,
    /// Both sides closed simultaneously, our FIN not acknowledged yet.
    Closing,
    /// Closed by the peer then locally, waiting for the acknowledgement of our FIN.
    LastAck,
    /// Both sides closed, waiting for delayed segments to expire.
    TimeWait,
}

impl TcpState {
    /// Returns true if the initial sequence numbers of both sides are known.
    pub fn is_synchronized(&self) -> bool {
        !matches!(
            self,
            TcpState::Closed | TcpState::Listen | TcpState::SynSent
        )
    }

    /// Returns true if the local side can still queue data.
    pub(crate) fn can_send(&self) -> bool {
        matches!(
            self,
            TcpState::SynSent
                | TcpState::SynReceived
                | TcpState::Established
                | TcpState::CloseWait
        )
    }

    /// Returns true if data received in this state is delivered to the application.
    pub(crate) fn can_receive(&self) -> bool {
        matches!(
            self,
            TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2
        )
    }
}

/// Identifies a TCP connection of a [`NetStack`](crate::NetStack).
///
/// A handle becomes stale once its connection is freed, after which its state is reported as
/// [`TcpState::Closed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcpHandle {
    pub(crate) slot: usize,
    pub(crate) generation: u32,
}

/// Listening port that hands off connections one by one.
///
/// See [`NetStack::tcp_accept`](crate::NetStack::tcp_accept).
#[derive(Debug)]
pub struct TcpListener {
    pub(crate) port: u16,
    /// Connection currently in the `LISTEN` state, or waiting to be accepted.
    pub(crate) current: Option<TcpHandle>,
}

impl TcpListener {
    /// Returns the port the listener is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Error that can happen on a TCP operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TcpError {
    /// A listener already owns this port.
    #[error("Port {0} already has a listener")]
    PortListened(u16),
    /// No free connection record, and none in `TIME_WAIT` to reclaim.
    #[error("No free TCP connection")]
    PoolFull,
    /// Couldn't find a free port in the ephemeral range.
    #[error("No ephemeral port available")]
    NoEphemeralPort,
    /// The handle refers to a connection that has been freed.
    #[error("Invalid or closed TCP handle")]
    InvalidHandle,
    /// The connection isn't in a state where data can be sent.
    #[error("Connection not open for sending")]
    NotConnected,
    /// The connection has been closed locally.
    #[error("Connection closed for writing")]
    WriteClosed,
}
