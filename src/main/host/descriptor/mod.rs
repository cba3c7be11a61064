use crate::host::network::namespace::AssociationError;

pub mod tcp;

/// Identifies a socket within its host. Handles are never reused by a host, so a handle for a
/// socket that has been destroyed stays invalid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketHandle(u32);

impl From<u32> for SocketHandle {
    fn from(val: u32) -> Self {
        Self(val)
    }
}

impl From<SocketHandle> for u32 {
    fn from(val: SocketHandle) -> Self {
        val.0
    }
}

impl std::fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket:{}", self.0)
    }
}

/// Errors from socket operations on a host. Most of these are normal protocol outcomes (for
/// example [`SocketError::Accept`] with [`::tcp::AcceptError::NothingToAccept`]) rather than
/// failures.
#[derive(Debug)]
pub enum SocketError {
    /// The socket doesn't exist, or has been destroyed.
    InvalidHandle,
    /// An accepted connection couldn't be associated with its address.
    Association(AssociationError),
    Listen(::tcp::ListenError<AssociationError>),
    Connect(::tcp::ConnectError<AssociationError>),
    Accept(::tcp::AcceptError),
    Send(::tcp::SendError),
    Recv(::tcp::RecvError),
    Close(::tcp::CloseError),
    Shutdown(::tcp::ShutdownError),
    CloseTimer(::tcp::CloseTimerError),
}

impl SocketError {
    /// Whether the operation would have to wait for more simulated time to pass (an empty or full
    /// buffer, or no connection ready to accept).
    pub fn is_would_block(&self) -> bool {
        matches!(
            self,
            Self::Accept(::tcp::AcceptError::NothingToAccept)
                | Self::Send(::tcp::SendError::Full)
                | Self::Recv(::tcp::RecvError::Empty)
        )
    }
}

impl std::fmt::Display for SocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidHandle => write!(f, "Invalid socket handle"),
            Self::Association(e) => write!(f, "{e}"),
            Self::Listen(::tcp::ListenError::FailedAssociation(e))
            | Self::Connect(::tcp::ConnectError::FailedAssociation(e)) => write!(f, "{e}"),
            Self::Listen(e) => write!(f, "Listen failed: {e:?}"),
            Self::Connect(e) => write!(f, "Connect failed: {e:?}"),
            Self::Accept(e) => write!(f, "Accept failed: {e:?}"),
            Self::Send(e) => write!(f, "Send failed: {e:?}"),
            Self::Recv(e) => write!(f, "Receive failed: {e:?}"),
            Self::Close(e) => write!(f, "Close failed: {e:?}"),
            Self::Shutdown(e) => write!(f, "Shutdown failed: {e:?}"),
            Self::CloseTimer(e) => write!(f, "Close timer failed: {e:?}"),
        }
    }
}

impl std::error::Error for SocketError {}

macro_rules! from_tcp_error {
    ($variant:ident, $err:ty) => {
        impl From<$err> for SocketError {
            fn from(e: $err) -> Self {
                Self::$variant(e)
            }
        }
    };
}

from_tcp_error!(Association, AssociationError);
from_tcp_error!(Listen, ::tcp::ListenError<AssociationError>);
from_tcp_error!(Connect, ::tcp::ConnectError<AssociationError>);
from_tcp_error!(Accept, ::tcp::AcceptError);
from_tcp_error!(Send, ::tcp::SendError);
from_tcp_error!(Recv, ::tcp::RecvError);
from_tcp_error!(Close, ::tcp::CloseError);
from_tcp_error!(Shutdown, ::tcp::ShutdownError);
from_tcp_error!(CloseTimer, ::tcp::CloseTimerError);
