//! Byte streams under the control channel
//!
//! The primary channel is the worker's stdin/stdout. The side channel is a
//! local socket (Unix domain socket or named pipe, via interprocess) that
//! the worker connects to during the handshake.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::common::paths;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[cfg(unix)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericFilePath, ListenerOptions};
}

#[cfg(windows)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
}

use platform::*;

pub use platform::{Listener, Stream};

/// One read half and one write half
pub struct Duplex {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

impl Duplex {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Split a bidirectional stream
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }
}

/// Streams handed to a control channel
pub struct Transport {
    pub primary: Duplex,
    pub side: Option<Duplex>,
}

impl Transport {
    pub fn new(primary: Duplex) -> Self {
        Self {
            primary,
            side: None,
        }
    }

    pub fn with_side_channel(mut self, side: Duplex) -> Self {
        self.side = Some(side);
        self
    }

    /// Primary channel over this process's stdin/stdout
    pub fn stdio() -> Self {
        Self::new(Duplex::new(tokio::io::stdin(), tokio::io::stdout()))
    }

    /// Two connected in-memory endpoints, both with a side channel
    pub fn pair() -> (Transport, Transport) {
        Self::pair_with_capacity(64 * 1024)
    }

    /// Like [`Transport::pair`], with a bound on bytes buffered per direction
    pub fn pair_with_capacity(capacity: usize) -> (Transport, Transport) {
        let (primary_a, primary_b) = tokio::io::duplex(capacity);
        let (side_a, side_b) = tokio::io::duplex(capacity);

        (
            Transport::new(Duplex::from_stream(primary_a))
                .with_side_channel(Duplex::from_stream(side_a)),
            Transport::new(Duplex::from_stream(primary_b))
                .with_side_channel(Duplex::from_stream(side_b)),
        )
    }
}

/// Bind a side-channel listener under `name`, replacing a stale socket
pub fn bind_side_channel(name: &str) -> io::Result<Listener> {
    paths::ensure_socket_dir()?;
    paths::remove_socket(name)?;

    #[cfg(unix)]
    let listener = {
        let fs_name = name.to_fs_name::<GenericFilePath>()?;
        ListenerOptions::new().name(fs_name).create_tokio()?
    };

    #[cfg(windows)]
    let listener = {
        let ns_name = name.to_ns_name::<GenericNamespaced>()?;
        ListenerOptions::new().name(ns_name).create_tokio()?
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(name, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(listener)
}

/// Wait for the worker to connect
pub async fn accept_side_channel(listener: &Listener) -> io::Result<Stream> {
    listener.accept().await
}

/// Connect to a side channel from the worker side
pub async fn connect_side_channel(name: &str) -> io::Result<Stream> {
    #[cfg(unix)]
    let stream = {
        let fs_name = name.to_fs_name::<GenericFilePath>()?;
        Stream::connect(fs_name).await?
    };

    #[cfg(windows)]
    let stream = {
        let ns_name = name.to_ns_name::<GenericNamespaced>()?;
        Stream::connect(ns_name).await?
    };

    Ok(stream)
}
