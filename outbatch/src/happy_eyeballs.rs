//! Dual-path selector ("happy eyeballs").
//!
//! A connection racing two paths (typically an IPv6 and an IPv4 peer
//! address) writes to the primary path first, adds the alternate once the
//! attempt delay expires, and commits to whichever path is validated
//! first. After that the state is frozen.
//!
//! The owning connection is the only mutator. [`BatchWriter`] holds a
//! shared borrow and reads [`HappyEyeballs::destinations`] once per flush.
//!
//! [`BatchWriter`]: crate::BatchWriter

use std::fmt;
use std::net::SocketAddr;

/// One of the two raced paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathId {
    Primary,
    Alternate,
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathId::Primary => f.write_str("primary"),
            PathId::Alternate => f.write_str("alternate"),
        }
    }
}

/// Where a flush goes right now, primary first. Never empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destinations {
    first: (PathId, SocketAddr),
    second: Option<(PathId, SocketAddr)>,
}

impl Destinations {
    /// A peer with no racing.
    pub(crate) fn single(addr: SocketAddr) -> Self {
        Self::one(PathId::Primary, addr)
    }

    fn one(path: PathId, addr: SocketAddr) -> Self {
        Self {
            first: (path, addr),
            second: None,
        }
    }

    fn two(primary: SocketAddr, alternate: SocketAddr) -> Self {
        Self {
            first: (PathId::Primary, primary),
            second: Some((PathId::Alternate, alternate)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PathId, SocketAddr)> {
        std::iter::once(self.first).chain(self.second)
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        1 + usize::from(self.second.is_some())
    }

    pub fn first(&self) -> (PathId, SocketAddr) {
        self.first
    }
}

/// Path racing state owned by a connection.
#[derive(Debug, Clone)]
pub struct HappyEyeballs {
    primary: SocketAddr,
    alternate: Option<SocketAddr>,
    write_primary: bool,
    write_alternate: bool,
    confirmed: Option<PathId>,
}

impl HappyEyeballs {
    /// A single known path. Already confirmed.
    pub fn single(addr: SocketAddr) -> Self {
        Self {
            primary: addr,
            alternate: None,
            write_primary: true,
            write_alternate: false,
            confirmed: Some(PathId::Primary),
        }
    }

    /// Start racing. Only the primary path is written until
    /// [`on_attempt_delay_expired`](Self::on_attempt_delay_expired).
    pub fn race(primary: SocketAddr, alternate: SocketAddr) -> Self {
        Self {
            primary,
            alternate: Some(alternate),
            write_primary: true,
            write_alternate: false,
            confirmed: None,
        }
    }

    pub fn primary(&self) -> SocketAddr {
        self.primary
    }

    pub fn alternate(&self) -> Option<SocketAddr> {
        self.alternate
    }

    pub fn addr(&self, path: PathId) -> Option<SocketAddr> {
        match path {
            PathId::Primary => Some(self.primary),
            PathId::Alternate => self.alternate,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed.is_some()
    }

    pub fn confirmed_path(&self) -> Option<PathId> {
        self.confirmed
    }

    /// Whether `path` currently receives writes.
    pub fn is_active(&self, path: PathId) -> bool {
        match path {
            PathId::Primary => self.write_primary,
            PathId::Alternate => self.write_alternate && self.alternate.is_some(),
        }
    }

    /// The connection attempt delay fired without a validated path:
    /// start writing to the alternate as well.
    pub fn on_attempt_delay_expired(&mut self) {
        if self.confirmed.is_some() || self.alternate.is_none() {
            return;
        }
        self.write_alternate = true;
    }

    /// The peer answered on `path`. Commit to it for the rest of the
    /// connection.
    pub fn on_path_validated(&mut self, path: PathId) {
        if self.confirmed.is_some() {
            return;
        }
        if path == PathId::Alternate && self.alternate.is_none() {
            return;
        }
        self.confirmed = Some(path);
        self.write_primary = path == PathId::Primary;
        self.write_alternate = path == PathId::Alternate;
    }

    /// Stop writing to `path` after a send failure, unless it is the last
    /// active path.
    pub fn on_write_failed(&mut self, path: PathId) {
        if self.confirmed.is_some() {
            return;
        }
        match path {
            PathId::Primary if self.is_active(PathId::Alternate) => self.write_primary = false,
            PathId::Alternate if self.write_primary => self.write_alternate = false,
            _ => {}
        }
    }

    /// Active destinations in write order.
    pub fn destinations(&self) -> Destinations {
        match (self.is_active(PathId::Primary), self.alternate) {
            (true, Some(alt)) if self.is_active(PathId::Alternate) => {
                Destinations::two(self.primary, alt)
            }
            (false, Some(alt)) => Destinations::one(PathId::Alternate, alt),
            _ => Destinations::one(PathId::Primary, self.primary),
        }
    }

    /// First destination written on each flush.
    pub fn preferred(&self) -> SocketAddr {
        self.destinations().first().1
    }
}

impl From<SocketAddr> for HappyEyeballs {
    fn from(addr: SocketAddr) -> Self {
        Self::single(addr)
    }
}
