// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Protocol error codes
//!
//! Every reply to the native transport starts with a signed integer: zero or a
//! positive byte count on success, a negated errno on failure. The codes below
//! use the Linux numbering on every platform because that is what the native
//! layer translates from. The two codes this layer synthesizes on its own
//! (timeouts and missing xattrs) are picked per target instead.

use std::fmt;

/// Reply code for a handler that did not answer within its timeout.
#[cfg(target_os = "macos")]
pub const TIMEOUT_ERRNO: i32 = -60;
#[cfg(not(target_os = "macos"))]
pub const TIMEOUT_ERRNO: i32 = -110;

/// Reply code for `getxattr` when the attribute has no value.
#[cfg(target_os = "macos")]
pub const NO_XATTR_ERRNO: i32 = -93;
#[cfg(not(target_os = "macos"))]
pub const NO_XATTR_ERRNO: i32 = -61;

/// Code returned by [`Errno::code_for_name`] for names it does not know.
pub const UNKNOWN_ERRNO: i32 = -1;

macro_rules! errno_table {
    ($($variant:ident = $code:literal),+ $(,)?) => {
        /// Closed set of protocol error kinds understood by the native transport.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum Errno {
            $($variant,)+
        }

        impl Errno {
            /// Every error kind, in code order.
            pub const ALL: &'static [Errno] = &[$(Errno::$variant,)+];

            /// Negative reply code for this error.
            pub const fn code(self) -> i32 {
                match self {
                    $(Errno::$variant => $code,)+
                }
            }

            /// Symbolic name, e.g. `"ENOENT"`.
            pub const fn name(self) -> &'static str {
                match self {
                    $(Errno::$variant => stringify!($variant),)+
                }
            }

            /// Reverse lookup of [`Errno::code`].
            pub fn from_code(code: i32) -> Option<Errno> {
                match code {
                    $($code => Some(Errno::$variant),)+
                    _ => None,
                }
            }

            fn lookup_upper(name: &str) -> Option<Errno> {
                match name {
                    $(stringify!($variant) => Some(Errno::$variant),)+
                    "EWOULDBLOCK" => Some(Errno::EAGAIN),
                    "EDEADLOCK" => Some(Errno::EDEADLK),
                    _ => None,
                }
            }
        }
    };
}

errno_table! {
    EPERM = -1,
    ENOENT = -2,
    ESRCH = -3,
    EINTR = -4,
    EIO = -5,
    ENXIO = -6,
    E2BIG = -7,
    ENOEXEC = -8,
    EBADF = -9,
    ECHILD = -10,
    EAGAIN = -11,
    ENOMEM = -12,
    EACCES = -13,
    EFAULT = -14,
    ENOTBLK = -15,
    EBUSY = -16,
    EEXIST = -17,
    EXDEV = -18,
    ENODEV = -19,
    ENOTDIR = -20,
    EISDIR = -21,
    EINVAL = -22,
    ENFILE = -23,
    EMFILE = -24,
    ENOTTY = -25,
    ETXTBSY = -26,
    EFBIG = -27,
    ENOSPC = -28,
    ESPIPE = -29,
    EROFS = -30,
    EMLINK = -31,
    EPIPE = -32,
    EDOM = -33,
    ERANGE = -34,
    EDEADLK = -35,
    ENAMETOOLONG = -36,
    ENOLCK = -37,
    ENOSYS = -38,
    ENOTEMPTY = -39,
    ELOOP = -40,
    ENOMSG = -42,
    EIDRM = -43,
    ECHRNG = -44,
    EL2NSYNC = -45,
    EL3HLT = -46,
    EL3RST = -47,
    ELNRNG = -48,
    EUNATCH = -49,
    ENOCSI = -50,
    EL2HLT = -51,
    EBADE = -52,
    EBADR = -53,
    EXFULL = -54,
    ENOANO = -55,
    EBADRQC = -56,
    EBADSLT = -57,
    EBFONT = -59,
    ENOSTR = -60,
    ENODATA = -61,
    ETIME = -62,
    ENOSR = -63,
    ENONET = -64,
    ENOPKG = -65,
    EREMOTE = -66,
    ENOLINK = -67,
    EADV = -68,
    ESRMNT = -69,
    ECOMM = -70,
    EPROTO = -71,
    EMULTIHOP = -72,
    EDOTDOT = -73,
    EBADMSG = -74,
    EOVERFLOW = -75,
    ENOTUNIQ = -76,
    EBADFD = -77,
    EREMCHG = -78,
    ELIBACC = -79,
    ELIBBAD = -80,
    ELIBSCN = -81,
    ELIBMAX = -82,
    ELIBEXEC = -83,
    EILSEQ = -84,
    ERESTART = -85,
    ESTRPIPE = -86,
    EUSERS = -87,
    ENOTSOCK = -88,
    EDESTADDRREQ = -89,
    EMSGSIZE = -90,
    EPROTOTYPE = -91,
    ENOPROTOOPT = -92,
    EPROTONOSUPPORT = -93,
    ESOCKTNOSUPPORT = -94,
    EOPNOTSUPP = -95,
    EPFNOSUPPORT = -96,
    EAFNOSUPPORT = -97,
    EADDRINUSE = -98,
    EADDRNOTAVAIL = -99,
    ENETDOWN = -100,
    ENETUNREACH = -101,
    ENETRESET = -102,
    ECONNABORTED = -103,
    ECONNRESET = -104,
    ENOBUFS = -105,
    EISCONN = -106,
    ENOTCONN = -107,
    ESHUTDOWN = -108,
    ETOOMANYREFS = -109,
    ETIMEDOUT = -110,
    ECONNREFUSED = -111,
    EHOSTDOWN = -112,
    EHOSTUNREACH = -113,
    EALREADY = -114,
    EINPROGRESS = -115,
    ESTALE = -116,
    EUCLEAN = -117,
    ENOTNAM = -118,
    ENAVAIL = -119,
    EISNAM = -120,
    EREMOTEIO = -121,
    EDQUOT = -122,
    ENOMEDIUM = -123,
    EMEDIUMTYPE = -124,
}

impl Errno {
    /// Case-insensitive lookup by symbolic name, accepting the
    /// `EWOULDBLOCK` and `EDEADLOCK` aliases.
    pub fn from_name(name: &str) -> Option<Errno> {
        Self::lookup_upper(&name.to_ascii_uppercase())
    }

    /// Reply code for a symbolic name; unknown or empty names become `-1`.
    pub fn code_for_name(name: &str) -> i32 {
        Self::from_name(name).map_or(UNKNOWN_ERRNO, Errno::code)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

impl std::error::Error for Errno {}

impl From<Errno> for i32 {
    fn from(errno: Errno) -> i32 {
        errno.code()
    }
}

/// Result type returned by filesystem operation handlers.
pub type OpResult<T> = Result<T, Errno>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for errno in Errno::ALL {
            assert!(errno.code() < 0, "{} must be negative", errno.name());
            assert!(seen.insert(errno.code()), "duplicate code for {}", errno.name());
            assert_eq!(Errno::from_code(errno.code()), Some(*errno));
        }
    }

    #[test]
    fn name_lookup_is_case_insensitive_with_aliases() {
        assert_eq!(Errno::from_name("enoent"), Some(Errno::ENOENT));
        assert_eq!(Errno::from_name("ENOTCONN").map(Errno::code), Some(-107));
        assert_eq!(Errno::code_for_name("ewouldblock"), -11);
        assert_eq!(Errno::code_for_name("EDEADLOCK"), -35);
        assert_eq!(Errno::code_for_name("not-an-errno"), UNKNOWN_ERRNO);
        assert_eq!(Errno::code_for_name(""), UNKNOWN_ERRNO);
    }

    #[test]
    fn platform_codes_match_host_errno() {
        assert_eq!(TIMEOUT_ERRNO, -libc::ETIMEDOUT);
        #[cfg(target_os = "linux")]
        assert_eq!(NO_XATTR_ERRNO, -libc::ENODATA);
    }
}
